//! acmefront binary: point it at hostnames, get HTTPS.
//!
//! ```text
//! acmefront example.test www.example.test                 # direct serve
//! acmefront --backend 127.0.0.1:8000 example.test         # proxy to TCP
//! acmefront --backend /run/app.sock example.test          # proxy to socket
//! ```
//!
//! Certificates are obtained on demand during the first TLS handshake for
//! each hostname and renewed automatically when they near expiry.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acmefront::acme::AcmeClient;
use acmefront::cert::challenge::ChallengeRegistry;
use acmefront::cert::manager::CertManager;
use acmefront::cert::store::CertStore;
use acmefront::cert::HostSet;
use acmefront::config::loader::load_config;
use acmefront::config::validation::validate_config;
use acmefront::config::FrontConfig;
use acmefront::http::connector::BackendTarget;
use acmefront::http::plaintext::plaintext_router;
use acmefront::http::proxy::{direct_router, proxy_router};
use acmefront::http::{HttpsRedirect, UpstreamDirector};
use acmefront::lifecycle::selfcheck::{sanity_check, SelfDial};
use acmefront::lifecycle::signals::wait_for_termination;
use acmefront::lifecycle::Shutdown;
use acmefront::net::orchestrator::{resolve_hosts, Orchestrator};
use acmefront::observability::metrics;

// Exit codes follow sysexits.h, like the tools this replaces.
const EXIT_USAGE: u8 = 64;
const EXIT_NOHOST: u8 = 68;
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_SOFTWARE: u8 = 70;
const EXIT_CANTCREAT: u8 = 73;
const EXIT_CONFIG: u8 = 78;

#[derive(Parser, Debug)]
#[command(
    name = "acmefront",
    about = "TLS-terminating front door with automatic ACME certificates"
)]
struct Args {
    /// Proxy decrypted traffic to this backend (HOST:PORT or a unix socket
    /// path). Without it, requests are answered directly.
    #[arg(long)]
    backend: Option<String>,

    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ACME directory endpoint.
    #[arg(long, env = "ACMEURL")]
    acme_url: Option<String>,

    /// Certificate cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Hostnames to serve.
    #[arg(required = true)]
    hostnames: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    // Config file first, CLI flags on top.
    let mut config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("acmefront: {}: {}", path.display(), err);
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => FrontConfig::default(),
    };
    if let Some(url) = &args.acme_url {
        config.acme.directory_url = url.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.acme.cache_dir = dir.display().to_string();
    }
    if let Err(errors) = validate_config(&config) {
        for err in errors {
            eprintln!("acmefront: {}", err);
        }
        return ExitCode::from(EXIT_CONFIG);
    }

    let backend = match args.backend.as_deref().map(BackendTarget::parse).transpose() {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("acmefront: {}", err);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let hosts = match HostSet::new(&args.hostnames) {
        Ok(hosts) => hosts,
        Err(err) => {
            eprintln!("acmefront: {}", err);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("acmefront={},tower_http=warn", config.observability.log_level).into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = backend
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "direct".to_string());
    tracing::info!(
        hosts = hosts.len(),
        mode = %mode,
        directory = %config.acme.directory_url,
        "acmefront starting"
    );

    if config.observability.metrics_enabled {
        // Address validity was checked above.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    // Certificate plumbing: store → ACME client → manager.
    let store = match CertStore::open(std::path::Path::new(&config.acme.cache_dir)) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "cannot open certificate store");
            return ExitCode::from(EXIT_CANTCREAT);
        }
    };
    let challenges = ChallengeRegistry::new();
    let acme_client = AcmeClient::new(config.acme.clone(), store.clone(), challenges.clone());
    let manager = Arc::new(CertManager::new(
        hosts.clone(),
        store,
        Arc::new(acme_client),
        challenges,
        config.acme.renew_before_days,
    ));

    // Startup-time resolution; operators restart to pick up DNS changes.
    let addresses = match resolve_hosts(&hosts).await {
        Ok(addresses) => addresses,
        Err(err) => {
            tracing::error!(error = %err, "hostname resolution failed");
            return ExitCode::from(EXIT_NOHOST);
        }
    };

    let https_app = match &backend {
        Some(target) => proxy_router(
            target.clone(),
            Arc::new(UpstreamDirector),
            Duration::from_secs(config.timeouts.request_secs),
        ),
        None => direct_router(),
    };
    let plaintext_app = plaintext_router(Arc::clone(&manager), Arc::new(HttpsRedirect));

    let shutdown = Shutdown::new();
    let mut orchestrator = Orchestrator::new(shutdown.clone());
    if let Err(err) = orchestrator
        .start(
            &addresses,
            &config.listener,
            Arc::clone(&manager),
            https_app,
            Some(plaintext_app),
        )
        .await
    {
        tracing::error!(error = %err, "startup failed");
        return ExitCode::from(EXIT_UNAVAILABLE);
    }

    // Direct mode proves the serving path end to end before declaring
    // readiness; proxy mode keeps a periodic self-dial running instead.
    let mut self_dial = None;
    if backend.is_none() {
        if let Err(failures) = sanity_check(&hosts, config.listener.https_port).await {
            for failure in failures {
                tracing::error!(check = %failure, "sanity check failed");
            }
            orchestrator.shutdown_and_drain().await;
            return ExitCode::from(EXIT_SOFTWARE);
        }
        tracing::info!("sanity check passed");
    } else {
        self_dial = Some(tokio::spawn(
            SelfDial::new(hosts.clone(), config.listener.https_port).run(shutdown.subscribe()),
        ));
    }

    tracing::info!("serving; waiting for termination signal");
    if let Err(err) = wait_for_termination().await {
        tracing::error!(error = %err, "cannot install signal handlers");
        orchestrator.shutdown_and_drain().await;
        return ExitCode::from(EXIT_SOFTWARE);
    }

    orchestrator.shutdown_and_drain().await;
    if let Some(task) = self_dial {
        let _ = task.await;
    }

    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}
