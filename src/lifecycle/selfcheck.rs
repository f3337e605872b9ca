//! Startup sanity check and periodic self-dial.
//!
//! Direct-serve mode performs one HTTPS request per hostname before the
//! process declares readiness; a failure there is fatal. Proxy mode keeps a
//! periodic self-dial running to exercise the handshake path; its failures
//! are best-effort telemetry, logged and counted but never treated as a
//! certificate-health signal.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::cert::HostSet;
use crate::observability::metrics;

/// How often the proxy-mode self-dial walks the host set.
pub const SELF_DIAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn host_url(hostname: &str, https_port: u16) -> String {
    if https_port == 443 {
        format!("https://{}/", hostname)
    } else {
        format!("https://{}:{}/", hostname, https_port)
    }
}

/// Issue one HTTPS request to ourselves per hostname; any failure means the
/// serving path is broken and startup must not be declared healthy.
pub async fn sanity_check(hosts: &HostSet, https_port: u16) -> Result<(), Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|err| vec![format!("building http client: {}", err)])?;

    let mut failures = Vec::new();
    for hostname in hosts.iter() {
        let url = host_url(hostname, https_port);
        match client.get(&url).send().await {
            Ok(response) => {
                tracing::debug!(url = %url, status = %response.status(), "sanity check passed");
            }
            Err(err) => {
                tracing::error!(url = %url, error = %err, "sanity check failed");
                failures.push(format!("{}: {}", url, err));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// Periodic best-effort dialer owned by the shutdown coordinator.
pub struct SelfDial {
    hosts: HostSet,
    https_port: u16,
    interval: Duration,
}

impl SelfDial {
    pub fn new(hosts: HostSet, https_port: u16) -> Self {
        Self {
            hosts,
            https_port,
            interval: SELF_DIAL_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Dial every hostname on each tick until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "self-dial disabled: cannot build http client");
                return;
            }
        };

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            hosts = self.hosts.len(),
            "self-dial task starting"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for hostname in self.hosts.iter() {
                        let url = host_url(hostname, self.https_port);
                        match client.get(&url).send().await {
                            Ok(_) => metrics::record_self_dial(true),
                            Err(err) => {
                                metrics::record_self_dial(false);
                                tracing::debug!(url = %url, error = %err, "self-dial failed");
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("self-dial task stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    #[test]
    fn url_omits_default_port() {
        assert_eq!(host_url("example.test", 443), "https://example.test/");
        assert_eq!(host_url("example.test", 8443), "https://example.test:8443/");
    }

    #[tokio::test]
    async fn self_dial_exits_on_shutdown() {
        let hosts = HostSet::new(["localhost"]).unwrap();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(
            SelfDial::new(hosts, 1)
                .with_interval(Duration::from_secs(3600))
                .run(shutdown.subscribe()),
        );

        // Let the task reach its select loop, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("self-dial did not stop on shutdown")
            .unwrap();
    }
}
