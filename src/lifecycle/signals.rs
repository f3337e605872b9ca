//! OS signal handling.
//!
//! SIGHUP, SIGINT and SIGTERM all mean the same thing here: stop accepting,
//! drain, exit. There is no reload signal; configuration is immutable for
//! the process lifetime.

use tokio::signal::unix::{signal, SignalKind};

/// Wait until any termination signal arrives.
pub async fn wait_for_termination() -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = hangup.recv() => tracing::info!(signal = "SIGHUP", "termination signal received"),
        _ = interrupt.recv() => tracing::info!(signal = "SIGINT", "termination signal received"),
        _ = terminate.recv() => tracing::info!(signal = "SIGTERM", "termination signal received"),
    }
    Ok(())
}
