//! OS signal handling.
//!
//! A single async helper that completes when the process receives a
//! termination signal.
//!
//! On Unix both **SIGINT** (Ctrl-C) and **SIGTERM** (default kill signal)
//! are handled; on other platforms only [`tokio::signal::ctrl_c`] is
//! awaited.

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
