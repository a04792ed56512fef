//! Signal-driven run abort.

use tokio_util::sync::CancellationToken;

/// Install a handler that cancels the returned token on SIGINT or SIGTERM.
///
/// Pass the token to the scheduler so outstanding containers are terminated
/// before the process exits.
///
/// # Errors
///
/// Returns the I/O error if a signal handler cannot be registered.
#[cfg(unix)]
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::warn!("received SIGTERM, aborting run");
            }
            _ = sigint.recv() => {
                tracing::warn!("received SIGINT, aborting run");
            }
        }
        trigger.cancel();
    });

    Ok(token)
}

/// Install a handler that cancels the returned token on Ctrl-C.
///
/// # Errors
///
/// Never fails on this platform; the signature matches the unix variant.
#[cfg(not(unix))]
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, aborting run");
            trigger.cancel();
        }
    });
    Ok(token)
}
