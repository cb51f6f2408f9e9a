use tokio::select;
use tokio_util::sync::CancellationToken;

/// Waits for a termination signal and cancels the token, which winds down
/// every periodic module. Detached Windows processes can't receive ctrl-c, so
/// there the daemon effectively runs until killed.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Couldn't install SIGTERM handler");
        select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        };
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    cancelation.cancel();
}
