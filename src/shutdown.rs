use tokio::signal;
use tracing::{error, info};

/// Completes when the process is asked to shut down: ctrl-c, or SIGTERM on
/// unix. The caller flips the shared shutdown watch channel afterwards so
/// every task (indexer, poller, retry loops) drains through the one
/// cancellation path they already observe.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("error listening for ctrl-c: {err}");
        }
    };

    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;

    info!("shutdown signal received");
}
