//! Ctrl+C / SIGTERM handling for graceful stops.

use tracing::{info, warn};

use vault2git_core::StopFlag;

/// Request a stop on `flag` when the process receives SIGINT or SIGTERM.
///
/// The run then ends after the version in progress, keeping every
/// checkpoint consistent.
pub fn install_stop_handler(flag: StopFlag) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let terminate = async {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to register SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            tokio::select! {
                result = ctrl_c => {
                    if let Err(e) = result {
                        warn!(error = %e, "failed to listen for Ctrl+C");
                        return;
                    }
                    info!("received SIGINT (Ctrl+C), stopping after the current version");
                }
                _ = terminate => {
                    info!("received SIGTERM, stopping after the current version");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("received Ctrl+C, stopping after the current version");
        }

        eprintln!("Stop requested, finishing the current version...");
        flag.request_stop();
    });
}
