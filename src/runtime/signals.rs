//! Process signal handling for the entry point.

use super::Shutdown;

/// Wait for Ctrl-C (and SIGTERM on unix), or for `shutdown` to be raised by
/// someone else. Returns the name of whatever ended the wait.
pub async fn wait_for_stop(shutdown: &Shutdown) -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => ctrl_c_outcome(res),
                    _ = term.recv() => "SIGTERM",
                    () = shutdown.cancelled() => "shutdown",
                }
            }
            Err(e) => {
                tracing::warn!("unable to install SIGTERM handler: {e}");
                wait_ctrl_c(shutdown).await
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_ctrl_c(shutdown).await
    }
}

async fn wait_ctrl_c(shutdown: &Shutdown) -> &'static str {
    tokio::select! {
        res = tokio::signal::ctrl_c() => ctrl_c_outcome(res),
        () = shutdown.cancelled() => "shutdown",
    }
}

fn ctrl_c_outcome(res: std::io::Result<()>) -> &'static str {
    match res {
        Ok(()) => "SIGINT",
        Err(e) => {
            tracing::error!("unable to listen for shutdown signal: {e}");
            "signal-error"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn internal_trigger_ends_wait() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert_eq!(wait_for_stop(&shutdown).await, "shutdown");
    }
}
