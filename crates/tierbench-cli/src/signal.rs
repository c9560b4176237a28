//! Signal handling
//!
//! A current-thread tokio runtime on its own thread waits for SIGINT,
//! SIGTERM or the optional run limit and flips the shutdown flag. The
//! thread also ends when something else triggers shutdown first.

use std::thread::{self, JoinHandle};
use std::time::Duration;
use tierbench_common::Shutdown;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

pub fn spawn_signal_thread(
    shutdown: Shutdown,
    limit: Option<Duration>,
) -> anyhow::Result<JoinHandle<()>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let handle = thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            rt.block_on(async move {
                let reason = tokio::select! {
                    r = interrupted() => r,
                    _ = elapsed(limit) => "run time elapsed",
                    _ = stopped(&shutdown) => return,
                };
                tracing::info!(reason, "shutting down");
                shutdown.trigger();
            })
        })?;
    Ok(handle)
}

async fn interrupted() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler not installed");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "interrupt"
    }
}

async fn elapsed(limit: Option<Duration>) {
    match limit {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn stopped(shutdown: &Shutdown) {
    while shutdown.is_running() {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_limit_triggers_shutdown() {
        let shutdown = Shutdown::new();
        let h = spawn_signal_thread(shutdown.clone(), Some(Duration::from_millis(20))).unwrap();
        h.join().unwrap();
        assert!(!shutdown.is_running());
    }

    #[test]
    fn test_exits_on_external_shutdown() {
        let shutdown = Shutdown::new();
        let h = spawn_signal_thread(shutdown.clone(), None).unwrap();
        let t = Instant::now();
        shutdown.trigger();
        h.join().unwrap();
        assert!(t.elapsed() < Duration::from_secs(2));
    }
}
