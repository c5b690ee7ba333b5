use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};

const SLEEP_STEP: Duration = Duration::from_millis(100);

/// Shared flag raised by SIGINT or SIGTERM, polled by the main loops.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown::default()
    }

    /// Spawns the signal listener thread and returns the flag it raises.
    pub fn install() -> std::io::Result<Self> {
        let shutdown = Shutdown::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;

        let listener = shutdown.clone();
        thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match wait_for_signal().await {
                        Ok(name) => info!("received {}, shutting down", name),
                        Err(err) => error!("signal listener failed: {}", err),
                    }
                    listener.trigger();
                });
            })?;

        Ok(shutdown)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps up to `duration`, waking early once triggered.
    pub fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_triggered() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(left.min(SLEEP_STEP));
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_visible_through_clones() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        assert!(!observer.is_triggered());
        shutdown.trigger();
        assert!(observer.is_triggered());
    }

    #[test]
    fn sleep_returns_at_once_when_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let start = Instant::now();
        shutdown.sleep(Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_wakes_on_trigger_from_another_thread() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });
        shutdown.sleep(Duration::from_secs(30));
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
