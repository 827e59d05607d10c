//! Background drain loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::OfflineQueue;

/// Handle to a running drain thread. Dropping it stops the loop.
#[derive(Debug)]
pub struct DrainWorker {
    stop_flag: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl DrainWorker {
    /// Completed drain passes so far.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Signal the loop and wait for the in-flight pass to finish.
    ///
    /// Entries are only removed after they apply, so stopping between
    /// passes never loses queued work.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::error!("queue drain worker panicked");
            }
        }
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drain `queue` every `interval` on a dedicated thread.
pub fn spawn_drain_worker(queue: Arc<OfflineQueue>, interval: Duration) -> std::io::Result<DrainWorker> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let passes = Arc::new(AtomicU64::new(0));

    let handle = {
        let stop_flag = Arc::clone(&stop_flag);
        let passes = Arc::clone(&passes);
        thread::Builder::new()
            .name("ticketdrop-queue-drain".to_string())
            .spawn(move || {
                tracing::debug!(?interval, "queue drain worker started");
                while !stop_flag.load(Ordering::SeqCst) {
                    let now = queue.lifecycle().now();
                    match queue.drain(now) {
                        Ok(results) => {
                            let failures = results.iter().filter(|r| r.is_failure()).count();
                            if failures > 0 {
                                tracing::warn!(failures, "offline updates moved to the failed list");
                            }
                        }
                        Err(err) => tracing::error!(error = %err, "queue drain failed"),
                    }
                    passes.fetch_add(1, Ordering::SeqCst);
                    thread::park_timeout(interval);
                }
                tracing::debug!("queue drain worker stopped");
            })?
    };

    Ok(DrainWorker {
        stop_flag,
        passes,
        handle: Some(handle),
    })
}
