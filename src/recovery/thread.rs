use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::Resubmitter;

/// Statistics from the resubmission thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResubmissionStats {
    pub passes: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: usize,
}

/// A background thread that periodically resubmits incomplete publications.
///
/// Only publications older than `min_age` are picked up, which leaves
/// deliveries still running in their publishing call stack alone.
///
/// ## Example
///
/// ```ignore
/// let worker = ResubmissionThread::spawn(
///     publisher.clone(),
///     Duration::from_secs(30),
///     Duration::from_secs(60),
/// );
///
/// // ... on shutdown
/// let stats = worker.stop();
/// ```
pub struct ResubmissionThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<ResubmissionStats>>,
}

impl ResubmissionThread {
    pub fn spawn<R>(resubmitter: R, interval: Duration, min_age: Duration) -> Self
    where
        R: Resubmitter + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = ResubmissionStats::default();

            loop {
                stats.passes += 1;

                match resubmitter.resubmit_incomplete_older_than(min_age) {
                    Ok(summary) => {
                        stats.completed += summary.completed;
                        stats.failed += summary.failed;
                        debug!(
                            pass = stats.passes,
                            completed = summary.completed,
                            failed = summary.failed,
                            "resubmission pass finished"
                        );
                    }
                    Err(err) => {
                        stats.errors += 1;
                        warn!(error = %err, "resubmission pass failed");
                    }
                }

                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(mut self) -> ResubmissionStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ResubmissionStats::default(),
        }
    }

    /// Signal the thread to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for ResubmissionThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
