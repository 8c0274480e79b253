//! Background reclamation of expired locks.

use super::Inner;
use crate::error::{LockError, Result};
use std::sync::Weak;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the running reaper thread.
#[derive(Debug)]
pub(super) struct Reaper {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Reaper {
    /// Start sweeping every `interval` until stopped or the manager is gone.
    pub(super) fn spawn(inner: Weak<Inner>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("clusterlock-reaper".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let report = inner.sweep();
                    if !report.is_empty() {
                        tracing::debug!(
                            expired = report.expired_records.len(),
                            dead_owner = report.dead_owner_records.len(),
                            reaped = report.reaped_rows.len(),
                            "reaper pass finished"
                        );
                    }
                }
            })
            .map_err(|e| LockError::io("failed to start reaper thread", e))?;

        Ok(Self { stop, thread })
    }

    /// Signal the thread and wait for the current pass to finish.
    pub(super) fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            tracing::warn!("lock reaper thread panicked");
        }
    }
}
