//! Background worker that drains the audit retry queue.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::info;

use super::AuditEmitter;

/// Polls the emitter's retry queue until shutdown.
///
/// # Lifecycle
///
/// 1. Tick at `poll_interval`
/// 2. Redeliver every due record via [`AuditEmitter::retry_pending`]
/// 3. Repeat until the shutdown receiver flips to `true`
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use caseflow::audit::{AuditEmitter, AuditWorker};
/// use tokio::sync::watch;
///
/// # async fn run() {
/// let emitter = AuditEmitter::tracing();
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let worker = AuditWorker::new(emitter.clone(), Duration::from_secs(1));
/// let handle = tokio::spawn(worker.run(shutdown_rx));
///
/// // ... engine runs ...
///
/// shutdown_tx.send(true).ok();
/// handle.await.ok();
/// # }
/// ```
pub struct AuditWorker {
    emitter: AuditEmitter,
    poll_interval: Duration,
}

impl AuditWorker {
    /// A worker over `emitter` ticking at `poll_interval`.
    pub fn new(emitter: AuditEmitter, poll_interval: Duration) -> Self {
        Self {
            emitter,
            poll_interval,
        }
    }

    /// Run until the shutdown signal. One final drain happens on the tick in
    /// flight; records still pending at shutdown stay queued in the emitter.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Audit worker started");

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    self.emitter.retry_pending().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(
                            pending = self.emitter.pending_len(),
                            "Audit worker shutting down"
                        );
                        break;
                    }
                }
            }
        }
    }
}
