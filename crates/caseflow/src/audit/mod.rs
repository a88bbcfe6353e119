//! Fire-and-forget audit emission.
//!
//! Every state change produces a [`TransitionRecord`] which the
//! [`AuditEmitter`] hands to a pluggable [`AuditSink`]. Delivery failure
//! never fails the workflow operation that produced the record: the record
//! is queued and retried with exponential backoff, and moved to a dead
//! letter list after the policy's attempt budget is exhausted. Run an
//! [`AuditWorker`] to drain the retry queue in the background.

mod retry;
pub(crate) mod worker;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use retry::RetryPolicy;
pub use worker::AuditWorker;

use crate::instance::{InstanceId, InstanceStatus};
use crate::template::StageId;

/// Errors produced by audit sinks. Sinks are external systems, so the
/// emitter treats every failure as retryable.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// What happened to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An instance was started at its entry stage.
    Started,
    /// An instance moved between stages.
    Transitioned,
    /// An approver recorded a decision on an approval stage.
    DecisionRecorded,
    /// An instance was paused.
    Paused,
    /// A paused instance was resumed.
    Resumed,
    /// An instance was cancelled.
    Cancelled,
    /// An instance reached completion.
    Completed,
}

/// One audit record describing a single state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Unique record id.
    pub id: Uuid,
    /// The instance the change happened to.
    pub instance_id: InstanceId,
    /// What happened.
    pub action: AuditAction,
    /// Stage before the change, when the change involved stages.
    pub from_stage: Option<StageId>,
    /// Stage after the change, when the change involved stages.
    pub to_stage: Option<StageId>,
    /// Instance status after the change.
    pub status: InstanceStatus,
    /// Who caused the change.
    pub actor_id: String,
    /// When the change was committed.
    pub recorded_at: OffsetDateTime,
    /// Free-form rationale supplied by the actor or the engine.
    pub rationale: Option<String>,
}

impl TransitionRecord {
    pub(crate) fn new(
        instance_id: InstanceId,
        action: AuditAction,
        status: InstanceStatus,
        actor_id: impl Into<String>,
        recorded_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            action,
            from_stage: None,
            to_stage: None,
            status,
            actor_id: actor_id.into(),
            recorded_at,
            rationale: None,
        }
    }

    pub(crate) fn stages(mut self, from: Option<StageId>, to: Option<StageId>) -> Self {
        self.from_stage = from;
        self.to_stage = to;
        self
    }

    pub(crate) fn rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }
}

/// Destination for audit records.
///
/// Implementations deliver records to an external system (a log pipeline, a
/// table, a message bus). Delivery must be idempotent on `record.id`: the
/// emitter retries failed deliveries, so a sink may see the same record
/// twice.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Deliver one record.
    async fn deliver(&self, record: &TransitionRecord) -> std::result::Result<(), SinkError>;
}

/// Sink that keeps records in memory. For tests and examples.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TransitionRecord>>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in delivery order.
    pub fn records(&self) -> Vec<TransitionRecord> {
        self.records.lock().expect("audit sink lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn deliver(&self, record: &TransitionRecord) -> std::result::Result<(), SinkError> {
        self.records
            .lock()
            .expect("audit sink lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

/// Sink that emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn deliver(&self, record: &TransitionRecord) -> std::result::Result<(), SinkError> {
        info!(
            record_id = %record.id,
            instance_id = %record.instance_id,
            action = ?record.action,
            from = record.from_stage.as_ref().map(|s| s.as_str()),
            to = record.to_stage.as_ref().map(|s| s.as_str()),
            status = %record.status,
            actor_id = %record.actor_id,
            "Audit"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PendingRecord {
    record: TransitionRecord,
    attempts: u32,
    next_attempt_at: OffsetDateTime,
}

/// A record the emitter gave up on, with the last delivery error.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The undeliverable record.
    pub record: TransitionRecord,
    /// The error from the final attempt.
    pub error: String,
    /// Attempts made before giving up.
    pub attempts: u32,
}

struct EmitterInner {
    sink: Arc<dyn AuditSink>,
    policy: RetryPolicy,
    pending: Mutex<Vec<PendingRecord>>,
    dead: Mutex<Vec<DeadLetter>>,
}

/// Hands records to a sink without ever failing the caller.
///
/// [`emit`](Self::emit) makes one delivery attempt inline; on failure the
/// record is queued and [`retry_pending`](Self::retry_pending) redelivers it
/// with backoff. The engine calls `emit` after every committed state change.
#[derive(Clone)]
pub struct AuditEmitter {
    inner: Arc<EmitterInner>,
}

impl AuditEmitter {
    /// An emitter over `sink` with the given retry policy.
    pub fn new(sink: Arc<dyn AuditSink>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                sink,
                policy,
                pending: Mutex::new(Vec::new()),
                dead: Mutex::new(Vec::new()),
            }),
        }
    }

    /// An emitter that logs records via [`TracingSink`].
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink), RetryPolicy::default())
    }

    /// Deliver a record, queueing it for retry on failure. Infallible by
    /// contract: audit delivery must never fail the workflow operation.
    pub async fn emit(&self, record: TransitionRecord) {
        match self.inner.sink.deliver(&record).await {
            Ok(()) => {
                debug!(record_id = %record.id, action = ?record.action, "Audit record delivered");
            }
            Err(e) => {
                warn!(
                    record_id = %record.id,
                    error = %e,
                    "Audit delivery failed, queued for retry"
                );
                let next_attempt_at = self.inner.policy.next_attempt_at(1);
                self.inner
                    .pending
                    .lock()
                    .expect("audit queue lock poisoned")
                    .push(PendingRecord {
                        record,
                        attempts: 1,
                        next_attempt_at,
                    });
            }
        }
    }

    /// Redeliver every queued record whose backoff has elapsed.
    ///
    /// Records that fail again are re-queued with a longer delay; records
    /// that exhaust the attempt budget move to the dead letter list.
    pub async fn retry_pending(&self) {
        let now = OffsetDateTime::now_utc();
        let due: Vec<PendingRecord> = {
            let mut pending = self.inner.pending.lock().expect("audit queue lock poisoned");
            let mut due = Vec::new();
            pending.retain(|p| {
                if p.next_attempt_at <= now {
                    due.push(p.clone());
                    false
                } else {
                    true
                }
            });
            due
        };

        for mut entry in due {
            match self.inner.sink.deliver(&entry.record).await {
                Ok(()) => {
                    debug!(record_id = %entry.record.id, "Audit record delivered on retry");
                }
                Err(e) => {
                    entry.attempts += 1;
                    if self.inner.policy.should_retry(entry.attempts) {
                        entry.next_attempt_at = self.inner.policy.next_attempt_at(entry.attempts);
                        self.inner
                            .pending
                            .lock()
                            .expect("audit queue lock poisoned")
                            .push(entry);
                    } else {
                        error!(
                            record_id = %entry.record.id,
                            error = %e,
                            attempts = entry.attempts,
                            "Audit record exceeded max retries, moving to dead letter"
                        );
                        self.inner
                            .dead
                            .lock()
                            .expect("audit queue lock poisoned")
                            .push(DeadLetter {
                                record: entry.record,
                                error: e.to_string(),
                                attempts: entry.attempts,
                            });
                    }
                }
            }
        }
    }

    /// Number of records waiting for redelivery.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().expect("audit queue lock poisoned").len()
    }

    /// Records the emitter has given up on.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead.lock().expect("audit queue lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record() -> TransitionRecord {
        TransitionRecord::new(
            InstanceId::generate(),
            AuditAction::Started,
            InstanceStatus::Active,
            "u-1",
            OffsetDateTime::now_utc(),
        )
        .stages(None, Some(StageId::new("new")))
    }

    /// Fails the first `failures` deliveries, then succeeds.
    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
        delivered: Mutex<Vec<Uuid>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn deliver(&self, record: &TransitionRecord) -> std::result::Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err("sink unavailable".into());
            }
            self.delivered.lock().unwrap().push(record.id);
            Ok(())
        }
    }

    fn immediate_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn emit_delivers_to_sink() {
        let sink = MemorySink::new();
        let emitter = AuditEmitter::new(Arc::new(sink.clone()), RetryPolicy::default());

        emitter.emit(record()).await;

        assert_eq!(sink.records().len(), 1);
        assert_eq!(emitter.pending_len(), 0);
    }

    #[tokio::test]
    async fn failed_emit_is_queued_not_surfaced() {
        let sink = Arc::new(FlakySink::new(1));
        let emitter = AuditEmitter::new(sink.clone(), immediate_policy(5));

        emitter.emit(record()).await;
        assert_eq!(emitter.pending_len(), 1);

        emitter.retry_pending().await;
        assert_eq!(emitter.pending_len(), 0);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_record_moves_to_dead_letter() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let emitter = AuditEmitter::new(sink, immediate_policy(3));

        emitter.emit(record()).await;
        emitter.retry_pending().await; // attempt 2
        emitter.retry_pending().await; // attempt 3, budget exhausted

        assert_eq!(emitter.pending_len(), 0);
        let dead = emitter.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert!(dead[0].error.contains("sink unavailable"));
    }

    #[tokio::test]
    async fn backoff_defers_retry() {
        let sink = Arc::new(FlakySink::new(u32::MAX));
        let emitter = AuditEmitter::new(
            sink,
            RetryPolicy {
                max_attempts: 5,
                base_delay: std::time::Duration::from_secs(3600),
                max_delay: std::time::Duration::from_secs(3600),
            },
        );

        emitter.emit(record()).await;
        emitter.retry_pending().await;

        // Not due yet, so nothing was attempted or dead-lettered.
        assert_eq!(emitter.pending_len(), 1);
        assert!(emitter.dead_letters().is_empty());
    }
}
