//! Error types for caseflow.

use thiserror::Error;

use crate::instance::InstanceStatus;
use crate::template::{EntityType, StageId};

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in caseflow operations.
///
/// Every failure mode callers may need to react to is a distinct variant so
/// that UIs can render precise messages. [`Error::ConcurrentModification`] is
/// the only variant callers should retry automatically (with freshly loaded
/// state); see [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    /// A template definition violates the stage-graph invariants.
    ///
    /// Rejected at template creation or update, never at runtime.
    #[error("invalid template graph: {reason}")]
    InvalidTemplateGraph {
        /// What is wrong with the graph.
        reason: String,
    },

    /// A template or instance could not be resolved.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// The kind of record ("template" or "instance").
        kind: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// The resolved template version cannot start new instances.
    #[error("template {id} cannot start instances: {reason}")]
    TemplateNotStartable {
        /// The template version that was resolved.
        id: String,
        /// Why it cannot be used (inactive, wrong entity type).
        reason: String,
    },

    /// The entity already has a non-terminal workflow instance.
    #[error("entity {entity_type}:{entity_id} already has an active workflow instance")]
    DuplicateActiveInstance {
        /// The entity type of the conflicting instance.
        entity_type: EntityType,
        /// The entity id of the conflicting instance.
        entity_id: String,
    },

    /// No matching transition edge, or the edge's guard failed.
    #[error("cannot move from {from} to {to}: {reason}")]
    IllegalTransition {
        /// The instance's current stage.
        from: StageId,
        /// The requested target stage.
        to: StageId,
        /// Human-readable explanation suitable for display.
        reason: String,
    },

    /// The operation requires an `ACTIVE` instance.
    #[error("instance is {status}, not ACTIVE")]
    InstanceNotActive {
        /// The instance's current status.
        status: InstanceStatus,
    },

    /// A decision was submitted while the current stage has no pending
    /// approval.
    #[error("stage {stage} is not awaiting approval decisions")]
    NotAwaitingApproval {
        /// The instance's current stage.
        stage: StageId,
    },

    /// The actor is not one of the stage's required approvers.
    #[error("{approver} is not a required approver for this stage")]
    NotAnApprover {
        /// The actor that attempted to decide.
        approver: String,
    },

    /// The approver already recorded a decision for this stage entry.
    ///
    /// Decisions are final within one stage entry to preserve audit
    /// integrity; the state resets only when the stage is re-entered.
    #[error("{approver} has already decided for this stage")]
    AlreadyDecided {
        /// The actor that attempted to decide again.
        approver: String,
    },

    /// The record changed between read and compare-and-swap commit.
    ///
    /// Retryable: reload fresh state and re-apply the operation.
    #[error("concurrent modification of {id}; retry with fresh state")]
    ConcurrentModification {
        /// The identifier of the contended record.
        id: String,
    },

    /// The requested status change is not allowed by the status lattice.
    #[error("illegal status transition from {from} to {to}")]
    IllegalStatusTransition {
        /// The instance's current status.
        from: InstanceStatus,
        /// The requested status.
        to: InstanceStatus,
    },

    /// Failed to serialize or deserialize a stored record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// PostgreSQL storage error.
    ///
    /// Preserves the full `sqlx::Error` for matching on specific database
    /// error conditions (connection timeout, constraint violation, etc.).
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
}

impl Error {
    /// Create an [`Error::InvalidTemplateGraph`] with the given reason.
    pub fn invalid_graph(reason: impl Into<String>) -> Self {
        Error::InvalidTemplateGraph {
            reason: reason.into(),
        }
    }

    /// Create an [`Error::NotFound`] for a template id.
    pub fn template_not_found(id: impl ToString) -> Self {
        Error::NotFound {
            kind: "template",
            id: id.to_string(),
        }
    }

    /// Create an [`Error::NotFound`] for an instance id.
    pub fn instance_not_found(id: impl ToString) -> Self {
        Error::NotFound {
            kind: "instance",
            id: id.to_string(),
        }
    }

    /// Returns `true` if the caller should retry the operation against
    /// freshly loaded state.
    ///
    /// Only [`Error::ConcurrentModification`] qualifies; every other variant
    /// requires caller or user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrentModification { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrent_modification_is_retryable() {
        let conflict = Error::ConcurrentModification {
            id: "abc".to_string(),
        };
        assert!(conflict.is_retryable());

        let not_found = Error::template_not_found("abc");
        assert!(!not_found.is_retryable());

        let graph = Error::invalid_graph("no terminal stage");
        assert!(!graph.is_retryable());
    }

    #[test]
    fn illegal_transition_message_names_both_stages() {
        let err = Error::IllegalTransition {
            from: StageId::new("new"),
            to: StageId::new("published"),
            reason: "no transition defined".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("new"));
        assert!(message.contains("published"));
        assert!(message.contains("no transition defined"));
    }
}
