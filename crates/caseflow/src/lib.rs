//! Generic workflow engine for versioned, guard-checked stage graphs.
//!
//! Caseflow lets many collaborators (cases, investigations, policies, ...)
//! share one engine for long-running processes:
//!
//! - **Versioned templates** — stage graphs are validated structurally at
//!   creation; once any instance references a version it is immutable, and
//!   edits derive a new version instead
//! - **Pinned instances** — each instance runs the exact template version it
//!   started with and never silently migrates
//! - **Optimistic concurrency** — mutations commit via per-instance
//!   compare-and-swap; lost races surface as a retryable error
//! - **Fire-and-forget audit** — every committed change emits a record that
//!   can never fail the operation that produced it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        WorkflowEngine<T, I>                          │
//! │                                                                      │
//! │   1. Load instance + revision from the InstanceStore                 │
//! │   2. Load the pinned template version                                │
//! │   3. Validate (validator::can_transition / approval policy)          │
//! │   4. Apply the change to the in-memory copy                          │
//! │   5. Commit with compare-and-swap update                             │
//! │   6. Emit an audit record (never fails the operation)                │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use caseflow::{
//!     ApprovalOutcome, AuditEmitter, EntityType, PgStore, StageId,
//!     TemplateSelector, WorkflowEngine,
//! };
//!
//! let pool = sqlx::PgPool::connect("postgres://...").await?;
//! let store = PgStore::new(pool);
//! let engine = WorkflowEngine::new(store.clone(), store, AuditEmitter::tracing());
//!
//! let instance = engine
//!     .start(EntityType::Case, "case-42", TemplateSelector::Default, "u-7")
//!     .await?;
//! engine
//!     .record_decision(instance.id, "alice", ApprovalOutcome::Approved, None)
//!     .await?;
//! ```
//!
//! # Feature Flags
//!
//! - `postgres` — Enables [`PgStore`] for production use with PostgreSQL
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions and future work.

pub mod approval;
pub mod audit;
mod engine;
mod error;
mod guard;
mod instance;
pub mod store;
mod template;
mod templates;
pub mod validator;

pub use approval::{
    ApprovalOutcome, ApprovalPolicy, ApprovalStepState, DecisionEntry, DecisionStatus,
};
pub use audit::{
    AuditAction, AuditEmitter, AuditSink, AuditWorker, MemorySink, RetryPolicy, TracingSink,
    TransitionRecord,
};
pub use engine::{EngineConfig, TemplateSelector, WorkflowEngine};
pub use error::{Error, Result};
pub use guard::{ActorContext, Guard};
pub use instance::{HistoryEntry, InstanceId, InstanceStatus, WorkflowInstance};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use store::{InstanceFilter, InstanceStore, MemoryStore, Page, TemplateStore, Versioned};
pub use template::{
    ApprovalConfig, EntityType, Stage, StageId, StageType, TemplateDefinition, TemplateId,
    TransitionRule, TransitionTrigger, WorkflowTemplate,
};
pub use templates::{TemplatePatch, TemplateService};
pub use validator::{TransitionCheck, allowed_transitions, can_transition};
