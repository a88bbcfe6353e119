//! Storage abstraction for templates and instances.
//!
//! The engine needs only key-value, row-level semantics from its backend:
//! read-with-revision and compare-and-swap write. No relational joins are
//! required internally. Two implementations are provided:
//!
//! - [`MemoryStore`] — in-process storage for tests and examples
//! - [`PgStore`] — PostgreSQL storage for production (requires the
//!   `postgres` feature)
//!
//! # Concurrency
//!
//! Every record carries a `revision` ([`Versioned`]). Mutations load the
//! current revision, compute the new state, and commit with
//! [`InstanceStore::update`] / [`TemplateStore::update`], which must fail
//! with [`Error::ConcurrentModification`](crate::Error::ConcurrentModification)
//! if the stored revision no longer matches. Contention is scoped to a single
//! record; stores hold no global locks.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::error::Result;
use crate::instance::{InstanceId, InstanceStatus, WorkflowInstance};
use crate::template::{EntityType, TemplateId, WorkflowTemplate};

/// A stored record together with its optimistic-concurrency revision.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// Revision at load time; passed back on update for the CAS check.
    pub revision: u64,
    /// The record itself.
    pub record: T,
}

/// Filters for listing instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// Only instances for this entity type.
    pub entity_type: Option<EntityType>,
    /// Only instances in this status.
    pub status: Option<InstanceStatus>,
    /// Only instances pinned to this template version.
    pub template_id: Option<TemplateId>,
}

impl InstanceFilter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by entity type.
    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    /// Filter by status.
    pub fn status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by pinned template version.
    pub fn template_id(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.entity_type.is_none_or(|t| instance.entity_type == t)
            && self.status.is_none_or(|s| instance.status == s)
            && self.template_id.is_none_or(|t| instance.template_id == t)
    }
}

/// Offset pagination for listing operations.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Maximum results to return.
    pub limit: u32,
    /// Results to skip.
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    /// A page with the given limit, starting at the beginning.
    pub fn with_limit(limit: u32) -> Self {
        Self { limit, offset: 0 }
    }
}

/// Storage backend for workflow templates.
///
/// Each template *version* is a distinct record addressed by its
/// [`TemplateId`]; versions of one template share a `name`. Old versions stay
/// resolvable forever so pinned instances keep functioning.
pub trait TemplateStore: Send + Sync + Clone + 'static {
    /// Persist a new template version.
    fn insert(&self, template: WorkflowTemplate) -> impl Future<Output = Result<()>> + Send;

    /// Load a template version with its revision.
    ///
    /// Fails with `NotFound` for unknown ids.
    fn get(&self, id: TemplateId) -> impl Future<Output = Result<Versioned<WorkflowTemplate>>> + Send;

    /// Replace a template version if its revision is unchanged.
    ///
    /// Fails with `ConcurrentModification` on revision mismatch.
    fn update(
        &self,
        expected_revision: u64,
        template: WorkflowTemplate,
    ) -> impl Future<Output = Result<Versioned<WorkflowTemplate>>> + Send;

    /// All versions sharing `name`, ordered by version descending.
    fn versions(&self, name: &str) -> impl Future<Output = Result<Vec<WorkflowTemplate>>> + Send;

    /// The default template version for an entity type.
    ///
    /// Fails with `NotFound` if no default is set.
    fn resolve_default(
        &self,
        entity_type: EntityType,
    ) -> impl Future<Output = Result<WorkflowTemplate>> + Send;

    /// Make `id` the sole default for its entity type, clearing the flag on
    /// every other version atomically.
    fn set_default(&self, id: TemplateId) -> impl Future<Output = Result<()>> + Send;

    /// List templates, optionally filtered by entity type and active flag.
    fn list(
        &self,
        entity_type: Option<EntityType>,
        is_active: Option<bool>,
    ) -> impl Future<Output = Result<Vec<WorkflowTemplate>>> + Send;
}

/// Storage backend for workflow instances.
pub trait InstanceStore: Send + Sync + Clone + 'static {
    /// Persist a new instance.
    ///
    /// Must atomically enforce the one-live-instance-per-entity rule and
    /// fail with `DuplicateActiveInstance` when the entity already has a
    /// non-terminal instance.
    fn insert(
        &self,
        instance: WorkflowInstance,
    ) -> impl Future<Output = Result<Versioned<WorkflowInstance>>> + Send;

    /// Load an instance with its revision.
    ///
    /// Fails with `NotFound` for unknown ids.
    fn get(&self, id: InstanceId) -> impl Future<Output = Result<Versioned<WorkflowInstance>>> + Send;

    /// The live (non-terminal) instance for an entity, if any.
    fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<WorkflowInstance>>>> + Send;

    /// Replace an instance if its revision is unchanged.
    ///
    /// Fails with `ConcurrentModification` on revision mismatch. This is the
    /// compare-and-swap that makes at-most-one-committed-transition-in-flight
    /// per instance hold.
    fn update(
        &self,
        expected_revision: u64,
        instance: WorkflowInstance,
    ) -> impl Future<Output = Result<Versioned<WorkflowInstance>>> + Send;

    /// List instances matching `filter`, newest first.
    fn list(
        &self,
        filter: &InstanceFilter,
        page: Page,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>>> + Send;

    /// Number of instances pinned to a template version.
    ///
    /// Drives the edit-in-place vs. derive-new-version decision.
    fn count_by_template(&self, template_id: TemplateId) -> impl Future<Output = Result<u64>> + Send;
}
