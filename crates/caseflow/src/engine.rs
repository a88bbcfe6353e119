//! The workflow engine: the single writer of instance state.
//!
//! Every mutation follows the same shape: load the instance with its
//! revision, validate against the pinned template version, apply the change
//! to the in-memory copy, and commit with a compare-and-swap
//! [`InstanceStore::update`]. A lost race surfaces as
//! [`Error::ConcurrentModification`]; callers retry with fresh state.
//! After every committed change the engine emits an audit record, which by
//! contract never fails the operation.

use tracing::{info, instrument, warn};

use crate::audit::{AuditAction, AuditEmitter, TransitionRecord};
use crate::error::{Error, Result};
use crate::guard::ActorContext;
use crate::instance::{InstanceId, InstanceStatus, WorkflowInstance};
use crate::store::{InstanceFilter, InstanceStore, Page, TemplateStore, Versioned};
use crate::template::{EntityType, StageId, StageType, TemplateId, WorkflowTemplate};
use crate::validator::{self, TransitionCheck};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Internal retries for [`WorkflowEngine::record_decision`] when a
    /// compare-and-swap commit loses a race. Decisions by different
    /// approvers commute, so replaying against fresh state is safe.
    pub decision_retry_attempts: u32,
    /// Hard cap applied to [`Page::limit`] in listing operations.
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_retry_attempts: 3,
            max_page_size: 200,
        }
    }
}

/// Which template version to start an instance from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSelector {
    /// The default version for the entity type.
    Default,
    /// An explicit template version.
    Template(TemplateId),
}

/// Orchestrates instance lifecycles over a template store, an instance
/// store, and an audit emitter.
///
/// The engine is cheap to clone and safe to share across tasks: all state
/// lives in the stores, and concurrency control is the per-instance
/// compare-and-swap, not locks in the engine.
///
/// # Example
///
/// ```no_run
/// use caseflow::{
///     AuditEmitter, EntityType, MemoryStore, TemplateSelector, WorkflowEngine,
/// };
///
/// # async fn run() -> caseflow::Result<()> {
/// let store = MemoryStore::new();
/// let engine = WorkflowEngine::new(store.clone(), store, AuditEmitter::tracing());
///
/// let instance = engine
///     .start(EntityType::Case, "case-42", TemplateSelector::Default, "u-7")
///     .await?;
/// println!("started at stage {}", instance.current_stage_id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkflowEngine<T, I> {
    templates: T,
    instances: I,
    audit: AuditEmitter,
    config: EngineConfig,
}

impl<T, I> WorkflowEngine<T, I>
where
    T: TemplateStore,
    I: InstanceStore,
{
    /// An engine with default configuration.
    pub fn new(templates: T, instances: I, audit: AuditEmitter) -> Self {
        Self::with_config(templates, instances, audit, EngineConfig::default())
    }

    /// An engine with explicit configuration.
    pub fn with_config(templates: T, instances: I, audit: AuditEmitter, config: EngineConfig) -> Self {
        Self {
            templates,
            instances,
            audit,
            config,
        }
    }

    /// Start a workflow instance for an entity.
    ///
    /// Resolves the template version, pins the instance to it, and places the
    /// instance at the entry stage with an open history entry. Fails with
    /// [`Error::DuplicateActiveInstance`] if the entity already has a live
    /// instance, and with [`Error::TemplateNotStartable`] if the resolved
    /// version is inactive or bound to a different entity type.
    #[instrument(skip(self, entity_id, actor_id), fields(entity_type = %entity_type))]
    pub async fn start(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        selector: TemplateSelector,
        actor_id: impl Into<String>,
    ) -> Result<WorkflowInstance> {
        let entity_id = entity_id.into();
        let actor_id = actor_id.into();

        let template = match selector {
            TemplateSelector::Default => self.templates.resolve_default(entity_type).await?,
            TemplateSelector::Template(id) => self.templates.get(id).await?.record,
        };
        if !template.is_active {
            return Err(Error::TemplateNotStartable {
                id: template.id.to_string(),
                reason: "template version is inactive".to_string(),
            });
        }
        if template.entity_type != entity_type {
            return Err(Error::TemplateNotStartable {
                id: template.id.to_string(),
                reason: format!(
                    "template applies to {}, not {entity_type}",
                    template.entity_type
                ),
            });
        }

        let now = time::OffsetDateTime::now_utc();
        let mut instance = WorkflowInstance::begin(&template, entity_id, actor_id.clone(), now);
        let entry_stage = template
            .stage(&instance.current_stage_id)
            .map(|s| s.id.clone());
        // A graph whose entry stage is terminal completes immediately.
        if template
            .stage(&instance.current_stage_id)
            .is_some_and(|s| s.stage_type == StageType::Terminal)
        {
            instance.finish(InstanceStatus::Completed, now, None);
        }

        let stored = self.instances.insert(instance).await?;
        info!(
            instance_id = %stored.record.id,
            template_id = %template.id,
            template_version = template.version,
            "Instance started"
        );
        self.audit
            .emit(
                TransitionRecord::new(
                    stored.record.id,
                    AuditAction::Started,
                    stored.record.status,
                    actor_id,
                    now,
                )
                .stages(None, entry_stage),
            )
            .await;
        Ok(stored.record)
    }

    /// Move an instance to another stage via a manual transition.
    ///
    /// Validation is delegated to [`validator::can_transition`]; a denied
    /// move fails with [`Error::IllegalTransition`] carrying the validator's
    /// reason. Entering a terminal stage completes the instance in the same
    /// commit.
    #[instrument(skip(self, ctx, rationale), fields(instance_id = %id, target = %target))]
    pub async fn transition(
        &self,
        id: InstanceId,
        target: StageId,
        ctx: &ActorContext,
        rationale: Option<String>,
    ) -> Result<WorkflowInstance> {
        let loaded = self.instances.get(id).await?;
        let mut instance = loaded.record;
        let template = self.templates.get(instance.template_id).await?.record;

        let check = validator::can_transition(&template, &instance, &target, ctx);
        if !check.allowed {
            return Err(Error::IllegalTransition {
                from: instance.current_stage_id.clone(),
                to: target,
                reason: check.reason.unwrap_or_default(),
            });
        }

        let from = instance.current_stage_id.clone();
        let stage = template
            .stage(&target)
            .ok_or_else(|| Error::invalid_graph(format!("stage {target} vanished from template")))?;
        let now = time::OffsetDateTime::now_utc();
        instance.enter_stage(stage, ctx.actor_id.clone(), now, None, rationale.clone());
        if stage.stage_type == StageType::Terminal {
            instance.finish(InstanceStatus::Completed, now, None);
        }

        let stored = self.instances.update(loaded.revision, instance).await?;
        info!(from = %from, to = %target, status = %stored.record.status, "Instance transitioned");
        self.audit
            .emit(
                TransitionRecord::new(
                    id,
                    AuditAction::Transitioned,
                    stored.record.status,
                    ctx.actor_id.clone(),
                    now,
                )
                .stages(Some(from), Some(target))
                .rationale(rationale),
            )
            .await;
        Ok(stored.record)
    }

    /// Record one approver's decision on the current approval stage.
    ///
    /// If the decision resolves the stage, the matching resolution edge is
    /// followed in the same commit and the approval summary is folded into
    /// the closing history entry. Lost compare-and-swap races are retried
    /// internally up to [`EngineConfig::decision_retry_attempts`] times,
    /// since concurrent decisions by different approvers commute.
    #[instrument(skip(self, comment), fields(instance_id = %id, approver = %approver))]
    pub async fn record_decision(
        &self,
        id: InstanceId,
        approver: &str,
        outcome: crate::approval::ApprovalOutcome,
        comment: Option<String>,
    ) -> Result<WorkflowInstance> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_record_decision(id, approver, outcome, comment.clone()).await {
                Err(e) if e.is_retryable() && attempt < self.config.decision_retry_attempts => {
                    warn!(attempt, "Decision commit lost a race, retrying with fresh state");
                }
                result => return result,
            }
        }
    }

    async fn try_record_decision(
        &self,
        id: InstanceId,
        approver: &str,
        outcome: crate::approval::ApprovalOutcome,
        comment: Option<String>,
    ) -> Result<WorkflowInstance> {
        let loaded = self.instances.get(id).await?;
        let mut instance = loaded.record;

        if instance.status != InstanceStatus::Active {
            return Err(Error::InstanceNotActive {
                status: instance.status,
            });
        }
        let Some(approval) = instance.approval.as_mut() else {
            return Err(Error::NotAwaitingApproval {
                stage: instance.current_stage_id.clone(),
            });
        };

        let now = time::OffsetDateTime::now_utc();
        approval.record(approver, outcome, comment.clone(), now)?;
        let resolution = approval.resolution();
        let summary = resolution.map(|r| approval.summary(r));
        let from = instance.current_stage_id.clone();

        let mut followed: Option<StageId> = None;
        if let Some(resolved) = resolution {
            let template = self.templates.get(instance.template_id).await?.record;
            let edge = template
                .resolution_edge(&from, resolved)
                .ok_or_else(|| {
                    Error::invalid_graph(format!("no {resolved} resolution edge from {from}"))
                })?;
            let stage = template.stage(&edge.to).ok_or_else(|| {
                Error::invalid_graph(format!("stage {} vanished from template", edge.to))
            })?;
            instance.enter_stage(stage, approver, now, summary.clone(), None);
            if stage.stage_type == StageType::Terminal {
                instance.finish(InstanceStatus::Completed, now, None);
            }
            followed = Some(stage.id.clone());
        }

        let stored = self.instances.update(loaded.revision, instance).await?;
        info!(
            outcome = %outcome,
            resolved = followed.as_ref().map(|s| s.as_str()),
            "Decision recorded"
        );
        self.audit
            .emit(
                TransitionRecord::new(
                    id,
                    AuditAction::DecisionRecorded,
                    stored.record.status,
                    approver,
                    now,
                )
                .stages(Some(from.clone()), None)
                .rationale(comment),
            )
            .await;
        if let Some(to) = followed {
            self.audit
                .emit(
                    TransitionRecord::new(
                        id,
                        AuditAction::Transitioned,
                        stored.record.status,
                        approver,
                        now,
                    )
                    .stages(Some(from), Some(to))
                    .rationale(summary),
                )
                .await;
        }
        Ok(stored.record)
    }

    /// Pause an active instance. While paused, transitions and decisions are
    /// rejected; the instance stays at its current stage.
    pub async fn pause(
        &self,
        id: InstanceId,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstance> {
        self.set_status(id, InstanceStatus::Paused, AuditAction::Paused, actor_id, reason)
            .await
    }

    /// Resume a paused instance.
    pub async fn resume(&self, id: InstanceId, actor_id: &str) -> Result<WorkflowInstance> {
        self.set_status(id, InstanceStatus::Active, AuditAction::Resumed, actor_id, None)
            .await
    }

    /// Cancel an instance.
    ///
    /// Idempotent: cancelling an already terminal instance returns it
    /// unchanged rather than failing, so retried cancel requests are
    /// harmless.
    pub async fn cancel(
        &self,
        id: InstanceId,
        actor_id: &str,
        rationale: Option<String>,
    ) -> Result<WorkflowInstance> {
        let loaded = self.instances.get(id).await?;
        if loaded.record.status.is_terminal() {
            return Ok(loaded.record);
        }
        self.finish_with(loaded, InstanceStatus::Cancelled, AuditAction::Cancelled, actor_id, rationale)
            .await
    }

    /// Complete an instance administratively, without requiring it to sit in
    /// a terminal stage.
    ///
    /// Idempotent like [`cancel`](Self::cancel). Only `ACTIVE` instances may
    /// complete; a paused instance must be resumed first.
    pub async fn complete(
        &self,
        id: InstanceId,
        actor_id: &str,
        rationale: Option<String>,
    ) -> Result<WorkflowInstance> {
        let loaded = self.instances.get(id).await?;
        if loaded.record.status.is_terminal() {
            return Ok(loaded.record);
        }
        if !loaded.record.status.can_become(InstanceStatus::Completed) {
            return Err(Error::IllegalStatusTransition {
                from: loaded.record.status,
                to: InstanceStatus::Completed,
            });
        }
        self.finish_with(loaded, InstanceStatus::Completed, AuditAction::Completed, actor_id, rationale)
            .await
    }

    /// The moves an actor can request right now, with a verdict per manual
    /// edge out of the current stage.
    pub async fn allowed_transitions(
        &self,
        id: InstanceId,
        ctx: &ActorContext,
    ) -> Result<Vec<(StageId, TransitionCheck)>> {
        let instance = self.instances.get(id).await?.record;
        let template = self.templates.get(instance.template_id).await?.record;
        Ok(validator::allowed_transitions(&template, &instance, ctx))
    }

    /// Load an instance.
    pub async fn instance(&self, id: InstanceId) -> Result<WorkflowInstance> {
        Ok(self.instances.get(id).await?.record)
    }

    /// The live instance for an entity, if any.
    pub async fn instance_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .find_by_entity(entity_type, entity_id)
            .await?
            .map(|v| v.record))
    }

    /// List instances, newest first. `page.limit` is capped at
    /// [`EngineConfig::max_page_size`].
    pub async fn list_instances(
        &self,
        filter: &InstanceFilter,
        mut page: Page,
    ) -> Result<Vec<WorkflowInstance>> {
        page.limit = page.limit.min(self.config.max_page_size);
        self.instances.list(filter, page).await
    }

    /// The template version an instance is pinned to.
    pub async fn pinned_template(&self, id: InstanceId) -> Result<WorkflowTemplate> {
        let instance = self.instances.get(id).await?.record;
        Ok(self.templates.get(instance.template_id).await?.record)
    }

    async fn set_status(
        &self,
        id: InstanceId,
        status: InstanceStatus,
        action: AuditAction,
        actor_id: &str,
        rationale: Option<String>,
    ) -> Result<WorkflowInstance> {
        let loaded = self.instances.get(id).await?;
        let mut instance = loaded.record;
        if !instance.status.can_become(status) {
            return Err(Error::IllegalStatusTransition {
                from: instance.status,
                to: status,
            });
        }
        instance.status = status;

        let now = time::OffsetDateTime::now_utc();
        let stored = self.instances.update(loaded.revision, instance).await?;
        info!(instance_id = %id, status = %status, "Instance status changed");
        self.audit
            .emit(
                TransitionRecord::new(id, action, status, actor_id, now).rationale(rationale),
            )
            .await;
        Ok(stored.record)
    }

    async fn finish_with(
        &self,
        loaded: Versioned<WorkflowInstance>,
        status: InstanceStatus,
        action: AuditAction,
        actor_id: &str,
        rationale: Option<String>,
    ) -> Result<WorkflowInstance> {
        let mut instance = loaded.record;
        if !instance.status.can_become(status) {
            return Err(Error::IllegalStatusTransition {
                from: instance.status,
                to: status,
            });
        }
        let now = time::OffsetDateTime::now_utc();
        let stage = instance.current_stage_id.clone();
        instance.finish(status, now, rationale.clone());

        let stored = self.instances.update(loaded.revision, instance).await?;
        info!(instance_id = %stored.record.id, status = %status, "Instance finished");
        self.audit
            .emit(
                TransitionRecord::new(stored.record.id, action, status, actor_id, now)
                    .stages(Some(stage), None)
                    .rationale(rationale),
            )
            .await;
        Ok(stored.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalOutcome, ApprovalPolicy};
    use crate::audit::MemorySink;
    use crate::store::MemoryStore;
    use crate::template::{
        ApprovalConfig, Stage, TemplateDefinition, TransitionRule,
    };
    use crate::templates::TemplateService;
    use std::sync::Arc;

    fn definition() -> TemplateDefinition {
        TemplateDefinition {
            name: "case-intake".to_string(),
            entity_type: EntityType::Case,
            stages: vec![
                Stage::normal("new", "New"),
                Stage::approval(
                    "review",
                    "Review",
                    ApprovalConfig {
                        approvers: vec!["alice".to_string(), "bob".to_string()],
                        policy: ApprovalPolicy::AllMustApprove,
                    },
                ),
                Stage::terminal("closed", "Closed"),
            ],
            transitions: vec![
                TransitionRule::manual("new", "review"),
                TransitionRule::on_approval("review", "closed", ApprovalOutcome::Approved),
                TransitionRule::on_approval("review", "new", ApprovalOutcome::Rejected),
            ],
        }
    }

    struct Fixture {
        engine: WorkflowEngine<MemoryStore, MemoryStore>,
        sink: MemorySink,
        template: WorkflowTemplate,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let sink = MemorySink::new();
        let audit = AuditEmitter::new(Arc::new(sink.clone()), Default::default());
        let service = TemplateService::new(store.clone(), store.clone());
        let template = service.create(definition()).await.unwrap();
        Fixture {
            engine: WorkflowEngine::new(store.clone(), store, audit),
            sink,
            template,
        }
    }

    fn ctx(actor: &str) -> ActorContext {
        ActorContext::new(actor, "agent", "org-1")
    }

    #[tokio::test]
    async fn start_pins_template_and_emits_audit() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();

        assert_eq!(instance.template_id, f.template.id);
        assert_eq!(instance.current_stage_id, StageId::new("new"));
        assert_eq!(instance.status, InstanceStatus::Active);

        let records = f.sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Started);
        assert_eq!(records[0].to_stage, Some(StageId::new("new")));
    }

    #[tokio::test]
    async fn start_rejects_entity_type_mismatch() {
        let f = fixture().await;
        let err = f
            .engine
            .start(
                EntityType::Policy,
                "pol-1",
                TemplateSelector::Template(f.template.id),
                "u-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TemplateNotStartable { .. }));
    }

    #[tokio::test]
    async fn start_rejects_second_live_instance() {
        let f = fixture().await;
        f.engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        let err = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateActiveInstance { .. }));
    }

    #[tokio::test]
    async fn transition_rejects_undefined_edge() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        let err = f
            .engine
            .transition(instance.id, StageId::new("closed"), &ctx("u-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn approval_resolution_follows_edge_and_completes() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        f.engine
            .transition(instance.id, StageId::new("review"), &ctx("u-1"), None)
            .await
            .unwrap();

        let after_first = f
            .engine
            .record_decision(instance.id, "alice", ApprovalOutcome::Approved, None)
            .await
            .unwrap();
        assert_eq!(after_first.current_stage_id, StageId::new("review"));
        assert_eq!(after_first.status, InstanceStatus::Active);

        let resolved = f
            .engine
            .record_decision(instance.id, "bob", ApprovalOutcome::Approved, None)
            .await
            .unwrap();
        assert_eq!(resolved.current_stage_id, StageId::new("closed"));
        assert_eq!(resolved.status, InstanceStatus::Completed);
        assert!(resolved.approval.is_none());

        // Review entry carries the folded summary.
        let review = resolved
            .history
            .iter()
            .find(|e| e.stage_id == StageId::new("review"))
            .unwrap();
        assert_eq!(review.rationale.as_deref(), Some("approved (2/2 approvals)"));
    }

    #[tokio::test]
    async fn rejection_loops_back_and_resets_decisions() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        f.engine
            .transition(instance.id, StageId::new("review"), &ctx("u-1"), None)
            .await
            .unwrap();

        let rejected = f
            .engine
            .record_decision(instance.id, "alice", ApprovalOutcome::Rejected, Some("needs work".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.current_stage_id, StageId::new("new"));
        assert_eq!(rejected.status, InstanceStatus::Active);

        // Back into review: everyone pending again, alice may decide anew.
        f.engine
            .transition(instance.id, StageId::new("review"), &ctx("u-1"), None)
            .await
            .unwrap();
        let again = f
            .engine
            .record_decision(instance.id, "alice", ApprovalOutcome::Approved, None)
            .await
            .unwrap();
        assert_eq!(again.current_stage_id, StageId::new("review"));
    }

    #[tokio::test]
    async fn decision_on_normal_stage_fails() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        let err = f
            .engine
            .record_decision(instance.id, "alice", ApprovalOutcome::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAwaitingApproval { .. }));
    }

    #[tokio::test]
    async fn pause_blocks_transitions_until_resume() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        f.engine.pause(instance.id, "u-1", None).await.unwrap();

        let err = f
            .engine
            .transition(instance.id, StageId::new("review"), &ctx("u-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalTransition { .. }));

        f.engine.resume(instance.id, "u-1").await.unwrap();
        f.engine
            .transition(instance.id, StageId::new("review"), &ctx("u-1"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn paused_instance_cannot_complete() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        f.engine.pause(instance.id, "u-1", None).await.unwrap();

        let err = f.engine.complete(instance.id, "u-1", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalStatusTransition {
                from: InstanceStatus::Paused,
                to: InstanceStatus::Completed,
            }
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        let cancelled = f
            .engine
            .cancel(instance.id, "u-1", Some("withdrawn".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);

        let again = f.engine.cancel(instance.id, "u-1", None).await.unwrap();
        assert_eq!(again.status, InstanceStatus::Cancelled);
        assert_eq!(again.completed_at, cancelled.completed_at);

        // Only one audit record for the pair of calls.
        let cancels = f
            .sink
            .records()
            .into_iter()
            .filter(|r| r.action == AuditAction::Cancelled)
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test]
    async fn entity_is_free_after_terminal_instance() {
        let f = fixture().await;
        let instance = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        f.engine.cancel(instance.id, "u-1", None).await.unwrap();

        assert!(f
            .engine
            .instance_by_entity(EntityType::Case, "case-1")
            .await
            .unwrap()
            .is_none());
        let second = f
            .engine
            .start(EntityType::Case, "case-1", TemplateSelector::Default, "u-1")
            .await
            .unwrap();
        assert_ne!(second.id, instance.id);
    }

    #[tokio::test]
    async fn list_caps_page_size() {
        let f = fixture().await;
        for n in 0..5 {
            f.engine
                .start(
                    EntityType::Case,
                    format!("case-{n}"),
                    TemplateSelector::Default,
                    "u-1",
                )
                .await
                .unwrap();
        }
        let engine = WorkflowEngine::with_config(
            f.engine.templates.clone(),
            f.engine.instances.clone(),
            f.engine.audit.clone(),
            EngineConfig {
                max_page_size: 2,
                ..Default::default()
            },
        );
        let listed = engine
            .list_instances(&InstanceFilter::new(), Page::with_limit(100))
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }
}
