//! Workflow instances: live executions of a template against one entity.
//!
//! The [`WorkflowInstance`] record is mutated exclusively by the
//! [`WorkflowEngine`](crate::WorkflowEngine) — every mutating helper here is
//! `pub(crate)`. Other components read instance state or request mutations
//! through the engine's API.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::approval::ApprovalStepState;
use crate::template::{EntityType, StageId, TemplateId, WorkflowTemplate};

/// Identifier for a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a new id (UUID v7, time-ordered).
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Borrow the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for InstanceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Instance lifecycle status.
///
/// Status changes follow a strict lattice: `Active` may become `Paused`,
/// `Cancelled` or `Completed`; `Paused` may become `Active` or `Cancelled`;
/// `Cancelled` and `Completed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl InstanceStatus {
    /// Returns `true` for absorbing states (no further mutation allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Cancelled | InstanceStatus::Completed)
    }

    /// Returns `true` if the lattice permits moving to `next`.
    pub fn can_become(self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Active, Paused) | (Active, Cancelled) | (Active, Completed) | (Paused, Active) | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Paused => "PAUSED",
            InstanceStatus::Cancelled => "CANCELLED",
            InstanceStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// One stage visit in an instance's history.
///
/// History entries are contiguous: entry `n`'s `exited_at` equals entry
/// `n + 1`'s `entered_at` (the engine closes and opens with one timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The stage visited.
    pub stage_id: StageId,
    /// When the instance entered the stage.
    pub entered_at: OffsetDateTime,
    /// When the instance left the stage; `None` for the current stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<OffsetDateTime>,
    /// Who caused the entry.
    pub actor_id: String,
    /// Free-text rationale (transition reason, approval summary, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// A live execution of a template version against one concrete entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Instance id.
    pub id: InstanceId,
    /// The exact template version this instance runs (pinned at start;
    /// instances never silently migrate to a newer version).
    pub template_id: TemplateId,
    /// The pinned template's version number, denormalized for display.
    pub template_version: u32,
    /// Correlation key: the entity kind.
    pub entity_type: EntityType,
    /// Correlation key: the entity id.
    pub entity_id: String,
    /// The stage the instance currently sits in.
    pub current_stage_id: StageId,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// When the instance started.
    pub started_at: OffsetDateTime,
    /// When the instance reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<OffsetDateTime>,
    /// Ordered stage visits, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Live approval state; present only while the current stage is an
    /// approval stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStepState>,
}

impl WorkflowInstance {
    /// Create an instance at the template's entry stage.
    ///
    /// Opens the first history entry; if the entry stage is an approval
    /// stage, live approval state is created with everyone pending.
    pub(crate) fn begin(
        template: &WorkflowTemplate,
        entity_id: impl Into<String>,
        actor_id: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        let entry = template.entry_stage();
        let actor_id = actor_id.into();
        let approval = entry
            .approval
            .as_ref()
            .map(|config| ApprovalStepState::begin(entry.id.clone(), config));
        Self {
            id: InstanceId::generate(),
            template_id: template.id,
            template_version: template.version,
            entity_type: template.entity_type,
            entity_id: entity_id.into(),
            current_stage_id: entry.id.clone(),
            status: InstanceStatus::Active,
            started_at: now,
            completed_at: None,
            history: vec![HistoryEntry {
                stage_id: entry.id.clone(),
                entered_at: now,
                exited_at: None,
                actor_id,
                rationale: None,
            }],
            approval,
        }
    }

    /// Move to another stage: close the open history entry and open a new
    /// one with the same timestamp (no gaps, no overlap).
    ///
    /// `closing_rationale` annotates the entry being closed (e.g. an
    /// approval summary); `rationale` annotates the new entry.
    pub(crate) fn enter_stage(
        &mut self,
        stage: &crate::template::Stage,
        actor_id: impl Into<String>,
        now: OffsetDateTime,
        closing_rationale: Option<String>,
        rationale: Option<String>,
    ) {
        if let Some(open) = self.history.last_mut() {
            open.exited_at = Some(now);
            if closing_rationale.is_some() {
                open.rationale = closing_rationale;
            }
        }
        self.current_stage_id = stage.id.clone();
        self.history.push(HistoryEntry {
            stage_id: stage.id.clone(),
            entered_at: now,
            exited_at: None,
            actor_id: actor_id.into(),
            rationale,
        });
        // Re-entering an approval stage starts over: fresh state, everyone
        // pending, prior decisions preserved only in history.
        self.approval = stage
            .approval
            .as_ref()
            .map(|config| ApprovalStepState::begin(stage.id.clone(), config));
    }

    /// Move to a terminal status, closing the open history entry.
    pub(crate) fn finish(&mut self, status: InstanceStatus, now: OffsetDateTime, rationale: Option<String>) {
        debug_assert!(status.is_terminal());
        if let Some(open) = self.history.last_mut() {
            if open.exited_at.is_none() {
                open.exited_at = Some(now);
                if rationale.is_some() {
                    open.rationale = rationale;
                }
            }
        }
        self.status = status;
        self.completed_at = Some(now);
        self.approval = None;
    }

    /// The open history entry for the current stage, if the instance is not
    /// yet finished.
    pub fn current_entry(&self) -> Option<&HistoryEntry> {
        self.history.last().filter(|entry| entry.exited_at.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalOutcome, ApprovalPolicy};
    use crate::template::{
        ApprovalConfig, EntityType, Stage, TemplateDefinition, TransitionRule, WorkflowTemplate,
    };

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::from_definition(TemplateDefinition {
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
                Stage::normal("draft", "Draft"),
            ],
            transitions: vec![
                TransitionRule::manual("new", "review"),
                TransitionRule::on_approval("review", "closed", ApprovalOutcome::Approved),
                TransitionRule::on_approval("review", "draft", ApprovalOutcome::Rejected),
                TransitionRule::manual("draft", "review"),
            ],
        })
        .unwrap()
    }

    #[test]
    fn status_lattice() {
        use InstanceStatus::*;
        assert!(Active.can_become(Paused));
        assert!(Active.can_become(Cancelled));
        assert!(Active.can_become(Completed));
        assert!(Paused.can_become(Active));
        assert!(Paused.can_become(Cancelled));

        assert!(!Paused.can_become(Completed));
        assert!(!Cancelled.can_become(Active));
        assert!(!Completed.can_become(Active));
        assert!(!Completed.can_become(Cancelled));
        assert!(!Active.can_become(Active));
    }

    #[test]
    fn begin_opens_history_at_entry_stage() {
        let template = template();
        let now = OffsetDateTime::now_utc();
        let instance = WorkflowInstance::begin(&template, "case-9", "u-1", now);

        assert_eq!(instance.current_stage_id, StageId::new("new"));
        assert_eq!(instance.status, InstanceStatus::Active);
        assert_eq!(instance.template_id, template.id);
        assert_eq!(instance.template_version, 1);
        assert_eq!(instance.history.len(), 1);
        assert_eq!(instance.history[0].entered_at, now);
        assert!(instance.history[0].exited_at.is_none());
        assert!(instance.approval.is_none());
    }

    #[test]
    fn enter_stage_closes_and_opens_with_one_timestamp() {
        let template = template();
        let started = OffsetDateTime::now_utc();
        let mut instance = WorkflowInstance::begin(&template, "case-9", "u-1", started);

        let moved = started + time::Duration::seconds(5);
        let review = template.stage(&StageId::new("review")).unwrap();
        instance.enter_stage(review, "u-1", moved, None, Some("ready".to_string()));

        assert_eq!(instance.history.len(), 2);
        assert_eq!(instance.history[0].exited_at, Some(moved));
        assert_eq!(instance.history[1].entered_at, moved);
        assert_eq!(instance.history[1].rationale.as_deref(), Some("ready"));
        assert_eq!(instance.current_stage_id, StageId::new("review"));
    }

    #[test]
    fn entering_approval_stage_creates_fresh_state() {
        let template = template();
        let mut instance =
            WorkflowInstance::begin(&template, "case-9", "u-1", OffsetDateTime::now_utc());
        let review = template.stage(&StageId::new("review")).unwrap();
        instance.enter_stage(review, "u-1", OffsetDateTime::now_utc(), None, None);

        let approval = instance.approval.as_ref().unwrap();
        assert_eq!(approval.stage_id, StageId::new("review"));
        assert_eq!(approval.required_approvers().count(), 2);
    }

    #[test]
    fn leaving_approval_stage_drops_state() {
        let template = template();
        let mut instance =
            WorkflowInstance::begin(&template, "case-9", "u-1", OffsetDateTime::now_utc());
        let review = template.stage(&StageId::new("review")).unwrap();
        let draft = template.stage(&StageId::new("draft")).unwrap();
        instance.enter_stage(review, "u-1", OffsetDateTime::now_utc(), None, None);
        instance.enter_stage(draft, "u-1", OffsetDateTime::now_utc(), None, None);
        assert!(instance.approval.is_none());
    }

    #[test]
    fn finish_closes_the_open_entry() {
        let template = template();
        let mut instance =
            WorkflowInstance::begin(&template, "case-9", "u-1", OffsetDateTime::now_utc());
        let now = OffsetDateTime::now_utc();
        instance.finish(InstanceStatus::Cancelled, now, Some("withdrawn".to_string()));

        assert_eq!(instance.status, InstanceStatus::Cancelled);
        assert_eq!(instance.completed_at, Some(now));
        assert_eq!(instance.history.last().unwrap().exited_at, Some(now));
        assert_eq!(
            instance.history.last().unwrap().rationale.as_deref(),
            Some("withdrawn")
        );
        assert!(instance.current_entry().is_none());
    }

    #[test]
    fn instance_serde_round_trip() {
        let template = template();
        let instance =
            WorkflowInstance::begin(&template, "case-9", "u-1", OffsetDateTime::now_utc());
        let json = serde_json::to_value(&instance).unwrap();
        let back: WorkflowInstance = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, instance.id);
        assert_eq!(back.history, instance.history);
    }
}
