//! Workflow templates: versioned, immutable-once-referenced stage graphs.
//!
//! A template describes the stages an entity can move through and the guarded
//! transitions between them. Templates are validated structurally at creation
//! time so the runtime never has to handle a malformed graph — every
//! [`WorkflowTemplate`] in a store is known to have exactly one entry stage,
//! at least one terminal stage, and complete resolution edges on every
//! approval stage.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::approval::{ApprovalOutcome, ApprovalPolicy};
use crate::error::{Error, Result};
use crate::guard::Guard;

/// Identifier for one template version.
///
/// Each version of a template is a distinct record with its own id, so
/// running instances can keep resolving the exact version they were pinned
/// to regardless of later edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Uuid);

impl TemplateId {
    /// Generate a new id (UUID v7, time-ordered).
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Borrow the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for TemplateId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A stage identifier within a template (author-chosen key, e.g. `"review"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Create a new stage id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for StageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The entity kind a template applies to.
///
/// This is an opaque correlation key: the engine never branches on it. All
/// entity-specific behavior belongs to the calling collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Case,
    Investigation,
    Policy,
    Campaign,
    Intake,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityType::Case => "CASE",
            EntityType::Investigation => "INVESTIGATION",
            EntityType::Policy => "POLICY",
            EntityType::Campaign => "CAMPAIGN",
            EntityType::Intake => "INTAKE",
        };
        f.write_str(name)
    }
}

/// How a stage behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageType {
    /// An ordinary stage; exits via manual, guard-checked transitions.
    Normal,
    /// Requires multi-party sign-off; exits only via approval resolution.
    Approval,
    /// An end state; entering it completes the instance.
    Terminal,
}

/// Multi-approver configuration for an approval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// The assignees whose decisions are required.
    pub approvers: Vec<String>,
    /// How individual decisions aggregate into a stage resolution.
    pub policy: ApprovalPolicy,
}

/// A named state in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stable key, unique within the template.
    pub id: StageId,
    /// Display name.
    pub name: String,
    /// The stage's behavior.
    pub stage_type: StageType,
    /// Approval configuration; required iff `stage_type` is `Approval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalConfig>,
}

impl Stage {
    /// Create a normal stage.
    pub fn normal(id: impl Into<StageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stage_type: StageType::Normal,
            approval: None,
        }
    }

    /// Create a terminal stage.
    pub fn terminal(id: impl Into<StageId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stage_type: StageType::Terminal,
            approval: None,
        }
    }

    /// Create an approval stage.
    pub fn approval(
        id: impl Into<StageId>,
        name: impl Into<String>,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stage_type: StageType::Approval,
            approval: Some(config),
        }
    }
}

/// What causes a transition edge to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    /// Requested explicitly by a caller and checked by the validator.
    Manual,
    /// Followed automatically when an approval stage resolves.
    OnApproval(ApprovalOutcome),
}

/// A directed, optionally guarded edge between two stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Source stage.
    pub from: StageId,
    /// Target stage.
    pub to: StageId,
    /// Precondition evaluated against the actor context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    /// What fires this edge.
    pub trigger: TransitionTrigger,
}

impl TransitionRule {
    /// A manual edge with no guard.
    pub fn manual(from: impl Into<StageId>, to: impl Into<StageId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            trigger: TransitionTrigger::Manual,
        }
    }

    /// A resolution edge followed when an approval stage resolves.
    pub fn on_approval(
        from: impl Into<StageId>,
        to: impl Into<StageId>,
        outcome: ApprovalOutcome,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
            trigger: TransitionTrigger::OnApproval(outcome),
        }
    }

    /// Attach a guard to this edge.
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// The caller-supplied definition used to create a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Template name; versions share a name.
    pub name: String,
    /// The entity kind this template applies to.
    pub entity_type: EntityType,
    /// The stage graph nodes.
    pub stages: Vec<Stage>,
    /// The stage graph edges.
    pub transitions: Vec<TransitionRule>,
}

/// A versioned workflow template.
///
/// Once any instance references a version, that version is immutable: edits
/// go through [`TemplateService::update`](crate::TemplateService::update),
/// which derives a new version instead of mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// This version's id.
    pub id: TemplateId,
    /// Name shared across versions.
    pub name: String,
    /// Monotonic version number per name, starting at 1.
    pub version: u32,
    /// The entity kind this template applies to.
    pub entity_type: EntityType,
    /// Whether new instances may be started from this version.
    pub is_active: bool,
    /// Whether this version is the default for its entity type.
    pub is_default: bool,
    /// The stage graph nodes.
    pub stages: Vec<Stage>,
    /// The stage graph edges.
    pub transitions: Vec<TransitionRule>,
    /// When this version was created.
    pub created_at: OffsetDateTime,
}

impl WorkflowTemplate {
    /// Build a validated version 1 template from a definition.
    ///
    /// Fails with [`Error::InvalidTemplateGraph`] if the stage graph violates
    /// any structural invariant.
    pub fn from_definition(definition: TemplateDefinition) -> Result<Self> {
        validate_graph(&definition.stages, &definition.transitions)?;
        Ok(Self {
            id: TemplateId::generate(),
            name: definition.name,
            version: 1,
            entity_type: definition.entity_type,
            is_active: true,
            is_default: false,
            stages: definition.stages,
            transitions: definition.transitions,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Look up a stage by id.
    pub fn stage(&self, id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == *id)
    }

    /// The single entry stage (no incoming edges).
    ///
    /// Guaranteed to exist by graph validation.
    pub fn entry_stage(&self) -> &Stage {
        let targets: HashSet<&StageId> = self.transitions.iter().map(|t| &t.to).collect();
        self.stages
            .iter()
            .find(|stage| !targets.contains(&stage.id))
            .expect("validated template has exactly one entry stage")
    }

    /// All edges leaving a stage.
    pub fn outgoing<'a>(&'a self, from: &'a StageId) -> impl Iterator<Item = &'a TransitionRule> {
        self.transitions.iter().filter(move |t| t.from == *from)
    }

    /// The manual edge between two stages, if one exists.
    pub fn manual_edge(&self, from: &StageId, to: &StageId) -> Option<&TransitionRule> {
        self.transitions.iter().find(|t| {
            t.trigger == TransitionTrigger::Manual && t.from == *from && t.to == *to
        })
    }

    /// The resolution edge leaving an approval stage for the given outcome.
    ///
    /// Guaranteed to exist for approval stages by graph validation.
    pub fn resolution_edge(&self, from: &StageId, outcome: ApprovalOutcome) -> Option<&TransitionRule> {
        self.transitions
            .iter()
            .find(|t| t.from == *from && t.trigger == TransitionTrigger::OnApproval(outcome))
    }
}

/// Validate the stage-graph invariants.
///
/// Checks, structurally:
///
/// - at least one stage, unique non-empty stage ids
/// - every edge references known stages; no self edges; no duplicate edges
/// - exactly one entry stage (no incoming edges)
/// - at least one terminal stage; terminal stages have no outgoing edges and
///   non-terminal stages have at least one
/// - every stage is reachable from the entry stage
/// - approval stages name at least one approver and have exactly one
///   approved and one rejected resolution edge, both guard-free, and no
///   manual exits; resolution edges only leave approval stages
pub fn validate_graph(stages: &[Stage], transitions: &[TransitionRule]) -> Result<()> {
    if stages.is_empty() {
        return Err(Error::invalid_graph("template has no stages"));
    }

    let mut ids = HashSet::new();
    for stage in stages {
        if stage.id.as_str().is_empty() {
            return Err(Error::invalid_graph("stage id must not be empty"));
        }
        if !ids.insert(&stage.id) {
            return Err(Error::invalid_graph(format!(
                "duplicate stage id {}",
                stage.id
            )));
        }
        match stage.stage_type {
            StageType::Approval => match &stage.approval {
                Some(config) if !config.approvers.is_empty() => {
                    let unique: HashSet<&String> = config.approvers.iter().collect();
                    if unique.len() != config.approvers.len() {
                        return Err(Error::invalid_graph(format!(
                            "approval stage {} lists a duplicate approver",
                            stage.id
                        )));
                    }
                }
                _ => {
                    return Err(Error::invalid_graph(format!(
                        "approval stage {} must name at least one approver",
                        stage.id
                    )));
                }
            },
            _ if stage.approval.is_some() => {
                return Err(Error::invalid_graph(format!(
                    "stage {} carries approval config but is not an approval stage",
                    stage.id
                )));
            }
            _ => {}
        }
    }

    let stage_by_id: HashMap<&StageId, &Stage> =
        stages.iter().map(|stage| (&stage.id, stage)).collect();

    let mut seen_edges = HashSet::new();
    for rule in transitions {
        for end in [&rule.from, &rule.to] {
            if !stage_by_id.contains_key(end) {
                return Err(Error::invalid_graph(format!(
                    "transition references unknown stage {end}"
                )));
            }
        }
        if rule.from == rule.to {
            return Err(Error::invalid_graph(format!(
                "self transition on stage {}",
                rule.from
            )));
        }
        if !seen_edges.insert((&rule.from, &rule.to, rule.trigger)) {
            return Err(Error::invalid_graph(format!(
                "duplicate transition from {} to {}",
                rule.from, rule.to
            )));
        }
        match rule.trigger {
            TransitionTrigger::OnApproval(_) => {
                let source = stage_by_id[&rule.from];
                if source.stage_type != StageType::Approval {
                    return Err(Error::invalid_graph(format!(
                        "resolution edge leaves non-approval stage {}",
                        rule.from
                    )));
                }
                if rule.guard.is_some() {
                    return Err(Error::invalid_graph(format!(
                        "resolution edge from {} must not carry a guard",
                        rule.from
                    )));
                }
            }
            TransitionTrigger::Manual => {
                let source = stage_by_id[&rule.from];
                if source.stage_type == StageType::Approval {
                    return Err(Error::invalid_graph(format!(
                        "approval stage {} exits only via approval resolution",
                        rule.from
                    )));
                }
            }
        }
    }

    // Exactly one entry stage.
    let targets: HashSet<&StageId> = transitions.iter().map(|t| &t.to).collect();
    let entries: Vec<&StageId> = stages
        .iter()
        .map(|stage| &stage.id)
        .filter(|id| !targets.contains(*id))
        .collect();
    match entries.as_slice() {
        [_] => {}
        [] => return Err(Error::invalid_graph("no entry stage (every stage has an incoming transition)")),
        many => {
            let names: Vec<&str> = many.iter().map(|id| id.as_str()).collect();
            return Err(Error::invalid_graph(format!(
                "multiple entry stages: {}",
                names.join(", ")
            )));
        }
    }
    let entry = entries[0];

    // Terminal / dead-end rules and per-approval-stage resolution edges.
    let mut terminal_count = 0;
    for stage in stages {
        let outgoing: Vec<&TransitionRule> =
            transitions.iter().filter(|t| t.from == stage.id).collect();
        match stage.stage_type {
            StageType::Terminal => {
                terminal_count += 1;
                if !outgoing.is_empty() {
                    return Err(Error::invalid_graph(format!(
                        "terminal stage {} has outgoing transitions",
                        stage.id
                    )));
                }
            }
            StageType::Normal => {
                if outgoing.is_empty() {
                    return Err(Error::invalid_graph(format!(
                        "non-terminal stage {} has no outgoing transitions",
                        stage.id
                    )));
                }
            }
            StageType::Approval => {
                let approved = outgoing
                    .iter()
                    .filter(|t| t.trigger == TransitionTrigger::OnApproval(ApprovalOutcome::Approved))
                    .count();
                let rejected = outgoing
                    .iter()
                    .filter(|t| t.trigger == TransitionTrigger::OnApproval(ApprovalOutcome::Rejected))
                    .count();
                if approved != 1 || rejected != 1 {
                    return Err(Error::invalid_graph(format!(
                        "approval stage {} must define exactly one approved and one rejected edge",
                        stage.id
                    )));
                }
            }
        }
    }
    if terminal_count == 0 {
        return Err(Error::invalid_graph("no terminal stage"));
    }

    // Every stage reachable from the entry stage.
    let mut reachable: HashSet<&StageId> = HashSet::new();
    let mut queue = VecDeque::from([entry]);
    while let Some(current) = queue.pop_front() {
        if !reachable.insert(current) {
            continue;
        }
        for rule in transitions.iter().filter(|t| t.from == *current) {
            queue.push_back(&rule.to);
        }
    }
    for stage in stages {
        if !reachable.contains(&stage.id) {
            return Err(Error::invalid_graph(format!(
                "stage {} is unreachable from the entry stage",
                stage.id
            )));
        }
    }

    Ok(())
}
