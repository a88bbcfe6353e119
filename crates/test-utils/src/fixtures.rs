//! Canned template definitions used across test suites.

use caseflow::{
    ActorContext, ApprovalConfig, ApprovalOutcome, ApprovalPolicy, EntityType, Guard, Stage,
    TemplateDefinition, TransitionRule,
};

/// An actor context with the given id and role, in a fixed organization.
pub fn actor(actor_id: &str, role: &str) -> ActorContext {
    ActorContext::new(actor_id, role, "org-test")
}

/// A three-stage review flow with a two-approver ALL stage:
///
/// ```text
/// draft ──manual──▶ review ──approved──▶ published (terminal)
///   ▲                  │
///   └────rejected──────┘
/// ```
///
/// Approvers are `alice` and `bob`.
pub fn review_template(name: &str, entity_type: EntityType) -> TemplateDefinition {
    TemplateDefinition {
        name: name.to_string(),
        entity_type,
        stages: vec![
            Stage::normal("draft", "Draft"),
            Stage::approval(
                "review",
                "Review",
                ApprovalConfig {
                    approvers: vec!["alice".to_string(), "bob".to_string()],
                    policy: ApprovalPolicy::AllMustApprove,
                },
            ),
            Stage::terminal("published", "Published"),
        ],
        transitions: vec![
            TransitionRule::manual("draft", "review"),
            TransitionRule::on_approval("review", "published", ApprovalOutcome::Approved),
            TransitionRule::on_approval("review", "draft", ApprovalOutcome::Rejected),
        ],
    }
}

/// A triage flow with a guarded edge and two terminal outcomes:
///
/// ```text
/// new ──manual[role=investigator]──▶ triage ──manual──▶ resolved (terminal)
///  │                                   │
///  └──────────manual──────────────────▶ dismissed (terminal) ◀──┘
/// ```
pub fn triage_template(name: &str, entity_type: EntityType) -> TemplateDefinition {
    TemplateDefinition {
        name: name.to_string(),
        entity_type,
        stages: vec![
            Stage::normal("new", "New"),
            Stage::normal("triage", "Triage"),
            Stage::terminal("resolved", "Resolved"),
            Stage::terminal("dismissed", "Dismissed"),
        ],
        transitions: vec![
            TransitionRule::manual("new", "triage").with_guard(Guard::RequireRole {
                role: "investigator".to_string(),
            }),
            TransitionRule::manual("new", "dismissed"),
            TransitionRule::manual("triage", "resolved"),
            TransitionRule::manual("triage", "dismissed"),
        ],
    }
}

/// A review flow with a three-approver MAJORITY stage; approvers are
/// `alice`, `bob` and `carol`.
pub fn majority_template(name: &str, entity_type: EntityType) -> TemplateDefinition {
    let mut definition = review_template(name, entity_type);
    for stage in &mut definition.stages {
        if let Some(approval) = stage.approval.as_mut() {
            approval.approvers.push("carol".to_string());
            approval.policy = ApprovalPolicy::Majority;
        }
    }
    definition
}
