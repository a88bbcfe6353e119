//! Pure transition validation against a template graph and instance state.
//!
//! [`can_transition`] is deterministic and side-effect-free: identical inputs
//! always produce identical results, so retried requests validate the same
//! way every time. It never mutates anything — committing an allowed move is
//! the [`WorkflowEngine`](crate::WorkflowEngine)'s job.

use serde::{Deserialize, Serialize};

use crate::guard::ActorContext;
use crate::instance::{InstanceStatus, WorkflowInstance};
use crate::template::{StageId, StageType, TransitionTrigger, WorkflowTemplate};

/// The outcome of validating a proposed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCheck {
    /// Whether the move is allowed.
    pub allowed: bool,
    /// Why not, when `allowed` is false. Human-readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransitionCheck {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decide whether `instance` may move to `target` under `ctx`.
///
/// Checks, in order:
///
/// 1. the instance status is `ACTIVE`;
/// 2. the target stage exists in the pinned template version;
/// 3. a manual edge exists from the current stage to `target`
///    (self-transitions are never implicitly allowed, and approval stages
///    exit only via approval resolution);
/// 4. the edge's guard, if any, passes against `ctx`.
///
/// Entering an approval stage is an allowed move like any other; the
/// engine sets up the approval state when it commits the transition.
pub fn can_transition(
    template: &WorkflowTemplate,
    instance: &WorkflowInstance,
    target: &StageId,
    ctx: &ActorContext,
) -> TransitionCheck {
    if instance.status != InstanceStatus::Active {
        return TransitionCheck::deny(format!(
            "instance is {}, not ACTIVE",
            instance.status
        ));
    }

    if template.stage(target).is_none() {
        return TransitionCheck::deny(format!(
            "stage {target} does not exist in template version {}",
            template.version
        ));
    }

    let from = &instance.current_stage_id;
    let Some(current) = template.stage(from) else {
        // Pinned stage missing from its own template version; structurally
        // impossible for validated templates, but deny rather than panic.
        return TransitionCheck::deny(format!("current stage {from} not found in template"));
    };

    if current.stage_type == StageType::Approval {
        return TransitionCheck::deny(format!(
            "stage {from} resolves via approval decisions, not manual transitions"
        ));
    }

    let Some(edge) = template.manual_edge(from, target) else {
        return TransitionCheck::deny(format!("no transition defined from {from} to {target}"));
    };
    debug_assert_eq!(edge.trigger, TransitionTrigger::Manual);

    if let Some(guard) = &edge.guard {
        if let Err(reason) = guard.check(ctx) {
            return TransitionCheck::deny(reason);
        }
    }

    TransitionCheck::allow()
}

/// Run the validator against every manual edge out of the current stage.
///
/// The engine exposes this as `getAllowedTransitions`; UIs use it to render
/// the moves a given actor can make right now, with precise reasons for the
/// moves they cannot.
pub fn allowed_transitions(
    template: &WorkflowTemplate,
    instance: &WorkflowInstance,
    ctx: &ActorContext,
) -> Vec<(StageId, TransitionCheck)> {
    template
        .outgoing(&instance.current_stage_id)
        .filter(|edge| edge.trigger == TransitionTrigger::Manual)
        .map(|edge| {
            let check = can_transition(template, instance, &edge.to, ctx);
            (edge.to.clone(), check)
        })
        .collect()
}
