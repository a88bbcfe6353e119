//! Declarative transition guards and the actor context they evaluate against.
//!
//! Guards are attached to template transitions and evaluated by the
//! [validator](crate::validator) before a move is allowed. Evaluation is
//! side-effect-free and deterministic — identical inputs always produce
//! identical results, which is what makes retried transition requests
//! idempotent to validate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity and request context supplied by the caller on every operation.
///
/// The engine trusts this context; resolving tenant and identity is an
/// external collaborator's job. `fields` carries any entity data the caller
/// chooses to supply for [`Guard::RequireField`] checks.
///
/// # Example
///
/// ```
/// use caseflow::ActorContext;
///
/// let ctx = ActorContext::new("u-17", "investigator", "org-1")
///     .with_field("severity", serde_json::json!("high"));
/// assert_eq!(ctx.role, "investigator");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorContext {
    /// The acting user.
    pub actor_id: String,
    /// The actor's role, as resolved by the caller.
    pub role: String,
    /// The tenant the request executes under.
    pub organization_id: String,
    /// Entity fields supplied for guard evaluation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl ActorContext {
    /// Create a context with no supplied fields.
    pub fn new(
        actor_id: impl Into<String>,
        role: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            role: role.into(),
            organization_id: organization_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Supply a field value for guard evaluation.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// A declarative precondition on a transition edge.
///
/// Guards are data, not code: they are stored with the template and evaluated
/// against the [`ActorContext`] at transition time. Composite guards allow
/// simple boolean structure without turning templates into programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Guard {
    /// The actor must hold exactly this role.
    RequireRole {
        /// The required role name.
        role: String,
    },
    /// The named field must be supplied and non-null.
    RequireField {
        /// The required field name.
        field: String,
    },
    /// Every nested guard must pass.
    All {
        /// The nested guards.
        guards: Vec<Guard>,
    },
    /// At least one nested guard must pass.
    Any {
        /// The nested guards.
        guards: Vec<Guard>,
    },
}

impl Guard {
    /// Evaluate this guard against the context.
    ///
    /// Returns `Err(reason)` with a human-readable explanation on failure.
    pub fn check(&self, ctx: &ActorContext) -> std::result::Result<(), String> {
        match self {
            Guard::RequireRole { role } => {
                if ctx.role == *role {
                    Ok(())
                } else {
                    Err(format!("requires role {role}"))
                }
            }
            Guard::RequireField { field } => match ctx.fields.get(field) {
                Some(value) if !value.is_null() => Ok(()),
                _ => Err(format!("requires field {field}")),
            },
            Guard::All { guards } => {
                for guard in guards {
                    guard.check(ctx)?;
                }
                Ok(())
            }
            Guard::Any { guards } => {
                let mut reasons = Vec::with_capacity(guards.len());
                for guard in guards {
                    match guard.check(ctx) {
                        Ok(()) => return Ok(()),
                        Err(reason) => reasons.push(reason),
                    }
                }
                Err(format!("none satisfied: {}", reasons.join("; ")))
            }
        }
    }
}
