//! Multi-assignee approval semantics for approval-type stages.
//!
//! An [`ApprovalStepState`] exists only while an instance sits in an approval
//! stage. It is created fresh on every stage entry (a rejection loop back
//! through the stage starts over with all approvers pending), and it is
//! folded into the instance history when the stage resolves.
//!
//! Decisions are final within one stage entry: an approver cannot revise a
//! recorded decision, which keeps the audit trail truthful.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::template::{ApprovalConfig, StageId};

/// How individual decisions aggregate into a stage resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalPolicy {
    /// Approved only when every approver approves; rejected on any rejection.
    AllMustApprove,
    /// Approved on the first approval.
    AnyOneApproves,
    /// Resolved once either side exceeds half of the required approvers.
    Majority,
}

/// A resolved approval stage outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalOutcome::Approved => f.write_str("approved"),
            ApprovalOutcome::Rejected => f.write_str("rejected"),
        }
    }
}

/// One approver's recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    /// The decision, if made.
    pub status: DecisionStatus,
    /// Optional comment supplied with the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// When the decision was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<OffsetDateTime>,
}

/// Per-approver decision status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

/// Live state of an approval stage for one stage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStepState {
    /// The approval stage this state belongs to.
    pub stage_id: StageId,
    /// The aggregation policy.
    pub policy: ApprovalPolicy,
    /// Decision per required approver. Every required approver has an entry.
    pub decisions: BTreeMap<String, DecisionEntry>,
}

impl ApprovalStepState {
    /// Create the state for a freshly entered approval stage, everyone pending.
    pub(crate) fn begin(stage_id: StageId, config: &ApprovalConfig) -> Self {
        let decisions = config
            .approvers
            .iter()
            .map(|approver| {
                (
                    approver.clone(),
                    DecisionEntry {
                        status: DecisionStatus::Pending,
                        comment: None,
                        decided_at: None,
                    },
                )
            })
            .collect();
        Self {
            stage_id,
            policy: config.policy,
            decisions,
        }
    }

    /// The required approvers, in stable order.
    pub fn required_approvers(&self) -> impl Iterator<Item = &str> {
        self.decisions.keys().map(String::as_str)
    }

    /// Record one approver's decision.
    ///
    /// Fails with [`Error::NotAnApprover`] for unknown approvers and
    /// [`Error::AlreadyDecided`] if the approver has a non-pending decision.
    pub(crate) fn record(
        &mut self,
        approver: &str,
        outcome: ApprovalOutcome,
        comment: Option<String>,
        now: OffsetDateTime,
    ) -> Result<()> {
        let entry = self
            .decisions
            .get_mut(approver)
            .ok_or_else(|| Error::NotAnApprover {
                approver: approver.to_string(),
            })?;
        if entry.status != DecisionStatus::Pending {
            return Err(Error::AlreadyDecided {
                approver: approver.to_string(),
            });
        }
        entry.status = match outcome {
            ApprovalOutcome::Approved => DecisionStatus::Approved,
            ApprovalOutcome::Rejected => DecisionStatus::Rejected,
        };
        entry.comment = comment;
        entry.decided_at = Some(now);
        Ok(())
    }

    /// Evaluate the policy against the decisions recorded so far.
    ///
    /// Returns `None` while the stage is still undecided. Re-evaluated after
    /// every decision; resolution is what triggers the automatic transition
    /// out of the stage.
    pub fn resolution(&self) -> Option<ApprovalOutcome> {
        let total = self.decisions.len();
        let approved = self
            .decisions
            .values()
            .filter(|entry| entry.status == DecisionStatus::Approved)
            .count();
        let rejected = self
            .decisions
            .values()
            .filter(|entry| entry.status == DecisionStatus::Rejected)
            .count();

        match self.policy {
            ApprovalPolicy::AllMustApprove => {
                if rejected > 0 {
                    Some(ApprovalOutcome::Rejected)
                } else if approved == total {
                    Some(ApprovalOutcome::Approved)
                } else {
                    None
                }
            }
            ApprovalPolicy::AnyOneApproves => {
                if approved > 0 {
                    Some(ApprovalOutcome::Approved)
                } else if rejected == total {
                    Some(ApprovalOutcome::Rejected)
                } else {
                    None
                }
            }
            ApprovalPolicy::Majority => {
                if approved * 2 > total {
                    Some(ApprovalOutcome::Approved)
                } else if rejected * 2 > total || (total - rejected) * 2 <= total {
                    // Approval can no longer exceed half: resolve rejected
                    // rather than leaving the stage stuck.
                    Some(ApprovalOutcome::Rejected)
                } else {
                    None
                }
            }
        }
    }

    /// One-line summary folded into the closing history entry.
    pub(crate) fn summary(&self, outcome: ApprovalOutcome) -> String {
        let approved = self
            .decisions
            .values()
            .filter(|entry| entry.status == DecisionStatus::Approved)
            .count();
        format!(
            "{outcome} ({approved}/{} approvals)",
            self.decisions.len()
        )
    }
}
