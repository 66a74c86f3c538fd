use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{PendingApproval, ToolCall};

/// Outcome of evaluating a tool-call batch against the approval policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub needs_approval: bool,
    pub calls: Vec<ToolCall>,
}

impl GateDecision {
    pub fn auto_approved() -> Self {
        Self::default()
    }

    pub fn into_pending(self) -> PendingApproval {
        PendingApproval::for_calls(self.calls)
    }
}

/// Splits requested tool calls into auto-approved and approval-required subsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApprovalGate {
    requiring_approval: BTreeSet<String>,
}

impl ApprovalGate {
    pub fn new(requiring_approval: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { requiring_approval: requiring_approval.into_iter().map(Into::into).collect() }
    }

    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.requiring_approval.contains(tool_name)
    }

    /// Pure decision; never executes or mutates anything.
    pub fn gate(&self, pending: &[ToolCall], approval_enabled: bool) -> GateDecision {
        if !approval_enabled {
            return GateDecision::auto_approved();
        }

        if let Some(malformed) = pending.iter().find(|call| is_malformed(call)) {
            warn!(
                event_name = "approval.gate.fail_open",
                call_id = %malformed.id,
                tool_name = %malformed.name,
                "malformed tool call in batch; skipping approval"
            );
            return GateDecision::auto_approved();
        }

        let (_, needing) = self.partition(pending);
        if needing.is_empty() {
            GateDecision::auto_approved()
        } else {
            GateDecision { needs_approval: true, calls: needing }
        }
    }

    /// `(auto_approved, needing_approval)`, each preserving batch order.
    pub fn partition(&self, pending: &[ToolCall]) -> (Vec<ToolCall>, Vec<ToolCall>) {
        pending.iter().cloned().partition(|call| !self.requires_approval(&call.name))
    }
}

fn is_malformed(call: &ToolCall) -> bool {
    call.id.trim().is_empty() || call.name.trim().is_empty()
}

/// A human decision over a suspended batch, expressed as tool names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    #[serde(default)]
    pub approved: BTreeSet<String>,
    #[serde(default)]
    pub rejected: BTreeSet<String>,
}

impl ApprovalDecision {
    pub fn new(
        approved: impl IntoIterator<Item = impl Into<String>>,
        rejected: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            approved: approved.into_iter().map(Into::into).collect(),
            rejected: rejected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn approve_all(pending: &PendingApproval) -> Self {
        Self { approved: pending.tool_names(), rejected: BTreeSet::new() }
    }

    /// Names to reject: every explicit rejection plus any pending name left undecided.
    pub fn effective_rejections(&self, pending: &PendingApproval) -> BTreeSet<String> {
        let undecided = pending
            .tool_names()
            .into_iter()
            .filter(|name| !self.approved.contains(name) || self.rejected.contains(name));
        self.rejected.iter().cloned().chain(undecided).collect()
    }
}
