use std::fmt;

use serde::{Deserialize, Serialize};

use super::access::{Actor, Permission};
use super::domain::{RoyaltyRecord, RoyaltyStatus};
use super::error::RoyaltyError;

/// Actions recorded against a royalty record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Calculate,
    EditorConfirm,
    ManagerApprove,
    FinanceApprove,
    MarkPaid,
    Reject,
    Void,
    Override,
}

impl ApprovalAction {
    pub const fn label(self) -> &'static str {
        match self {
            ApprovalAction::Calculate => "CALCULATE",
            ApprovalAction::EditorConfirm => "EDITOR_CONFIRM",
            ApprovalAction::ManagerApprove => "MANAGER_APPROVE",
            ApprovalAction::FinanceApprove => "FINANCE_APPROVE",
            ApprovalAction::MarkPaid => "MARK_PAID",
            ApprovalAction::Reject => "REJECT",
            ApprovalAction::Void => "VOID",
            ApprovalAction::Override => "OVERRIDE",
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One arrow of the approval graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: ApprovalAction,
    pub from: &'static [RoyaltyStatus],
    pub to: RoyaltyStatus,
    pub permission: Permission,
    pub requires_reason: bool,
}

const PRE_PAID: &[RoyaltyStatus] = &[
    RoyaltyStatus::Calculated,
    RoyaltyStatus::EditorConfirmed,
    RoyaltyStatus::ManagerApproved,
    RoyaltyStatus::FinanceApproved,
];

const TRANSITIONS: &[Transition] = &[
    Transition {
        action: ApprovalAction::EditorConfirm,
        from: &[RoyaltyStatus::Calculated],
        to: RoyaltyStatus::EditorConfirmed,
        permission: Permission::EditorConfirm,
        requires_reason: false,
    },
    Transition {
        action: ApprovalAction::ManagerApprove,
        from: &[RoyaltyStatus::EditorConfirmed],
        to: RoyaltyStatus::ManagerApproved,
        permission: Permission::ManagerApprove,
        requires_reason: false,
    },
    Transition {
        action: ApprovalAction::FinanceApprove,
        from: &[RoyaltyStatus::ManagerApproved],
        to: RoyaltyStatus::FinanceApproved,
        permission: Permission::FinanceApprove,
        requires_reason: false,
    },
    Transition {
        action: ApprovalAction::MarkPaid,
        from: &[RoyaltyStatus::FinanceApproved],
        to: RoyaltyStatus::Paid,
        permission: Permission::MarkPaid,
        requires_reason: false,
    },
    Transition {
        action: ApprovalAction::Reject,
        from: PRE_PAID,
        to: RoyaltyStatus::Rejected,
        permission: Permission::EditorConfirm,
        requires_reason: true,
    },
    Transition {
        action: ApprovalAction::Void,
        from: PRE_PAID,
        to: RoyaltyStatus::Voided,
        permission: Permission::Void,
        requires_reason: true,
    },
];

/// The arrow for `action`, if it changes status at all.
pub fn transition_for(action: ApprovalAction) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|transition| transition.action == action)
}

/// Check a transition against the record as loaded and the acting user.
///
/// The status check runs before the permission check, so a stale request is
/// reported as a conflict whoever sends it.
pub fn plan(
    action: ApprovalAction,
    record: &RoyaltyRecord,
    actor: &Actor,
    reason_note: Option<&str>,
) -> Result<&'static Transition, RoyaltyError> {
    let transition = transition_for(action).ok_or(RoyaltyError::InvalidStateTransition {
        record_id: record.id,
        action,
        status: record.status,
    })?;

    if !transition.from.contains(&record.status) {
        return Err(RoyaltyError::InvalidStateTransition {
            record_id: record.id,
            action,
            status: record.status,
        });
    }

    actor.require(transition.permission)?;

    if transition.requires_reason && reason_note.map_or(true, |note| note.trim().is_empty()) {
        return Err(RoyaltyError::MissingReason { action });
    }

    Ok(transition)
}
