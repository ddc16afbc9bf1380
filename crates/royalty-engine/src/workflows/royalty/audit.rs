use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::access::Actor;
use super::domain::{HistoryId, Money, RoyaltyRecord, RoyaltyRecordId, RoyaltyStatus};
use super::workflow::ApprovalAction;

/// Immutable ledger row. Rows are only ever appended through a store commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalHistory {
    pub id: HistoryId,
    pub royalty_record_id: RoyaltyRecordId,
    /// Store-assigned insertion order; breaks ties between equal timestamps.
    pub sequence: u64,
    pub action_type: ApprovalAction,
    pub actor_user_id: String,
    pub actor_email: String,
    pub old_status: Option<RoyaltyStatus>,
    pub new_status: Option<RoyaltyStatus>,
    pub old_amount: Option<Money>,
    pub new_amount: Option<Money>,
    pub reason_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// History row awaiting its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub royalty_record_id: RoyaltyRecordId,
    pub action_type: ApprovalAction,
    pub actor_user_id: String,
    pub actor_email: String,
    pub old_status: Option<RoyaltyStatus>,
    pub new_status: Option<RoyaltyStatus>,
    pub old_amount: Option<Money>,
    pub new_amount: Option<Money>,
    pub reason_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn sequenced(self, sequence: u64) -> ApprovalHistory {
        ApprovalHistory {
            id: self.id,
            royalty_record_id: self.royalty_record_id,
            sequence,
            action_type: self.action_type,
            actor_user_id: self.actor_user_id,
            actor_email: self.actor_email,
            old_status: self.old_status,
            new_status: self.new_status,
            old_amount: self.old_amount,
            new_amount: self.new_amount,
            reason_note: self.reason_note,
            created_at: self.created_at,
        }
    }
}

/// Builds history rows; callers put them in the same change set as the write they describe.
pub struct AuditTrailRecorder;

impl AuditTrailRecorder {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        royalty_record_id: RoyaltyRecordId,
        action_type: ApprovalAction,
        actor: &Actor,
        old_status: Option<RoyaltyStatus>,
        new_status: Option<RoyaltyStatus>,
        old_amount: Option<Money>,
        new_amount: Option<Money>,
        reason_note: Option<String>,
        at: DateTime<Utc>,
    ) -> HistoryEntry {
        HistoryEntry {
            id: HistoryId::generate(),
            royalty_record_id,
            action_type,
            actor_user_id: actor.user_id.clone(),
            actor_email: actor.email.clone(),
            old_status,
            new_status,
            old_amount,
            new_amount,
            reason_note: reason_note
                .map(|note| note.trim().to_string())
                .filter(|note| !note.is_empty()),
            created_at: at,
        }
    }

    /// Row for a record's creation.
    pub fn created(record: &RoyaltyRecord, actor: &Actor) -> HistoryEntry {
        Self::record(
            record.id,
            ApprovalAction::Calculate,
            actor,
            None,
            Some(record.status),
            None,
            Some(record.final_amount),
            None,
            record.created_at,
        )
    }

    /// Row for a status change; amounts are carried unchanged.
    pub fn transition(
        before: &RoyaltyRecord,
        after: &RoyaltyRecord,
        action: ApprovalAction,
        actor: &Actor,
        reason_note: Option<String>,
    ) -> HistoryEntry {
        Self::record(
            before.id,
            action,
            actor,
            Some(before.status),
            Some(after.status),
            Some(before.final_amount),
            Some(after.final_amount),
            reason_note,
            after.updated_at,
        )
    }

    /// Row for an amount change; status is carried unchanged.
    pub fn override_applied(
        before: &RoyaltyRecord,
        after: &RoyaltyRecord,
        actor: &Actor,
        note: Option<String>,
    ) -> HistoryEntry {
        Self::record(
            before.id,
            ApprovalAction::Override,
            actor,
            Some(before.status),
            Some(after.status),
            Some(before.final_amount),
            Some(after.final_amount),
            note,
            after.updated_at,
        )
    }
}
