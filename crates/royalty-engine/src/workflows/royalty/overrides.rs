use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::access::{Actor, Permission};
use super::domain::{Money, RoyaltyRecord};
use super::error::RoyaltyError;
use super::rules::OverridePolicy;

/// Which policy cap applies to an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideRole {
    Editor,
    Manager,
}

impl OverrideRole {
    /// Managers get the manager cap; editors the editor cap; anyone else none.
    pub fn for_actor(actor: &Actor) -> Option<Self> {
        if actor.holds(Permission::ManagerApprove) {
            Some(OverrideRole::Manager)
        } else if actor.holds(Permission::EditorConfirm) {
            Some(OverrideRole::Editor)
        } else {
            None
        }
    }

    pub fn cap(self, policy: &OverridePolicy) -> Decimal {
        match self {
            OverrideRole::Editor => policy.editor_override_max_percent,
            OverrideRole::Manager => policy.manager_override_max_percent,
        }
    }
}

/// Accepted adjustment, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideDecision {
    pub override_amount: Money,
    pub final_amount: Money,
    pub delta_percent: Decimal,
    pub role: OverrideRole,
}

/// Applies an override policy to a requested final amount.
pub struct OverridePolicyEnforcer<'a> {
    policy: &'a OverridePolicy,
}

impl<'a> OverridePolicyEnforcer<'a> {
    pub fn new(policy: &'a OverridePolicy) -> Self {
        Self { policy }
    }

    pub fn evaluate(
        &self,
        record: &RoyaltyRecord,
        new_amount: Money,
        note: Option<&str>,
        role: OverrideRole,
    ) -> Result<OverrideDecision, RoyaltyError> {
        if !record.status.accepts_override() {
            return Err(RoyaltyError::OverrideFrozen {
                record_id: record.id,
                status: record.status,
            });
        }

        if new_amount < Decimal::ZERO {
            return Err(RoyaltyError::InvalidAmount(
                "finalAmount must not be negative".to_string(),
            ));
        }

        let max_percent = role.cap(self.policy);
        let override_amount = new_amount
            .checked_sub(record.gross_amount)
            .ok_or_else(|| RoyaltyError::out_of_range("override delta"))?;
        let delta = override_amount.abs();
        let delta_percent = if record.gross_amount.is_zero() {
            if delta.is_zero() {
                Decimal::ZERO
            } else {
                return Err(RoyaltyError::OverrideExceedsPolicy {
                    role,
                    max_percent,
                    delta_percent: None,
                });
            }
        } else {
            delta
                .checked_div(record.gross_amount)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .ok_or_else(|| RoyaltyError::out_of_range("override delta percentage"))?
        };

        if delta_percent > max_percent {
            return Err(RoyaltyError::OverrideExceedsPolicy {
                role,
                max_percent,
                delta_percent: Some(delta_percent),
            });
        }

        if self.policy.require_note_for_override && note.map_or(true, |n| n.trim().is_empty()) {
            return Err(RoyaltyError::MissingOverrideReason);
        }

        Ok(OverrideDecision {
            override_amount,
            final_amount: new_amount,
            delta_percent,
            role,
        })
    }
}
