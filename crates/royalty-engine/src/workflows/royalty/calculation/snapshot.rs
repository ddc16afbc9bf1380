use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::workflows::royalty::domain::{Money, RuleSetId};

/// Current layout of [`CalcSnapshot`].
pub const SNAPSHOT_VERSION: u16 = 1;

/// Where the base amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaseSource {
    RateTable,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaLine {
    pub count: u32,
    pub amount: Money,
}

/// Exactly which rules fired for a record, kept for audit replay.
///
/// Maps are ordered so the serialized form is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcSnapshot {
    pub version: u16,
    pub rule_set_id: RuleSetId,
    pub rule_set_version: u32,
    pub currency: String,
    pub rate_key: String,
    pub base_source: BaseSource,
    pub base_amount: Money,
    pub applied_multipliers: BTreeMap<String, Decimal>,
    pub media_breakdown: BTreeMap<String, MediaLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus_amount: Option<Money>,
}
