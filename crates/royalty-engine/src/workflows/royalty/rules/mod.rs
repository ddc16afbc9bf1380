//! Versioned pricing configuration.
//!
//! Rule sets are written once and never edited in place: a change is a new
//! version under the same name. Only the status flips between ACTIVE and
//! INACTIVE, and the store refuses to hold two ACTIVE rule sets of one currency
//! whose effective ranges overlap.

mod resolver;

pub use resolver::resolve;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{normalize_key, Money, RuleSetId};
use super::error::RoyaltyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleSetStatus {
    Active,
    Inactive,
}

/// Attribute space a multiplier key is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultiplierType {
    Flag,
    Tag,
    Category,
    AuthorType,
    Calendar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MultiplierRule {
    pub multiplier_type: MultiplierType,
    pub key_name: String,
    pub factor: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeMode {
    PerUnit,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaFeeRule {
    pub media_type: String,
    pub fee_amount: Money,
    pub fee_mode: FeeMode,
    pub max_fee_amount: Money,
}

impl MediaFeeRule {
    /// Fee for `count` assets of this type, capped at `max_fee_amount`.
    pub fn fee_for(&self, count: u32) -> Result<Money, RoyaltyError> {
        let uncapped = match self.fee_mode {
            FeeMode::PerUnit => Decimal::from(count)
                .checked_mul(self.fee_amount)
                .ok_or_else(|| RoyaltyError::out_of_range("media fee"))?,
            FeeMode::Flat => self.fee_amount,
        };
        Ok(uncapped.min(self.max_fee_amount))
    }
}

/// Limits on manual amount adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OverridePolicy {
    pub editor_override_max_percent: Decimal,
    pub manager_override_max_percent: Decimal,
    pub require_note_for_override: bool,
    pub allow_manual_base_rate_override: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub id: RuleSetId,
    pub name: String,
    pub version: u32,
    pub currency: String,
    pub status: RuleSetStatus,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub rates: BTreeMap<String, Money>,
    pub multipliers: Vec<MultiplierRule>,
    pub media_fees: Vec<MediaFeeRule>,
    pub policy: OverridePolicy,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub revision: u64,
}

impl RuleSet {
    /// Whether `at` falls inside `[effective_from, effective_to)`.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.effective_from && self.effective_to.map_or(true, |end| at < end)
    }

    pub fn overlaps(&self, other: &RuleSet) -> bool {
        let starts_before_other_ends = other
            .effective_to
            .map_or(true, |end| self.effective_from < end);
        let other_starts_before_end = self
            .effective_to
            .map_or(true, |end| other.effective_from < end);
        starts_before_other_ends && other_starts_before_end
    }

    /// Both ACTIVE, same currency, overlapping ranges.
    pub fn conflicts_with(&self, other: &RuleSet) -> bool {
        self.id != other.id
            && self.status == RuleSetStatus::Active
            && other.status == RuleSetStatus::Active
            && self.currency == other.currency
            && self.overlaps(other)
    }

    pub fn rate_for(&self, article_type: &str) -> Option<Money> {
        self.rates.get(&normalize_key(article_type)).copied()
    }

    pub fn media_fee_for(&self, media_type: &str) -> Option<&MediaFeeRule> {
        let wanted = normalize_key(media_type);
        self.media_fees
            .iter()
            .find(|fee| normalize_key(&fee.media_type) == wanted)
    }
}

/// Rule set payload accepted from the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleSetDraft {
    pub name: String,
    pub currency: String,
    pub effective_from: DateTime<Utc>,
    #[serde(default)]
    pub effective_to: Option<DateTime<Utc>>,
    pub rates: BTreeMap<String, Money>,
    #[serde(default)]
    pub multipliers: Vec<MultiplierRule>,
    #[serde(default)]
    pub media_fees: Vec<MediaFeeRule>,
    pub policy: OverridePolicy,
}

/// Reasons a draft is refused before anything is stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleSetValidationError {
    #[error("rule set name must not be blank")]
    BlankName,
    #[error("currency '{0}' must be a three letter code")]
    InvalidCurrency(String),
    #[error("rule set must define at least one article type rate")]
    NoRates,
    #[error("rate for article type '{article_type}' must not be negative")]
    NegativeRate { article_type: String },
    #[error("article type '{0}' is defined more than once")]
    DuplicateRate(String),
    #[error("multiplier '{key_name}' must have a factor greater than zero")]
    NonPositiveFactor { key_name: String },
    #[error("multiplier key '{0}' is defined more than once")]
    DuplicateMultiplier(String),
    #[error("media fee for '{media_type}' must not be negative")]
    NegativeFee { media_type: String },
    #[error("media type '{0}' is defined more than once")]
    DuplicateMediaFee(String),
    #[error("effectiveTo must be later than effectiveFrom")]
    InvalidEffectiveRange,
    #[error("policy field '{field}' must be between 0 and 100")]
    InvalidPolicyPercent { field: &'static str },
    #[error("blank key in '{0}'")]
    BlankKey(&'static str),
    #[error("malformed rule set payload: {0}")]
    Malformed(String),
}

impl RuleSetDraft {
    /// Validate and normalize the draft into an INACTIVE rule set version.
    pub fn into_rule_set(
        self,
        version: u32,
        created_by_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RuleSet, RuleSetValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(RuleSetValidationError::BlankName);
        }

        let currency = normalize_currency(&self.currency)
            .ok_or_else(|| RuleSetValidationError::InvalidCurrency(self.currency.clone()))?;

        if let Some(end) = self.effective_to {
            if end <= self.effective_from {
                return Err(RuleSetValidationError::InvalidEffectiveRange);
            }
        }

        if self.rates.is_empty() {
            return Err(RuleSetValidationError::NoRates);
        }
        let mut rates = BTreeMap::new();
        for (article_type, amount) in self.rates {
            let key = normalize_key(&article_type);
            if key.is_empty() {
                return Err(RuleSetValidationError::BlankKey("rates"));
            }
            if amount < Decimal::ZERO {
                return Err(RuleSetValidationError::NegativeRate { article_type });
            }
            if rates.insert(key.clone(), amount).is_some() {
                return Err(RuleSetValidationError::DuplicateRate(key));
            }
        }

        let mut seen = BTreeSet::new();
        let mut multipliers = Vec::with_capacity(self.multipliers.len());
        for rule in self.multipliers {
            let key_name = normalize_key(&rule.key_name);
            if key_name.is_empty() {
                return Err(RuleSetValidationError::BlankKey("multipliers"));
            }
            if rule.factor <= Decimal::ZERO {
                return Err(RuleSetValidationError::NonPositiveFactor { key_name });
            }
            if !seen.insert(key_name.clone()) {
                return Err(RuleSetValidationError::DuplicateMultiplier(key_name));
            }
            multipliers.push(MultiplierRule {
                key_name,
                ..rule
            });
        }

        let mut seen = BTreeSet::new();
        let mut media_fees = Vec::with_capacity(self.media_fees.len());
        for fee in self.media_fees {
            let media_type = normalize_key(&fee.media_type);
            if media_type.is_empty() {
                return Err(RuleSetValidationError::BlankKey("mediaFees"));
            }
            if fee.fee_amount < Decimal::ZERO || fee.max_fee_amount < Decimal::ZERO {
                return Err(RuleSetValidationError::NegativeFee { media_type });
            }
            if !seen.insert(media_type.clone()) {
                return Err(RuleSetValidationError::DuplicateMediaFee(media_type));
            }
            media_fees.push(MediaFeeRule { media_type, ..fee });
        }

        validate_percent(
            self.policy.editor_override_max_percent,
            "editorOverrideMaxPercent",
        )?;
        validate_percent(
            self.policy.manager_override_max_percent,
            "managerOverrideMaxPercent",
        )?;

        Ok(RuleSet {
            id: RuleSetId::generate(),
            name,
            version,
            currency,
            status: RuleSetStatus::Inactive,
            effective_from: self.effective_from,
            effective_to: self.effective_to,
            rates,
            multipliers,
            media_fees,
            policy: self.policy,
            created_at: now,
            created_by_user_id: created_by_user_id.to_string(),
            revision: 1,
        })
    }
}

fn validate_percent(value: Decimal, field: &'static str) -> Result<(), RuleSetValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(RuleSetValidationError::InvalidPolicyPercent { field });
    }
    Ok(())
}

/// Upper-cased three letter code, or `None` when malformed.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}
