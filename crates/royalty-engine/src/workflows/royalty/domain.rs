use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::calculation::CalcSnapshot;
use super::error::RoyaltyError;

/// Monetary amounts are exact decimals in the rule set's currency.
pub type Money = Decimal;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a persisted royalty record.
    RoyaltyRecordId
);
uuid_id!(
    /// Identifier of one rule set version.
    RuleSetId
);
uuid_id!(
    /// Identifier of a month-end payment batch.
    BatchId
);
uuid_id!(HistoryId);

/// Article identifier issued by the content service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub String);

/// Author identifier issued by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub String);

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Count of attached media assets of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCount {
    pub media_type: String,
    pub count: u32,
}

/// Article metadata consumed from the content service at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSnapshot {
    pub article_id: ArticleId,
    pub article_type: String,
    pub word_count: u32,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publication flags such as `EXCLUSIVE` or `BREAKING`.
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaCount>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub bonus_amount: Option<Money>,
    /// Base amount entered upstream when the rule set has no rate for the type.
    #[serde(default)]
    pub manual_base_amount: Option<Money>,
}

impl ArticleSnapshot {
    /// Media counts folded by type, so repeated entries for one type add up.
    pub fn media_by_type(&self) -> Result<BTreeMap<String, u32>, RoyaltyError> {
        let mut grouped = BTreeMap::new();
        for media in &self.media {
            let key = normalize_key(&media.media_type);
            if key.is_empty() {
                continue;
            }
            let total = grouped.entry(key).or_insert(0u32);
            *total = total
                .checked_add(media.count)
                .ok_or_else(|| RoyaltyError::out_of_range("media count"))?;
        }
        Ok(grouped)
    }
}

/// Author identity as supplied by the identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRef {
    pub author_id: AuthorId,
    pub author_type: String,
    pub email: String,
}

/// Workflow status of a royalty record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoyaltyStatus {
    Calculated,
    EditorConfirmed,
    ManagerApproved,
    FinanceApproved,
    Paid,
    Rejected,
    Voided,
}

impl RoyaltyStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RoyaltyStatus::Calculated => "CALCULATED",
            RoyaltyStatus::EditorConfirmed => "EDITOR_CONFIRMED",
            RoyaltyStatus::ManagerApproved => "MANAGER_APPROVED",
            RoyaltyStatus::FinanceApproved => "FINANCE_APPROVED",
            RoyaltyStatus::Paid => "PAID",
            RoyaltyStatus::Rejected => "REJECTED",
            RoyaltyStatus::Voided => "VOIDED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RoyaltyStatus::Paid | RoyaltyStatus::Rejected | RoyaltyStatus::Voided
        )
    }

    /// Amounts may still be overridden in these states.
    pub const fn accepts_override(self) -> bool {
        matches!(
            self,
            RoyaltyStatus::Calculated
                | RoyaltyStatus::EditorConfirmed
                | RoyaltyStatus::ManagerApproved
        )
    }
}

impl fmt::Display for RoyaltyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One royalty calculation for one article and its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoyaltyRecord {
    pub id: RoyaltyRecordId,
    pub article_id: ArticleId,
    pub article_type: String,
    pub word_count: u32,
    pub author_id: AuthorId,
    pub author_type: String,
    pub author_email: String,
    pub category_id: Option<CategoryId>,
    pub published_at: DateTime<Utc>,
    pub status: RoyaltyStatus,
    pub rule_set_id: RuleSetId,
    pub rule_set_version: u32,
    pub currency: String,
    pub base_amount: Money,
    pub multiplier_factor: Decimal,
    pub media_fee_total: Money,
    pub bonus_amount: Option<Money>,
    pub gross_amount: Money,
    pub override_amount: Option<Money>,
    pub final_amount: Money,
    pub note: Option<String>,
    pub calc_snapshot: CalcSnapshot,
    pub payment_ref: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub updated_by_user_id: String,
    /// Bumped by the store on every write; a stale revision aborts the commit.
    pub revision: u64,
}

impl RoyaltyRecord {
    /// `base * factor + media + bonus`, or `None` when it does not fit a decimal.
    pub fn expected_gross(&self) -> Option<Money> {
        self.base_amount
            .checked_mul(self.multiplier_factor)?
            .checked_add(self.media_fee_total)?
            .checked_add(self.bonus_amount.unwrap_or(Decimal::ZERO))
    }

    pub fn expected_final(&self) -> Option<Money> {
        self.gross_amount
            .checked_add(self.override_amount.unwrap_or(Decimal::ZERO))
    }

    pub fn amounts_consistent(&self) -> bool {
        self.expected_gross() == Some(self.gross_amount)
            && self.expected_final() == Some(self.final_amount)
    }

    /// Copy prepared for the next write by `actor_user_id`.
    pub(crate) fn next_revision(&self, actor_user_id: &str, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next.updated_at = now;
        next.updated_by_user_id = actor_user_id.to_string();
        next
    }
}

/// Keys from rule sets and article attributes compare trimmed and upper-cased.
pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
