use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::access::Permission;
use super::batch::{BatchStatus, MonthKey};
use super::domain::{ArticleId, BatchId, RoyaltyRecordId, RoyaltyStatus, RuleSetId};
use super::overrides::OverrideRole;
use super::repository::{CatalogError, RepositoryError};
use super::rules::RuleSetValidationError;
use super::workflow::ApprovalAction;

/// Broad class of a failure; drives the HTTP status and retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Policy,
    Conflict,
    NotFound,
    Internal,
}

/// Every way a royalty operation can be refused. Nothing is written when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum RoyaltyError {
    #[error("no rate configured for article type '{article_type}' in rule set {rule_set_id}")]
    UnknownArticleType {
        article_type: String,
        rule_set_id: RuleSetId,
    },
    #[error("override requires a note under the active policy")]
    MissingOverrideReason,
    #[error("{action} requires a reason note")]
    MissingReason { action: ApprovalAction },
    #[error("paymentRef must not be blank")]
    MissingPaymentReference,
    #[error("paidAt is required to mark a record paid")]
    MissingPaidAt,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid rule set: {0}")]
    InvalidRuleSet(#[from] RuleSetValidationError),
    #[error("month '{0}' must be formatted as YYYY-MM")]
    InvalidMonthKey(String),
    #[error("currency '{0}' must be a three letter code")]
    InvalidCurrency(String),
    #[error("records for {month_key} span several currencies: {currencies:?}")]
    MixedCurrencyBatch {
        month_key: MonthKey,
        currencies: Vec<String>,
    },

    #[error("{permission} permission required")]
    PermissionDenied { permission: Permission },
    #[error("override delta exceeds the {role:?} cap of {max_percent}%")]
    OverrideExceedsPolicy {
        role: OverrideRole,
        max_percent: Decimal,
        delta_percent: Option<Decimal>,
    },

    #[error("{action} is not allowed while record {record_id} is {status}")]
    InvalidStateTransition {
        record_id: RoyaltyRecordId,
        action: ApprovalAction,
        status: RoyaltyStatus,
    },
    #[error("amounts of record {record_id} are frozen in status {status}")]
    OverrideFrozen {
        record_id: RoyaltyRecordId,
        status: RoyaltyStatus,
    },
    #[error("record {record_id} is locked in payment batch {batch_id}")]
    RecordLockedInBatch {
        record_id: RoyaltyRecordId,
        batch_id: BatchId,
    },
    #[error("article {article_id} already has a royalty record")]
    RecordAlreadyExists { article_id: ArticleId },
    #[error("rule set {rule_set_id} overlaps active rule set {conflicting}")]
    RuleSetOverlap {
        rule_set_id: RuleSetId,
        conflicting: RuleSetId,
    },
    #[error("rule set {rule_set_id} is already in the requested status")]
    RuleSetStatusUnchanged { rule_set_id: RuleSetId },
    #[error("a payment batch for {month_key} already exists")]
    BatchAlreadyExists { month_key: MonthKey },
    #[error("batch {batch_id} cannot be {action} while {status}")]
    InvalidBatchTransition {
        batch_id: BatchId,
        action: &'static str,
        status: BatchStatus,
    },
    #[error("batch {batch_id} is inconsistent: record {record_id} is {status}")]
    InconsistentBatchState {
        batch_id: BatchId,
        record_id: RoyaltyRecordId,
        status: RoyaltyStatus,
    },
    #[error("concurrent update of {0}; re-fetch and retry")]
    ConcurrentUpdate(String),

    #[error("no active {currency} rule set covers {at}")]
    NoApplicableRuleSet { currency: String, at: DateTime<Utc> },
    #[error("no FINANCE_APPROVED records for {month_key}")]
    NoEligibleRecords { month_key: MonthKey },
    #[error("royalty record {0} not found")]
    RecordNotFound(RoyaltyRecordId),
    #[error("rule set {0} not found")]
    RuleSetNotFound(RuleSetId),
    #[error("payment batch {0} not found")]
    BatchNotFound(BatchId),

    #[error("several active {currency} rule sets cover {at}: {candidates:?}")]
    AmbiguousRuleSet {
        currency: String,
        at: DateTime<Utc>,
        candidates: Vec<RuleSetId>,
    },
    #[error("export failed: {0}")]
    Export(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl RoyaltyError {
    /// Arithmetic on `what` left the representable decimal range.
    pub(crate) fn out_of_range(what: &str) -> Self {
        RoyaltyError::InvalidAmount(format!("{what} is out of range"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RoyaltyError::UnknownArticleType { .. }
            | RoyaltyError::MissingOverrideReason
            | RoyaltyError::MissingReason { .. }
            | RoyaltyError::MissingPaymentReference
            | RoyaltyError::MissingPaidAt
            | RoyaltyError::InvalidAmount(_)
            | RoyaltyError::InvalidRuleSet(_)
            | RoyaltyError::InvalidMonthKey(_)
            | RoyaltyError::InvalidCurrency(_)
            | RoyaltyError::MixedCurrencyBatch { .. } => ErrorKind::Validation,
            RoyaltyError::PermissionDenied { .. } | RoyaltyError::OverrideExceedsPolicy { .. } => {
                ErrorKind::Policy
            }
            RoyaltyError::InvalidStateTransition { .. }
            | RoyaltyError::OverrideFrozen { .. }
            | RoyaltyError::RecordLockedInBatch { .. }
            | RoyaltyError::RecordAlreadyExists { .. }
            | RoyaltyError::RuleSetOverlap { .. }
            | RoyaltyError::RuleSetStatusUnchanged { .. }
            | RoyaltyError::BatchAlreadyExists { .. }
            | RoyaltyError::InvalidBatchTransition { .. }
            | RoyaltyError::InconsistentBatchState { .. }
            | RoyaltyError::ConcurrentUpdate(_) => ErrorKind::Conflict,
            RoyaltyError::NoApplicableRuleSet { .. }
            | RoyaltyError::NoEligibleRecords { .. }
            | RoyaltyError::RecordNotFound(_)
            | RoyaltyError::RuleSetNotFound(_)
            | RoyaltyError::BatchNotFound(_) => ErrorKind::NotFound,
            RoyaltyError::AmbiguousRuleSet { .. }
            | RoyaltyError::Export(_)
            | RoyaltyError::Repository(_)
            | RoyaltyError::Catalog(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            RoyaltyError::UnknownArticleType { .. } => "UNKNOWN_ARTICLE_TYPE",
            RoyaltyError::MissingOverrideReason => "MISSING_OVERRIDE_REASON",
            RoyaltyError::MissingReason { .. } => "MISSING_REASON",
            RoyaltyError::MissingPaymentReference => "MISSING_PAYMENT_REFERENCE",
            RoyaltyError::MissingPaidAt => "MISSING_PAID_AT",
            RoyaltyError::InvalidAmount(_) => "INVALID_AMOUNT",
            RoyaltyError::InvalidRuleSet(_) => "INVALID_RULE_SET",
            RoyaltyError::InvalidMonthKey(_) => "INVALID_MONTH_KEY",
            RoyaltyError::InvalidCurrency(_) => "INVALID_CURRENCY",
            RoyaltyError::MixedCurrencyBatch { .. } => "MIXED_CURRENCY_BATCH",
            RoyaltyError::PermissionDenied { .. } => "PERMISSION_DENIED",
            RoyaltyError::OverrideExceedsPolicy { .. } => "OVERRIDE_EXCEEDS_POLICY",
            RoyaltyError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            RoyaltyError::OverrideFrozen { .. } => "OVERRIDE_FROZEN",
            RoyaltyError::RecordLockedInBatch { .. } => "RECORD_LOCKED_IN_BATCH",
            RoyaltyError::RecordAlreadyExists { .. } => "RECORD_ALREADY_EXISTS",
            RoyaltyError::RuleSetOverlap { .. } => "RULE_SET_OVERLAP",
            RoyaltyError::RuleSetStatusUnchanged { .. } => "RULE_SET_STATUS_UNCHANGED",
            RoyaltyError::BatchAlreadyExists { .. } => "BATCH_ALREADY_EXISTS",
            RoyaltyError::InvalidBatchTransition { .. } => "INVALID_BATCH_TRANSITION",
            RoyaltyError::InconsistentBatchState { .. } => "INCONSISTENT_BATCH_STATE",
            RoyaltyError::ConcurrentUpdate(_) => "CONCURRENT_UPDATE",
            RoyaltyError::NoApplicableRuleSet { .. } => "NO_APPLICABLE_RULE_SET",
            RoyaltyError::NoEligibleRecords { .. } => "NO_ELIGIBLE_RECORDS",
            RoyaltyError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            RoyaltyError::RuleSetNotFound(_) => "RULE_SET_NOT_FOUND",
            RoyaltyError::BatchNotFound(_) => "BATCH_NOT_FOUND",
            RoyaltyError::AmbiguousRuleSet { .. } => "AMBIGUOUS_RULE_SET",
            RoyaltyError::Export(_) => "EXPORT_FAILED",
            RoyaltyError::Repository(_) => "REPOSITORY_ERROR",
            RoyaltyError::Catalog(_) => "CATALOG_ERROR",
        }
    }
}
