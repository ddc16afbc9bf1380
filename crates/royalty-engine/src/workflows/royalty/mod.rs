//! Royalty calculation and approval engine.
//!
//! Articles are priced against the rule set in force at publish time, walked
//! through editor, manager, and finance approval, and paid through month-end
//! batches. Every status or amount change writes an approval history row in
//! the same store commit.

pub mod access;
pub mod audit;
pub mod batch;
pub mod calculation;
pub mod domain;
pub mod error;
pub mod memory;
pub mod overrides;
pub mod repository;
pub mod router;
pub mod rules;
pub mod service;
pub mod workflow;

#[cfg(test)]
mod tests;

pub use access::{Actor, Permission, WILDCARD_PERMISSION};
pub use audit::{ApprovalHistory, AuditTrailRecorder};
pub use batch::{BatchStatus, MonthKey, PaymentBatch, PaymentBatchItem, PaymentBatchSummary};
pub use calculation::{BaseSource, CalcSnapshot, Calculation, CalculationEngine, MediaLine};
pub use domain::{
    ArticleId, ArticleSnapshot, AuthorId, AuthorRef, BatchId, CategoryId, MediaCount, Money,
    RoyaltyRecord, RoyaltyRecordId, RoyaltyStatus, RuleSetId,
};
pub use error::{ErrorKind, RoyaltyError};
pub use memory::{MemoryArticleCatalog, MemoryRoyaltyStore};
pub use overrides::{OverrideDecision, OverridePolicyEnforcer, OverrideRole};
pub use repository::{
    ArticleCatalog, CatalogError, ChangeSet, Clock, ConstraintViolation, Guard, PublishedArticle,
    RecordFilter, RepositoryError, RoyaltyStore, SystemClock,
};
pub use router::{
    royalty_router, ACTOR_EMAIL_HEADER, ACTOR_ID_HEADER, ACTOR_PERMISSIONS_HEADER,
};
pub use rules::{
    FeeMode, MediaFeeRule, MultiplierRule, MultiplierType, OverridePolicy, RuleSet, RuleSetDraft,
    RuleSetStatus, RuleSetValidationError,
};
pub use service::{
    BulkCalculationSummary, BulkFailure, RecordPage, RecordQuery, RoyaltyService,
    DEFAULT_PAGE_SIZE,
};
pub use workflow::{ApprovalAction, Transition};
