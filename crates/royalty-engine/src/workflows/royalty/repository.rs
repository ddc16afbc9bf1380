use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::{ApprovalHistory, HistoryEntry};
use super::batch::{MonthKey, PaymentBatch};
use super::domain::{
    ArticleId, ArticleSnapshot, AuthorId, AuthorRef, BatchId, RoyaltyRecord, RoyaltyRecordId,
    RoyaltyStatus, RuleSetId,
};
use super::rules::RuleSet;

/// Filter for record listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub month: Option<MonthKey>,
    pub status: Option<RoyaltyStatus>,
    pub author_id: Option<AuthorId>,
}

impl RecordFilter {
    pub fn matches(&self, record: &RoyaltyRecord) -> bool {
        self.month
            .map_or(true, |month| month.contains(record.published_at))
            && self.status.map_or(true, |status| record.status == status)
            && self
                .author_id
                .as_ref()
                .map_or(true, |author| &record.author_id == author)
    }
}

/// Precondition checked at commit time, under the same critical section as the writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The record is not a member of any DRAFT or APPROVED batch.
    RecordUnbatched(RoyaltyRecordId),
    /// The record is still at the revision the caller read.
    RecordRevision {
        record_id: RoyaltyRecordId,
        revision: u64,
    },
}

/// Unit of work: every guard holds and every write lands, or nothing changes.
///
/// Writes of existing entities must carry `revision = stored + 1`; new entities
/// carry revision 1. A mismatch aborts the commit with [`RepositoryError::Stale`].
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub guards: Vec<Guard>,
    pub rule_sets: Vec<RuleSet>,
    pub records: Vec<RoyaltyRecord>,
    pub history: Vec<HistoryEntry>,
    pub batches: Vec<PaymentBatch>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn put_rule_set(mut self, rule_set: RuleSet) -> Self {
        self.rule_sets.push(rule_set);
        self
    }

    pub fn put_record(mut self, record: RoyaltyRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn append_history(mut self, entry: HistoryEntry) -> Self {
        self.history.push(entry);
        self
    }

    pub fn put_batch(mut self, batch: PaymentBatch) -> Self {
        self.batches.push(batch);
        self
    }
}

/// Uniqueness rules the store enforces on every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    ArticleAlreadyRecorded(ArticleId),
    MonthAlreadyBatched(MonthKey),
    ActiveRuleSetOverlap {
        rule_set_id: RuleSetId,
        conflicting: RuleSetId,
    },
    RecordInLiveBatch {
        record_id: RoyaltyRecordId,
        batch_id: BatchId,
    },
    /// History row for a record that exists neither in the store nor the change set.
    OrphanHistory(RoyaltyRecordId),
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("stale write of {entity} {id}")]
    Stale { entity: &'static str, id: String },
    #[error("constraint violated: {0:?}")]
    Constraint(ConstraintViolation),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for rule sets, records, history, and batches.
pub trait RoyaltyStore: Send + Sync {
    fn rule_sets(&self) -> Result<Vec<RuleSet>, RepositoryError>;
    fn rule_set(&self, id: RuleSetId) -> Result<Option<RuleSet>, RepositoryError>;

    fn record(&self, id: RoyaltyRecordId) -> Result<Option<RoyaltyRecord>, RepositoryError>;
    fn record_for_article(
        &self,
        article_id: &ArticleId,
    ) -> Result<Option<RoyaltyRecord>, RepositoryError>;
    /// Matching records ordered by `published_at`, then id.
    fn records(&self, filter: &RecordFilter) -> Result<Vec<RoyaltyRecord>, RepositoryError>;

    /// Rows for one record in insertion order.
    fn history(&self, record_id: RoyaltyRecordId) -> Result<Vec<ApprovalHistory>, RepositoryError>;

    fn batches(&self) -> Result<Vec<PaymentBatch>, RepositoryError>;
    fn batch(&self, id: BatchId) -> Result<Option<PaymentBatch>, RepositoryError>;
    /// The DRAFT or APPROVED batch holding `record_id`, if any.
    fn live_batch_for_record(
        &self,
        record_id: RoyaltyRecordId,
    ) -> Result<Option<BatchId>, RepositoryError>;

    fn commit(&self, changes: ChangeSet) -> Result<(), RepositoryError>;
}

/// Published article together with its author, as served by the content service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedArticle {
    pub article: ArticleSnapshot,
    pub author: AuthorRef,
}

/// Published articles known to the engine; bulk recalculation sweeps this list.
pub trait ArticleCatalog: Send + Sync {
    fn published(&self) -> Result<Vec<PublishedArticle>, CatalogError>;
    /// Add or replace the entry for the article's id.
    fn register(&self, published: PublishedArticle) -> Result<(), CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("article catalog unavailable: {0}")]
    Unavailable(String),
}

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
