use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::RoyaltyConfig;
use crate::workflows::royalty::audit::ApprovalHistory;
use crate::workflows::royalty::batch::PaymentBatch;
use crate::workflows::royalty::domain::{
    ArticleId, ArticleSnapshot, AuthorId, AuthorRef, BatchId, RoyaltyRecord, RoyaltyRecordId,
    RuleSetId,
};
use crate::workflows::royalty::repository::{
    ChangeSet, Clock, PublishedArticle, RecordFilter, RepositoryError, RoyaltyStore,
};
use crate::workflows::royalty::rules::{
    MultiplierRule, MultiplierType, OverridePolicy, RuleSet, RuleSetDraft,
};
use crate::workflows::royalty::{
    royalty_router, Actor, MemoryArticleCatalog, MemoryRoyaltyStore, RoyaltyService,
};

pub(super) type TestService = RoyaltyService<MemoryRoyaltyStore, MemoryArticleCatalog>;

/// Clock pinned by the test; `advance` moves it forward.
pub(super) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(super) fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<MemoryRoyaltyStore>,
    pub(super) catalog: Arc<MemoryArticleCatalog>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn money(raw: &str) -> Decimal {
    Decimal::from_str(raw).expect("decimal literal")
}

pub(super) fn harness() -> Harness {
    let store = Arc::new(MemoryRoyaltyStore::default());
    let catalog = Arc::new(MemoryArticleCatalog::default());
    let clock = FixedClock::at(at(2026, 3, 2, 9));
    let service = Arc::new(RoyaltyService::with_clock(
        store.clone(),
        catalog.clone(),
        clock.clone(),
        RoyaltyConfig::default(),
    ));
    Harness {
        service,
        store,
        catalog,
        clock,
    }
}

/// Harness with `draft` stored and activated.
pub(super) fn harness_with(draft: RuleSetDraft) -> (Harness, RuleSet) {
    let harness = harness();
    let created = harness
        .service
        .create_rule_set(&admin(), draft)
        .expect("draft is valid");
    let active = harness
        .service
        .activate_rule_set(&admin(), created.id)
        .expect("rule set activates");
    (harness, active)
}

pub(super) fn actor(user_id: &str, permissions: &[&str]) -> Actor {
    Actor::new(
        user_id,
        format!("{user_id}@newsroom.test"),
        permissions.iter().copied(),
    )
}

pub(super) fn admin() -> Actor {
    actor("admin", &["*:*"])
}

pub(super) fn editor() -> Actor {
    actor("editor", &["royalties:editor_confirm"])
}

pub(super) fn manager() -> Actor {
    actor("manager", &["royalties:manager_approve"])
}

pub(super) fn finance() -> Actor {
    actor("finance", &["royalties:finance_approve"])
}

pub(super) fn payer() -> Actor {
    actor("payer", &["royalties:mark_paid"])
}

pub(super) fn reader() -> Actor {
    actor("reader", &[])
}

pub(super) fn policy() -> OverridePolicy {
    OverridePolicy {
        editor_override_max_percent: money("10"),
        manager_override_max_percent: money("30"),
        require_note_for_override: true,
        allow_manual_base_rate_override: false,
    }
}

/// `NEWS` priced at `rate` VND from 2026-01-01, no multipliers or media fees.
pub(super) fn news_draft(rate: &str) -> RuleSetDraft {
    RuleSetDraft {
        name: "newsroom".to_string(),
        currency: "VND".to_string(),
        effective_from: at(2026, 1, 1, 0),
        effective_to: None,
        rates: BTreeMap::from([("NEWS".to_string(), money(rate))]),
        multipliers: Vec::new(),
        media_fees: Vec::new(),
        policy: policy(),
    }
}

pub(super) fn exclusive(factor: &str) -> MultiplierRule {
    MultiplierRule {
        multiplier_type: MultiplierType::Flag,
        key_name: "EXCLUSIVE".to_string(),
        factor: money(factor),
    }
}

pub(super) fn article(article_id: &str, published_at: DateTime<Utc>) -> ArticleSnapshot {
    ArticleSnapshot {
        article_id: ArticleId(article_id.to_string()),
        article_type: "NEWS".to_string(),
        word_count: 800,
        category_id: None,
        published_at,
        tags: Vec::new(),
        flags: Vec::new(),
        media: Vec::new(),
        currency: None,
        bonus_amount: None,
        manual_base_amount: None,
    }
}

pub(super) fn author(author_id: &str) -> AuthorRef {
    AuthorRef {
        author_id: AuthorId(author_id.to_string()),
        author_type: "STAFF".to_string(),
        email: format!("{author_id}@newsroom.test"),
    }
}

pub(super) fn published(article_id: &str, author_id: &str) -> PublishedArticle {
    PublishedArticle {
        article: article(article_id, at(2026, 2, 10, 14)),
        author: author(author_id),
    }
}

pub(super) fn calculated(harness: &Harness, article_id: &str, author_id: &str) -> RoyaltyRecord {
    harness
        .service
        .record_published(&admin(), published(article_id, author_id))
        .expect("record calculates")
}

/// Record walked through all three approvals.
pub(super) fn finance_approved(
    harness: &Harness,
    article_id: &str,
    author_id: &str,
) -> RoyaltyRecord {
    let record = calculated(harness, article_id, author_id);
    harness
        .service
        .editor_confirm(&editor(), record.id)
        .expect("editor confirms");
    harness
        .service
        .manager_approve(&manager(), record.id)
        .expect("manager approves");
    harness
        .service
        .finance_approve(&finance(), record.id)
        .expect("finance approves")
}

pub(super) fn sum_of_parts(record: &RoyaltyRecord) -> Decimal {
    record.base_amount * record.multiplier_factor
        + record.media_fee_total
        + record.bonus_amount.unwrap_or_default()
        + record.override_amount.unwrap_or_default()
}

pub(super) fn router_for(harness: &Harness) -> axum::Router {
    royalty_router(harness.service.clone())
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Store whose every call fails, for internal error paths.
pub(super) struct UnavailableStore;

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("database offline".to_string())
}

impl RoyaltyStore for UnavailableStore {
    fn rule_sets(&self) -> Result<Vec<RuleSet>, RepositoryError> {
        Err(offline())
    }

    fn rule_set(&self, _id: RuleSetId) -> Result<Option<RuleSet>, RepositoryError> {
        Err(offline())
    }

    fn record(&self, _id: RoyaltyRecordId) -> Result<Option<RoyaltyRecord>, RepositoryError> {
        Err(offline())
    }

    fn record_for_article(
        &self,
        _article_id: &ArticleId,
    ) -> Result<Option<RoyaltyRecord>, RepositoryError> {
        Err(offline())
    }

    fn records(&self, _filter: &RecordFilter) -> Result<Vec<RoyaltyRecord>, RepositoryError> {
        Err(offline())
    }

    fn history(
        &self,
        _record_id: RoyaltyRecordId,
    ) -> Result<Vec<ApprovalHistory>, RepositoryError> {
        Err(offline())
    }

    fn batches(&self) -> Result<Vec<PaymentBatch>, RepositoryError> {
        Err(offline())
    }

    fn batch(&self, _id: BatchId) -> Result<Option<PaymentBatch>, RepositoryError> {
        Err(offline())
    }

    fn live_batch_for_record(
        &self,
        _record_id: RoyaltyRecordId,
    ) -> Result<Option<BatchId>, RepositoryError> {
        Err(offline())
    }

    fn commit(&self, _changes: ChangeSet) -> Result<(), RepositoryError> {
        Err(offline())
    }
}
