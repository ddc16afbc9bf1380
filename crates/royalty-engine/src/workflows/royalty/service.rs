use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::access::{Actor, Permission};
use super::audit::{ApprovalHistory, AuditTrailRecorder};
use super::batch::{BatchStatus, MonthKey, PaymentBatch, PaymentBatchSummary};
use super::calculation::CalculationEngine;
use super::domain::{
    ArticleId, BatchId, Money, RoyaltyRecord, RoyaltyRecordId, RoyaltyStatus, RuleSetId,
};
use super::error::RoyaltyError;
use super::overrides::{OverridePolicyEnforcer, OverrideRole};
use super::repository::{
    ArticleCatalog, ChangeSet, Clock, ConstraintViolation, Guard, PublishedArticle, RecordFilter,
    RepositoryError, RoyaltyStore, SystemClock,
};
use super::rules::{normalize_currency, resolve, RuleSet, RuleSetDraft, RuleSetStatus};
use super::workflow::{self, ApprovalAction};
use crate::config::RoyaltyConfig;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Record listing request; `page` is zero-based.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub filter: RecordFilter,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub items: Vec<RoyaltyRecord>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub article_id: ArticleId,
    pub code: &'static str,
    pub message: String,
}

/// Outcome of one bulk recalculation sweep.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCalculationSummary {
    pub created: Vec<RoyaltyRecordId>,
    pub skipped: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkCalculationSummary {
    pub fn message(&self) -> String {
        format!(
            "created {} royalty records, skipped {} already recorded, {} failed",
            self.created.len(),
            self.skipped,
            self.failures.len()
        )
    }
}

/// Facade over the store, the calculation engine, and the approval workflow.
///
/// Every mutating call builds one [`ChangeSet`] and commits it; a rejected
/// call leaves the store untouched.
pub struct RoyaltyService<S, C> {
    store: Arc<S>,
    catalog: Arc<C>,
    engine: CalculationEngine,
    clock: Arc<dyn Clock>,
    config: RoyaltyConfig,
}

impl<S, C> RoyaltyService<S, C>
where
    S: RoyaltyStore + 'static,
    C: ArticleCatalog + 'static,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, config: RoyaltyConfig) -> Self {
        Self::with_clock(store, catalog, Arc::new(SystemClock), config)
    }

    pub fn with_clock(
        store: Arc<S>,
        catalog: Arc<C>,
        clock: Arc<dyn Clock>,
        config: RoyaltyConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            engine: CalculationEngine::new(),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RoyaltyConfig {
        &self.config
    }

    pub fn list_rule_sets(&self) -> Result<Vec<RuleSet>, RoyaltyError> {
        Ok(self.store.rule_sets()?)
    }

    pub fn rule_set(&self, id: RuleSetId) -> Result<RuleSet, RoyaltyError> {
        self.store
            .rule_set(id)?
            .ok_or(RoyaltyError::RuleSetNotFound(id))
    }

    /// Store a draft as the next INACTIVE version of its name.
    pub fn create_rule_set(
        &self,
        actor: &Actor,
        draft: RuleSetDraft,
    ) -> Result<RuleSet, RoyaltyError> {
        actor.require(Permission::RulesManage)?;

        let name = draft.name.trim().to_string();
        let version = self
            .store
            .rule_sets()?
            .iter()
            .filter(|existing| existing.name == name)
            .map(|existing| existing.version)
            .max()
            .unwrap_or(0)
            + 1;

        let rule_set = draft.into_rule_set(version, &actor.user_id, self.clock.now())?;
        self.store
            .commit(ChangeSet::new().put_rule_set(rule_set.clone()))
            .map_err(commit_error)?;

        info!(
            rule_set_id = %rule_set.id,
            name = %rule_set.name,
            version = rule_set.version,
            actor = %actor.user_id,
            "rule set created"
        );
        Ok(rule_set)
    }

    pub fn activate_rule_set(&self, actor: &Actor, id: RuleSetId) -> Result<RuleSet, RoyaltyError> {
        self.set_rule_set_status(actor, id, RuleSetStatus::Active)
    }

    pub fn deactivate_rule_set(
        &self,
        actor: &Actor,
        id: RuleSetId,
    ) -> Result<RuleSet, RoyaltyError> {
        self.set_rule_set_status(actor, id, RuleSetStatus::Inactive)
    }

    fn set_rule_set_status(
        &self,
        actor: &Actor,
        id: RuleSetId,
        status: RuleSetStatus,
    ) -> Result<RuleSet, RoyaltyError> {
        actor.require(Permission::RulesManage)?;

        let current = self.rule_set(id)?;
        if current.status == status {
            return Err(RoyaltyError::RuleSetStatusUnchanged { rule_set_id: id });
        }

        let mut next = current.clone();
        next.status = status;
        next.revision = current.revision + 1;
        self.store
            .commit(ChangeSet::new().put_rule_set(next.clone()))
            .map_err(commit_error)?;

        info!(rule_set_id = %id, status = ?status, actor = %actor.user_id, "rule set status changed");
        Ok(next)
    }

    /// The single ACTIVE rule set of `currency` covering `at`.
    pub fn resolve_rule_set(
        &self,
        currency: &str,
        at: DateTime<Utc>,
    ) -> Result<RuleSet, RoyaltyError> {
        let currency = normalize_currency(currency)
            .ok_or_else(|| RoyaltyError::InvalidCurrency(currency.to_string()))?;
        let rule_sets = self.store.rule_sets()?;
        resolve(&rule_sets, &currency, at).cloned()
    }

    /// Register a publish event and calculate the article's record.
    pub fn record_published(
        &self,
        actor: &Actor,
        published: PublishedArticle,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        actor.require(Permission::Calculate)?;
        self.catalog.register(published.clone())?;
        self.create_record(actor, &published)
    }

    /// Create records for every catalog article that has none yet.
    ///
    /// Existing records are never touched, so the sweep may run alongside
    /// approvals and may be repeated.
    pub fn bulk_calculate(&self, actor: &Actor) -> Result<BulkCalculationSummary, RoyaltyError> {
        actor.require(Permission::Calculate)?;

        let mut summary = BulkCalculationSummary::default();
        for published in self.catalog.published()? {
            let article_id = published.article.article_id.clone();
            match self.create_record(actor, &published) {
                Ok(record) => summary.created.push(record.id),
                Err(RoyaltyError::RecordAlreadyExists { .. }) => summary.skipped += 1,
                Err(err) => {
                    warn!(article_id = %article_id, code = err.code(), error = %err, "bulk calculation failed for article");
                    summary.failures.push(BulkFailure {
                        article_id,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            created = summary.created.len(),
            skipped = summary.skipped,
            failed = summary.failures.len(),
            actor = %actor.user_id,
            "bulk calculation finished"
        );
        Ok(summary)
    }

    fn create_record(
        &self,
        actor: &Actor,
        published: &PublishedArticle,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        let PublishedArticle { article, author } = published;
        if self.store.record_for_article(&article.article_id)?.is_some() {
            return Err(RoyaltyError::RecordAlreadyExists {
                article_id: article.article_id.clone(),
            });
        }

        let currency = match &article.currency {
            Some(raw) => normalize_currency(raw)
                .ok_or_else(|| RoyaltyError::InvalidCurrency(raw.clone()))?,
            None => self.config.default_currency.clone(),
        };
        let rule_sets = self.store.rule_sets()?;
        let rule_set = resolve(&rule_sets, &currency, article.published_at)?;
        let calculation = self.engine.calculate(article, author, rule_set)?;

        let now = self.clock.now();
        let record = RoyaltyRecord {
            id: RoyaltyRecordId::generate(),
            article_id: article.article_id.clone(),
            article_type: article.article_type.clone(),
            word_count: article.word_count,
            author_id: author.author_id.clone(),
            author_type: author.author_type.clone(),
            author_email: author.email.clone(),
            category_id: article.category_id.clone(),
            published_at: article.published_at,
            status: RoyaltyStatus::Calculated,
            rule_set_id: rule_set.id,
            rule_set_version: rule_set.version,
            currency: rule_set.currency.clone(),
            base_amount: calculation.base_amount,
            multiplier_factor: calculation.multiplier_factor,
            media_fee_total: calculation.media_fee_total,
            bonus_amount: calculation.bonus_amount,
            gross_amount: calculation.gross_amount,
            override_amount: None,
            final_amount: calculation.final_amount,
            note: None,
            calc_snapshot: calculation.snapshot,
            payment_ref: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
            created_by_user_id: actor.user_id.clone(),
            updated_by_user_id: actor.user_id.clone(),
            revision: 1,
        };

        let changes = ChangeSet::new()
            .put_record(record.clone())
            .append_history(AuditTrailRecorder::created(&record, actor));
        self.store.commit(changes).map_err(commit_error)?;

        info!(
            record_id = %record.id,
            article_id = %record.article_id,
            rule_set_id = %record.rule_set_id,
            final_amount = %record.final_amount,
            actor = %actor.user_id,
            "royalty record calculated"
        );
        Ok(record)
    }

    pub fn list_records(&self, query: RecordQuery) -> Result<RecordPage, RoyaltyError> {
        let size = query
            .size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, self.config.max_page_size.max(1));
        let page = query.page.unwrap_or(0);

        let records = self.store.records(&query.filter)?;
        let total = records.len();
        let items = records
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect();

        Ok(RecordPage {
            items,
            page,
            size,
            total,
        })
    }

    pub fn record(&self, id: RoyaltyRecordId) -> Result<RoyaltyRecord, RoyaltyError> {
        self.store.record(id)?.ok_or(RoyaltyError::RecordNotFound(id))
    }

    pub fn history(&self, id: RoyaltyRecordId) -> Result<Vec<ApprovalHistory>, RoyaltyError> {
        self.record(id)?;
        Ok(self.store.history(id)?)
    }

    pub fn editor_confirm(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(actor, id, ApprovalAction::EditorConfirm, None, None)
    }

    pub fn manager_approve(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(actor, id, ApprovalAction::ManagerApprove, None, None)
    }

    pub fn finance_approve(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(actor, id, ApprovalAction::FinanceApprove, None, None)
    }

    /// Pay a single record outside of a batch at the caller-supplied `paid_at`.
    pub fn mark_paid(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
        payment_ref: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(
            actor,
            id,
            ApprovalAction::MarkPaid,
            None,
            Some((payment_ref, paid_at)),
        )
    }

    pub fn reject(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
        reason_note: &str,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(actor, id, ApprovalAction::Reject, Some(reason_note), None)
    }

    pub fn void(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
        reason_note: &str,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        self.transition(actor, id, ApprovalAction::Void, Some(reason_note), None)
    }

    fn transition(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
        action: ApprovalAction,
        reason_note: Option<&str>,
        payment: Option<(&str, DateTime<Utc>)>,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        let before = self.record(id)?;
        let transition = workflow::plan(action, &before, actor, reason_note)?;

        if action == ApprovalAction::MarkPaid
            && payment.map_or(true, |(payment_ref, _)| payment_ref.trim().is_empty())
        {
            return Err(RoyaltyError::MissingPaymentReference);
        }

        let mut changes = ChangeSet::new();
        if matches!(
            action,
            ApprovalAction::Reject | ApprovalAction::Void | ApprovalAction::MarkPaid
        ) {
            if let Some(batch_id) = self.store.live_batch_for_record(id)? {
                return Err(RoyaltyError::RecordLockedInBatch {
                    record_id: id,
                    batch_id,
                });
            }
            changes = changes.guard(Guard::RecordUnbatched(id));
        }

        let mut after = before.next_revision(&actor.user_id, self.clock.now());
        after.status = transition.to;
        if let Some((payment_ref, paid_at)) = payment {
            after.payment_ref = Some(payment_ref.trim().to_string());
            after.paid_at = Some(paid_at);
        }

        let entry = AuditTrailRecorder::transition(
            &before,
            &after,
            action,
            actor,
            reason_note.map(str::to_string),
        );
        match self
            .store
            .commit(changes.put_record(after.clone()).append_history(entry))
        {
            Ok(()) => {}
            Err(RepositoryError::Stale { .. }) => {
                let current = self.record(id)?;
                return Err(RoyaltyError::InvalidStateTransition {
                    record_id: id,
                    action,
                    status: current.status,
                });
            }
            Err(err) => return Err(commit_error(err)),
        }

        info!(
            record_id = %id,
            action = %action,
            from = %before.status,
            to = %after.status,
            actor = %actor.user_id,
            "royalty record transitioned"
        );
        Ok(after)
    }

    /// Replace the payable amount within the record's rule set policy.
    pub fn apply_override(
        &self,
        actor: &Actor,
        id: RoyaltyRecordId,
        final_amount: Money,
        note: Option<&str>,
    ) -> Result<RoyaltyRecord, RoyaltyError> {
        let before = self.record(id)?;
        if !before.status.accepts_override() {
            return Err(RoyaltyError::OverrideFrozen {
                record_id: id,
                status: before.status,
            });
        }

        let role = OverrideRole::for_actor(actor).ok_or(RoyaltyError::PermissionDenied {
            permission: Permission::EditorConfirm,
        })?;
        let rule_set = self.rule_set(before.rule_set_id)?;
        let decision =
            OverridePolicyEnforcer::new(&rule_set.policy).evaluate(&before, final_amount, note, role)?;

        let mut after = before.next_revision(&actor.user_id, self.clock.now());
        after.override_amount = Some(decision.override_amount);
        after.final_amount = decision.final_amount;
        if let Some(note) = note.map(str::trim).filter(|note| !note.is_empty()) {
            after.note = Some(note.to_string());
        }

        let entry =
            AuditTrailRecorder::override_applied(&before, &after, actor, note.map(str::to_string));
        self.store
            .commit(ChangeSet::new().put_record(after.clone()).append_history(entry))
            .map_err(commit_error)?;

        info!(
            record_id = %id,
            role = ?decision.role,
            gross_amount = %after.gross_amount,
            final_amount = %after.final_amount,
            delta_percent = %decision.delta_percent,
            actor = %actor.user_id,
            "royalty override applied"
        );
        Ok(after)
    }

    /// Snapshot the month's FINANCE_APPROVED records into a DRAFT batch.
    pub fn create_batch(
        &self,
        actor: &Actor,
        month_key: MonthKey,
    ) -> Result<PaymentBatch, RoyaltyError> {
        actor.require(Permission::FinanceApprove)?;

        let month_taken = self
            .store
            .batches()?
            .iter()
            .any(|batch| batch.month_key == month_key && batch.status.is_live());
        if month_taken {
            return Err(RoyaltyError::BatchAlreadyExists { month_key });
        }

        let records = self.store.records(&RecordFilter {
            month: Some(month_key),
            status: Some(RoyaltyStatus::FinanceApproved),
            author_id: None,
        })?;
        let batch = PaymentBatch::assemble(month_key, &records, &actor.user_id, self.clock.now())?;

        let changes = records
            .iter()
            .fold(ChangeSet::new(), |changes, record| {
                changes.guard(Guard::RecordRevision {
                    record_id: record.id,
                    revision: record.revision,
                })
            })
            .put_batch(batch.clone());
        self.store.commit(changes).map_err(commit_error)?;

        info!(
            batch_id = %batch.id,
            month_key = %month_key,
            total_items = batch.total_items,
            total_amount = %batch.total_amount,
            actor = %actor.user_id,
            "payment batch created"
        );
        Ok(batch)
    }

    pub fn list_batches(&self) -> Result<Vec<PaymentBatchSummary>, RoyaltyError> {
        Ok(self
            .store
            .batches()?
            .iter()
            .map(PaymentBatch::summary)
            .collect())
    }

    pub fn batch(&self, id: BatchId) -> Result<PaymentBatch, RoyaltyError> {
        self.store.batch(id)?.ok_or(RoyaltyError::BatchNotFound(id))
    }

    pub fn approve_batch(&self, actor: &Actor, id: BatchId) -> Result<PaymentBatch, RoyaltyError> {
        actor.require(Permission::FinanceApprove)?;

        let current = self.batch(id)?;
        if current.status != BatchStatus::Draft {
            return Err(RoyaltyError::InvalidBatchTransition {
                batch_id: id,
                action: "approved",
                status: current.status,
            });
        }

        let mut next = current.next_revision();
        next.status = BatchStatus::Approved;
        next.approved_at = Some(self.clock.now());
        self.store
            .commit(ChangeSet::new().put_batch(next.clone()))
            .map_err(commit_error)?;

        info!(batch_id = %id, actor = %actor.user_id, "payment batch approved");
        Ok(next)
    }

    /// Cancel a live batch; its records become eligible for a supplementary batch.
    pub fn cancel_batch(&self, actor: &Actor, id: BatchId) -> Result<PaymentBatch, RoyaltyError> {
        actor.require(Permission::FinanceApprove)?;

        let current = self.batch(id)?;
        if !current.status.is_live() {
            return Err(RoyaltyError::InvalidBatchTransition {
                batch_id: id,
                action: "cancelled",
                status: current.status,
            });
        }

        let mut next = current.next_revision();
        next.status = BatchStatus::Cancelled;
        next.cancelled_at = Some(self.clock.now());
        self.store
            .commit(ChangeSet::new().put_batch(next.clone()))
            .map_err(commit_error)?;

        info!(batch_id = %id, actor = %actor.user_id, "payment batch cancelled");
        Ok(next)
    }

    /// Pay the batch and every member record in one commit.
    pub fn mark_batch_paid(
        &self,
        actor: &Actor,
        id: BatchId,
        payment_ref: &str,
    ) -> Result<PaymentBatch, RoyaltyError> {
        actor.require(Permission::MarkPaid)?;

        let payment_ref = payment_ref.trim();
        if payment_ref.is_empty() {
            return Err(RoyaltyError::MissingPaymentReference);
        }

        let current = self.batch(id)?;
        if !current.status.is_live() {
            return Err(RoyaltyError::InvalidBatchTransition {
                batch_id: id,
                action: "paid",
                status: current.status,
            });
        }

        let now = self.clock.now();
        let mut changes = ChangeSet::new();
        for item in &current.items {
            let before = self.record(item.royalty_record_id)?;
            if before.status != RoyaltyStatus::FinanceApproved {
                return Err(RoyaltyError::InconsistentBatchState {
                    batch_id: id,
                    record_id: before.id,
                    status: before.status,
                });
            }

            let mut after = before.next_revision(&actor.user_id, now);
            after.status = RoyaltyStatus::Paid;
            after.payment_ref = Some(payment_ref.to_string());
            after.paid_at = Some(now);
            let entry =
                AuditTrailRecorder::transition(&before, &after, ApprovalAction::MarkPaid, actor, None);
            changes = changes.put_record(after).append_history(entry);
        }

        let mut next = current.next_revision();
        next.status = BatchStatus::Paid;
        next.paid_at = Some(now);
        next.payment_ref = Some(payment_ref.to_string());
        self.store
            .commit(changes.put_batch(next.clone()))
            .map_err(commit_error)?;

        info!(
            batch_id = %id,
            records = next.items.len(),
            payment_ref = %payment_ref,
            actor = %actor.user_id,
            "payment batch paid"
        );
        Ok(next)
    }

    pub fn export_batch_csv(
        &self,
        actor: &Actor,
        id: BatchId,
    ) -> Result<(PaymentBatch, Vec<u8>), RoyaltyError> {
        if !actor.holds(Permission::MarkPaid) {
            actor.require(Permission::FinanceApprove)?;
        }
        let batch = self.batch(id)?;
        let csv = batch.export_csv()?;
        Ok((batch, csv))
    }
}

fn commit_error(err: RepositoryError) -> RoyaltyError {
    match err {
        RepositoryError::Constraint(ConstraintViolation::ArticleAlreadyRecorded(article_id)) => {
            RoyaltyError::RecordAlreadyExists { article_id }
        }
        RepositoryError::Constraint(ConstraintViolation::MonthAlreadyBatched(month_key)) => {
            RoyaltyError::BatchAlreadyExists { month_key }
        }
        RepositoryError::Constraint(ConstraintViolation::ActiveRuleSetOverlap {
            rule_set_id,
            conflicting,
        }) => RoyaltyError::RuleSetOverlap {
            rule_set_id,
            conflicting,
        },
        RepositoryError::Constraint(ConstraintViolation::RecordInLiveBatch {
            record_id,
            batch_id,
        }) => RoyaltyError::RecordLockedInBatch {
            record_id,
            batch_id,
        },
        RepositoryError::Stale { entity, id } => {
            RoyaltyError::ConcurrentUpdate(format!("{entity} {id}"))
        }
        other => RoyaltyError::Repository(other),
    }
}
