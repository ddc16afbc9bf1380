//! Process-local store and catalog backing the service binary and the tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::audit::ApprovalHistory;
use super::batch::PaymentBatch;
use super::domain::{ArticleId, BatchId, RoyaltyRecord, RoyaltyRecordId, RuleSetId};
use super::repository::{
    ArticleCatalog, CatalogError, ChangeSet, ConstraintViolation, Guard, PublishedArticle,
    RecordFilter, RepositoryError, RoyaltyStore,
};
use super::rules::RuleSet;

#[derive(Debug, Default)]
struct StoreState {
    rule_sets: HashMap<RuleSetId, RuleSet>,
    records: HashMap<RoyaltyRecordId, RoyaltyRecord>,
    history: Vec<ApprovalHistory>,
    batches: HashMap<BatchId, PaymentBatch>,
    next_sequence: u64,
}

/// Mutex-guarded store; one lock spans validation and application of a commit.
#[derive(Debug, Default, Clone)]
pub struct MemoryRoyaltyStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryRoyaltyStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }
}

fn check_revision(
    entity: &'static str,
    id: String,
    stored: Option<u64>,
    incoming: u64,
) -> Result<(), RepositoryError> {
    let expected = stored.map_or(1, |revision| revision + 1);
    if incoming == expected {
        Ok(())
    } else {
        Err(RepositoryError::Stale { entity, id })
    }
}

fn violation(constraint: ConstraintViolation) -> RepositoryError {
    RepositoryError::Constraint(constraint)
}

impl StoreState {
    fn validate(&self, changes: &ChangeSet) -> Result<(), RepositoryError> {
        for rule_set in &changes.rule_sets {
            check_revision(
                "rule set",
                rule_set.id.to_string(),
                self.rule_sets.get(&rule_set.id).map(|stored| stored.revision),
                rule_set.revision,
            )?;
        }

        let rule_sets_after: Vec<&RuleSet> = self
            .rule_sets
            .values()
            .filter(|stored| changes.rule_sets.iter().all(|changed| changed.id != stored.id))
            .chain(changes.rule_sets.iter())
            .collect();
        for changed in &changes.rule_sets {
            if let Some(conflicting) = rule_sets_after
                .iter()
                .find(|other| changed.conflicts_with(other))
            {
                return Err(violation(ConstraintViolation::ActiveRuleSetOverlap {
                    rule_set_id: changed.id,
                    conflicting: conflicting.id,
                }));
            }
        }

        for (index, record) in changes.records.iter().enumerate() {
            let stored = self.records.get(&record.id);
            check_revision(
                "royalty record",
                record.id.to_string(),
                stored.map(|existing| existing.revision),
                record.revision,
            )?;
            if stored.is_none() {
                let taken_in_store = self
                    .records
                    .values()
                    .any(|existing| existing.article_id == record.article_id);
                let taken_in_changes = changes.records[..index]
                    .iter()
                    .any(|other| other.article_id == record.article_id && other.id != record.id);
                if taken_in_store || taken_in_changes {
                    return Err(violation(ConstraintViolation::ArticleAlreadyRecorded(
                        record.article_id.clone(),
                    )));
                }
            }
        }

        for batch in &changes.batches {
            check_revision(
                "payment batch",
                batch.id.to_string(),
                self.batches.get(&batch.id).map(|stored| stored.revision),
                batch.revision,
            )?;
        }

        let live_batches_after: Vec<&PaymentBatch> = self
            .batches
            .values()
            .filter(|stored| changes.batches.iter().all(|changed| changed.id != stored.id))
            .chain(changes.batches.iter())
            .filter(|batch| batch.status.is_live())
            .collect();
        for changed in changes.batches.iter().filter(|batch| batch.status.is_live()) {
            if live_batches_after
                .iter()
                .any(|other| other.id != changed.id && other.month_key == changed.month_key)
            {
                return Err(violation(ConstraintViolation::MonthAlreadyBatched(
                    changed.month_key,
                )));
            }
        }

        for guard in &changes.guards {
            match guard {
                Guard::RecordUnbatched(record_id) => {
                    if let Some(batch) = live_batches_after
                        .iter()
                        .find(|batch| batch.contains_record(*record_id))
                    {
                        return Err(violation(ConstraintViolation::RecordInLiveBatch {
                            record_id: *record_id,
                            batch_id: batch.id,
                        }));
                    }
                }
                Guard::RecordRevision {
                    record_id,
                    revision,
                } => {
                    let current = self.records.get(record_id).map(|record| record.revision);
                    if current != Some(*revision) {
                        return Err(RepositoryError::Stale {
                            entity: "royalty record",
                            id: record_id.to_string(),
                        });
                    }
                }
            }
        }

        for entry in &changes.history {
            let known = self.records.contains_key(&entry.royalty_record_id)
                || changes
                    .records
                    .iter()
                    .any(|record| record.id == entry.royalty_record_id);
            if !known {
                return Err(violation(ConstraintViolation::OrphanHistory(
                    entry.royalty_record_id,
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        for rule_set in changes.rule_sets {
            self.rule_sets.insert(rule_set.id, rule_set);
        }
        for record in changes.records {
            self.records.insert(record.id, record);
        }
        for entry in changes.history {
            self.next_sequence += 1;
            self.history.push(entry.sequenced(self.next_sequence));
        }
        for batch in changes.batches {
            self.batches.insert(batch.id, batch);
        }
    }
}

impl RoyaltyStore for MemoryRoyaltyStore {
    fn rule_sets(&self) -> Result<Vec<RuleSet>, RepositoryError> {
        let guard = self.lock()?;
        let mut rule_sets: Vec<RuleSet> = guard.rule_sets.values().cloned().collect();
        rule_sets.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.version.cmp(&b.version))
                .then(a.id.cmp(&b.id))
        });
        Ok(rule_sets)
    }

    fn rule_set(&self, id: RuleSetId) -> Result<Option<RuleSet>, RepositoryError> {
        Ok(self.lock()?.rule_sets.get(&id).cloned())
    }

    fn record(&self, id: RoyaltyRecordId) -> Result<Option<RoyaltyRecord>, RepositoryError> {
        Ok(self.lock()?.records.get(&id).cloned())
    }

    fn record_for_article(
        &self,
        article_id: &ArticleId,
    ) -> Result<Option<RoyaltyRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .records
            .values()
            .find(|record| &record.article_id == article_id)
            .cloned())
    }

    fn records(&self, filter: &RecordFilter) -> Result<Vec<RoyaltyRecord>, RepositoryError> {
        let guard = self.lock()?;
        let mut records: Vec<RoyaltyRecord> = guard
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.published_at.cmp(&b.published_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn history(&self, record_id: RoyaltyRecordId) -> Result<Vec<ApprovalHistory>, RepositoryError> {
        let guard = self.lock()?;
        let mut rows: Vec<ApprovalHistory> = guard
            .history
            .iter()
            .filter(|row| row.royalty_record_id == record_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.sequence.cmp(&b.sequence)));
        Ok(rows)
    }

    fn batches(&self) -> Result<Vec<PaymentBatch>, RepositoryError> {
        let guard = self.lock()?;
        let mut batches: Vec<PaymentBatch> = guard.batches.values().cloned().collect();
        batches.sort_by(|a, b| {
            a.month_key
                .cmp(&b.month_key)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(batches)
    }

    fn batch(&self, id: BatchId) -> Result<Option<PaymentBatch>, RepositoryError> {
        Ok(self.lock()?.batches.get(&id).cloned())
    }

    fn live_batch_for_record(
        &self,
        record_id: RoyaltyRecordId,
    ) -> Result<Option<BatchId>, RepositoryError> {
        Ok(self
            .lock()?
            .batches
            .values()
            .find(|batch| batch.status.is_live() && batch.contains_record(record_id))
            .map(|batch| batch.id))
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        guard.validate(&changes)?;
        guard.apply(changes);
        Ok(())
    }
}

/// Catalog fed by publish events received in-process.
#[derive(Debug, Default, Clone)]
pub struct MemoryArticleCatalog {
    articles: Arc<Mutex<Vec<PublishedArticle>>>,
}

impl MemoryArticleCatalog {
    fn lock(&self) -> Result<MutexGuard<'_, Vec<PublishedArticle>>, CatalogError> {
        self.articles
            .lock()
            .map_err(|_| CatalogError::Unavailable("catalog mutex poisoned".to_string()))
    }
}

impl ArticleCatalog for MemoryArticleCatalog {
    fn published(&self) -> Result<Vec<PublishedArticle>, CatalogError> {
        Ok(self.lock()?.clone())
    }

    fn register(&self, published: PublishedArticle) -> Result<(), CatalogError> {
        let mut guard = self.lock()?;
        guard.retain(|existing| existing.article.article_id != published.article.article_id);
        guard.push(published);
        Ok(())
    }
}
