use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::domain::{AuthorId, BatchId, Money, RoyaltyRecord, RoyaltyRecordId, RoyaltyStatus};
use super::error::RoyaltyError;

/// Calendar month in `YYYY-MM` form, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1970..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at.year() == self.year && at.month() == self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = RoyaltyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || RoyaltyError::InvalidMonthKey(raw.to_string());
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        MonthKey::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Draft,
    Approved,
    Paid,
    Cancelled,
}

impl BatchStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BatchStatus::Draft => "DRAFT",
            BatchStatus::Approved => "APPROVED",
            BatchStatus::Paid => "PAID",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    /// Live batches hold their month and lock their member records.
    pub const fn is_live(self) -> bool {
        matches!(self, BatchStatus::Draft | BatchStatus::Approved)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Copy of a record's payable amount taken when the batch was generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBatchItem {
    pub batch_id: BatchId,
    pub royalty_record_id: RoyaltyRecordId,
    pub author_id: AuthorId,
    pub author_email: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBatch {
    pub id: BatchId,
    pub month_key: MonthKey,
    pub status: BatchStatus,
    pub currency: String,
    pub total_items: u32,
    pub total_amount: Money,
    pub items: Vec<PaymentBatchItem>,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: String,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub export_file_key: String,
    pub revision: u64,
}

/// Batch header without items, for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBatchSummary {
    pub id: BatchId,
    pub month_key: MonthKey,
    pub status: BatchStatus,
    pub currency: String,
    pub total_items: u32,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
}

fn sum_amounts(items: &[PaymentBatchItem]) -> Option<Money> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.amount))
}

impl PaymentBatch {
    /// Snapshot every FINANCE_APPROVED record published in `month_key`.
    pub fn assemble(
        month_key: MonthKey,
        records: &[RoyaltyRecord],
        created_by_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, RoyaltyError> {
        let mut eligible: Vec<&RoyaltyRecord> = records
            .iter()
            .filter(|record| {
                record.status == RoyaltyStatus::FinanceApproved
                    && month_key.contains(record.published_at)
            })
            .collect();

        if eligible.is_empty() {
            return Err(RoyaltyError::NoEligibleRecords { month_key });
        }

        let currencies: BTreeSet<&str> = eligible
            .iter()
            .map(|record| record.currency.as_str())
            .collect();
        if currencies.len() > 1 {
            return Err(RoyaltyError::MixedCurrencyBatch {
                month_key,
                currencies: currencies.into_iter().map(str::to_string).collect(),
            });
        }
        let currency = eligible[0].currency.clone();

        eligible.sort_by(|a, b| {
            a.author_id
                .cmp(&b.author_id)
                .then(a.published_at.cmp(&b.published_at))
                .then(a.id.cmp(&b.id))
        });

        let id = BatchId::generate();
        let items: Vec<PaymentBatchItem> = eligible
            .iter()
            .map(|record| PaymentBatchItem {
                batch_id: id,
                royalty_record_id: record.id,
                author_id: record.author_id.clone(),
                author_email: record.author_email.clone(),
                amount: record.final_amount,
            })
            .collect();

        let total_amount =
            sum_amounts(&items).ok_or_else(|| RoyaltyError::out_of_range("batch total"))?;

        Ok(Self {
            id,
            month_key,
            status: BatchStatus::Draft,
            currency,
            total_items: items.len() as u32,
            total_amount,
            items,
            created_at: now,
            created_by_user_id: created_by_user_id.to_string(),
            approved_at: None,
            paid_at: None,
            cancelled_at: None,
            payment_ref: None,
            export_file_key: format!("royalty-batches/{month_key}/{id}.csv"),
            revision: 1,
        })
    }

    pub fn contains_record(&self, record_id: RoyaltyRecordId) -> bool {
        self.items
            .iter()
            .any(|item| item.royalty_record_id == record_id)
    }

    pub fn totals_consistent(&self) -> bool {
        self.total_items as usize == self.items.len()
            && sum_amounts(&self.items) == Some(self.total_amount)
    }

    pub fn summary(&self) -> PaymentBatchSummary {
        PaymentBatchSummary {
            id: self.id,
            month_key: self.month_key,
            status: self.status,
            currency: self.currency.clone(),
            total_items: self.total_items,
            total_amount: self.total_amount,
            created_at: self.created_at,
            paid_at: self.paid_at,
            payment_ref: self.payment_ref.clone(),
        }
    }

    /// Payout file: one `author,email,amount` row per item.
    pub fn export_csv(&self) -> Result<Vec<u8>, RoyaltyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(["author", "email", "amount"])
            .map_err(|err| RoyaltyError::Export(err.to_string()))?;
        for item in &self.items {
            let amount = item.amount.to_string();
            writer
                .write_record([
                    item.author_id.0.as_str(),
                    item.author_email.as_str(),
                    amount.as_str(),
                ])
                .map_err(|err| RoyaltyError::Export(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| RoyaltyError::Export(err.to_string()))
    }

    pub(crate) fn next_revision(&self) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next
    }
}
