//! Thread-safe usage ledger: prices provider calls, keeps the monthly
//! running total, and answers budget queries.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use concierge_config::AppConfig;
use concierge_core::{MonthlyUsage, UsageError, UsageRecord, UsageRecorder};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::model::{CategoryTotals, UsageSnapshot, category_key};
use crate::pricing::PricingTable;

/// Oldest records are dropped beyond this many.
const MAX_RECORDS: usize = 10_000;

/// Calendar month as a single comparable number.
fn month_key(at: DateTime<Utc>) -> i32 {
    at.year() * 12 + at.month0() as i32
}

fn month_label(key: i32) -> String {
    format!("{:04}-{:02}", key.div_euclid(12), key.rem_euclid(12) + 1)
}

/// Running totals for one calendar month.
#[derive(Debug)]
struct MonthTotals {
    month: i32,
    cost: f64,
    calls: u64,
    tokens_in: u64,
    tokens_out: u64,
    by_category: BTreeMap<String, CategoryTotals>,
}

impl MonthTotals {
    fn starting(month: i32, opening_cost: f64) -> Self {
        Self {
            month,
            cost: opening_cost,
            calls: 0,
            tokens_in: 0,
            tokens_out: 0,
            by_category: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct LedgerState {
    totals: MonthTotals,
    records: Vec<(UsageRecord, f64)>,
}

/// The in-process `UsageRecorder`.
///
/// All mutation goes through one write lock, so concurrent sessions see
/// serializable updates to the monthly counter.
pub struct UsageLedger {
    pricing: PricingTable,
    monthly_limit: f64,
    state: RwLock<LedgerState>,
}

impl UsageLedger {
    pub fn new(pricing: PricingTable, monthly_limit: f64) -> Self {
        Self {
            pricing,
            monthly_limit,
            state: RwLock::new(LedgerState {
                totals: MonthTotals::starting(month_key(Utc::now()), 0.0),
                records: Vec::new(),
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PricingTable::with_overrides(&config.pricing),
            config.budget.monthly_limit_usd,
        )
    }

    /// Start the current month with spend that happened elsewhere
    /// (e.g. restored from an external billing export).
    pub fn with_opening_balance(self, cost: f64) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.totals.cost = cost;
        }
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, UsageError> {
        self.state
            .read()
            .map_err(|_| UsageError::Unavailable("usage ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, UsageError> {
        self.state
            .write()
            .map_err(|_| UsageError::Unavailable("usage ledger lock poisoned".into()))
    }

    /// Price and append a record, rolling the month over if needed.
    /// Returns the cost attributed to the record.
    pub fn append(&self, record: UsageRecord) -> Result<f64, UsageError> {
        if record.model.trim().is_empty() {
            return Err(UsageError::InvalidRecord("record has no model".into()));
        }

        let cost = self.pricing.compute_cost(&record.model, record.tokens_in, record.tokens_out);
        let record_month = month_key(record.recorded_at);

        let mut state = self.write()?;
        if record_month > state.totals.month {
            info!(
                from = %month_label(state.totals.month),
                to = %month_label(record_month),
                "Rolling usage ledger over to a new month"
            );
            state.totals = MonthTotals::starting(record_month, 0.0);
        }

        if record_month == state.totals.month {
            let totals = &mut state.totals;
            totals.cost += cost;
            totals.calls += 1;
            totals.tokens_in += record.tokens_in;
            totals.tokens_out += record.tokens_out;
            totals
                .by_category
                .entry(category_key(record.category))
                .or_default()
                .add(record.tokens_in, record.tokens_out, cost);
        }

        debug!(
            category = %record.category,
            model = %record.model,
            tokens_in = record.tokens_in,
            tokens_out = record.tokens_out,
            cost,
            "Usage recorded"
        );

        if state.records.len() >= MAX_RECORDS {
            state.records.drain(..MAX_RECORDS / 10);
        }
        state.records.push((record, cost));

        Ok(cost)
    }

    /// Usage for the month containing `now`.
    pub fn monthly_usage_at(&self, now: DateTime<Utc>) -> Result<MonthlyUsage, UsageError> {
        let state = self.read()?;
        let cost = if state.totals.month == month_key(now) {
            state.totals.cost
        } else {
            0.0
        };
        Ok(MonthlyUsage::new(cost, self.monthly_limit))
    }

    /// A reporting snapshot of the current month.
    pub fn snapshot(&self) -> Result<UsageSnapshot, UsageError> {
        let now = month_key(Utc::now());
        let state = self.read()?;
        let current = state.totals.month == now;
        let usage = MonthlyUsage::new(if current { state.totals.cost } else { 0.0 }, self.monthly_limit);

        Ok(UsageSnapshot {
            month: month_label(now),
            monthly_cost_usd: usage.cost,
            monthly_limit_usd: usage.limit,
            percent_used: usage.percent_used,
            calls: if current { state.totals.calls } else { 0 },
            tokens_in: if current { state.totals.tokens_in } else { 0 },
            tokens_out: if current { state.totals.tokens_out } else { 0 },
            by_category: if current {
                state.totals.by_category.clone()
            } else {
                BTreeMap::new()
            },
            records_retained: state.records.len(),
        })
    }
}

#[async_trait]
impl UsageRecorder for UsageLedger {
    async fn record(&self, record: UsageRecord) -> Result<(), UsageError> {
        self.append(record).map(|_| ())
    }

    async fn current_monthly_usage(&self) -> Result<MonthlyUsage, UsageError> {
        self.monthly_usage_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use concierge_core::UsageCategory;
    use std::sync::Arc;

    fn ledger(limit: f64) -> UsageLedger {
        let mut pricing = PricingTable::empty();
        pricing.set("test-model", crate::pricing::ModelPricing::new(1.0, 2.0));
        UsageLedger::new(pricing, limit)
    }

    fn record(tokens_in: u64, tokens_out: u64) -> UsageRecord {
        UsageRecord::new(UsageCategory::Chat, "test-model", tokens_in, tokens_out)
    }

    #[tokio::test]
    async fn records_accumulate_monthly_cost() {
        let ledger = ledger(10.0);
        ledger.record(record(1_000_000, 0)).await.unwrap();
        ledger.record(record(0, 1_000_000)).await.unwrap();

        let usage = ledger.current_monthly_usage().await.unwrap();
        assert!((usage.cost - 3.0).abs() < 1e-9);
        assert!((usage.percent_used - 30.0).abs() < 1e-9);
        assert!(!usage.is_exhausted());
    }

    #[tokio::test]
    async fn opening_balance_counts_toward_ceiling() {
        let ledger = ledger(5.0).with_opening_balance(5.0);
        assert!(ledger.current_monthly_usage().await.unwrap().is_exhausted());
    }

    #[test]
    fn category_breakdown() {
        let ledger = ledger(0.0);
        ledger.append(record(100, 10)).unwrap();
        ledger
            .append(UsageRecord::new(UsageCategory::DocumentExtraction, "test-model", 500, 50))
            .unwrap();

        let snapshot = ledger.snapshot().unwrap();
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.by_category["chat"].tokens_in, 100);
        assert_eq!(snapshot.by_category["document_extraction"].tokens_out, 50);
        assert_eq!(snapshot.percent_used, 0.0);
    }

    #[test]
    fn month_rollover_resets_totals() {
        let ledger = ledger(10.0);
        let now = Utc::now();
        ledger.append(record(1_000_000, 0)).unwrap();
        assert!((ledger.monthly_usage_at(now).unwrap().cost - 1.0).abs() < 1e-9);

        let later = now + Duration::days(45);
        assert_eq!(ledger.monthly_usage_at(later).unwrap().cost, 0.0);

        let mut next = record(2_000_000, 0);
        next.recorded_at = later;
        ledger.append(next).unwrap();
        assert!((ledger.monthly_usage_at(later).unwrap().cost - 2.0).abs() < 1e-9);
        assert_eq!(ledger.monthly_usage_at(now).unwrap().cost, 0.0);

        // A late record from a closed month is kept but not counted.
        let mut stale = record(5_000_000, 0);
        stale.recorded_at = now;
        ledger.append(stale).unwrap();
        assert!((ledger.monthly_usage_at(later).unwrap().cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_model_rejected() {
        let ledger = ledger(0.0);
        let err = ledger
            .append(UsageRecord::new(UsageCategory::Chat, " ", 1, 1))
            .unwrap_err();
        assert!(matches!(err, UsageError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost() {
        let ledger = Arc::new(ledger(0.0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    ledger.record(record(1_000, 0)).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let snapshot = ledger.snapshot().unwrap();
        assert_eq!(snapshot.calls, 800);
        assert_eq!(snapshot.tokens_in, 800_000);
    }
}
