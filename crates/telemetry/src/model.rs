//! Reporting types served by the ledger.

use concierge_core::UsageCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated spend for one usage category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

impl CategoryTotals {
    pub(crate) fn add(&mut self, tokens_in: u64, tokens_out: u64, cost: f64) {
        self.calls += 1;
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_usd += cost;
    }
}

/// A point-in-time view of the current month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// `YYYY-MM` of the month being reported
    pub month: String,
    pub monthly_cost_usd: f64,
    pub monthly_limit_usd: f64,
    pub percent_used: f64,
    pub calls: u64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub by_category: BTreeMap<String, CategoryTotals>,
    /// Records retained in the in-memory log
    pub records_retained: usize,
}

pub(crate) fn category_key(category: UsageCategory) -> String {
    category.as_str().to_string()
}
