//! Usage accounting and monthly budget tracking for Concierge.
//!
//! `UsageLedger` is the shipped `UsageRecorder`: it prices every provider
//! call with the built-in pricing table, keeps an append-only record log,
//! and answers the monthly budget question with serialized updates.

pub mod ledger;
pub mod model;
pub mod pricing;

pub use ledger::UsageLedger;
pub use model::{CategoryTotals, UsageSnapshot};
pub use pricing::{ModelPricing, PricingTable};
