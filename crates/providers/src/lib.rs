//! Model provider implementations for Concierge.
//!
//! All providers implement the `concierge_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
