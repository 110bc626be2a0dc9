//! The Concierge tool loop.
//!
//! One request flows through here as:
//!
//! 1. **Route**: pick a model tier and token ceiling from the messages
//! 2. **Preprocess**: summarise attached documents with the extraction model
//! 3. **Build context**: trim history and convert to wire format
//! 4. **Generate**: call the provider, streaming text as it arrives
//! 5. **Execute tools**: run each requested tool, compress its result, loop back to 4
//!
//! The loop ends on the first round without tool calls, or at the round cap.

pub mod complexity;
pub mod compressor;
pub mod context;
pub mod emitter;
pub mod loop_runner;
pub mod preprocess;
pub mod retry;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use complexity::{ComplexityRouter, ModelSelection, ModelTier};
pub use compressor::ResultCompressor;
pub use context::ContextBuilder;
pub use emitter::StreamEmitter;
pub use loop_runner::{EngineError, StopReason, ToolLoopEngine, TurnOutcome, TurnRequest};
pub use preprocess::{DocumentPreprocessor, estimate_page_count};
pub use retry::RetryGovernor;
pub use stream_event::{StatusPhase, StreamEvent};
