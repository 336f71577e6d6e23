//! Suggestion pipeline.
//!
//! One inbound message flows through:
//! 1. Context load (message, thread, connection, order)
//! 2. Usage-ledger quota gate
//! 3. `SignalExtractor` — deterministic signals, no model call
//! 4. `PolicyEngine` + `ReplyComposer` — directives, then draft
//! 5. Suggestion upsert + usage metering
//!
//! **Every suggestion requires human approval before sending.** This crate
//! only drafts; the review UI and outbound transport live elsewhere.

pub mod orchestrator;
pub mod types;

pub use orchestrator::{PipelineOutcome, SuggestionPipeline};
pub use types::*;
