//! Deterministic conversation signals — the fast, model-free layer.

pub mod extractor;

pub use extractor::{SignalExtractor, SignalSet};
