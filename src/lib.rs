//! evalsynth - evaluation dataset synthesis via batched LLM generation.
//!
//! ## Architecture
//!
//! A run partitions a target record count into batch windows and asks a
//! pool of model providers for one window at a time:
//!
//! Provider → Extractor → Validator → accumulated Records → re-indexing → JSON
//!
//! A separate transform expands each record's embedded conversation history
//! into a flat list of turns.
//!
//! ## Modules
//!
//! - `schema`: tolerant JSON extraction and structural validation
//! - `client`: provider trait, HTTP clients (OpenAI, Grok, Anthropic, Gemini), rate limiting
//! - `pipeline`: batch orchestration, reporting, flattening
//! - `checkpoint`: per-window state for re-runs
//! - `prompts`: eval kinds and prompt loading

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod store;

// Re-exports for convenience
pub use checkpoint::{CheckpointManager, RunFingerprint};
pub use client::{Provider, ProviderPool, ProviderRegistry, RateLimiter};
pub use models::{Config, EvalsynthError, ProviderKind, Record, Result};
pub use pipeline::{
    ConsoleReporter, RunReporter, RunStats, SynthesisOutput, SynthesisPipeline,
    SynthesisSettings, flatten, transform_dir, transform_file,
};
pub use prompts::{EvalKind, PromptLibrary};
pub use schema::{Extractor, Rejection, is_valid, validate};
