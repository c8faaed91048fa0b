//! Checkpoint module for re-runnable synthesis.
//!
//! Provides:
//! - `CheckpointState`: per-window status and records of a run
//! - `CheckpointManager`: persistence and loading of checkpoint state

mod state;

pub use state::*;
