//! Partitioning a target record count into batch windows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous, inclusive id range requested in one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchWindow {
    /// 1-based window number
    pub number: usize,
    pub start_id: usize,
    pub end_id: usize,
}

impl BatchWindow {
    /// Number of records requested.
    pub fn len(&self) -> usize {
        (self.end_id + 1).saturating_sub(self.start_id)
    }

    pub fn is_empty(&self) -> bool {
        self.end_id < self.start_id
    }

    /// 0-based position, used for provider selection.
    pub fn index(&self) -> usize {
        self.number - 1
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch {} (ids {}-{})", self.number, self.start_id, self.end_id)
    }
}

/// Split `[1, total]` into consecutive windows of at most `batch_size` ids.
///
/// Only the last window may be smaller. Zero for either argument yields no
/// windows.
pub fn plan_windows(total: usize, batch_size: usize) -> Vec<BatchWindow> {
    if total == 0 || batch_size == 0 {
        return Vec::new();
    }
    (1..=total)
        .step_by(batch_size)
        .enumerate()
        .map(|(i, start_id)| BatchWindow {
            number: i + 1,
            start_id,
            end_id: start_id.saturating_add(batch_size - 1).min(total),
        })
        .collect()
}
