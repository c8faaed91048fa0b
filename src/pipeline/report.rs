//! Progress reporting for synthesis runs.
//!
//! The pipeline never logs on its own; every observable event goes through
//! a [`RunReporter`] passed in by the caller.

use crate::models::EvalsynthError;
use crate::pipeline::{BatchWindow, RunStats, WindowReport, WindowStatus};
use crate::schema::Rejection;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receiver of run progress events. All methods default to no-ops.
pub trait RunReporter: Send + Sync {
    fn run_started(&self, _target: usize, _windows: usize, _providers: &str) {}

    fn window_started(&self, _window: &BatchWindow, _provider: &str) {}

    /// Full request text, for debugging prompt issues.
    fn request_built(&self, _window: &BatchWindow, _system_prompt: &str, _user_prompt: &str) {}

    fn response_received(&self, _window: &BatchWindow, _raw: &str, _elapsed: Duration) {}

    fn provider_failed(&self, _window: &BatchWindow, _error: &EvalsynthError, _elapsed: Duration) {}

    fn extracted(&self, _window: &BatchWindow, _count: usize, _strategy: &str) {}

    fn extraction_failed(&self, _window: &BatchWindow) {}

    fn candidate_rejected(&self, _window: &BatchWindow, _index: usize, _rejection: &Rejection) {}

    fn window_finished(&self, _report: &WindowReport) {}

    fn run_finished(&self, _stats: &RunStats) {}
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl RunReporter for NullReporter {}

/// Reports through `tracing` and an `indicatif` progress bar.
pub struct ConsoleReporter {
    progress: ProgressBar,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    /// Reporter without a progress bar.
    pub fn new() -> Self {
        Self {
            progress: ProgressBar::hidden(),
        }
    }

    /// Reporter that draws a progress bar of windows.
    pub fn with_progress() -> Self {
        let progress = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} windows {msg}")
        {
            progress.set_style(style.progress_chars("##-"));
        }
        Self { progress }
    }
}

impl RunReporter for ConsoleReporter {
    fn run_started(&self, target: usize, windows: usize, providers: &str) {
        self.progress.set_length(windows as u64);
        info!(requested = target, windows, providers, "Starting dataset synthesis");
    }

    fn window_started(&self, window: &BatchWindow, provider: &str) {
        info!(
            batch = window.number,
            start_id = window.start_id,
            end_id = window.end_id,
            provider,
            "Generating datapoints"
        );
    }

    fn request_built(&self, window: &BatchWindow, system_prompt: &str, user_prompt: &str) {
        debug!(
            batch = window.number,
            system_len = system_prompt.len(),
            user_len = user_prompt.len(),
            "Request built"
        );
        debug!(batch = window.number, "Full system prompt:\n{system_prompt}");
        debug!(batch = window.number, "Full user prompt:\n{user_prompt}");
    }

    fn response_received(&self, window: &BatchWindow, raw: &str, elapsed: Duration) {
        info!(
            batch = window.number,
            elapsed_secs = elapsed.as_secs_f64(),
            chars = raw.chars().count(),
            "Provider responded"
        );
        debug!(batch = window.number, "Full raw response:\n{raw}");
    }

    fn provider_failed(&self, window: &BatchWindow, error: &EvalsynthError, elapsed: Duration) {
        error!(
            batch = window.number,
            elapsed_secs = elapsed.as_secs_f64(),
            error = %error,
            "Provider call failed"
        );
    }

    fn extracted(&self, window: &BatchWindow, count: usize, strategy: &str) {
        debug!(batch = window.number, count, strategy, "Extracted candidates");
    }

    fn extraction_failed(&self, window: &BatchWindow) {
        error!(batch = window.number, "Failed to extract JSON from response");
    }

    fn candidate_rejected(&self, window: &BatchWindow, index: usize, rejection: &Rejection) {
        debug!(batch = window.number, candidate = index, reason = %rejection, "Candidate rejected");
    }

    fn window_finished(&self, report: &WindowReport) {
        let w = &report.window;
        match report.status {
            WindowStatus::Failed => {}
            _ if report.reused => info!(
                batch = w.number,
                valid = report.valid,
                "Reusing batch from checkpoint"
            ),
            _ => info!(
                batch = w.number,
                valid = report.valid,
                invalid = report.invalid,
                extracted = report.extracted,
                "Batch finished"
            ),
        }
        self.progress.inc(1);
    }

    fn run_finished(&self, stats: &RunStats) {
        self.progress.finish_with_message(format!(
            "{} of {} datapoints",
            stats.produced, stats.target
        ));
        info!(
            produced = stats.produced,
            requested = stats.target,
            failed_windows = stats.windows_failed,
            runtime_secs = stats.runtime_secs,
            "Synthesis finished"
        );
        if stats.shortfall() > 0 {
            warn!(
                shortfall = stats.shortfall(),
                "Generated {} datapoints, fewer than the {} requested",
                stats.produced,
                stats.target
            );
        }
    }
}
