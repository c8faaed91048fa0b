//! Batch orchestration of dataset synthesis.
//!
//! Pipeline flow per batch window:
//! Provider → raw text → Extractor → Validator → accumulated Records
//!
//! Nothing inside a run is fatal. A failed provider call, an unparseable
//! response or a rejected candidate only means fewer records; the shortfall
//! is reported at the end. After all windows, records are re-indexed from 1
//! and every provider-supplied id is discarded.

use crate::checkpoint::CheckpointManager;
use crate::client::{Provider, ProviderPool};
use crate::models::{GenerationConfig, Record, Result};
use crate::pipeline::{BatchWindow, NullReporter, ProviderPacer, RunReporter, plan_windows};
use crate::prompts::{SYSTEM_PROMPT, user_prompt};
use crate::schema::{Extractor, validate};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// How a batch window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    /// At least one valid record
    Completed,
    /// Provider answered but nothing valid came out of it
    Empty,
    /// Provider call failed
    Failed,
}

/// Observable result of one batch window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    pub window: BatchWindow,
    pub provider: String,
    pub status: WindowStatus,
    pub extracted: usize,
    pub valid: usize,
    pub invalid: usize,
    pub error: Option<String>,
    pub elapsed_secs: f64,
    /// Taken from a checkpoint instead of a provider call
    pub reused: bool,
}

impl WindowReport {
    pub fn requested(&self) -> usize {
        self.window.len()
    }
}

/// A window's report together with the records it produced.
#[derive(Debug, Clone)]
pub struct WindowOutcome {
    pub report: WindowReport,
    pub records: Vec<Record>,
}

impl WindowOutcome {
    fn failed(window: BatchWindow, provider: String, error: String, elapsed: Duration) -> Self {
        Self {
            report: WindowReport {
                window,
                provider,
                status: WindowStatus::Failed,
                extracted: 0,
                valid: 0,
                invalid: 0,
                error: Some(error),
                elapsed_secs: elapsed.as_secs_f64(),
                reused: false,
            },
            records: Vec::new(),
        }
    }

    /// Outcome rebuilt from checkpointed records.
    pub fn reused(window: BatchWindow, provider: String, records: Vec<Record>) -> Self {
        Self {
            report: WindowReport {
                window,
                provider,
                status: WindowStatus::Completed,
                extracted: records.len(),
                valid: records.len(),
                invalid: 0,
                error: None,
                elapsed_secs: 0.0,
                reused: true,
            },
            records,
        }
    }
}

/// Statistics from a synthesis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Records requested
    pub target: usize,
    /// Valid records produced
    pub produced: usize,
    pub windows_planned: usize,
    pub windows_completed: usize,
    pub windows_empty: usize,
    pub windows_failed: usize,
    pub windows_reused: usize,
    pub total_extracted: usize,
    pub total_invalid: usize,
    pub runtime_secs: f64,
}

impl RunStats {
    fn from_reports(target: usize, reports: &[WindowReport], runtime: Duration) -> Self {
        let count = |status: WindowStatus| reports.iter().filter(|r| r.status == status).count();
        Self {
            target,
            produced: reports.iter().map(|r| r.valid).sum(),
            windows_planned: reports.len(),
            windows_completed: count(WindowStatus::Completed),
            windows_empty: count(WindowStatus::Empty),
            windows_failed: count(WindowStatus::Failed),
            windows_reused: reports.iter().filter(|r| r.reused).count(),
            total_extracted: reports.iter().map(|r| r.extracted).sum(),
            total_invalid: reports.iter().map(|r| r.invalid).sum(),
            runtime_secs: runtime.as_secs_f64(),
        }
    }

    /// Records missing relative to the target.
    pub fn shortfall(&self) -> usize {
        self.target.saturating_sub(self.produced)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// Re-indexed records in window order
    pub records: Vec<Record>,
    pub windows: Vec<WindowReport>,
    pub stats: RunStats,
}

/// Per-request generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisSettings {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Minimum gap between requests to the same provider
    pub cooldown: Duration,
    /// Windows in flight at once
    pub concurrency: usize,
}

impl From<&GenerationConfig> for SynthesisSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            cooldown: Duration::from_secs_f64(config.cooldown_secs.max(0.0)),
            concurrency: config.concurrency.max(1),
        }
    }
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

/// Assign final ids: record ids sequential from 1, every first turn id 1.
///
/// Idempotent, and the only place final ids are decided.
pub fn reindex(records: &mut [Record]) {
    for (i, record) in records.iter_mut().enumerate() {
        record.set_id(i as u64 + 1);
        record.set_first_turn_id(1);
    }
}

/// Drives batch windows through providers, extraction and validation.
#[derive(Clone)]
pub struct SynthesisPipeline {
    prompt: Arc<str>,
    settings: SynthesisSettings,
    extractor: Arc<Extractor>,
    pacer: Arc<ProviderPacer>,
    reporter: Arc<dyn RunReporter>,
}

impl SynthesisPipeline {
    /// Pipeline for one eval prompt.
    pub fn new(prompt: impl Into<String>, settings: SynthesisSettings) -> Self {
        let prompt: String = prompt.into();
        Self {
            prompt: Arc::from(prompt),
            settings,
            extractor: Arc::new(Extractor::default()),
            pacer: Arc::new(ProviderPacer::new(settings.cooldown)),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Generate up to `target` records in windows of `batch_size`.
    ///
    /// Never fails: whatever was validly produced is returned.
    pub async fn run(&self, target: usize, batch_size: usize, pool: &ProviderPool) -> SynthesisOutput {
        let started = Instant::now();
        let windows = plan_windows(target, batch_size);
        self.reporter
            .run_started(target, windows.len(), &pool.label());

        let outcomes = match self
            .dispatch(windows, pool, |_| Ok::<(), Infallible>(()))
            .await
        {
            Ok(outcomes) => outcomes,
            Err(never) => match never {},
        };
        self.finish(target, outcomes, started)
    }

    /// Like [`run`](Self::run), but reuses completed windows from
    /// `checkpoint` and records every new window in it.
    ///
    /// Fails only if the checkpoint belongs to a different run or cannot be
    /// written.
    pub async fn run_with_checkpoint(
        &self,
        target: usize,
        batch_size: usize,
        pool: &ProviderPool,
        checkpoint: &mut CheckpointManager,
    ) -> Result<SynthesisOutput> {
        let started = Instant::now();
        checkpoint.ensure_matches(target, batch_size)?;

        let windows = plan_windows(target, batch_size);
        self.reporter
            .run_started(target, windows.len(), &pool.label());

        let mut outcomes = Vec::with_capacity(windows.len());
        let mut pending = Vec::new();
        for window in windows {
            match checkpoint.completed_window(&window) {
                Some((provider, records)) => {
                    let outcome = WindowOutcome::reused(window, provider, records);
                    self.reporter.window_finished(&outcome.report);
                    outcomes.push(outcome);
                }
                None => pending.push(window),
            }
        }

        let fresh = self
            .dispatch(pending, pool, |outcome| {
                checkpoint.record_window(&outcome.report, &outcome.records)
            })
            .await?;
        outcomes.extend(fresh);
        outcomes.sort_by_key(|o| o.report.window.number);

        Ok(self.finish(target, outcomes, started))
    }

    /// Run `windows` and hand each outcome to `on_outcome` in submission order.
    async fn dispatch<F, E>(
        &self,
        windows: Vec<BatchWindow>,
        pool: &ProviderPool,
        mut on_outcome: F,
    ) -> std::result::Result<Vec<WindowOutcome>, E>
    where
        F: FnMut(&WindowOutcome) -> std::result::Result<(), E>,
    {
        let mut outcomes = Vec::with_capacity(windows.len());

        if self.settings.concurrency <= 1 {
            for window in windows {
                let provider = Arc::clone(pool.select(window.index()));
                let outcome = self.process_window(window, provider).await;
                self.reporter.window_finished(&outcome.report);
                on_outcome(&outcome)?;
                outcomes.push(outcome);
            }
            return Ok(outcomes);
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut handles = Vec::with_capacity(windows.len());
        for window in windows {
            let provider = Arc::clone(pool.select(window.index()));
            let name = provider.name().to_string();
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                pipeline.process_window(window, provider).await
            });
            handles.push((window, name, handle));
        }

        // Awaiting in submission order keeps the output deterministic
        let mut handles = handles.into_iter();
        while let Some((window, provider, handle)) = handles.next() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => WindowOutcome::failed(
                    window,
                    provider,
                    format!("window task failed: {e}"),
                    Duration::ZERO,
                ),
            };
            self.reporter.window_finished(&outcome.report);
            if let Err(e) = on_outcome(&outcome) {
                for (_, _, pending) in handles {
                    pending.abort();
                }
                return Err(e);
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Request, extract and validate one window.
    async fn process_window(
        &self,
        window: BatchWindow,
        provider: Arc<dyn Provider>,
    ) -> WindowOutcome {
        let name = provider.name().to_string();
        self.reporter.window_started(&window, &name);

        let user = user_prompt(&self.prompt, window.start_id, window.end_id);
        self.reporter.request_built(&window, SYSTEM_PROMPT, &user);

        self.pacer.acquire(&name).await;
        let started = Instant::now();
        let result = provider
            .generate(
                SYSTEM_PROMPT,
                &user,
                self.settings.temperature,
                self.settings.max_tokens,
            )
            .await;
        let elapsed = started.elapsed();
        self.pacer.release(&name).await;

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                self.reporter.provider_failed(&window, &e, elapsed);
                return WindowOutcome::failed(window, name, e.to_string(), elapsed);
            }
        };
        self.reporter.response_received(&window, &raw, elapsed);

        let mut report = WindowReport {
            window,
            provider: name,
            status: WindowStatus::Empty,
            extracted: 0,
            valid: 0,
            invalid: 0,
            error: None,
            elapsed_secs: elapsed.as_secs_f64(),
            reused: false,
        };

        let Some(extraction) = self.extractor.extract(&raw) else {
            self.reporter.extraction_failed(&window);
            return WindowOutcome {
                report,
                records: Vec::new(),
            };
        };
        self.reporter
            .extracted(&window, extraction.candidates.len(), extraction.strategy);
        report.extracted = extraction.candidates.len();

        let mut records = Vec::with_capacity(report.extracted);
        for (index, candidate) in extraction.candidates.into_iter().enumerate() {
            match validate(candidate) {
                Ok(record) => records.push(record),
                Err(rejection) => {
                    report.invalid += 1;
                    self.reporter
                        .candidate_rejected(&window, index, &rejection);
                }
            }
        }

        report.valid = records.len();
        if !records.is_empty() {
            report.status = WindowStatus::Completed;
        }
        WindowOutcome { report, records }
    }

    fn finish(
        &self,
        target: usize,
        outcomes: Vec<WindowOutcome>,
        started: Instant,
    ) -> SynthesisOutput {
        let mut windows = Vec::with_capacity(outcomes.len());
        let mut records = Vec::new();
        for outcome in outcomes {
            windows.push(outcome.report);
            records.extend(outcome.records);
        }
        reindex(&mut records);

        let stats = RunStats::from_reports(target, &windows, started.elapsed());
        self.reporter.run_finished(&stats);
        SynthesisOutput {
            records,
            windows,
            stats,
        }
    }
}
