//! Window checkpoints for re-runnable synthesis.
//!
//! A checkpoint remembers, per batch window, how it ended and which
//! validated records it produced. Re-running against the same checkpoint
//! skips windows that already completed. The file is written atomically
//! (temp file + rename) and the previous version is kept as a backup.

use crate::models::{EvalsynthError, Record, Result};
use crate::pipeline::{BatchWindow, WindowReport, WindowStatus};
use crate::schema::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Identity of a run. A checkpoint is only valid for the run that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub eval: String,
    pub target: usize,
    pub batch_size: usize,
}

/// Checkpoint entry for a single window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowCheckpoint {
    pub window: BatchWindow,
    pub status: WindowStatus,
    pub provider: String,
    /// Validated records, before re-indexing
    #[serde(default)]
    pub records: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made for this window across runs
    #[serde(default)]
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

/// Persisted state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub fingerprint: RunFingerprint,
    /// Keyed by window number
    pub windows: BTreeMap<usize, WindowCheckpoint>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new(fingerprint: RunFingerprint) -> Self {
        let now = Utc::now();
        Self {
            fingerprint,
            windows: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Record the outcome of a window, replacing any earlier attempt.
    pub fn record(&mut self, report: &WindowReport, records: &[Record]) {
        let now = Utc::now();
        let attempts = self
            .windows
            .get(&report.window.number)
            .map_or(0, |cp| cp.attempts)
            + 1;
        self.windows.insert(
            report.window.number,
            WindowCheckpoint {
                window: report.window,
                status: report.status,
                provider: report.provider.clone(),
                records: records.iter().cloned().map(Record::into_value).collect(),
                error: report.error.clone(),
                attempts,
                updated_at: now,
            },
        );
        self.updated_at = now;
    }

    /// Count windows per status.
    pub fn count(&self, status: WindowStatus) -> usize {
        self.windows.values().filter(|cp| cp.status == status).count()
    }

    /// Records held by completed windows.
    pub fn completed_records(&self) -> usize {
        self.windows
            .values()
            .filter(|cp| cp.status == WindowStatus::Completed)
            .map(|cp| cp.records.len())
            .sum()
    }
}

/// Persists and loads [`CheckpointState`].
pub struct CheckpointManager {
    dir: PathBuf,
    checkpoint_path: PathBuf,
    backup_path: PathBuf,
    state: CheckpointState,
}

impl CheckpointManager {
    /// Open the checkpoint in `dir`, creating it if absent.
    ///
    /// Fails if an existing checkpoint belongs to a different run or cannot
    /// be read (neither the main file nor its backup).
    pub fn open(dir: &Path, fingerprint: RunFingerprint) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| EvalsynthError::io("creating checkpoint dir", e))?;
        let checkpoint_path = dir.join("checkpoint.json");
        let backup_path = dir.join("checkpoint.backup.json");

        let existing = if checkpoint_path.exists() {
            match read_state(&checkpoint_path) {
                Ok(state) => Some(state),
                Err(e) if backup_path.exists() => {
                    warn!(error = %e, "Checkpoint unreadable, falling back to backup");
                    Some(read_state(&backup_path)?)
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let manager = match existing {
            Some(state) => {
                if state.fingerprint != fingerprint {
                    return Err(EvalsynthError::InvalidInput(format!(
                        "checkpoint in {} was created for eval '{}' with total {} and batch size {}; \
                         use a different checkpoint directory",
                        dir.display(),
                        state.fingerprint.eval,
                        state.fingerprint.target,
                        state.fingerprint.batch_size
                    )));
                }
                info!(
                    completed = state.count(WindowStatus::Completed),
                    failed = state.count(WindowStatus::Failed),
                    empty = state.count(WindowStatus::Empty),
                    records = state.completed_records(),
                    "Resuming from checkpoint"
                );
                Self {
                    dir: dir.to_path_buf(),
                    checkpoint_path,
                    backup_path,
                    state,
                }
            }
            None => {
                let manager = Self {
                    dir: dir.to_path_buf(),
                    checkpoint_path,
                    backup_path,
                    state: CheckpointState::new(fingerprint),
                };
                manager.save()?;
                info!(dir = %dir.display(), "Created new checkpoint");
                manager
            }
        };
        Ok(manager)
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn fingerprint(&self) -> &RunFingerprint {
        &self.state.fingerprint
    }

    /// Check that a run with these parameters may use this checkpoint.
    pub fn ensure_matches(&self, target: usize, batch_size: usize) -> Result<()> {
        let fp = self.fingerprint();
        if fp.target != target || fp.batch_size != batch_size {
            return Err(EvalsynthError::InvalidInput(format!(
                "checkpoint expects total {} and batch size {}, got {target} and {batch_size}",
                fp.target, fp.batch_size
            )));
        }
        Ok(())
    }

    /// Provider and re-validated records of `window`, if it completed.
    pub fn completed_window(&self, window: &BatchWindow) -> Option<(String, Vec<Record>)> {
        let cp = self.state.windows.get(&window.number)?;
        if cp.status != WindowStatus::Completed || cp.window != *window {
            return None;
        }
        let records: Vec<Record> = cp
            .records
            .iter()
            .cloned()
            .filter_map(|value| validate(value).ok())
            .collect();
        if records.is_empty() {
            return None;
        }
        Some((cp.provider.clone(), records))
    }

    /// Record a window outcome and save.
    pub fn record_window(&mut self, report: &WindowReport, records: &[Record]) -> Result<()> {
        self.state.record(report, records);
        self.save()
    }

    /// Save checkpoint to disk (atomic write, previous version kept as backup).
    pub fn save(&self) -> Result<()> {
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| EvalsynthError::io("backing up checkpoint", e))?;
        }

        let temp_path = self.dir.join("checkpoint.tmp.json");
        let file = File::create(&temp_path)
            .map_err(|e| EvalsynthError::io("creating temp checkpoint", e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.state)
            .map_err(|e| EvalsynthError::Internal(format!("serializing checkpoint: {e}")))?;
        writer
            .flush()
            .map_err(|e| EvalsynthError::io("flushing temp checkpoint", e))?;

        fs::rename(&temp_path, &self.checkpoint_path)
            .map_err(|e| EvalsynthError::io("renaming checkpoint", e))?;

        debug!(windows = self.state.windows.len(), "Checkpoint saved");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn read_state(path: &Path) -> Result<CheckpointState> {
    let file = File::open(path).map_err(|e| EvalsynthError::io("opening checkpoint", e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| EvalsynthError::ParseError(format!("invalid checkpoint {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fingerprint() -> RunFingerprint {
        RunFingerprint {
            eval: "jailbreak".to_string(),
            target: 4,
            batch_size: 2,
        }
    }

    fn window(number: usize) -> BatchWindow {
        BatchWindow {
            number,
            start_id: number * 2 - 1,
            end_id: number * 2,
        }
    }

    fn report(number: usize, status: WindowStatus, valid: usize) -> WindowReport {
        WindowReport {
            window: window(number),
            provider: "openai".to_string(),
            status,
            extracted: valid,
            valid,
            invalid: 0,
            error: None,
            elapsed_secs: 1.0,
            reused: false,
        }
    }

    fn record(id: u64) -> Record {
        validate(json!({
            "id": id,
            "turns": [{
                "id": 1,
                "input": "q",
                "metadata": {"conversation_history": [], "category": "c", "difficulty": "d"},
                "expected_output": "a",
                "lm_checklist": []
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_new_checkpoint_is_persisted() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        assert!(dir.path().join("checkpoint.json").exists());
        assert!(manager.state().windows.is_empty());
    }

    #[test]
    fn test_save_writes_complete_file_and_removes_temp() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        assert_eq!(manager.dir(), dir.path());
        manager
            .record_window(&report(1, WindowStatus::Completed, 2), &[record(1), record(2)])
            .unwrap();

        assert!(!manager.dir().join("checkpoint.tmp.json").exists());
        let saved = read_state(&manager.dir().join("checkpoint.json")).unwrap();
        assert_eq!(saved.fingerprint, fingerprint());
        assert_eq!(saved.completed_records(), 2);
    }

    #[test]
    fn test_completed_windows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        manager
            .record_window(&report(1, WindowStatus::Completed, 2), &[record(1), record(2)])
            .unwrap();
        manager
            .record_window(&report(2, WindowStatus::Failed, 0), &[])
            .unwrap();
        assert!(dir.path().join("checkpoint.backup.json").exists());

        let reopened = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        let (provider, records) = reopened.completed_window(&window(1)).unwrap();
        assert_eq!(provider, "openai");
        assert_eq!(records.len(), 2);
        assert!(reopened.completed_window(&window(2)).is_none());
        assert_eq!(reopened.state().completed_records(), 2);
    }

    #[test]
    fn test_attempts_accumulate() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        manager
            .record_window(&report(2, WindowStatus::Failed, 0), &[])
            .unwrap();
        manager
            .record_window(&report(2, WindowStatus::Completed, 1), &[record(3)])
            .unwrap();
        assert_eq!(manager.state().windows[&2].attempts, 2);
        assert_eq!(manager.state().count(WindowStatus::Failed), 0);
    }

    #[test]
    fn test_mismatched_fingerprint_is_rejected() {
        let dir = TempDir::new().unwrap();
        CheckpointManager::open(dir.path(), fingerprint()).unwrap();

        let mut other = fingerprint();
        other.eval = "hr".to_string();
        let err = CheckpointManager::open(dir.path(), other).err().unwrap();
        assert!(matches!(err, EvalsynthError::InvalidInput(_)));
    }

    #[test]
    fn test_ensure_matches() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        assert!(manager.ensure_matches(4, 2).is_ok());
        assert!(manager.ensure_matches(4, 3).is_err());
    }

    #[test]
    fn test_corrupt_checkpoint_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        manager
            .record_window(&report(1, WindowStatus::Completed, 1), &[record(1)])
            .unwrap();
        fs::write(dir.path().join("checkpoint.json"), "{ truncated").unwrap();

        // Backup holds the state from before the last save
        let reopened = CheckpointManager::open(dir.path(), fingerprint()).unwrap();
        assert!(reopened.state().windows.is_empty());
    }

    #[test]
    fn test_unreadable_checkpoint_without_backup_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("checkpoint.json"), "not json").unwrap();
        let err = CheckpointManager::open(dir.path(), fingerprint()).err().unwrap();
        assert!(matches!(err, EvalsynthError::ParseError(_)));
    }
}
