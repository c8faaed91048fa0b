//! Flattening persisted datasets on disk.

use crate::models::{EvalsynthError, FlattenedRecord, Result};
use crate::pipeline::{flatten, is_multi_turn};
use crate::schema::admit_flattenable;
use crate::store;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Totals for one transformed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformStats {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Records written
    pub total: usize,
    pub single_turn: usize,
    pub multi_turn: usize,
    /// Entries skipped because they have no object first turn
    pub invalid: usize,
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Transformed(TransformStats),
    Skipped { input: PathBuf, reason: String },
}

impl FileOutcome {
    fn skipped(input: &Path, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(file = %input.display(), reason = %reason, "Skipping file");
        Self::Skipped {
            input: input.to_path_buf(),
            reason,
        }
    }
}

/// Flatten every entry of a JSON array that has an object first turn.
///
/// Entries only need the flattenable shape, not the full datapoint schema,
/// so a previously transformed dataset flattens to itself.
///
/// Returns the flattened records plus (single-turn, multi-turn, invalid) counts.
pub fn flatten_all(entries: Vec<Value>) -> (Vec<FlattenedRecord>, usize, usize, usize) {
    let mut flattened = Vec::with_capacity(entries.len());
    let (mut single, mut multi, mut invalid) = (0, 0, 0);

    for (index, entry) in entries.into_iter().enumerate() {
        let record = match admit_flattenable(entry) {
            Ok(record) => record,
            Err(rejection) => {
                debug!(entry = index, reason = %rejection, "Skipping invalid entry");
                invalid += 1;
                continue;
            }
        };
        if is_multi_turn(&record) {
            multi += 1;
        } else {
            single += 1;
        }
        flattened.push(flatten(&record));
    }
    (flattened, single, multi, invalid)
}

/// Transform `input` into `output_dir/<same file name>`.
pub fn transform_file(input: &Path, output_dir: &Path) -> Result<FileOutcome> {
    let file_name = input.file_name().ok_or_else(|| {
        EvalsynthError::InvalidInput(format!("{} is not a file path", input.display()))
    })?;

    let entries = match store::read_json(input)? {
        Value::Array(entries) => entries,
        _ => return Ok(FileOutcome::skipped(input, "not a JSON array")),
    };
    if entries.is_empty() {
        return Ok(FileOutcome::skipped(input, "empty"));
    }

    let (flattened, single_turn, multi_turn, invalid) = flatten_all(entries);
    let output = output_dir.join(file_name);
    store::write_json_pretty(&output, &flattened)?;

    let stats = TransformStats {
        input: input.to_path_buf(),
        output,
        total: flattened.len(),
        single_turn,
        multi_turn,
        invalid,
    };
    info!(
        file = %input.display(),
        total = stats.total,
        single_turn,
        multi_turn,
        invalid,
        "Transformed dataset"
    );
    Ok(FileOutcome::Transformed(stats))
}

/// Transform every `*.json` file directly inside `input_dir`, sorted by name.
///
/// A file that cannot be read or parsed is skipped; other files are still
/// processed.
pub fn transform_dir(input_dir: &Path, output_dir: &Path) -> Result<Vec<FileOutcome>> {
    let pattern = input_dir.join("*.json");
    let pattern = pattern.to_str().ok_or_else(|| {
        EvalsynthError::InvalidInput(format!("{} is not valid UTF-8", input_dir.display()))
    })?;

    let mut files: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| EvalsynthError::InvalidInput(format!("bad input directory: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        warn!(dir = %input_dir.display(), "No JSON files found");
    }

    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let outcome = match transform_file(&file, output_dir) {
            Ok(outcome) => outcome,
            Err(e @ (EvalsynthError::ParseError(_) | EvalsynthError::Io { .. })) => {
                FileOutcome::skipped(&file, e.to_string())
            }
            Err(e) => return Err(e),
        };
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
