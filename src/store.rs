//! JSON persistence for datasets.

use crate::models::{EvalsynthError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `value` as pretty-printed UTF-8 JSON (non-ASCII kept as-is).
///
/// Parent directories are created. The file is written next to its target
/// and renamed into place, so readers never see a partial dataset.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| EvalsynthError::io(format!("creating {}", parent.display()), e))?;
    }

    let temp = temp_path(path);
    let file = File::create(&temp)
        .map_err(|e| EvalsynthError::io(format!("creating {}", temp.display()), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| EvalsynthError::Internal(format!("serializing {}: {e}", path.display())))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| EvalsynthError::io(format!("writing {}", temp.display()), e))?;
    drop(writer);

    fs::rename(&temp, path)
        .map_err(|e| EvalsynthError::io(format!("renaming into {}", path.display()), e))?;
    debug!(path = %path.display(), "Wrote JSON file");
    Ok(())
}

/// Read and parse a JSON file.
pub fn read_json(path: &Path) -> Result<Value> {
    let file = File::open(path)
        .map_err(|e| EvalsynthError::io(format!("opening {}", path.display()), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| EvalsynthError::ParseError(format!("{}: {e}", path.display())))
}
