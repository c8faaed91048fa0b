//! Eval kinds, prompt loading and request text.
//!
//! Prompt texts are opaque: this module only locates them, strips the Python
//! assignment wrapper some of them are stored in, and frames them with the
//! batch window instructions.

use crate::models::{EvalsynthError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// System prompt sent with every batch request.
pub const SYSTEM_PROMPT: &str = "You are an expert dataset generator. Your output must be ONLY a \
valid JSON array of datapoint objects, with no commentary, no markdown and no explanation. \
Follow the schema in the prompt EXACTLY.";

/// Extensions tried, in order, when locating a prompt file.
const PROMPT_EXTENSIONS: [&str; 3] = ["py", "txt", "md"];

static DOUBLE_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)=\s*"""(.*?)""""#).expect("prompt pattern is valid"));
static SINGLE_QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)=\s*'''(.*?)'''").expect("prompt pattern is valid"));

/// The evaluation datasets this tool knows how to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalKind {
    Hallucination,
    Pii,
    Jailbreak,
    Regulatory,
    Hr,
}

impl EvalKind {
    pub const ALL: [EvalKind; 5] = [
        EvalKind::Hallucination,
        EvalKind::Pii,
        EvalKind::Jailbreak,
        EvalKind::Regulatory,
        EvalKind::Hr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvalKind::Hallucination => "hallucination",
            EvalKind::Pii => "pii",
            EvalKind::Jailbreak => "jailbreak",
            EvalKind::Regulatory => "regulatory",
            EvalKind::Hr => "hr",
        }
    }

    /// Title used in the prompt file name.
    pub fn title(&self) -> &'static str {
        match self {
            EvalKind::Hallucination => "Hallucination-Robustness",
            EvalKind::Pii => "PII-Privacy-Leakage",
            EvalKind::Jailbreak => "Jailbreak-Resistance",
            EvalKind::Regulatory => "Regulatory-Compliance",
            EvalKind::Hr => "HR-Violation",
        }
    }

    /// Prompt file name without extension.
    pub fn prompt_stem(&self) -> String {
        format!("{}-dataset-generation-prompt", self.title())
    }

    /// Default dataset file name, e.g. `pii-dataset.json`.
    pub fn dataset_file_name(&self) -> String {
        format!("{}-dataset.json", self.as_str())
    }
}

impl fmt::Display for EvalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvalKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        EvalKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| {
                let valid: Vec<&str> = EvalKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown eval '{s}' (valid: {})", valid.join(", "))
            })
    }
}

/// Pull the prompt body out of a Python source file that assigns it to a
/// variable as a triple-quoted string.
pub fn extract_python_prompt(source: &str) -> Option<String> {
    DOUBLE_QUOTED_RE
        .captures(source)
        .or_else(|| SINGLE_QUOTED_RE.captures(source))
        .map(|caps| caps[1].trim().to_string())
}

/// Locates and reads eval prompts from a directory.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    dir: PathBuf,
}

impl PromptLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First existing prompt file for `eval`.
    pub fn locate(&self, eval: EvalKind) -> Option<PathBuf> {
        let stem = eval.prompt_stem();
        PROMPT_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{stem}.{ext}")))
            .find(|path| path.is_file())
    }

    /// Load the prompt text for `eval`.
    pub fn load(&self, eval: EvalKind) -> Result<String> {
        let path = self.locate(eval).ok_or_else(|| {
            EvalsynthError::Prompt(format!(
                "no prompt file for '{eval}' in {} (expected {}.py, .txt or .md)",
                self.dir.display(),
                eval.prompt_stem()
            ))
        })?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| EvalsynthError::io(format!("reading {}", path.display()), e))?;

        let text = if path.extension().is_some_and(|ext| ext == "py") {
            extract_python_prompt(&source).ok_or_else(|| {
                EvalsynthError::Prompt(format!(
                    "could not find a triple-quoted prompt in {}",
                    path.display()
                ))
            })?
        } else {
            source.trim().to_string()
        };

        if text.is_empty() {
            return Err(EvalsynthError::Prompt(format!(
                "prompt in {} is empty",
                path.display()
            )));
        }
        Ok(text)
    }
}

/// User prompt for one batch window: the eval prompt followed by the id range.
pub fn user_prompt(eval_prompt: &str, start_id: usize, end_id: usize) -> String {
    let count = end_id + 1 - start_id;
    format!(
        "{eval_prompt}\n\n---\nGenerate datapoints with IDs from {start_id} to {end_id} \
         (inclusive, {count} datapoints). Output ONLY a valid JSON array. No other text."
    )
}
