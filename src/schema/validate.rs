//! Structural validation of extracted candidates.
//!
//! Only containment and shape are checked. Prompt-specific values (category
//! names, difficulty levels) are opaque here.

use crate::models::Record;
use serde_json::{Map, Value};
use thiserror::Error;

pub const REQUIRED_FIELDS: [&str; 2] = ["id", "turns"];
pub const REQUIRED_TURN_FIELDS: [&str; 5] =
    ["id", "input", "metadata", "expected_output", "lm_checklist"];
pub const REQUIRED_METADATA_FIELDS: [&str; 3] = ["conversation_history", "category", "difficulty"];

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("datapoint is not an object")]
    NotAnObject,

    #[error("missing top-level fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("'turns' is not a non-empty list")]
    EmptyTurns,

    #[error("first turn is not an object")]
    TurnNotAnObject,

    #[error("missing turn fields: {}", .0.join(", "))]
    MissingTurnFields(Vec<&'static str>),

    #[error("'metadata' is not an object")]
    MetadataNotAnObject,

    #[error("missing metadata fields: {}", .0.join(", "))]
    MissingMetadataFields(Vec<&'static str>),

    #[error("'lm_checklist' is not a list")]
    ChecklistNotAList,
}

fn missing(map: &Map<String, Value>, required: &[&'static str]) -> Vec<&'static str> {
    required
        .iter()
        .copied()
        .filter(|field| !map.contains_key(*field))
        .collect()
}

/// Check a candidate against the datapoint schema.
pub fn check(candidate: &Value) -> Result<(), Rejection> {
    let dp = candidate.as_object().ok_or(Rejection::NotAnObject)?;

    let missing_top = missing(dp, &REQUIRED_FIELDS);
    if !missing_top.is_empty() {
        return Err(Rejection::MissingFields(missing_top));
    }

    let turn = match dp.get("turns").and_then(Value::as_array) {
        Some(turns) if !turns.is_empty() => &turns[0],
        _ => return Err(Rejection::EmptyTurns),
    };
    let turn = turn.as_object().ok_or(Rejection::TurnNotAnObject)?;

    let missing_turn = missing(turn, &REQUIRED_TURN_FIELDS);
    if !missing_turn.is_empty() {
        return Err(Rejection::MissingTurnFields(missing_turn));
    }

    let meta = turn
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or(Rejection::MetadataNotAnObject)?;
    let missing_meta = missing(meta, &REQUIRED_METADATA_FIELDS);
    if !missing_meta.is_empty() {
        return Err(Rejection::MissingMetadataFields(missing_meta));
    }

    if !turn.get("lm_checklist").is_some_and(Value::is_array) {
        return Err(Rejection::ChecklistNotAList);
    }

    Ok(())
}

/// Boolean form of [`check`].
pub fn is_valid(candidate: &Value) -> bool {
    check(candidate).is_ok()
}

/// Check a candidate and, if it conforms, take ownership of it as a [`Record`].
pub fn validate(candidate: Value) -> Result<Record, Rejection> {
    check(&candidate)?;
    match candidate {
        Value::Object(map) => Ok(Record::from_validated(map)),
        _ => Err(Rejection::NotAnObject),
    }
}

/// Minimal shape a persisted entry needs for flattening: an object whose
/// `turns` is a non-empty list starting with an object.
///
/// Already-flattened records pass, so a transformed dataset can be fed
/// back through the transform.
pub fn check_flattenable(entry: &Value) -> Result<(), Rejection> {
    let dp = entry.as_object().ok_or(Rejection::NotAnObject)?;
    match dp.get("turns").and_then(Value::as_array) {
        Some(turns) if !turns.is_empty() => {
            turns[0].as_object().ok_or(Rejection::TurnNotAnObject)?;
            Ok(())
        }
        _ => Err(Rejection::EmptyTurns),
    }
}

/// Take ownership of a persisted entry that passes [`check_flattenable`].
pub fn admit_flattenable(entry: Value) -> Result<Record, Rejection> {
    check_flattenable(&entry)?;
    match entry {
        Value::Object(map) => Ok(Record::from_validated(map)),
        _ => Err(Rejection::NotAnObject),
    }
}
