//! Conversation-history flattening.
//!
//! A record embeds prior turns as `metadata.conversation_history`. Flattening
//! turns each prior user message (paired with the assistant reply that
//! follows it, if any) into its own turn, then appends the record's own
//! input/expected output as the final turn.

use crate::models::{
    CONVERSATION_HISTORY, FlattenedRecord, FlattenedTurn, Record, Role, text_of,
};
use serde_json::{Map, Value};

/// Role carried by every flattened turn: the speaker of its `input`.
pub const FLATTENED_ROLE: &str = "user";

/// Flatten a record's history into a linear sequence of turns.
///
/// Pure and total. The input is not modified.
pub fn flatten(record: &Record) -> FlattenedRecord {
    let first_turn = record.first_turn();
    let metadata: Map<String, Value> = record
        .metadata()
        .map(|meta| {
            meta.iter()
                .filter(|(key, _)| key.as_str() != CONVERSATION_HISTORY)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let history = record.conversation_history();
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut i = 0;
    while i < history.len() {
        if history[i].role != Role::User {
            // Assistant (or unknown) entries without a preceding user turn
            i += 1;
            continue;
        }
        let input = history[i].content.clone();
        match history.get(i + 1) {
            Some(next) if next.role == Role::Assistant => {
                pairs.push((input, next.content.clone()));
                i += 2;
            }
            _ => {
                pairs.push((input, String::new()));
                i += 1;
            }
        }
    }

    pairs.push((
        text_of(first_turn.and_then(|t| t.get("input"))),
        text_of(first_turn.and_then(|t| t.get("expected_output"))),
    ));

    let turns = pairs
        .into_iter()
        .zip(1u32..)
        .map(|((input, expected_output), id)| FlattenedTurn {
            id,
            role: FLATTENED_ROLE.to_string(),
            input,
            metadata: metadata.clone(),
            expected_output,
        })
        .collect();

    FlattenedRecord {
        id: record.id_value().clone(),
        turns,
    }
}

/// Whether the record carries any prior-turn history.
pub fn is_multi_turn(record: &Record) -> bool {
    !record.conversation_history().is_empty()
}
