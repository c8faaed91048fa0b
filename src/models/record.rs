//! Dataset record types.
//!
//! A [`Record`] is a provider-generated datapoint that has passed schema
//! validation. Its JSON is kept as-is so prompt-specific fields pass through
//! untouched; only re-indexing writes to it. A [`FlattenedRecord`] is the
//! linear multi-turn shape produced by the history flattener.

use serde::Serialize;
use serde_json::{Map, Value};

/// Metadata key holding the embedded prior-turn history.
pub const CONVERSATION_HISTORY: &str = "conversation_history";

/// A validated evaluation datapoint.
///
/// Only constructed by the schema module, so `turns` is always a non-empty
/// array whose first element is an object. Records admitted by
/// [`validate`](crate::schema::validate) also carry the full datapoint
/// schema on that turn; records admitted for flattening may lack
/// `metadata`, `conversation_history` or `lm_checklist`, and the accessors
/// read those as empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub(crate) fn from_validated(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Numeric record id, if the current id is a non-negative integer.
    pub fn id(&self) -> Option<u64> {
        self.0.get("id").and_then(Value::as_u64)
    }

    /// Raw id value (provider output may use any JSON type before re-indexing).
    pub fn id_value(&self) -> &Value {
        self.0.get("id").unwrap_or(&Value::Null)
    }

    pub fn turns(&self) -> &[Value] {
        self.0
            .get("turns")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_turn(&self) -> Option<&Map<String, Value>> {
        self.turns().first().and_then(Value::as_object)
    }

    /// Metadata of the first turn.
    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.first_turn()
            .and_then(|turn| turn.get("metadata"))
            .and_then(Value::as_object)
    }

    /// Prior-turn history from the first turn's metadata.
    ///
    /// A missing or non-array history reads as empty; entries that are not
    /// objects are skipped.
    pub fn conversation_history(&self) -> Vec<HistoryEntry> {
        self.metadata()
            .and_then(|meta| meta.get(CONVERSATION_HISTORY))
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(HistoryEntry::from_value).collect())
            .unwrap_or_default()
    }

    pub fn set_id(&mut self, id: u64) {
        self.0.insert("id".to_string(), Value::from(id));
    }

    pub fn set_first_turn_id(&mut self, id: u64) {
        if let Some(turn) = self
            .0
            .get_mut("turns")
            .and_then(Value::as_array_mut)
            .and_then(|turns| turns.first_mut())
            .and_then(Value::as_object_mut)
        {
            turn.insert("id".to_string(), Value::from(id));
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Speaker of a history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Other(String),
}

impl Role {
    fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => Role::Other(other.to_string()),
        }
    }
}

/// One `{role, content}` pair of embedded conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .map(Role::parse)
            .unwrap_or_else(|| Role::Other(String::new()));
        Some(Self {
            role,
            content: text_of(entry.get("content")),
        })
    }
}

/// Render a JSON field as free text: strings verbatim, missing/null as
/// empty, anything else as compact JSON.
pub fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A record whose conversation history has been expanded into turns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenedRecord {
    /// Same id as the source record
    pub id: Value,

    pub turns: Vec<FlattenedTurn>,
}

/// One linear stimulus/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenedTurn {
    /// Sequential from 1 within the record
    pub id: u32,

    /// Speaker of `input`; always "user"
    pub role: String,

    pub input: String,

    /// Source metadata without `conversation_history`
    pub metadata: Map<String, Value>,

    pub expected_output: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => Record::from_validated(map),
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_history_is_read_tolerantly() {
        let rec = record(json!({
            "id": 9,
            "turns": [{
                "id": 4,
                "input": "x",
                "metadata": {
                    "conversation_history": [
                        {"role": "user", "content": "hi"},
                        "garbage",
                        {"role": "assistant"},
                        {"content": 42}
                    ],
                    "category": "c",
                    "difficulty": "basic"
                },
                "expected_output": "y",
                "lm_checklist": []
            }]
        }));

        let history = rec.conversation_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "");
        assert_eq!(history[2].role, Role::Other(String::new()));
        assert_eq!(history[2].content, "42");
    }

    #[test]
    fn test_set_ids() {
        let mut rec = record(json!({
            "id": "abc",
            "turns": [{"id": 7}, {"id": 8}]
        }));
        assert_eq!(rec.id(), None);

        rec.set_id(3);
        rec.set_first_turn_id(1);

        assert_eq!(rec.id(), Some(3));
        assert_eq!(rec.turns()[0]["id"], json!(1));
        assert_eq!(rec.turns()[1]["id"], json!(8));
    }

    #[test]
    fn test_serializes_transparently() {
        let rec = record(json!({"id": 1, "turns": [{"id": 1}], "extra": true}));
        let text = serde_json::to_string(&rec).unwrap();
        assert_eq!(text, r#"{"id":1,"turns":[{"id":1}],"extra":true}"#);
    }

    #[test]
    fn test_text_of() {
        assert_eq!(text_of(None), "");
        assert_eq!(text_of(Some(&Value::Null)), "");
        assert_eq!(text_of(Some(&json!("plain"))), "plain");
        assert_eq!(text_of(Some(&json!({"a": 1}))), r#"{"a":1}"#);
    }
}
