//! Tolerant JSON extraction from free-form model output.
//!
//! Models asked for "only a JSON array" still wrap it in code fences, add
//! prose around it, or get truncated mid-array. The [`Extractor`] cleans the
//! text once and then runs an ordered list of [`ExtractionStrategy`]s; the
//! first one that yields a sequence wins. Strategies are pure and total:
//! they return `None` instead of failing.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[\w+.-]*\s*").expect("code fence pattern is valid"));

/// Remove triple-backtick fences (with an optional language tag) anywhere in
/// the text and trim the result.
pub fn strip_code_fences(raw: &str) -> String {
    CODE_FENCE_RE.replace_all(raw, "").trim().to_string()
}

/// One way of recovering candidates from cleaned text.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Candidates found in `text`, or `None` if this strategy found nothing usable.
    fn extract(&self, text: &str) -> Option<Vec<Value>>;
}

/// Parse the whole text as JSON. An array is returned as-is, a single
/// object becomes a one-element sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectParse;

impl ExtractionStrategy for DirectParse {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn extract(&self, text: &str) -> Option<Vec<Value>> {
        match serde_json::from_str::<Value>(text).ok()? {
            Value::Array(items) => Some(items),
            obj @ Value::Object(_) => Some(vec![obj]),
            _ => None,
        }
    }
}

/// Parse the span from the first `[` to the last `]` as an array.
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketSpan;

impl ExtractionStrategy for BracketSpan {
    fn name(&self) -> &'static str {
        "bracket-span"
    }

    fn extract(&self, text: &str) -> Option<Vec<Value>> {
        let start = text.find('[')?;
        let end = text.rfind(']')?;
        if end <= start {
            return None;
        }
        match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Match every `{` to its closing brace and parse each balanced span as an
/// object independently. Recovers the complete objects of a truncated or
/// otherwise broken array.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedObjects;

impl ExtractionStrategy for BalancedObjects {
    fn name(&self) -> &'static str {
        "balanced-objects"
    }

    fn extract(&self, text: &str) -> Option<Vec<Value>> {
        let bytes = text.as_bytes();
        let objects: Vec<Value> = bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'{')
            .filter_map(|(start, _)| {
                let end = matching_brace(bytes, start)?;
                match serde_json::from_str::<Value>(&text[start..=end]).ok()? {
                    obj @ Value::Object(_) => Some(obj),
                    _ => None,
                }
            })
            .collect();

        if objects.is_empty() {
            None
        } else {
            Some(objects)
        }
    }
}

/// Index of the `}` closing the `{` at `start`, ignoring braces inside JSON
/// string literals.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Candidates recovered from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub candidates: Vec<Value>,
    /// Name of the strategy that produced them
    pub strategy: &'static str,
}

/// Ordered chain of extraction strategies.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(DirectParse),
            Box::new(BracketSpan),
            Box::new(BalancedObjects),
        ])
    }
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Recover candidates from raw model output.
    ///
    /// `None` means no data could be extracted; that is an expected outcome,
    /// not an error.
    pub fn extract(&self, raw: &str) -> Option<Extraction> {
        let cleaned = strip_code_fences(raw);
        self.strategies.iter().find_map(|strategy| {
            strategy.extract(&cleaned).map(|candidates| Extraction {
                candidates,
                strategy: strategy.name(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_array_with_prose() {
        let raw = "Here is your data:\n```json\n[{\"a\":1}]\n```\nThanks!";
        let extraction = Extractor::default().extract(raw).unwrap();
        assert_eq!(extraction.candidates, vec![json!({"a": 1})]);
        assert_eq!(extraction.strategy, "bracket-span");
    }

    #[test]
    fn test_trailing_junk() {
        let raw = "[{\"a\":1},{\"a\":2}] some trailing junk";
        let extraction = Extractor::default().extract(raw).unwrap();
        assert_eq!(extraction.candidates, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_not_json_is_none() {
        assert!(Extractor::default().extract("not json at all").is_none());
        assert!(Extractor::default().extract("").is_none());
        assert!(Extractor::default().extract("42").is_none());
    }

    #[test]
    fn test_clean_json_parses_directly() {
        let extraction = Extractor::default()
            .extract("```\n[{\"id\": 1}, {\"id\": 2}]\n```")
            .unwrap();
        assert_eq!(extraction.strategy, "direct");
        assert_eq!(extraction.candidates.len(), 2);
    }

    #[test]
    fn test_single_object_is_wrapped() {
        let extraction = Extractor::default().extract("{\"id\": 5}").unwrap();
        assert_eq!(extraction.candidates, vec![json!({"id": 5})]);
    }

    #[test]
    fn test_empty_array_is_a_usable_sequence() {
        let extraction = Extractor::default().extract("[]").unwrap();
        assert!(extraction.candidates.is_empty());
        assert_eq!(extraction.strategy, "direct");
    }

    #[test]
    fn test_truncated_array_recovers_complete_objects() {
        let raw = "[{\"id\": 1, \"x\": [1, 2]}, {\"id\": 2}, {\"id\": 3, \"x\": ";
        let extraction = Extractor::default().extract(raw).unwrap();
        assert_eq!(extraction.strategy, "balanced-objects");
        assert_eq!(
            extraction.candidates,
            vec![json!({"id": 1, "x": [1, 2]}), json!({"id": 2})]
        );
    }

    #[test]
    fn test_concatenated_objects_with_braces_in_strings() {
        let raw = r#"First: {"a": 1} then {"b": {"c": "}{"}} done"#;
        let extraction = Extractor::default().extract(raw).unwrap();
        assert_eq!(
            extraction.candidates,
            vec![
                json!({"a": 1}),
                json!({"b": {"c": "}{"}}),
                json!({"c": "}{"}),
            ]
        );
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  ```python\nx\n```  "), "x");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn test_custom_chain() {
        let extractor = Extractor::new(vec![Box::new(BalancedObjects)]);
        assert_eq!(extractor.strategy_names(), vec!["balanced-objects"]);
        // An array of scalars has no objects to recover
        assert!(extractor.extract("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_matching_brace_unbalanced() {
        assert_eq!(matching_brace(b"{\"a\": {}", 0), None);
        assert_eq!(matching_brace(b"{\"a\": \"\\\"}\"}", 0), Some(11));
    }
}
