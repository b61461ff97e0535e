//! Permissive JSON extraction from free-form model text.
//!
//! The vendor model is only weakly constrained to emit JSON, so structured
//! replies arrive in one of three dresses: a fenced code block, JSON buried in
//! surrounding prose, or a clean JSON document. [`extract_json`] tries those
//! strategies in most-likely-correct order and returns the first parse that
//! succeeds. The function is pure and idempotent — the same input always
//! yields the same structure or `None`.

use serde_json::Value;

/// Extract a JSON value from model output.
///
/// Strategies, in order:
/// 1. fenced code block (```json ... ``` or a bare ``` fence),
/// 2. outermost `{ ... }` span,
/// 3. whole text.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(candidate) = fenced_block(text) {
        if let Ok(value) = serde_json::from_str(candidate.trim()) {
            return Some(value);
        }
    }

    if let Some(candidate) = brace_span(text) {
        if let Ok(value) = serde_json::from_str(candidate) {
            return Some(value);
        }
    }

    serde_json::from_str(text.trim()).ok()
}

/// Extract and deserialize into a concrete type in one step.
pub fn extract_as<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|value| serde_json::from_value(value).ok())
}

/// Returns the contents of the first fenced code block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Returns the span from the first `{` to the last `}`, if both exist.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"needed\": true, \"style\": \"timeline\"}\n```\nHope that helps.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"needed": true, "style": "timeline"}));
    }

    #[test]
    fn parses_untagged_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn parses_braces_in_prose() {
        let text = "Sure! The decision is {\"needed\": false} as requested.";
        assert_eq!(extract_json(text).unwrap(), json!({"needed": false}));
    }

    #[test]
    fn parses_plain_json() {
        let text = "  {\"classification\": \"weed\", \"confidence\": 0.9}  ";
        let value = extract_json(text).unwrap();
        assert_eq!(value["classification"], "weed");
    }

    #[test]
    fn nested_braces_survive_the_span_strategy() {
        let text = "Result: {\"outer\": {\"inner\": [1, 2]}} done.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["outer"]["inner"], json!([1, 2]));
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json("no structured data here").is_none());
        assert!(extract_json("{broken json").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn extraction_is_idempotent() {
        let inputs = [
            "```json\n{\"x\": 1}\n```",
            "prefix {\"x\": 1} suffix",
            "{\"x\": 1}",
            "not json at all",
        ];
        for input in inputs {
            assert_eq!(extract_json(input), extract_json(input));
        }
    }

    #[test]
    fn fenced_block_wins_over_outer_braces() {
        // The prose braces are malformed; the fenced block is authoritative.
        let text = "{oops\n```json\n{\"ok\": true}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn extract_as_deserializes() {
        #[derive(serde::Deserialize)]
        struct Decision {
            needed: bool,
        }
        let d: Decision = extract_as("```json\n{\"needed\": true}\n```").unwrap();
        assert!(d.needed);
    }
}
