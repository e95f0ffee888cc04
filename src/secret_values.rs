//! Secret value masking
//!
//! Values decrypted from secret files must never reach logs. Every scalar of
//! the secret tree (and every non-blank line of multi-line values) becomes a
//! mask pattern; strings that are themselves JSON documents are searched too.

use serde_json::Value;
use std::collections::VecDeque;

/// Replacement for masked values
pub const MASK: &str = "***";

/// Shorter values are too likely to collide with ordinary output
const MIN_SECRET_LEN: usize = 4;

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(_) | Value::Null => None,
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Collect mask patterns from a secret values tree.
///
/// Patterns are unique and ordered longest first, ready for
/// [`mask_secret_values_in_string`].
pub fn extract_secret_values_from_map(data: &Value) -> Vec<String> {
    let mut queue: VecDeque<Value> = VecDeque::from([data.clone()]);
    let mut values: Vec<String> = Vec::new();

    while let Some(elem) = queue.pop_front() {
        match elem {
            Value::Array(items) => queue.extend(items),
            Value::Object(map) => queue.extend(map.into_iter().map(|(_, v)| v)),
            scalar => {
                let Some(text) = scalar_text(&scalar) else {
                    continue;
                };

                if text.len() >= MIN_SECRET_LEN {
                    values.push(text.clone());
                }
                values.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|line| line.len() >= MIN_SECRET_LEN)
                        .map(str::to_string),
                );

                if let Ok(nested @ (Value::Object(_) | Value::Array(_))) =
                    serde_json::from_str::<Value>(&text)
                {
                    queue.push_back(nested);
                }
            }
        }
    }

    values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    values.dedup();
    values
}

/// Replace every occurrence of every secret value with `***` (case-sensitive)
pub fn mask_secret_values_in_string(secret_values: &[String], target: &str) -> String {
    secret_values
        .iter()
        .fold(target.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_scalars() {
        let values = extract_secret_values_from_map(&json!({"a": "secretpass", "b": [1, "tok3n!"]}));
        assert_eq!(values, vec!["secretpass", "tok3n!"]);
    }

    #[test]
    fn masks_values_case_sensitively() {
        let values = extract_secret_values_from_map(&json!({"a": "secretpass", "b": [1, "tok3n!"]}));
        let masked = mask_secret_values_in_string(
            &values,
            "login secretpass with tok3n! but not SECRETPASS or 1",
        );
        assert_eq!(masked, "login *** with *** but not SECRETPASS or 1");
    }

    #[test]
    fn short_values_are_ignored() {
        let values = extract_secret_values_from_map(&json!({"a": "abc", "b": 42, "c": 12345}));
        assert_eq!(values, vec!["12345"]);
    }

    #[test]
    fn multiline_values_contribute_lines() {
        let values =
            extract_secret_values_from_map(&json!({"key": "-----BEGIN-----\n  abcdef  \nxy\n"}));
        assert!(values.contains(&"-----BEGIN-----".to_string()));
        assert!(values.contains(&"abcdef".to_string()));
        assert!(!values.contains(&"xy".to_string()));
    }

    #[test]
    fn json_strings_are_descended() {
        let values = extract_secret_values_from_map(&json!({
            "config": "{\"password\": \"hunter22\", \"ids\": [\"alpha-1\"]}"
        }));
        assert!(values.contains(&"hunter22".to_string()));
        assert!(values.contains(&"alpha-1".to_string()));
    }

    #[test]
    fn longer_values_mask_first() {
        let values = extract_secret_values_from_map(&json!(["abcd", "abcdef"]));
        assert_eq!(values, vec!["abcdef", "abcd"]);
        assert_eq!(mask_secret_values_in_string(&values, "abcdef abcd"), "*** ***");
    }
}
