//! Shared utility functions for text windows and JSON extraction.
//!
//! All length arithmetic in the pipeline is done in characters, not bytes:
//! corpora are mostly CJK text where one character is three UTF-8 bytes.
//! The only byte-based measure is the "possibly incomplete" ingest check.

use serde_json::Value;

// =============================================================================
// Character Windows
// =============================================================================

/// Number of characters in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th character, clamped to the end of the string.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Characters `[start, end)` of `s`, clamped to its length.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    let from = byte_offset(s, start);
    let to = byte_offset(s, end);
    &s[from..to]
}

/// The first `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    &s[..byte_offset(s, max)]
}

/// The first `max` characters of `s`, followed by `notice` when anything was cut.
pub fn truncate_with_notice(s: &str, max: usize, notice: &str) -> String {
    let head = truncate_chars(s, max);
    if head.len() < s.len() {
        format!("{}{}", head, notice)
    } else {
        head.to_string()
    }
}

/// Characters of `s` after the first `skip`.
pub fn skip_chars(s: &str, skip: usize) -> &str {
    &s[byte_offset(s, skip)..]
}

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract a string field.
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(|s| s.trim().to_string())
}

/// Extract a string field with default value.
pub fn json_string_or(value: &Value, key: &str, default: &str) -> String {
    json_string(value, key)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Extract a string array field, skipping non-string entries.
pub fn json_string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_slice_cjk() {
        let s = "一二三四五六";
        assert_eq!(char_len(s), 6);
        assert_eq!(char_slice(s, 1, 3), "二三");
        assert_eq!(char_slice(s, 4, 100), "五六");
        assert_eq!(char_slice(s, 5, 2), "");
    }

    #[test]
    fn test_truncate_with_notice() {
        assert_eq!(truncate_with_notice("甲乙丙", 2, "…"), "甲乙…");
        assert_eq!(truncate_with_notice("甲乙", 2, "…"), "甲乙");
        assert_eq!(skip_chars("甲乙丙", 2), "丙");
    }

    #[test]
    fn test_json_helpers() {
        let v = serde_json::json!({"title": " 报告 ", "keywords": ["a", 1, "", "b"]});
        assert_eq!(json_string(&v, "title").as_deref(), Some("报告"));
        assert_eq!(json_string_or(&v, "summary", "无"), "无");
        assert_eq!(json_string_array(&v, "keywords"), vec!["a", "b"]);
    }
}
