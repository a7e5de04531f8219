//! Quote-aware scanning over loosely structured text.
//!
//! None of these helpers parse; they only locate regions so the caller can
//! attempt a strict parse on them.

use regex::Regex;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[jJ][sS][oO][nN])?(.*?)```").expect("fence pattern is valid")
});

/// Trimmed inner content of the first fenced code block, untagged or tagged `json`.
pub fn fenced_block(text: &str) -> Option<&str> {
    FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|inner| !inner.is_empty())
}

/// The first `{ ... }` region whose braces balance outside string literals.
pub fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let len = bracketed_len(&text[start..])?;
    Some(&text[start..start + len])
}

/// Raw text of the value following `"field":`, if any occurrence has one.
///
/// Strings run to their closing quote (or the end of input when truncated),
/// objects and lists to their matching close, bare scalars to the next
/// `,`, closing bracket, or line break.
pub fn field_value<'a>(text: &'a str, field: &str) -> Option<&'a str> {
    let needle = format!("\"{field}\"");
    let mut from = 0;
    while let Some(pos) = text[from..].find(&needle) {
        let after = from + pos + needle.len();
        if let Some(rest) = text[after..].trim_start().strip_prefix(':') {
            if let Some(value) = value_extent(rest.trim_start()) {
                return Some(value);
            }
        }
        from = after;
    }
    None
}

fn value_extent(text: &str) -> Option<&str> {
    match text.chars().next()? {
        '"' => Some(&text[..string_len(text).unwrap_or(text.len())]),
        '{' | '[' => bracketed_len(text).map(|len| &text[..len]),
        _ => {
            let end = text
                .find([',', '}', ']', '\n', '\r'])
                .unwrap_or(text.len());
            let value = text[..end].trim_end();
            (!value.is_empty()).then_some(value)
        }
    }
}

/// Byte length of the bracketed value opening `text`, closing delimiter included.
/// Brace and bracket depth are counted together.
fn bracketed_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte length of the string literal opening `text`, both quotes included.
fn string_len(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(i + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_tagged_and_untagged() {
        let tagged = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(fenced_block(tagged), Some("{\"a\": 1}"));

        let untagged = "```\n  {\"a\": 1}  \n```";
        assert_eq!(fenced_block(untagged), Some("{\"a\": 1}"));

        assert_eq!(fenced_block("no fence here"), None);
        assert_eq!(fenced_block("``````"), None);
    }

    #[test]
    fn test_balanced_object_ignores_braces_in_strings() {
        let text = r#"Result: {"summary": "uses {braces} and \"quotes\"", "n": {"x": 1}} trailing"#;
        assert_eq!(
            balanced_object(text),
            Some(r#"{"summary": "uses {braces} and \"quotes\"", "n": {"x": 1}}"#)
        );
    }

    #[test]
    fn test_balanced_object_unclosed() {
        assert_eq!(balanced_object(r#"{"a": {"b": 1}"#), None);
        assert_eq!(balanced_object("no braces"), None);
    }

    #[test]
    fn test_field_value_multiline_list() {
        let text = "{\n  \"follow_up_questions\": [\n    \"a, b\",\n    \"c ] d\"\n  ],\n  \"x\": 1\n}";
        assert_eq!(
            field_value(text, "follow_up_questions"),
            Some("[\n    \"a, b\",\n    \"c ] d\"\n  ]")
        );
    }

    #[test]
    fn test_field_value_string_with_punctuation() {
        let text = r#"{"short_summary": "Commas, {braces} and \"quotes\"", "other": 2}"#;
        assert_eq!(
            field_value(text, "short_summary"),
            Some(r#""Commas, {braces} and \"quotes\"""#)
        );
    }

    #[test]
    fn test_field_value_bare_scalar_and_missing() {
        let text = "{\"count\": 42,\n\"flag\": true}";
        assert_eq!(field_value(text, "count"), Some("42"));
        assert_eq!(field_value(text, "flag"), Some("true"));
        assert_eq!(field_value(text, "absent"), None);
    }

    #[test]
    fn test_field_value_skips_occurrence_without_colon() {
        let text = r#"The "summary" is below. {"summary": "real"}"#;
        assert_eq!(field_value(text, "summary"), Some(r#""real""#));
    }

    #[test]
    fn test_field_value_truncated_string_runs_to_end() {
        let text = r##"{"markdown_report": "# Title\nBody cut off"##;
        assert_eq!(
            field_value(text, "markdown_report"),
            Some(r##""# Title\nBody cut off"##)
        );
    }
}
