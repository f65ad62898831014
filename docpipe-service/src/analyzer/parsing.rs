//! Tolerant decoding of vision completions.
//!
//! The model is asked for JSON but may wrap it in a code fence, break the
//! syntax, or answer in prose. Decoding runs an ordered chain of strategies:
//! strict decode, field scan, raw passthrough. The last one always succeeds.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{AnalysisResult, Metadata, RAW_RESPONSE_KEY, RAW_TEXT_KEY};

/// Decode a completion into an [`AnalysisResult`]. Never fails.
pub fn parse_analysis(raw: &str) -> AnalysisResult {
    let cleaned = strip_code_fence(raw);

    parse_strict(cleaned)
        .or_else(|| parse_field_scan(cleaned))
        .unwrap_or_else(|| raw_passthrough(raw, cleaned))
}

/// Trim whitespace and remove a surrounding Markdown code fence, with or
/// without a language tag.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // A language tag only counts when it ends the fence line
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || "-_+.".contains(c)))
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        body = if after_tag.starts_with('\n') || after_tag.starts_with("\r\n") {
            after_tag
        } else {
            rest
        };
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }

    body.trim()
}

#[derive(Deserialize)]
struct StrictAnalysis {
    summary: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    raw_text_content: Option<String>,
}

/// Strategy 1: the whole text is a JSON object with a string `summary`
pub(crate) fn parse_strict(text: &str) -> Option<AnalysisResult> {
    let strict: StrictAnalysis = serde_json::from_str(text).ok()?;

    let mut metadata = strict.metadata.map(coerce_metadata).unwrap_or_default();
    if let Some(raw_text) = strict.raw_text_content {
        metadata.entry(RAW_TEXT_KEY.to_string()).or_insert(raw_text);
    }

    Some(AnalysisResult::new(strict.summary, metadata))
}

/// Strategy 2: pull individual fields out of text that is not valid JSON
pub(crate) fn parse_field_scan(text: &str) -> Option<AnalysisResult> {
    let summary = extract_field(text, "summary");
    if summary.is_empty() {
        return None;
    }

    Some(AnalysisResult::new(unescape(summary), scan_metadata(text)))
}

/// Strategy 3: keep the entire response so nothing is dropped
pub(crate) fn raw_passthrough(raw: &str, cleaned: &str) -> AnalysisResult {
    let mut metadata = scan_metadata(cleaned);
    metadata.insert(RAW_RESPONSE_KEY.to_string(), raw.to_string());

    AnalysisResult::new(raw.to_string(), metadata)
}

fn scan_metadata(text: &str) -> Metadata {
    let mut metadata = Metadata::new();

    let span = extract_field(text, "metadata");
    if span.starts_with('{') {
        if let Ok(map) = serde_json::from_str::<Map<String, Value>>(span) {
            metadata = coerce_metadata(map);
        }
    }

    if !metadata.contains_key(RAW_TEXT_KEY) {
        let raw_text = extract_field(text, RAW_TEXT_KEY);
        if !raw_text.is_empty() {
            metadata.insert(RAW_TEXT_KEY.to_string(), unescape(raw_text));
        }
    }

    metadata
}

/// Locate the first `"<field>":` and return its value span.
///
/// A quoted value runs to the next quote not preceded by a backslash (quotes
/// excluded). An object value runs to its balanced closing brace (braces
/// included). Anything else, or an unterminated value, yields `""`.
pub(crate) fn extract_field<'a>(text: &'a str, field: &str) -> &'a str {
    let pattern = format!("\"{}\":", field);
    let Some(found) = text.find(&pattern) else {
        return "";
    };

    let bytes = text.as_bytes();
    let mut start = found + pattern.len();
    while start < bytes.len() && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    if start >= bytes.len() {
        return "";
    }

    match bytes[start] {
        b'"' => {
            let value_start = start + 1;
            let mut end = value_start;
            while end < bytes.len() {
                if bytes[end] == b'"' && (end == value_start || bytes[end - 1] != b'\\') {
                    return &text[value_start..end];
                }
                end += 1;
            }
            ""
        }
        b'{' => {
            let mut depth = 0usize;
            for (offset, byte) in bytes[start..].iter().enumerate() {
                match byte {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return &text[start..start + offset + 1];
                        }
                    }
                    _ => {}
                }
            }
            ""
        }
        _ => "",
    }
}

/// Decode JSON string escapes, keeping the raw text if it is not a valid literal
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

/// Flatten a JSON object into string values.
///
/// Models routinely answer lists (colours, objects) where a string is expected;
/// scalar lists are joined with `", "`, anything else keeps its JSON text.
fn coerce_metadata(map: Map<String, Value>) -> Metadata {
    map.into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key, metadata_text(value)))
        .collect()
}

fn metadata_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Array(items) if items.iter().all(is_scalar) => items
            .into_iter()
            .map(metadata_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Bool(_) | Value::Number(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json_with_language_tag() {
        let raw = "```json\n{\"summary\":\"a cat\",\"metadata\":{\"raw_text_content\":\"MEOW\"}}\n```";
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, "a cat");
        assert_eq!(analysis.metadata.get(RAW_TEXT_KEY).map(String::as_str), Some("MEOW"));
        assert_eq!(analysis.extracted_text, "MEOW");
        assert!(!analysis.metadata.contains_key(RAW_RESPONSE_KEY));
    }

    #[test]
    fn test_fence_without_language_tag() {
        let analysis = parse_analysis("  ```\n{\"summary\":\"plain\"}\n```  ");
        assert_eq!(analysis.summary, "plain");
        assert!(analysis.metadata.is_empty());
        assert_eq!(analysis.extracted_text, "plain");
    }

    #[test]
    fn test_field_scan_on_broken_json() {
        let raw = r#"Some text "summary": "ok" trailing junk {not json"#;
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, "ok");
        assert!(!analysis.metadata.contains_key(RAW_RESPONSE_KEY));
    }

    #[test]
    fn test_no_summary_degrades_to_raw_response() {
        let raw = "I could not read this image, sorry.";
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, raw);
        assert_eq!(
            analysis.metadata.get(RAW_RESPONSE_KEY).map(String::as_str),
            Some(raw)
        );
    }

    #[test]
    fn test_passthrough_keeps_untrimmed_response() {
        let raw = "```\nnothing useful\n```\n";
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.summary, raw);
        assert_eq!(analysis.metadata[RAW_RESPONSE_KEY], raw);
    }

    #[test]
    fn test_strict_coerces_list_metadata() {
        let raw = r#"{
            "summary": "A slide",
            "raw_text_content": "Q3 results",
            "metadata": {
                "colors": ["White", "Blue"],
                "slide_count": 1,
                "mood": null,
                "layout": {"columns": 2}
            }
        }"#;
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, "A slide");
        assert_eq!(analysis.metadata["colors"], "White, Blue");
        assert_eq!(analysis.metadata["slide_count"], "1");
        assert_eq!(analysis.metadata["layout"], r#"{"columns":2}"#);
        assert!(!analysis.metadata.contains_key("mood"));
        // Top-level text is hoisted into the reserved key
        assert_eq!(analysis.metadata[RAW_TEXT_KEY], "Q3 results");
        assert_eq!(analysis.extracted_text, "Q3 results");
    }

    #[test]
    fn test_strict_requires_string_summary() {
        assert!(parse_strict(r#"{"metadata":{}}"#).is_none());
        assert!(parse_strict(r#"{"summary":null}"#).is_none());
        assert!(parse_strict(r#"{"summary":""}"#).is_some());
    }

    #[test]
    fn test_field_scan_recovers_metadata_object_and_text() {
        let raw = r#"Here you go: {"summary": "Receipt", "metadata": {"category": "receipt", "raw_text_content": "TOTAL 4.20"}, oops"#;
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, "Receipt");
        assert_eq!(analysis.metadata["category"], "receipt");
        assert_eq!(analysis.extracted_text, "TOTAL 4.20");
    }

    #[test]
    fn test_field_scan_finds_raw_text_outside_metadata() {
        let raw = r#"{"summary": "Sign", "raw_text_content": "STOP", "metadata": {"broken": }"#;
        let analysis = parse_analysis(raw);

        assert_eq!(analysis.summary, "Sign");
        assert_eq!(analysis.metadata[RAW_TEXT_KEY], "STOP");
        assert!(!analysis.metadata.contains_key("broken"));
    }

    #[test]
    fn test_extract_field_rules() {
        assert_eq!(extract_field(r#""summary":   "spaced""#, "summary"), "spaced");
        assert_eq!(extract_field("\"summary\":\n\t\"newline\"", "summary"), "newline");
        assert_eq!(
            extract_field(r#""summary": "say \"hi\" now" rest"#, "summary"),
            r#"say \"hi\" now"#
        );
        assert_eq!(extract_field(r#""summary": """#, "summary"), "");
        assert_eq!(extract_field(r#""summary": "unterminated"#, "summary"), "");
        assert_eq!(extract_field(r#""summary": 42"#, "summary"), "");
        assert_eq!(extract_field(r#""summary" : "spaced key""#, "summary"), "");
        assert_eq!(extract_field("no fields here", "summary"), "");
        assert_eq!(
            extract_field(r#""metadata": {"a": {"b": 1}}, "x": 2"#, "metadata"),
            r#"{"a": {"b": 1}}"#
        );
        assert_eq!(extract_field(r#""metadata": {"a": {"b": 1}"#, "metadata"), "");
    }

    #[test]
    fn test_field_scan_unescapes_values() {
        let raw = r#"junk "summary": "line one\nline \"two\"" more junk"#;
        let analysis = parse_analysis(raw);
        assert_eq!(analysis.summary, "line one\nline \"two\"");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("{}"), "{}");
        assert_eq!(strip_code_fence("```json\r\n{}\r\n```"), "{}");
        assert_eq!(
            strip_code_fence("```The image shows a cat```"),
            "The image shows a cat"
        );
        assert_eq!(strip_code_fence("```json {} "), "json {}");
    }
}
