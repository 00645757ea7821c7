//! Layered success determination for tool-call results.
//!
//! A call is judged on two independent axes: technical success (the call was
//! accepted at the transport/protocol layer) and content quality (the
//! payload carries real information and satisfies any case expectations).
//! The overall verdict is the conjunction, and the reported reason says
//! which layer failed.

use serde_json::{Map, Value};

use crate::case::ExpectedResult;

const ERROR_SENTINEL: &str = "Error:";
const FAILED_SENTINEL: &str = "Failed:";
const EMPTY_MARKERS: [&str; 3] = ["none", "null", "empty"];
const FAILURE_INDICATORS: [&str; 5] = ["error", "failed", "exception", "not found", "invalid"];
const REASON_SNIPPET_CHARS: usize = 100;

/// The shapes a tool response's `structuredContent.result` payload can take.
/// Explicit variants keep the classifier branches exhaustive instead of
/// sniffing types at every use site.
#[derive(Debug)]
pub enum StructuredResult<'a> {
    Text(&'a str),
    /// An object carrying a `data` member (whatever type it holds).
    DataObject(&'a Value),
    /// Any other object.
    Object(&'a Map<String, Value>),
    List(&'a [Value]),
}

impl<'a> StructuredResult<'a> {
    /// Extracts the structured result from a raw call result. `None` when
    /// the payload is absent or a bare scalar.
    pub fn from_call_result(raw: &'a Value) -> Option<Self> {
        let result = raw.get("structuredContent")?.get("result")?;
        match result {
            Value::String(text) => Some(Self::Text(text)),
            Value::Object(map) => match map.get("data") {
                Some(data) => Some(Self::DataObject(data)),
                None => Some(Self::Object(map)),
            },
            Value::Array(items) => Some(Self::List(items)),
            _ => None,
        }
    }
}

/// Whether the call was accepted at the transport/protocol layer.
///
/// False when the transport reported failure (regardless of payload), when
/// the result is not an object, when the error flag is set or missing, or
/// when the structured result text carries the `Error:` sentinel.
pub fn technical_success(call_succeeded: bool, raw: &Value) -> bool {
    if !call_succeeded {
        return false;
    }
    let Some(result) = raw.as_object() else {
        return false;
    };
    // A result that does not say `isError: false` is treated as an error.
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if is_error {
        return false;
    }
    error_sentinel(raw).is_none()
}

/// The structured result text when it announces a failure in-band.
pub fn error_sentinel(raw: &Value) -> Option<&str> {
    match StructuredResult::from_call_result(raw)? {
        StructuredResult::Text(text) if text.starts_with(ERROR_SENTINEL) => Some(text),
        _ => None,
    }
}

/// Whether the response payload carries real information.
pub fn has_meaningful_content(raw: &Value) -> bool {
    match StructuredResult::from_call_result(raw) {
        Some(StructuredResult::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return false;
            }
            if EMPTY_MARKERS
                .iter()
                .any(|marker| trimmed.eq_ignore_ascii_case(marker))
            {
                return false;
            }
            !trimmed.starts_with(ERROR_SENTINEL) && !trimmed.starts_with(FAILED_SENTINEL)
        }
        Some(StructuredResult::DataObject(data)) => {
            data.as_array().is_some_and(|items| !items.is_empty())
        }
        Some(StructuredResult::Object(map)) => {
            !map.is_empty() && map.values().any(value_carries_information)
        }
        Some(StructuredResult::List(items)) => !items.is_empty(),
        None => has_text_content(raw),
    }
}

fn value_carries_information(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Fallback for results without structured content: any generic `content`
/// entry that is a non-empty text item not announcing an error.
fn has_text_content(raw: &Value) -> bool {
    let Some(entries) = raw.get("content").and_then(Value::as_array) else {
        return false;
    };
    entries.iter().any(|entry| {
        entry.get("type").and_then(Value::as_str) == Some("text")
            && entry
                .get("text")
                .and_then(Value::as_str)
                .is_some_and(|text| {
                    !text.trim().is_empty() && !text.starts_with(ERROR_SENTINEL)
                })
    })
}

/// Content-quality verdict plus a failure reason. Runs after
/// `technical_success`; the reason strings here always describe content
/// problems, never transport ones.
pub fn validate_content(raw: &Value, expected: Option<&ExpectedResult>) -> (bool, Option<String>) {
    if !has_meaningful_content(raw) {
        return (false, Some("Empty or meaningless result".to_string()));
    }
    match expected {
        Some(ExpectedResult::ContentCheck {
            min_items,
            required_fields,
        }) => validate_content_check(raw, *min_items, required_fields),
        Some(ExpectedResult::DataStructure) | None => basic_validation(raw),
    }
}

fn validate_content_check(
    raw: &Value,
    min_items: usize,
    required_fields: &[String],
) -> (bool, Option<String>) {
    let Some(result) = raw.get("structuredContent").and_then(|sc| sc.get("result")) else {
        return (false, Some("Result has no structured content".to_string()));
    };
    let resolved = match result {
        Value::String(text) => match parse_loose_json(text) {
            Some(value) => value,
            None => {
                return (
                    false,
                    Some("Result string is not parseable as JSON".to_string()),
                )
            }
        },
        other => other.clone(),
    };
    let Some(object) = resolved.as_object() else {
        return (false, Some("Result is not a structured object".to_string()));
    };

    if let Some(data) = object.get("data").and_then(Value::as_array) {
        if data.len() < min_items {
            return (
                false,
                Some(format!(
                    "Expected at least {min_items} items, found {}",
                    data.len()
                )),
            );
        }
    }

    for field in required_fields {
        if !field_path_present(object, field) {
            return (false, Some(format!("Missing required field '{field}'")));
        }
    }

    (true, None)
}

/// Parses JSON, tolerating single-quoted payloads some servers emit.
fn parse_loose_json(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .or_else(|_| serde_json::from_str(&text.replace('\'', "\"")))
        .ok()
}

/// Resolves a dot path such as `a.b.c` by descending nested objects.
fn field_path_present(object: &Map<String, Value>, path: &str) -> bool {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return false;
    };
    let Some(mut current) = object.get(first) else {
        return false;
    };
    for segment in segments {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

/// Expectation-free validation: the structured result text must not carry a
/// failure indicator. The `failed` substring is known to be over-broad on
/// payloads like "3 tasks failed out of 10"; preserved as shipped.
fn basic_validation(raw: &Value) -> (bool, Option<String>) {
    let rendered = match raw.get("structuredContent").and_then(|sc| sc.get("result")) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let lowered = rendered.to_lowercase();
    for indicator in FAILURE_INDICATORS {
        if lowered.contains(indicator) {
            return (
                false,
                Some(format!(
                    "Result contains failure text: {}",
                    truncate_chars(&rendered, REASON_SNIPPET_CHARS)
                )),
            );
        }
    }
    (true, None)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_technical_success_is_false_on_transport_failure_regardless_of_payload() {
        assert!(!technical_success(false, &json!({"anything": 1})));
        assert!(!technical_success(false, &json!({"isError": false})));
    }

    #[test]
    fn unit_technical_success_requires_a_structured_object() {
        assert!(!technical_success(true, &json!("plain text")));
        assert!(!technical_success(true, &json!([1, 2])));
    }

    #[test]
    fn regression_missing_error_flag_counts_as_error() {
        assert!(!technical_success(true, &json!({"structuredContent": {"result": "ok"}})));
        assert!(technical_success(true, &json!({"isError": false})));
        assert!(!technical_success(true, &json!({"isError": true})));
    }

    #[test]
    fn functional_error_sentinel_fails_technical_success() {
        let raw = json!({
            "isError": false,
            "structuredContent": {"result": "Error: not found"},
        });
        assert!(!technical_success(true, &raw));
        assert_eq!(error_sentinel(&raw), Some("Error: not found"));
    }

    #[test]
    fn unit_meaningful_content_string_rules() {
        let with = |result: Value| json!({"structuredContent": {"result": result}});
        assert!(!has_meaningful_content(&with(json!(""))));
        assert!(!has_meaningful_content(&with(json!("   "))));
        assert!(!has_meaningful_content(&with(json!("none"))));
        assert!(!has_meaningful_content(&with(json!("NULL"))));
        assert!(!has_meaningful_content(&with(json!("Empty"))));
        assert!(!has_meaningful_content(&with(json!("Error: boom"))));
        assert!(!has_meaningful_content(&with(json!("Failed: no luck"))));
        assert!(has_meaningful_content(&with(json!("ok data"))));
    }

    #[test]
    fn unit_meaningful_content_data_object_rules() {
        assert!(!has_meaningful_content(
            &json!({"structuredContent": {"result": {"data": []}}})
        ));
        assert!(has_meaningful_content(
            &json!({"structuredContent": {"result": {"data": [1]}}})
        ));
        // `data` that is not a sequence carries nothing
        assert!(!has_meaningful_content(
            &json!({"structuredContent": {"result": {"data": "x"}}})
        ));
    }

    #[test]
    fn unit_meaningful_content_generic_object_and_list_rules() {
        assert!(!has_meaningful_content(
            &json!({"structuredContent": {"result": {"a": null, "b": "", "c": []}}})
        ));
        assert!(has_meaningful_content(
            &json!({"structuredContent": {"result": {"a": null, "b": "value"}}})
        ));
        assert!(!has_meaningful_content(&json!({"structuredContent": {"result": {}}})));
        assert!(!has_meaningful_content(&json!({"structuredContent": {"result": []}})));
        assert!(has_meaningful_content(
            &json!({"structuredContent": {"result": [1]}})
        ));
    }

    #[test]
    fn unit_meaningful_content_falls_back_to_content_entries() {
        assert!(has_meaningful_content(
            &json!({"content": [{"type": "text", "text": "found 3 results"}]})
        ));
        assert!(!has_meaningful_content(
            &json!({"content": [{"type": "text", "text": "Error: bad"}]})
        ));
        assert!(!has_meaningful_content(
            &json!({"content": [{"type": "image", "data": "..."}]})
        ));
        assert!(!has_meaningful_content(&json!({"isError": false})));
    }

    #[test]
    fn functional_validate_content_reports_meaningless_results() {
        let (ok, reason) = validate_content(&json!({"structuredContent": {"result": ""}}), None);
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Empty or meaningless result"));
    }

    #[test]
    fn functional_content_check_enforces_minimum_item_count() {
        let raw = json!({"structuredContent": {"result": {"data": [{"title": "cat1"}]}}});
        let expected = ExpectedResult::ContentCheck {
            min_items: 2,
            required_fields: vec![],
        };
        let (ok, reason) = validate_content(&raw, Some(&expected));
        assert!(!ok);
        assert!(reason.expect("reason").contains("at least 2"));

        let expected_one = ExpectedResult::ContentCheck {
            min_items: 1,
            required_fields: vec![],
        };
        let (ok, reason) = validate_content(&raw, Some(&expected_one));
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn functional_content_check_resolves_dot_path_fields() {
        let raw = json!({
            "structuredContent": {
                "result": {"data": [1], "meta": {"page": {"total": 3}}},
            },
        });
        let present = ExpectedResult::ContentCheck {
            min_items: 0,
            required_fields: vec!["meta.page.total".to_string()],
        };
        assert!(validate_content(&raw, Some(&present)).0);

        let absent = ExpectedResult::ContentCheck {
            min_items: 0,
            required_fields: vec!["meta.page.cursor".to_string()],
        };
        let (ok, reason) = validate_content(&raw, Some(&absent));
        assert!(!ok);
        assert!(reason.expect("reason").contains("meta.page.cursor"));
    }

    #[test]
    fn functional_content_check_parses_single_quoted_string_results() {
        let raw = json!({
            "structuredContent": {"result": "{'data': [{'title': 'cat1'}]}"},
        });
        let expected = ExpectedResult::ContentCheck {
            min_items: 1,
            required_fields: vec![],
        };
        assert!(validate_content(&raw, Some(&expected)).0);
    }

    #[test]
    fn unit_content_check_rejects_non_object_results() {
        let raw = json!({"structuredContent": {"result": [1, 2, 3]}});
        let expected = ExpectedResult::ContentCheck {
            min_items: 0,
            required_fields: vec![],
        };
        let (ok, reason) = validate_content(&raw, Some(&expected));
        assert!(!ok);
        assert!(reason.expect("reason").contains("not a structured object"));
    }

    #[test]
    fn functional_basic_validation_scans_for_failure_text() {
        // A leading "Failed:" already fails the meaningful-content gate
        let bad = json!({"structuredContent": {"result": "Failed: upstream 502"}});
        let (ok, reason) = validate_content(&bad, None);
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("Empty or meaningless result"));

        let embedded = json!({"structuredContent": {"result": "the lookup was invalid today"}});
        let (ok, reason) = validate_content(&embedded, None);
        assert!(!ok);
        assert!(reason.expect("reason").contains("invalid"));

        let good = json!({"structuredContent": {"result": "3 documents matched"}});
        let (ok, reason) = validate_content(&good, None);
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn regression_content_check_skips_the_failure_text_scan() {
        // With an explicit expectation the substring scan does not run, so
        // payloads that merely mention errors still pass.
        let raw = json!({
            "structuredContent": {"result": {"data": [{"status": "0 errors"}]}},
        });
        let expected = ExpectedResult::ContentCheck {
            min_items: 1,
            required_fields: vec![],
        };
        assert!(validate_content(&raw, Some(&expected)).0);
        assert!(!validate_content(&raw, None).0);
    }

    #[test]
    fn unit_data_structure_mode_defers_to_basic_validation() {
        let raw = json!({"structuredContent": {"result": "all good"}});
        assert!(validate_content(&raw, Some(&ExpectedResult::DataStructure)).0);
    }

    #[test]
    fn unit_reason_snippet_is_truncated() {
        let long = "x".repeat(300) + " invalid";
        let raw = json!({"structuredContent": {"result": long}});
        let (ok, reason) = validate_content(&raw, None);
        assert!(!ok);
        let reason = reason.expect("reason");
        assert!(reason.len() < 200);
        assert!(reason.ends_with("..."));
    }
}
