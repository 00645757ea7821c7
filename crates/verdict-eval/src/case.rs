use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Optional expectation against the tool-call result payload.
pub enum ExpectedResult {
    /// Structured-content check: a minimum `data` item count plus dot-path
    /// addressed fields that must be present.
    ContentCheck {
        #[serde(default)]
        min_items: usize,
        #[serde(default)]
        required_fields: Vec<String>,
    },
    /// Reserved mode; currently validated the same way as no expectation.
    DataStructure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One evaluation case as loaded from the case file. Immutable once loaded.
pub struct EvalCase {
    #[serde(default)]
    pub case_id: String,
    #[serde(default)]
    pub prompt: String,
    /// Any one of these tool names counts as a correct selection.
    #[serde(default)]
    pub expected_tools: Vec<String>,
    /// Parameter name -> requirement level (only `"required"` is enforced).
    #[serde(default)]
    pub expected_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub expected_result: Option<ExpectedResult>,
}

/// Loads cases from a JSONL file. Blank lines are skipped; invalid lines are
/// logged and skipped rather than aborting the run. Cases without an id get
/// `case_<line>`.
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read case file {}", path.display()))?;

    let mut cases = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<EvalCase>(trimmed) {
            Ok(mut case) => {
                if case.case_id.trim().is_empty() {
                    case.case_id = format!("case_{line_number}");
                }
                cases.push(case);
            }
            Err(error) => {
                warn!("skipping invalid case on line {line_number}: {error}");
            }
        }
    }
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn functional_loader_assigns_line_ids_and_skips_bad_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cases.jsonl");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, r#"{{"prompt": "search for cats", "expected_tools": ["search"]}}"#)
            .expect("write");
        writeln!(file).expect("write");
        writeln!(file, "not json at all").expect("write");
        writeln!(
            file,
            r#"{{"case_id": "named", "prompt": "look up weather", "expected_parameters": {{"city": "required"}}}}"#
        )
        .expect("write");

        let cases = load_cases(&path).expect("load");
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].case_id, "case_1");
        assert_eq!(cases[0].expected_tools, vec!["search"]);
        assert_eq!(cases[1].case_id, "named");
        assert_eq!(
            cases[1].expected_parameters.get("city").map(String::as_str),
            Some("required")
        );
    }

    #[test]
    fn unit_expected_result_parses_tagged_variants() {
        let case: EvalCase = serde_json::from_str(
            r#"{
                "prompt": "fetch items",
                "expected_result": {
                    "type": "content_check",
                    "min_items": 2,
                    "required_fields": ["data.title"]
                }
            }"#,
        )
        .expect("parse");
        assert_eq!(
            case.expected_result,
            Some(ExpectedResult::ContentCheck {
                min_items: 2,
                required_fields: vec!["data.title".to_string()],
            })
        );

        let basic: EvalCase = serde_json::from_str(
            r#"{"prompt": "x", "expected_result": {"type": "data_structure"}}"#,
        )
        .expect("parse");
        assert_eq!(basic.expected_result, Some(ExpectedResult::DataStructure));
    }

    #[test]
    fn unit_loader_fails_on_missing_file() {
        assert!(load_cases(Path::new("/nonexistent/cases.jsonl")).is_err());
    }
}
