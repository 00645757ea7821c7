use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::case::ExpectedResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One persisted evaluation outcome. Written once per case, never mutated.
pub struct EvalRecord {
    pub case_id: String,
    pub prompt: String,
    pub expected_tools: Vec<String>,
    pub expected_parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<ExpectedResult>,
    /// `None` means the model produced no tool call at all.
    pub chosen_tool: Option<String>,
    pub tool_args: Option<Value>,
    pub selection_correct: bool,
    pub parameter_correct: bool,
    pub technical_success: bool,
    pub call_success: bool,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_result: Option<Value>,
    pub timestamp: String,
    pub duration_ms: u64,
}

/// Append-only JSONL sink for evaluation records. Single writer; every
/// append is flushed so a crashed run keeps its completed cases.
#[derive(Clone)]
pub struct RecordLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl RecordLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EvalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to encode record")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("record log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
/// Aggregate view over a record log, derived read-only.
pub struct Summary {
    pub total_cases: usize,
    pub correct_selections: usize,
    pub successful_calls: usize,
    pub correct_parameters: usize,
    pub selection_accuracy: f64,
    pub call_success_rate: f64,
    pub parameter_accuracy: f64,
    pub records: Vec<EvalRecord>,
}

/// Reads a record log and computes summary statistics.
pub fn summarize(log_path: &Path) -> Result<Summary> {
    let raw = std::fs::read_to_string(log_path)
        .with_context(|| format!("log file not found: {}", log_path.display()))?;

    let mut records = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str::<EvalRecord>(trimmed)
            .with_context(|| format!("invalid record on line {}", index + 1))?;
        records.push(record);
    }

    let total_cases = records.len();
    let correct_selections = records.iter().filter(|r| r.selection_correct).count();
    let successful_calls = records.iter().filter(|r| r.call_success).count();
    let correct_parameters = records.iter().filter(|r| r.parameter_correct).count();
    let ratio = |count: usize| {
        if total_cases == 0 {
            0.0
        } else {
            count as f64 / total_cases as f64
        }
    };

    Ok(Summary {
        total_cases,
        correct_selections,
        successful_calls,
        correct_parameters,
        selection_accuracy: ratio(correct_selections),
        call_success_rate: ratio(successful_calls),
        parameter_accuracy: ratio(correct_parameters),
        records,
    })
}

/// Renders the human-readable report: headline ratios plus drill-down lists
/// of failed selections, calls, and parameter validations.
pub fn render_summary(summary: &Summary) -> String {
    let percent = |ratio: f64| format!("{:.2}%", ratio * 100.0);
    let mut lines = vec![
        "=== MCP Evaluation Summary ===".to_string(),
        format!("total cases: {}", summary.total_cases),
        format!(
            "tool selection accuracy: {} ({}/{})",
            percent(summary.selection_accuracy),
            summary.correct_selections,
            summary.total_cases
        ),
        format!(
            "tool call success rate: {} ({}/{})",
            percent(summary.call_success_rate),
            summary.successful_calls,
            summary.total_cases
        ),
        format!(
            "parameter accuracy: {} ({}/{})",
            percent(summary.parameter_accuracy),
            summary.correct_parameters,
            summary.total_cases
        ),
    ];

    let failed_selections: Vec<&EvalRecord> = summary
        .records
        .iter()
        .filter(|r| !r.selection_correct)
        .collect();
    if !failed_selections.is_empty() {
        lines.push(String::new());
        lines.push("failed tool selections:".to_string());
        for record in failed_selections {
            lines.push(format!(
                "  case {}: expected [{}], chose '{}'",
                record.case_id,
                record.expected_tools.join(", "),
                record.chosen_tool.as_deref().unwrap_or("None"),
            ));
        }
    }

    let failed_calls: Vec<&EvalRecord> =
        summary.records.iter().filter(|r| !r.call_success).collect();
    if !failed_calls.is_empty() {
        lines.push(String::new());
        lines.push("failed tool calls:".to_string());
        for record in failed_calls {
            lines.push(format!(
                "  case {}: {} - {}",
                record.case_id,
                record.chosen_tool.as_deref().unwrap_or("unknown"),
                record.error_message.as_deref().unwrap_or("Unknown error"),
            ));
        }
    }

    let failed_parameters: Vec<&EvalRecord> = summary
        .records
        .iter()
        .filter(|r| !r.parameter_correct)
        .collect();
    if !failed_parameters.is_empty() {
        lines.push(String::new());
        lines.push("failed parameter validation:".to_string());
        for record in failed_parameters {
            let missing: Vec<&str> = record
                .expected_parameters
                .iter()
                .filter(|(name, requirement)| {
                    requirement.as_str() == "required"
                        && !record
                            .tool_args
                            .as_ref()
                            .and_then(Value::as_object)
                            .is_some_and(|args| args.contains_key(name.as_str()))
                })
                .map(|(name, _)| name.as_str())
                .collect();
            lines.push(format!(
                "  case {}: {} - missing required parameters: [{}]",
                record.case_id,
                record.chosen_tool.as_deref().unwrap_or("unknown"),
                missing.join(", "),
            ));
        }
    }

    lines.join("\n")
}

const CSV_COLUMNS: [&str; 11] = [
    "case_id",
    "prompt",
    "expected_tools",
    "expected_parameters",
    "chosen_tool",
    "selection_correct",
    "call_success",
    "parameter_correct",
    "error_message",
    "timestamp",
    "duration_ms",
];

/// Writes the detailed per-case table. List fields are flattened to
/// comma-delimited strings, map fields to embedded JSON.
pub fn write_csv(summary: &Summary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    writeln!(file, "{}", CSV_COLUMNS.join(","))?;

    for record in &summary.records {
        let expected_parameters = serde_json::to_string(&record.expected_parameters)
            .context("failed to encode expected parameters")?;
        let row = [
            record.case_id.clone(),
            record.prompt.clone(),
            record.expected_tools.join(","),
            expected_parameters,
            record.chosen_tool.clone().unwrap_or_default(),
            record.selection_correct.to_string(),
            record.call_success.to_string(),
            record.parameter_correct.to_string(),
            record.error_message.clone().unwrap_or_default(),
            record.timestamp.clone(),
            record.duration_ms.to_string(),
        ];
        let encoded: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        writeln!(file, "{}", encoded.join(","))?;
    }
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

/// Quotes a field when it contains a delimiter, quote, or newline; embedded
/// quotes are doubled.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
