use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use verdict_ai::LlmClient;
use verdict_mcp::{StdioClient, ToolCatalog};

use crate::case::EvalCase;
use crate::classifier::{error_sentinel, technical_success, validate_content};
use crate::record::{EvalRecord, RecordLog};

#[derive(Debug, Clone)]
/// Run-level settings, built once at the boundary and passed down.
pub struct EvalConfig {
    /// Command used to start the MCP server (single string or pre-split).
    pub mcp_command: Vec<String>,
    /// Per-request transport timeout.
    pub request_timeout: Duration,
    /// Destination of the append-only record log.
    pub log_path: PathBuf,
}

/// Drives one evaluation case at a time: fresh transport, fresh catalog,
/// one model call, at most one tool call, classified verdicts, one logged
/// record. A case's failure never aborts the run.
pub struct Evaluator<'a> {
    llm: &'a dyn LlmClient,
    config: EvalConfig,
    log: RecordLog,
    catalog: ToolCatalog,
}

impl<'a> Evaluator<'a> {
    pub fn new(llm: &'a dyn LlmClient, config: EvalConfig) -> Result<Self> {
        let log = RecordLog::open(config.log_path.clone())?;
        Ok(Self {
            llm,
            config,
            log,
            catalog: ToolCatalog::new(),
        })
    }

    /// Evaluates one case and appends the outcome to the log. Always returns
    /// a record; failures along the way land in `error_message`.
    pub fn evaluate_case(&mut self, case: &EvalCase) -> EvalRecord {
        let started = Instant::now();
        let mut record = EvalRecord {
            case_id: case.case_id.clone(),
            prompt: case.prompt.clone(),
            expected_tools: case.expected_tools.clone(),
            expected_parameters: case.expected_parameters.clone(),
            expected_result: case.expected_result.clone(),
            chosen_tool: None,
            tool_args: None,
            selection_correct: false,
            parameter_correct: false,
            technical_success: false,
            call_success: false,
            error_message: None,
            call_result: None,
            timestamp: Utc::now().to_rfc3339(),
            duration_ms: 0,
        };

        self.run_case(case, &mut record);

        record.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(error) = self.log.append(&record) {
            warn!("failed to log result for case {}: {error:#}", record.case_id);
        }
        record
    }

    /// The per-case state sequence. Any structured failure short-circuits
    /// with a partial record; the transport is torn down when `client` drops
    /// on every path out of here.
    fn run_case(&mut self, case: &EvalCase, record: &mut EvalRecord) {
        let mut client = StdioClient::new(self.config.mcp_command.clone())
            .with_timeout(self.config.request_timeout);

        if let Err(error) = client.initialize() {
            record.error_message = Some(format!("Failed to initialize MCP client: {error}"));
            return;
        }

        let tools = match client.list_tools() {
            Ok(tools) => tools,
            Err(error) => {
                record.error_message =
                    Some(format!("Failed to list tools from MCP server: {error}"));
                return;
            }
        };

        // The server may be restarted or reconfigured between cases, so the
        // catalog is rebuilt from scratch every time.
        self.catalog.clear();
        self.catalog.register(&tools);
        let model_schema = self.catalog.to_model_schema();

        let reply = match self.llm.complete(&case.prompt, &model_schema) {
            Ok(reply) => reply,
            Err(error) => {
                record.error_message = Some(format!("LLM error: {error}"));
                return;
            }
        };

        // No tool call is the measured outcome, not a fault: selection and
        // call verdicts stay false and no error message is recorded.
        let Some(chosen) = reply.tool_calls.first() else {
            return;
        };

        record.chosen_tool = Some(chosen.name.clone());
        record.tool_args = Some(chosen.arguments.clone());
        record.selection_correct = case.expected_tools.iter().any(|tool| *tool == chosen.name);
        record.parameter_correct =
            required_parameters_present(&chosen.arguments, &case.expected_parameters);

        match client.call_tool(&chosen.name, &chosen.arguments) {
            Ok(raw) => {
                record.technical_success = technical_success(true, &raw);
                if record.technical_success {
                    let (content_valid, reason) =
                        validate_content(&raw, case.expected_result.as_ref());
                    record.call_success = content_valid;
                    if !content_valid {
                        record.error_message = reason;
                    }
                } else if let Some(sentinel) = error_sentinel(&raw) {
                    record.error_message = Some(sentinel.to_string());
                }
                record.call_result = Some(raw);
            }
            Err(error) => {
                record.error_message = Some(format!("Tool call failed: {error}"));
            }
        }
    }
}

/// Checks the model's arguments against the case expectation map: every
/// parameter marked `"required"` must be present, non-null, and non-blank.
/// An empty expectation map is trivially correct.
pub fn required_parameters_present(
    arguments: &Value,
    expected: &BTreeMap<String, String>,
) -> bool {
    if expected.is_empty() {
        return true;
    }
    for (name, requirement) in expected {
        if requirement != "required" {
            continue;
        }
        let Some(value) = arguments.as_object().and_then(|map| map.get(name)) else {
            return false;
        };
        if value.is_null() {
            return false;
        }
        if value.as_str().is_some_and(|text| text.trim().is_empty()) {
            return false;
        }
    }
    true
}
