//! `verdict` binary: evaluate model tool selection against an MCP server,
//! summarize past runs, or probe server connectivity.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use verdict_ai::{OpenAiClient, OpenAiConfig};
use verdict_eval::{load_cases, render_summary, summarize, write_csv, EvalConfig, Evaluator};
use verdict_mcp::test_connection;

#[derive(Debug, Parser)]
#[command(name = "verdict", about = "MCP tool-call evaluation harness", version)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run evaluation cases against an MCP server
    Evaluate(EvaluateArgs),
    /// Summarize an evaluation log
    Summarize(SummarizeArgs),
    /// Check that an MCP server responds over stdio
    TestConnection(TestConnectionArgs),
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[arg(long, help = "Path to the JSONL test case file")]
    cases: PathBuf,

    #[arg(long, default_value = "out/eval.jsonl", help = "Output log file")]
    log: PathBuf,

    /// Pass either a pre-split argument list (last on the command line) or
    /// one quoted string; quoted strings are tokenized before spawning.
    #[arg(
        long = "mcp-command",
        num_args = 1..,
        required = true,
        allow_hyphen_values = true,
        help = "Command used to start the MCP server"
    )]
    mcp_command: Vec<String>,

    #[arg(
        long,
        env = "VERDICT_LLM_BASE_URL",
        default_value = "https://api.openai.com/v1",
        help = "Base URL for the OpenAI-compatible LLM API"
    )]
    llm_base_url: String,

    #[arg(
        long,
        env = "VERDICT_LLM_API_KEY",
        hide_env_values = true,
        help = "API key for the LLM endpoint"
    )]
    llm_api_key: String,

    #[arg(
        long,
        env = "VERDICT_LLM_MODEL",
        default_value = "gpt-4o-mini",
        help = "Model name used for generation"
    )]
    llm_model: String,

    #[arg(long, default_value_t = 30, help = "Per-request MCP timeout in seconds")]
    mcp_timeout_secs: u64,

    #[arg(long, default_value_t = 1000, help = "Maximum tokens per model reply")]
    max_tokens: u32,

    #[arg(long, default_value_t = 0.1, help = "Model sampling temperature")]
    temperature: f32,
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    /// Path to an evaluation log file
    log_file: PathBuf,

    #[arg(long, help = "Write the detailed per-case CSV to this path")]
    csv: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TestConnectionArgs {
    /// Command used to start the MCP server
    #[arg(
        num_args = 1..,
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    mcp_command: Vec<String>,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        CliCommand::Evaluate(args) => run_evaluate(args).map(|()| ExitCode::SUCCESS),
        CliCommand::Summarize(args) => run_summarize(args).map(|()| ExitCode::SUCCESS),
        CliCommand::TestConnection(args) => Ok(run_test_connection(args)),
    };

    match outcome {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let cases = load_cases(&args.cases)?;
    if cases.is_empty() {
        bail!("no valid test cases found in {}", args.cases.display());
    }
    println!("loaded {} test case(s) from {}", cases.len(), args.cases.display());

    let llm = OpenAiClient::new(OpenAiConfig {
        api_base: args.llm_base_url,
        api_key: args.llm_api_key,
        model: args.llm_model,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        ..OpenAiConfig::default()
    })
    .context("failed to initialize LLM client")?;

    let mut evaluator = Evaluator::new(
        &llm,
        EvalConfig {
            mcp_command: args.mcp_command.clone(),
            request_timeout: Duration::from_secs(args.mcp_timeout_secs),
            log_path: args.log.clone(),
        },
    )?;

    println!("starting evaluation with MCP command: {}", args.mcp_command.join(" "));
    println!("results will be logged to: {}", args.log.display());
    println!();

    let total = cases.len();
    let mut completed = 0usize;
    for (index, case) in cases.iter().enumerate() {
        println!("[{}/{}] evaluating case: {}", index + 1, total, case.case_id);
        let record = evaluator.evaluate_case(case);

        if let Some(error) = &record.error_message {
            println!("  error: {error}");
        } else {
            let mark = |flag: bool| if flag { "ok" } else { "MISS" };
            println!(
                "  tool selection: {} (chose: {})",
                mark(record.selection_correct),
                record.chosen_tool.as_deref().unwrap_or("None"),
            );
            println!("  tool call: {}", mark(record.call_success));
            println!("  parameter validation: {}", mark(record.parameter_correct));
            completed += 1;
        }
        println!();
    }

    println!("evaluation completed: {completed}/{total} case(s) ran cleanly");
    println!("detailed results logged to: {}", args.log.display());
    Ok(())
}

fn run_summarize(args: SummarizeArgs) -> Result<()> {
    let summary = summarize(&args.log_file)?;
    println!("{}", render_summary(&summary));
    if let Some(csv_path) = args.csv {
        write_csv(&summary, &csv_path)?;
        println!();
        println!("detailed CSV report saved to: {}", csv_path.display());
    }
    Ok(())
}

fn run_test_connection(args: TestConnectionArgs) -> ExitCode {
    match test_connection(&args.mcp_command) {
        Ok(count) => {
            println!("MCP server connection successful ({count} tool(s))");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("MCP server connection failed: {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_cli_parses_evaluate_arguments() {
        let cli = Cli::parse_from([
            "verdict",
            "evaluate",
            "--cases",
            "cases.jsonl",
            "--llm-api-key",
            "k",
            "--mcp-command",
            "python",
            "-m",
            "demo_server",
        ]);
        let CliCommand::Evaluate(args) = cli.command else {
            panic!("expected evaluate subcommand");
        };
        assert_eq!(args.cases, PathBuf::from("cases.jsonl"));
        assert_eq!(args.mcp_command, vec!["python", "-m", "demo_server"]);
        assert_eq!(args.log, PathBuf::from("out/eval.jsonl"));
        assert_eq!(args.mcp_timeout_secs, 30);
    }

    #[test]
    fn unit_cli_parses_summarize_and_test_connection() {
        let cli = Cli::parse_from(["verdict", "summarize", "out/eval.jsonl", "--csv", "out.csv"]);
        let CliCommand::Summarize(args) = cli.command else {
            panic!("expected summarize subcommand");
        };
        assert_eq!(args.csv, Some(PathBuf::from("out.csv")));

        let cli = Cli::parse_from(["verdict", "test-connection", "./server", "--flag"]);
        let CliCommand::TestConnection(args) = cli.command else {
            panic!("expected test-connection subcommand");
        };
        assert_eq!(args.mcp_command, vec!["./server", "--flag"]);
    }
}
