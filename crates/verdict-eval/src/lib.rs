//! Evaluation engine: case model, success classifier, case runner, and the
//! append-only record log with its summary views.

pub mod case;
pub mod classifier;
pub mod record;
pub mod runner;

pub use case::{load_cases, EvalCase, ExpectedResult};
pub use classifier::{
    error_sentinel, has_meaningful_content, technical_success, validate_content, StructuredResult,
};
pub use record::{render_summary, summarize, write_csv, EvalRecord, RecordLog, Summary};
pub use runner::{required_parameters_present, EvalConfig, Evaluator};
