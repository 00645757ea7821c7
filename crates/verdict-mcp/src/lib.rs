//! Stdio MCP client and tool catalog.
//!
//! Speaks newline-delimited JSON-RPC 2.0 to a child MCP server process and
//! keeps the per-run map of discovered tools plus its projection into the
//! model function-calling schema.

pub mod catalog;
pub mod stdio_client;

pub use catalog::ToolCatalog;
pub use stdio_client::{test_connection, McpError, StdioClient, DEFAULT_REQUEST_TIMEOUT};
