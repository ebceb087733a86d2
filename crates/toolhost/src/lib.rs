//! Tool host client library.
//!
//! A tool host is a long-lived child process that performs actions (browser
//! driven UI automation, for instance) on behalf of a model. This crate talks
//! to one over stdio using line-delimited JSON-RPC 2.0 with two methods:
//!
//! - `tools/list` returns the catalog as a list of [`ToolDescriptor`]s.
//! - `tools/call` takes `{name, arguments}` and returns either
//!   `{status: "ok", result}` or `{status: "error", message}`.
//!
//! # Example
//!
//! ```no_run
//! use toolhost::{Server, ServerConfig};
//! use std::collections::HashMap;
//!
//! # async fn example() -> toolhost::Result<()> {
//! let config = ServerConfig {
//!     name: "calendar".to_string(),
//!     command: "tp-tool-host".to_string(),
//!     args: vec!["--headless".to_string()],
//!     env: HashMap::new(),
//! };
//!
//! let mut server = Server::spawn(config).await?;
//!
//! for tool in server.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let arguments = serde_json::json!({ "date": "2025-03-14" });
//! let result = server
//!     .call_tool("click_calendar_date", arguments.as_object().cloned().unwrap_or_default())
//!     .await?;
//! println!("{result:?}");
//!
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod server;

pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    METHOD_CALL_TOOL, METHOD_LIST_TOOLS, ParameterSpec, RequestId, ToolDescriptor,
};
pub use server::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, Server, ServerConfig};
