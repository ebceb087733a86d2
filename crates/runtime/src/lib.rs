//! Tiller runtime: a tool-calling conversation orchestrator.
//!
//! A language model converses with a user and may ask for tools to be run on
//! a stateful tool host. This crate owns that loop.
//!
//! # Overview
//!
//! - **Catalog**: the host's declared tools, translated into the model's
//!   calling convention, and the checks a model's call must pass before it
//!   reaches the host.
//! - **ToolExecutionClient**: opens a [`Session`] to the host and runs calls
//!   on it one at a time with a deadline.
//! - **classify**: turns every failure on the tool path into an [`ErrorKind`]
//!   the model can read. Only [`ErrorKind::TransportLost`] ends a run.
//! - **Orchestrator**: alternates model calls and tool batches until the model
//!   answers, the iteration budget runs out, or something fatal happens.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{
//!     AnthropicAuth, AnthropicBackend, Orchestrator, OrchestratorConfig, Outcome,
//!     StdioConnector, ToolExecutionClient,
//! };
//! use toolhost::ServerConfig;
//!
//! # async fn example() {
//! let backend = AnthropicBackend::builder(
//!     AnthropicAuth::ApiKey("sk-ant-api01-...".into()),
//!     "claude-sonnet-4-20250514",
//! )
//! .build();
//! let connector = StdioConnector::new(ServerConfig {
//!     name: "calendar".into(),
//!     command: "calendar-host".into(),
//!     ..Default::default()
//! });
//! let orchestrator = Orchestrator::new(
//!     backend,
//!     ToolExecutionClient::new(connector),
//!     OrchestratorConfig::default(),
//! );
//!
//! let run = orchestrator
//!     .run_scoped("You manage my calendar.", "What's on today?")
//!     .await;
//! match run.outcome {
//!     Outcome::Answer(text) => println!("{text}"),
//!     Outcome::TruncatedAnswer(text) => println!("(partial) {text}"),
//!     Outcome::FatalError(err) => eprintln!("failed: {err}"),
//! }
//! # }
//! ```

pub mod catalog;
pub mod classify;
pub mod client;
pub mod conversation;
mod error;
mod journal;
pub mod model;
mod orchestrator;
pub mod providers;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, CatalogError, MalformedCall};
pub use classify::{ErrorKind, Fault, ToolError, classify};
pub use client::{Connector, HostTransport, Session, StdioConnector, ToolExecutionClient};
pub use conversation::{Conversation, ToolInvocationResult, Turn};
pub use error::{Error, Result};
pub use journal::Journal;
pub use model::{Backend, ModelError, ModelReply};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Outcome, Run, RunStats};
pub use providers::{AnthropicAuth, AnthropicBackend, OpenAiBackend, Provider};
