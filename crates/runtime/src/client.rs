//! Session lifecycle and serialized invocation against the tool host.
//!
//! The host drives one stateful UI, so a [`Session`] admits a single
//! invocation at a time. Callers that race on the same session queue on its
//! lock, and the time spent queued counts against the invocation deadline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use toolhost::{CallToolResult, Server, ServerConfig, ToolDescriptor};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::classify::{Fault, classify};
use crate::conversation::ToolInvocationResult;
use crate::{Error, Result};

/// A live connection to a tool host.
pub trait HostTransport: Send {
    fn list_tools(&mut self)
    -> impl Future<Output = toolhost::Result<Vec<ToolDescriptor>>> + Send;

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = toolhost::Result<CallToolResult>> + Send;

    fn shutdown(&mut self) -> impl Future<Output = toolhost::Result<()>> + Send;
}

impl HostTransport for Server {
    fn list_tools(
        &mut self,
    ) -> impl Future<Output = toolhost::Result<Vec<ToolDescriptor>>> + Send {
        Server::list_tools(self)
    }

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = toolhost::Result<CallToolResult>> + Send {
        Server::call_tool(self, name, arguments)
    }

    fn shutdown(&mut self) -> impl Future<Output = toolhost::Result<()>> + Send {
        Server::shutdown(self)
    }
}

/// Establishes transports to a tool host.
pub trait Connector: Send + Sync {
    type Transport: HostTransport;

    fn connect(&self) -> impl Future<Output = toolhost::Result<Self::Transport>> + Send;
}

/// Spawns the host as a child process and talks to it over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    config: ServerConfig,
}

impl StdioConnector {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl Connector for StdioConnector {
    type Transport = Server;

    fn connect(&self) -> impl Future<Output = toolhost::Result<Server>> + Send {
        Server::spawn(self.config.clone())
    }
}

/// One open connection to the host plus the catalog it declared.
pub struct Session<T> {
    id: Uuid,
    catalog: Arc<Catalog>,
    transport: Mutex<Option<T>>,
    closed: AtomicBool,
}

impl<T> Session<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The catalog fetched when the session was opened.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether an invocation currently holds the session.
    pub fn is_busy(&self) -> bool {
        self.transport.try_lock().is_err()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("tools", &self.catalog.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens sessions and runs tool calls on them.
#[derive(Debug, Clone)]
pub struct ToolExecutionClient<C> {
    connector: C,
}

impl<C: Connector> ToolExecutionClient<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// Connect to the host and fetch its catalog.
    ///
    /// The catalog is read once here and cached on the session. A host that
    /// cannot be reached or declares an invalid catalog is shut down again.
    pub async fn open(&self) -> Result<Session<C::Transport>> {
        let mut transport = self
            .connector
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let catalog = match transport.list_tools().await {
            Ok(tools) => Catalog::new(tools).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let catalog = match catalog {
            Ok(catalog) => catalog,
            Err(reason) => {
                if let Err(e) = transport.shutdown().await {
                    warn!(error = %e, "failed to shut down rejected tool host");
                }
                return Err(Error::Connection(reason));
            }
        };

        let session = Session {
            id: Uuid::new_v4(),
            catalog: Arc::new(catalog),
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
        };
        info!(session = %session.id, tools = session.catalog.len(), "tool session opened");
        Ok(session)
    }

    /// Run one tool call with a deadline.
    ///
    /// Failures come back classified inside the result, never as `Err`.
    pub async fn invoke(
        &self,
        session: &Session<C::Transport>,
        name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> ToolInvocationResult {
        debug!(session = %session.id, tool = name, "invoking tool");
        let outcome = match tokio::time::timeout(timeout, call(session, name, arguments)).await {
            Ok(Ok(CallToolResult::Ok { result })) => Ok(result),
            Ok(Ok(CallToolResult::Error { message })) => Err(Fault::HostReported {
                tool: name.to_string(),
                message,
            }),
            Ok(Err(fault)) => Err(fault),
            Err(_) => Err(Fault::Deadline {
                tool: name.to_string(),
                after: timeout,
            }),
        };

        match outcome {
            Ok(payload) => ToolInvocationResult::Ok { payload },
            Err(fault) => {
                let error = classify(fault);
                warn!(session = %session.id, tool = name, kind = %error.kind, "tool call failed: {}", error.message);
                ToolInvocationResult::Error(error)
            }
        }
    }

    /// Release the session's transport.
    ///
    /// Returns `true` for the call that actually closed it; later calls are
    /// no-ops.
    pub async fn close(&self, session: &Session<C::Transport>) -> bool {
        if session.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let transport = session.transport.lock().await.take();
        if let Some(mut transport) = transport
            && let Err(e) = transport.shutdown().await
        {
            warn!(session = %session.id, error = %e, "tool host shutdown failed");
        }
        info!(session = %session.id, "tool session closed");
        true
    }
}

async fn call<T: HostTransport>(
    session: &Session<T>,
    name: &str,
    arguments: Map<String, Value>,
) -> std::result::Result<CallToolResult, Fault> {
    if session.is_closed() {
        return Err(toolhost::Error::Closed.into());
    }
    let mut transport = session.transport.lock().await;
    let transport = transport.as_mut().ok_or(toolhost::Error::Closed)?;
    Ok(transport.call_tool(name, arguments).await?)
}
