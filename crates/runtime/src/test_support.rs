//! Scripted model and tool host doubles.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value, json};
use toolhost::{CallToolResult, ParameterSpec, ToolDescriptor};

use crate::client::{Connector, HostTransport};
use crate::model::{
    Backend, Message, ModelError, ModelReply, ModelRequest, ModelResponse, ToolCall, ToolSpec,
    Usage,
};

/// Replays canned model responses in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<(Vec<Message>, Vec<ToolSpec>)>>,
}

impl ScriptedBackend {
    pub(crate) fn new(script: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
        }
    }

    /// Messages sent on each call so far.
    pub(crate) fn requests(&self) -> Vec<(Vec<Message>, Vec<ToolSpec>)> {
        lock(&self.requests).clone()
    }
}

impl Backend for ScriptedBackend {
    fn call(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send {
        lock(&self.requests).push((request.messages.to_vec(), request.tools.to_vec()));
        let next = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Api("script exhausted".into())));
        async move { next }
    }
}

pub(crate) fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
    }
}

pub(crate) fn text(reply: &str) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        reply: ModelReply::Text(reply.into()),
        usage: usage(),
    })
}

pub(crate) fn tool_request(
    preamble: Option<&str>,
    calls: Vec<ToolCall>,
) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse {
        reply: ModelReply::ToolRequest {
            text: preamble.map(String::from),
            calls,
        },
        usage: usage(),
    })
}

pub(crate) fn call(id: &str, name: &str, input: Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        input,
    }
}

/// `echo(text: string, required)`.
pub(crate) fn echo_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "echo".into(),
        description: "Repeat the given text".into(),
        parameters: [(
            "text".to_string(),
            ParameterSpec {
                kind: "string".into(),
                required: true,
                description: Some("text to repeat".into()),
            },
        )]
        .into(),
    }
}

/// How the fake host answers a tool.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Return the `text` argument.
    Echo,
    Reply(Value),
    /// Answer with `status: "error"`.
    Fail(String),
    /// Never answer.
    Hang,
    /// The connection dies mid-call.
    Drop,
    /// Echo after a delay.
    Delay(Duration),
}

#[derive(Debug, Default)]
pub(crate) struct HostState {
    /// `start:<tool>` and `end:<tool>` in the order they happened.
    pub events: Vec<String>,
    pub calls: Vec<(String, Map<String, Value>)>,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub shutdowns: usize,
    pub catalog_fetches: usize,
    dead: bool,
}

/// In-process tool host sharing state with the test that built it.
#[derive(Clone)]
pub(crate) struct FakeHost {
    tools: Vec<ToolDescriptor>,
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub(crate) fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            behaviors: Arc::default(),
            state: Arc::default(),
        }
    }

    pub(crate) fn set(&self, tool: &str, behavior: Behavior) {
        lock(&self.behaviors).insert(tool.to_string(), behavior);
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, HostState> {
        lock(&self.state)
    }
}

/// Marks a call finished when dropped, including when it is cancelled.
struct InFlight {
    tool: String,
    state: Arc<Mutex<HostState>>,
}

impl InFlight {
    fn start(tool: &str, arguments: &Map<String, Value>, state: &Arc<Mutex<HostState>>) -> Self {
        let mut s = lock(state);
        s.events.push(format!("start:{tool}"));
        s.calls.push((tool.to_string(), arguments.clone()));
        s.in_flight += 1;
        s.max_in_flight = s.max_in_flight.max(s.in_flight);
        Self {
            tool: tool.to_string(),
            state: Arc::clone(state),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut s = lock(&self.state);
        s.in_flight -= 1;
        s.events.push(format!("end:{}", self.tool));
    }
}

impl HostTransport for FakeHost {
    fn list_tools(
        &mut self,
    ) -> impl Future<Output = toolhost::Result<Vec<ToolDescriptor>>> + Send {
        lock(&self.state).catalog_fetches += 1;
        let tools = self.tools.clone();
        async move { Ok(tools) }
    }

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = toolhost::Result<CallToolResult>> + Send {
        let behavior = lock(&self.behaviors)
            .get(name)
            .cloned()
            .unwrap_or(Behavior::Echo);
        let state = Arc::clone(&self.state);
        let name = name.to_string();

        async move {
            if lock(&state).dead {
                return Err(toolhost::Error::Closed);
            }
            let _in_flight = InFlight::start(&name, &arguments, &state);
            let echo = || CallToolResult::Ok {
                result: arguments.get("text").cloned().unwrap_or(json!(null)),
            };
            match behavior {
                Behavior::Echo => Ok(echo()),
                Behavior::Reply(result) => Ok(CallToolResult::Ok { result }),
                Behavior::Fail(message) => Ok(CallToolResult::Error { message }),
                Behavior::Hang => std::future::pending().await,
                Behavior::Drop => {
                    lock(&state).dead = true;
                    Err(toolhost::Error::ServerExited)
                }
                Behavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(echo())
                }
            }
        }
    }

    fn shutdown(&mut self) -> impl Future<Output = toolhost::Result<()>> + Send {
        let mut state = lock(&self.state);
        state.shutdowns += 1;
        state.dead = true;
        async { Ok(()) }
    }
}

/// Hands out clones of one [`FakeHost`], or fails to connect.
pub(crate) struct FakeConnector {
    host: Option<FakeHost>,
}

impl FakeConnector {
    pub(crate) fn new(host: FakeHost) -> Self {
        Self { host: Some(host) }
    }

    pub(crate) fn unreachable() -> Self {
        Self { host: None }
    }
}

impl Connector for FakeConnector {
    type Transport = FakeHost;

    fn connect(&self) -> impl Future<Output = toolhost::Result<FakeHost>> + Send {
        let host = self.host.clone().ok_or_else(|| {
            toolhost::Error::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such host",
            ))
        });
        async move { host }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
