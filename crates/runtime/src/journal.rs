//! Audit trail of orchestration runs in the event log.

use std::sync::Mutex;

use serde_json::json;
use storage::{ConversationId, Event, EventKind, EventStore, Role};
use tracing::warn;

use crate::conversation::{ToolInvocationResult, Turn};
use crate::model::ToolCall;
use crate::orchestrator::{Outcome, RunStats};

/// Records one conversation's turns and run outcomes.
///
/// Write failures are logged and otherwise ignored so that a broken log
/// never takes a run down with it.
pub struct Journal {
    store: Mutex<EventStore>,
    conversation_id: ConversationId,
}

impl Journal {
    /// Begin a new conversation in `store`.
    pub fn start(store: EventStore) -> storage::Result<Self> {
        let conversation_id = ConversationId::new();
        store.append(&Event::new(conversation_id, EventKind::ConversationStart))?;
        Ok(Self {
            store: Mutex::new(store),
            conversation_id,
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Mark the conversation finished.
    pub fn finish(&self) {
        self.append(EventKind::ConversationEnd);
    }

    pub(crate) fn record_turns(&self, turns: &[Turn]) {
        for turn in turns {
            match turn {
                Turn::System { text } => self.message(Role::System, text),
                Turn::User { text } => self.message(Role::User, text),
                Turn::AssistantText { text } => self.message(Role::Assistant, text),
                Turn::AssistantToolRequest { text, calls } => {
                    if let Some(text) = text {
                        self.message(Role::Assistant, text);
                    }
                    for call in calls {
                        self.append(EventKind::ToolCall {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.input.clone(),
                        });
                    }
                }
                Turn::ToolResult {
                    call_id,
                    tool,
                    result,
                } => {
                    let (output, error_kind) = match result {
                        ToolInvocationResult::Ok { payload } => (payload.clone(), None),
                        ToolInvocationResult::Error(err) => (
                            json!({ "message": err.message }),
                            Some(err.kind.as_str().to_string()),
                        ),
                    };
                    self.append(EventKind::ToolResult {
                        call_id: call_id.clone(),
                        name: tool.clone(),
                        output,
                        error_kind,
                    });
                }
            }
        }
    }

    /// Record the calls of a batch that was cut short, with whatever results
    /// came back. These never enter the conversation, but they ran on the
    /// host.
    pub(crate) fn record_abandoned_batch(
        &self,
        text: Option<String>,
        calls: &[ToolCall],
        results: &[ToolInvocationResult],
    ) {
        let attempted = &calls[..results.len().min(calls.len())];
        let mut turns = vec![Turn::AssistantToolRequest {
            text,
            calls: attempted.to_vec(),
        }];
        turns.extend(attempted.iter().zip(results).map(|(call, result)| {
            Turn::ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                result: result.clone(),
            }
        }));
        self.record_turns(&turns);
    }

    pub(crate) fn record_run_end(&self, outcome: &Outcome, stats: &RunStats) {
        let error = match outcome {
            Outcome::FatalError(err) => Some(err.to_string()),
            _ => None,
        };
        self.append(EventKind::RunEnd {
            outcome: outcome.label().to_string(),
            iterations: stats.iterations,
            tool_calls: stats.tool_calls_executed,
            error,
        });
    }

    fn message(&self, role: Role, content: &str) {
        self.append(EventKind::Message {
            role,
            content: content.to_string(),
        });
    }

    fn append(&self, kind: EventKind) {
        let event = Event::new(self.conversation_id, kind);
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = store.append(&event) {
            warn!(conversation = %self.conversation_id, kind = event.kind.name(), error = %e, "failed to record event");
        }
    }

    /// Read back everything recorded so far.
    pub fn events(&self) -> storage::Result<Vec<Event>> {
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(poisoned) => poisoned.into_inner(),
        };
        store.load_conversation(self.conversation_id)
    }
}
