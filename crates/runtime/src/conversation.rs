//! Conversation history.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::classify::ToolError;
use crate::model::{Message, Part, Role, ToolCall, ToolResult};

/// Outcome of one tool invocation, always carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolInvocationResult {
    Ok { payload: Value },
    Error(ToolError),
}

impl ToolInvocationResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Ok { .. } => None,
        }
    }

    /// The result as the model reads it.
    ///
    /// String payloads are passed verbatim; anything else is JSON text.
    /// Errors become `{"error": {"kind", "message"}}`.
    pub fn render(&self) -> String {
        match self {
            Self::Ok {
                payload: Value::String(text),
            } => text.clone(),
            Self::Ok { payload } => payload.to_string(),
            Self::Error(err) => json!({ "error": err }).to_string(),
        }
    }
}

/// One unit of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    System {
        text: String,
    },
    User {
        text: String,
    },
    AssistantText {
        text: String,
    },
    AssistantToolRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        tool: String,
        result: ToolInvocationResult,
    },
}

/// An ordered, append-only sequence of turns.
///
/// Every `AssistantToolRequest` is immediately followed by one `ToolResult`
/// per call, in call order. Appends that would break this go through
/// [`Conversation::push_tool_exchange`], which adds the request and its
/// results together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a conversation with a system turn.
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::System {
                text: system.into(),
            }],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User { text: text.into() });
    }

    pub(crate) fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::AssistantText { text: text.into() });
    }

    /// Append an assistant tool request together with its results.
    pub(crate) fn push_tool_exchange(
        &mut self,
        text: Option<String>,
        calls: Vec<ToolCall>,
        results: Vec<ToolInvocationResult>,
    ) {
        debug_assert_eq!(calls.len(), results.len());
        let result_turns: Vec<Turn> = calls
            .iter()
            .zip(results)
            .map(|(call, result)| Turn::ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                result,
            })
            .collect();
        self.turns.push(Turn::AssistantToolRequest { text, calls });
        self.turns.extend(result_turns);
    }

    /// The most recent non-blank assistant text, final or preamble.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.last_assistant_text_since(0)
    }

    /// Like [`Conversation::last_assistant_text`], looking only at turns from
    /// index `start` on.
    pub fn last_assistant_text_since(&self, start: usize) -> Option<&str> {
        self.turns
            .get(start..)
            .unwrap_or_default()
            .iter()
            .rev()
            .filter_map(|turn| match turn {
                Turn::AssistantText { text } => Some(text.as_str()),
                Turn::AssistantToolRequest {
                    text: Some(text), ..
                } => Some(text.as_str()),
                _ => None,
            })
            .find(|text| !text.trim().is_empty())
    }

    /// Check that every tool request is answered in order by call id.
    pub fn is_consistent(&self) -> bool {
        let mut turns = self.turns.iter();
        while let Some(turn) = turns.next() {
            match turn {
                Turn::AssistantToolRequest { calls, .. } => {
                    for call in calls {
                        match turns.next() {
                            Some(Turn::ToolResult { call_id, .. }) if *call_id == call.id => {}
                            _ => return false,
                        }
                    }
                }
                Turn::ToolResult { .. } => return false,
                _ => {}
            }
        }
        true
    }

    /// Render the history as model messages.
    ///
    /// Consecutive tool results share one user message so that providers
    /// requiring all results of a request in a single message accept it.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            match turn {
                Turn::System { text } => messages.push(Message::text_message(Role::System, text)),
                Turn::User { text } => messages.push(Message::text_message(Role::User, text)),
                Turn::AssistantText { text } => {
                    messages.push(Message::text_message(Role::Assistant, text))
                }
                Turn::AssistantToolRequest { text, calls } => {
                    let mut parts: Vec<Part> = text.iter().cloned().map(Part::Text).collect();
                    parts.extend(calls.iter().cloned().map(Part::ToolCall));
                    messages.push(Message {
                        role: Role::Assistant,
                        parts,
                    });
                }
                Turn::ToolResult {
                    call_id, result, ..
                } => {
                    let part = Part::ToolResult(ToolResult {
                        tool_call_id: call_id.clone(),
                        content: result.render(),
                        is_error: result.is_error(),
                    });
                    match messages.last_mut() {
                        Some(last)
                            if last.role == Role::User
                                && matches!(last.parts.last(), Some(Part::ToolResult(_))) =>
                        {
                            last.parts.push(part)
                        }
                        _ => messages.push(Message {
                            role: Role::User,
                            parts: vec![part],
                        }),
                    }
                }
            }
        }
        messages
    }
}
