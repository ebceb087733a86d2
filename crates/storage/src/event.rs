//! Event types for the conversation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unique identifier for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Conversation started.
    ConversationStart,
    /// A message was added to the conversation.
    Message { role: Role, content: String },
    /// The model requested a tool.
    ToolCall {
        call_id: String,
        name: String,
        input: Value,
    },
    /// A tool returned a result.
    ToolResult {
        call_id: String,
        name: String,
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
    /// One orchestration run finished.
    RunEnd {
        outcome: String,
        iterations: u32,
        tool_calls: u32,
        /// Why a fatal run stopped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Conversation ended.
    ConversationEnd,
}

impl EventKind {
    /// Stable name stored in the `kind` column and used for filtering.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConversationStart => "conversation_start",
            Self::Message { .. } => "message",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::RunEnd { .. } => "run_end",
            Self::ConversationEnd => "conversation_end",
        }
    }
}

/// An event in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(conversation_id: ConversationId, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn message(
        conversation_id: ConversationId,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            EventKind::Message {
                role,
                content: content.into(),
            },
        )
    }
}
