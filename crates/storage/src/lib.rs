//! SQLite-backed event storage for Tiller conversations.
//!
//! This crate keeps the audit trail of every conversation: each message, tool
//! call, tool result and run outcome is captured and queryable afterwards.
//!
//! # Overview
//!
//! The log answers two questions:
//!
//! 1. **What did the agent do?** Every tool invocation the model asked for is
//!    recorded with its arguments and the result (or classified error) it got.
//!
//! 2. **How did each run end?** `RunEnd` events carry the outcome
//!    (`answer`, `truncated`, `fatal`) along with iteration and tool call counts.
//!
//! # Core Concepts
//!
//! ## EventStore
//!
//! The [`EventStore`] wraps a SQLite database and provides methods to append
//! events and query conversation history.
//!
//! ## Event
//!
//! An [`Event`] represents something that happened during a conversation. Each
//! event has a unique ID, the [`ConversationId`] it belongs to, a timestamp and
//! an [`EventKind`].
//!
//! # Example
//!
//! ```no_run
//! use storage::{ConversationId, Event, EventKind, EventStore, Role};
//!
//! let store = EventStore::open("events.db")?;
//!
//! let id = ConversationId::new();
//! store.append(&Event::new(id, EventKind::ConversationStart))?;
//! store.append(&Event::message(id, Role::User, "What's on my calendar today?"))?;
//!
//! for event in store.load_conversation(id)? {
//!     println!("{}: {:?}", event.timestamp, event.kind);
//! }
//!
//! for summary in store.list_conversations()? {
//!     println!("{}: {} messages", summary.id, summary.message_count);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{ConversationId, Event, EventKind, Role};
pub use store::{ConversationSummary, EventStore};
