//! SQLite event store implementation.

use crate::{ConversationId, Error, Event, EventKind, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::Path;

/// Summary of one recorded conversation.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub run_count: u32,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_conversation
                ON events(conversation_id, seq);
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (id, conversation_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.conversation_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load all events for a conversation, in the order they were appended.
    pub fn load_conversation(&self, conversation_id: ConversationId) -> Result<Vec<Event>> {
        self.load_events(conversation_id, None)
    }

    /// Load events for a conversation, optionally only those of one kind.
    pub fn load_events(
        &self,
        conversation_id: ConversationId,
        kind: Option<&str>,
    ) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, timestamp, data FROM events
             WHERE conversation_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY seq",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string(), kind], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, conversation_id, timestamp, data) = row?;
            events.push(Event {
                id: id.parse().map_err(|e| Error::Corrupt(format!("event id: {e}")))?,
                conversation_id: conversation_id
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("conversation id: {e}")))?,
                timestamp: parse_timestamp(&timestamp)?,
                kind: serde_json::from_str::<EventKind>(&data)?,
            });
        }

        Ok(events)
    }

    /// List recorded conversations, most recent first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT conversation_id,
                    MIN(timestamp),
                    MAX(CASE WHEN kind = 'conversation_end' THEN timestamp END),
                    SUM(CASE WHEN kind = 'message' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN kind = 'run_end' THEN 1 ELSE 0 END)
             FROM events
             GROUP BY conversation_id
             ORDER BY MIN(seq) DESC",
        )?;

        let rows = stmt.query_map([], summary_row)?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, started_at, ended_at, message_count, run_count) = row?;
            summaries.push(ConversationSummary {
                id: id
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("conversation id: {e}")))?,
                started_at: parse_timestamp(&started_at)?,
                ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
                message_count,
                run_count,
            });
        }

        Ok(summaries)
    }
}

type SummaryRow = (String, String, Option<String>, u32, u32);

fn summary_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("timestamp {raw}: {e}")))
}
