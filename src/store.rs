//! Durable message store backed by SQLite.
//!
//! Messages are append-only; the store assigns the authoritative id and a
//! server timestamp at insert time. History between two parties is replayed
//! ordered by that timestamp, regardless of which side asks.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub receiver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Unix millis, assigned by the store; strictly increasing per store.
    pub timestamp: i64,
}

/// A message as submitted by a client, before the store has assigned an id
/// and timestamp.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub sender: String,
    pub receiver: String,
    pub text: Option<String>,
    pub voice: Option<String>,
    pub emoji: Option<String>,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
    last_ts: Arc<AtomicI64>,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            last_ts: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Creates the schema if missing and seeds the timestamp clock so that
    /// ordering stays monotonic across restarts.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                text TEXT,
                voice TEXT,
                emoji TEXT,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender, receiver)")
            .execute(&self.pool)
            .await?;

        let (max_ts,): (Option<i64>,) = sqlx::query_as("SELECT MAX(timestamp) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        self.last_ts.store(max_ts.unwrap_or(0), Ordering::SeqCst);

        Ok(())
    }

    /// Persists a draft, assigning the id and server timestamp. Two appends
    /// landing in the same millisecond get distinct, increasing timestamps.
    pub async fn append(&self, draft: MessageDraft) -> AppResult<Message> {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let prev = self
            .last_ts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(now);
        let timestamp = now.max(prev + 1);

        let message = Message {
            id: Uuid::now_v7(),
            sender: draft.sender,
            receiver: draft.receiver,
            text: draft.text,
            voice: draft.voice,
            emoji: draft.emoji,
            timestamp,
        };

        sqlx::query(
            "INSERT INTO messages (id,sender,receiver,text,voice,emoji,timestamp) values (?,?,?,?,?,?,?)",
        )
        .bind(message.id.to_string())
        .bind(&message.sender)
        .bind(&message.receiver)
        .bind(&message.text)
        .bind(&message.voice)
        .bind(&message.emoji)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// All messages between the unordered pair `{a, b}`, oldest first.
    pub async fn history(&self, a: &str, b: &str) -> AppResult<Vec<Message>> {
        let rows: Vec<(String, String, String, Option<String>, Option<String>, Option<String>, i64)> =
            sqlx::query_as(
                "SELECT id,sender,receiver,text,voice,emoji,timestamp FROM messages
                 WHERE (sender=? AND receiver=?) OR (sender=? AND receiver=?)
                 ORDER BY timestamp ASC, id ASC",
            )
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, sender, receiver, text, voice, emoji, timestamp) in rows {
            messages.push(Message {
                id: Uuid::parse_str(&id)?,
                sender,
                receiver,
                text,
                voice,
                emoji,
                timestamp,
            });
        }

        Ok(messages)
    }
}
