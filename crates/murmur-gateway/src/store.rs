use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use murmur_db::Database;
use murmur_db::models::MessageRow;
use murmur_types::models::ChatMessage;

/// Read side of the message log, as seen by stream sessions.
///
/// Implementations are blocking; sessions call them from
/// `tokio::task::spawn_blocking`.
pub trait ChangeLogStore: Send + Sync {
    fn message_by_id(&self, id: i64) -> Result<Option<ChatMessage>>;

    /// Up to `limit` messages with `id > watermark`, ascending by id.
    fn messages_after(&self, watermark: i64, limit: u32) -> Result<Vec<ChatMessage>>;
}

impl ChangeLogStore for Database {
    fn message_by_id(&self, id: i64) -> Result<Option<ChatMessage>> {
        Ok(self.get_message_by_id(id)?.map(message_from_row))
    }

    fn messages_after(&self, watermark: i64, limit: u32) -> Result<Vec<ChatMessage>> {
        Ok(self
            .get_messages_after(watermark, limit)?
            .into_iter()
            .map(message_from_row)
            .collect())
    }
}

pub fn message_from_row(row: MessageRow) -> ChatMessage {
    let timestamp = parse_timestamp(&row.timestamp).unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}' on message {}: {}", row.timestamp, row.id, e);
        DateTime::default()
    });

    ChatMessage {
        id: row.id,
        username: row.username,
        avatar: row.avatar,
        message: row.message,
        is_bot: row.is_bot,
        timestamp,
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    raw.parse::<DateTime<Utc>>().or_else(|_| {
        // Rows written by hand through the sqlite shell use datetime('now'),
        // which has no timezone suffix.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
    })
}
