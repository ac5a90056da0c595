use crate::Database;
use crate::models::{MessageRow, NewMessage};
use crate::notify::NotificationChannel;
use anyhow::Result;
use murmur_types::events::CHANGE_CHANNEL;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, warn};

const MESSAGE_COLUMNS: &str = "id, username, avatar, message, is_bot, timestamp";

impl Database {
    // -- Messages --

    /// Persist a message and announce its id on the change channel.
    ///
    /// The notification goes out after commit and while the writer lock is
    /// still held: listeners never hear about a row they cannot read yet, and
    /// notification order matches commit order. A failed publish is logged and
    /// does not undo the insert.
    pub fn insert_message(
        &self,
        new: &NewMessage<'_>,
        notifier: &dyn NotificationChannel,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            let row = tx.query_row(
                &format!(
                    "INSERT INTO messages (username, avatar, message, is_bot) VALUES (?1, ?2, ?3, ?4)
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                rusqlite::params![new.username, new.avatar, new.message, new.is_bot],
                map_message,
            )?;
            tx.commit()?;

            match notifier.publish(CHANGE_CHANNEL, &row.id.to_string()) {
                Ok(()) => debug!("Message {} committed and announced", row.id),
                Err(e) => warn!("Message {} committed but notification failed: {}", row.id, e),
            }

            Ok(row)
        })
    }

    pub fn get_message_by_id(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message_by_id(conn, id))
    }

    /// Up to `limit` messages with `id > watermark`, oldest first.
    pub fn get_messages_after(&self, watermark: i64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages_after(conn, watermark, limit))
    }

    /// The latest `limit` messages, oldest first.
    pub fn get_recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, limit))
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        username: row.get(1)?,
        avatar: row.get(2)?,
        message: row.get(3)?,
        is_bot: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn query_message_by_id(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"))?;
    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

fn query_messages_after(conn: &Connection, watermark: i64, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
    ))?;

    let rows = stmt
        .query_map(rusqlite::params![watermark, limit], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_recent_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    // id order is commit order, so this is also timestamp order
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY id DESC LIMIT ?1"
    ))?;

    let mut rows = stmt
        .query_map([limit], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.reverse();

    Ok(rows)
}
