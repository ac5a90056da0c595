//! Row types for the `messages` table. The gateway converts these into
//! `murmur_types` models at the edge.

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub username: String,
    pub avatar: String,
    pub message: String,
    pub is_bot: bool,
    /// RFC 3339 UTC with millisecond precision, assigned by SQLite on insert.
    pub timestamp: String,
}

pub struct NewMessage<'a> {
    pub username: &'a str,
    pub avatar: &'a str,
    pub message: &'a str,
    pub is_bot: bool,
}
