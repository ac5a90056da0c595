use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message. Ids are assigned by the store, strictly
/// increasing and never reused, so they double as SSE resumption tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub username: String,
    pub avatar: String,
    pub message: String,
    pub is_bot: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ephemeral "user is typing" signal. Never stored; it only exists as a
/// notification payload on the typing channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub username: String,
    pub avatar: String,
    pub is_typing: bool,
}
