use serde::Serialize;

use crate::models::{ChatMessage, TypingSignal};

/// Notification channel carrying the id of every newly inserted message.
pub const CHANGE_CHANNEL: &str = "chat";

/// Notification channel carrying serialized [`TypingSignal`]s.
pub const TYPING_CHANNEL: &str = "typing_event";

/// Events sent down the SSE stream to a single client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A persisted message, either replayed or delivered live
    Message(ChatMessage),

    /// A user started or stopped typing. `payload` is the notification body
    /// exactly as published; `signal` is its decoded form.
    Typing { signal: TypingSignal, payload: String },
}

impl StreamEvent {
    /// SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Typing { .. } => "typing",
        }
    }

    /// SSE `id:` field. Only messages are resumable; typing events carry no id
    /// so they never move the client's `Last-Event-ID`.
    pub fn id(&self) -> Option<String> {
        match self {
            Self::Message(message) => Some(message.id.to_string()),
            Self::Typing { .. } => None,
        }
    }

    /// SSE `data:` field. Typing events pass the published payload through
    /// untouched.
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            Self::Message(message) => serde_json::to_string(message),
            Self::Typing { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Decode a typing notification, keeping the raw payload for delivery.
    pub fn typing(payload: &str) -> serde_json::Result<Self> {
        let signal = serde_json::from_str(payload)?;
        Ok(Self::Typing {
            signal,
            payload: payload.to_string(),
        })
    }
}

/// Borrowed view used when a typing payload is built for publishing.
#[derive(Serialize)]
pub struct TypingPayload<'a> {
    pub username: &'a str,
    pub avatar: &'a str,
    pub is_typing: bool,
}
