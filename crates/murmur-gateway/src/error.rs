use thiserror::Error;

use murmur_db::notify::NotifyError;

/// Everything that can go wrong while a stream session delivers events.
///
/// Only [`TransportLost`](SessionError::TransportLost) and
/// [`TooManySkips`](SessionError::TooManySkips) end a session; the rest are
/// logged and the offending notification is skipped.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("notification transport lost: {0}")]
    TransportLost(#[from] NotifyError),

    #[error("message {0} not found")]
    LookupMiss(i64),

    #[error("invalid message id {0:?}")]
    InvalidIdentifier(String),

    #[error("malformed typing payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store query failed: {0}")]
    Store(anyhow::Error),

    #[error("replay query failed: {0}")]
    ReplayQuery(anyhow::Error),

    #[error("notification on unexpected channel {0:?}")]
    UnknownChannel(String),

    #[error("closed after {0} consecutive skipped notifications")]
    TooManySkips(u32),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportLost(_) | Self::TooManySkips(_))
    }
}

/// Failure to relay a typing signal.
#[derive(Debug, Error)]
pub enum TypingError {
    #[error("failed to encode typing signal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish typing signal: {0}")]
    Publish(#[from] NotifyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_and_breaker_errors_are_fatal() {
        assert!(SessionError::TransportLost(NotifyError::TransportLost).is_fatal());
        assert!(SessionError::TransportLost(NotifyError::Lagged(4)).is_fatal());
        assert!(SessionError::TooManySkips(3).is_fatal());

        assert!(!SessionError::LookupMiss(9).is_fatal());
        assert!(!SessionError::InvalidIdentifier("x".into()).is_fatal());
        assert!(!SessionError::Store(anyhow::anyhow!("disk")).is_fatal());
        assert!(!SessionError::UnknownChannel("other".into()).is_fatal());
    }
}
