use tracing::trace;

use murmur_db::notify::NotificationChannel;
use murmur_types::events::{TYPING_CHANNEL, TypingPayload};

use crate::error::TypingError;

/// Broadcast a typing signal to every open session.
///
/// Nothing is stored and nothing is acknowledged; with no sessions open the
/// signal simply disappears.
pub fn publish_typing(
    notifier: &dyn NotificationChannel,
    username: &str,
    avatar: &str,
    is_typing: bool,
) -> Result<(), TypingError> {
    let payload = serde_json::to_string(&TypingPayload {
        username,
        avatar,
        is_typing,
    })?;

    notifier.publish(TYPING_CHANNEL, &payload)?;
    trace!("Typing signal from {} (typing: {})", username, is_typing);
    Ok(())
}
