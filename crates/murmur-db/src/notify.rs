//! Store-level publish/subscribe.
//!
//! Every insert into the message log publishes the new row id on
//! [`CHANGE_CHANNEL`](murmur_types::events::CHANGE_CHANNEL); typing signals ride
//! the same transport on their own channel name. Listeners receive a lazy,
//! never-ending sequence of notifications until they close their
//! [`Subscription`] or the transport goes away.

use std::collections::HashSet;
use std::sync::RwLock;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Largest payload accepted by [`NotificationChannel::publish`].
pub const MAX_PAYLOAD_BYTES: usize = 8000;

/// A single `(channel, payload)` pair delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification transport lost")]
    TransportLost,

    #[error("listener fell behind by {0} notifications")]
    Lagged(u64),

    #[error("subscription already closed")]
    Unsubscribed,

    #[error("payload of {0} bytes exceeds the 8000 byte limit")]
    PayloadTooLarge(usize),
}

/// Publish/subscribe primitive shared by writers and stream sessions.
///
/// `publish` is fire-and-forget: listeners that subscribe afterwards never see
/// the payload, and publishing with nobody listening is not an error.
pub trait NotificationChannel: Send + Sync {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;

    fn subscribe(&self, channels: &[&str]) -> Result<Subscription, NotifyError>;
}

/// Listener handle returned by [`NotificationChannel::subscribe`].
///
/// Dropping the handle (or calling [`close`](Subscription::close)) stops
/// delivery and releases the listener. Once the sequence has ended, either
/// by close or by a transport error, it cannot be restarted.
pub struct Subscription {
    channels: HashSet<String>,
    receiver: Option<broadcast::Receiver<Notification>>,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<Notification>, channels: &[&str]) -> Self {
        Self {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            receiver: Some(receiver),
        }
    }

    /// Wait for the next notification on one of the subscribed channels.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next(&mut self) -> Result<Notification, NotifyError> {
        let receiver = self.receiver.as_mut().ok_or(NotifyError::Unsubscribed)?;

        let result = loop {
            match receiver.recv().await {
                Ok(notification) if self.channels.contains(&notification.channel) => {
                    break Ok(notification);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => break Err(NotifyError::Lagged(skipped)),
                Err(RecvError::Closed) => break Err(NotifyError::TransportLost),
            }
        };

        if result.is_err() {
            self.receiver = None;
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Release the listener. Idempotent.
    pub fn close(&mut self) {
        if self.receiver.take().is_some() {
            debug!("Listener released for {:?}", self.channels);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-process notification bus.
///
/// All channel names are multiplexed over one broadcast channel so a listener
/// sees notifications in publish order regardless of channel. Each listener
/// buffers at most `capacity` undelivered notifications; past that it gets
/// [`NotifyError::Lagged`].
pub struct LocalNotifier {
    sender: RwLock<Option<broadcast::Sender<Notification>>>,
}

impl LocalNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.sender
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Sever the transport. Every listener drains what is already buffered and
    /// then ends with [`NotifyError::TransportLost`]; later publishes fail.
    pub fn shutdown(&self) {
        let taken = match self.sender.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = taken {
            info!("Notifier shut down ({} listeners)", sender.receiver_count());
        }
    }

    fn with_sender<T>(
        &self,
        f: impl FnOnce(&broadcast::Sender<Notification>) -> T,
    ) -> Result<T, NotifyError> {
        let guard = self.sender.read().map_err(|_| NotifyError::TransportLost)?;
        let sender = guard.as_ref().ok_or(NotifyError::TransportLost)?;
        Ok(f(sender))
    }
}

impl NotificationChannel for LocalNotifier {
    fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(NotifyError::PayloadTooLarge(payload.len()));
        }

        self.with_sender(|sender| {
            // Err only means nobody is listening right now
            let _ = sender.send(Notification {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        })
    }

    fn subscribe(&self, channels: &[&str]) -> Result<Subscription, NotifyError> {
        self.with_sender(|sender| Subscription::new(sender.subscribe(), channels))
    }
}
