//! Per-client stream sessions.
//!
//! A session subscribes to the change and typing channels *before* it reads
//! the backlog, so nothing committed between the replay query and the start of
//! the live feed can fall through the gap. A message that shows up in both the
//! replay and the live feed is delivered once.
//!
//! The backlog is read in pages of [`REPLAY_PAGE_SIZE`] so a client resuming
//! from far back never pulls the whole log into memory at once.

use std::sync::Arc;

use async_stream::stream;
use futures_util::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::notify::{Notification, NotifyError, Subscription};
use murmur_types::events::{CHANGE_CHANNEL, StreamEvent, TYPING_CHANNEL};

use crate::error::SessionError;
use crate::registry::SessionSlot;
use crate::store::ChangeLogStore;

/// Messages fetched per backlog query during replay.
pub const REPLAY_PAGE_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Replaying,
    Live,
    Closing,
    Closed,
}

/// What to do when notifications keep failing to decode or resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Skip every bad notification and keep going.
    #[default]
    Tolerate,

    /// Close the session after this many consecutive skipped notifications.
    CloseAfter(u32),
}

impl FailurePolicy {
    fn should_close(&self, consecutive_skips: u32) -> bool {
        match self {
            Self::Tolerate => false,
            Self::CloseAfter(limit) => consecutive_skips >= *limit,
        }
    }
}

pub struct StreamSession {
    slot: SessionSlot,
    subscription: Subscription,
    store: Arc<dyn ChangeLogStore>,
    policy: FailurePolicy,
    state: SessionState,
    /// Next page starts after this id; `None` once replay is over.
    replay_cursor: Option<i64>,
    /// Highest id emitted by replay. Live change notifications at or below it
    /// were already delivered.
    replayed_through: Option<i64>,
    last_delivered_id: Option<i64>,
    consecutive_skips: u32,
}

impl StreamSession {
    /// Wrap an already-active subscription. The caller must subscribe before
    /// calling this so the live feed starts no later than the replay cutoff.
    pub fn new(
        subscription: Subscription,
        slot: SessionSlot,
        store: Arc<dyn ChangeLogStore>,
        watermark: Option<i64>,
        policy: FailurePolicy,
    ) -> Self {
        info!("Session {} opened (Last-Event-ID: {:?})", slot.id(), watermark);
        Self {
            slot,
            subscription,
            store,
            policy,
            state: SessionState::Opening,
            replay_cursor: watermark,
            replayed_through: None,
            last_delivered_id: watermark,
            consecutive_skips: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.slot.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the newest message handed to the client so far.
    pub fn last_delivered_id(&self) -> Option<i64> {
        self.last_delivered_id
    }

    /// Load the next page of missed messages, oldest first.
    ///
    /// Returns `None` once the backlog is exhausted, right away when the client
    /// sent no watermark. A failed query is logged and ends replay early; the
    /// session still goes live.
    pub async fn next_replay_page(&mut self) -> Option<Vec<StreamEvent>> {
        let cursor = self.replay_cursor?;
        if self.state == SessionState::Opening {
            self.transition(SessionState::Replaying);
        }

        let store = self.store.clone();
        let result =
            tokio::task::spawn_blocking(move || store.messages_after(cursor, REPLAY_PAGE_SIZE))
                .await
                .map_err(|e| anyhow::anyhow!("replay task failed: {}", e))
                .and_then(|r| r);

        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Session {}: {}", self.id(), SessionError::ReplayQuery(e));
                self.replay_cursor = None;
                return None;
            }
        };

        let Some(last) = messages.last().map(|m| m.id) else {
            self.replay_cursor = None;
            return None;
        };

        debug!("Session {} replaying {} messages after {}", self.id(), messages.len(), cursor);
        self.replay_cursor = (messages.len() as u32 == REPLAY_PAGE_SIZE).then_some(last);
        self.replayed_through = Some(last);
        self.last_delivered_id = Some(last);

        Some(messages.into_iter().map(StreamEvent::Message).collect())
    }

    /// Wait for the next deliverable live event.
    ///
    /// Bad notifications are skipped according to the session's
    /// [`FailurePolicy`]. Errors returned from here are fatal.
    pub async fn next_live(&mut self) -> Result<StreamEvent, SessionError> {
        match self.state {
            SessionState::Closing | SessionState::Closed => {
                return Err(NotifyError::Unsubscribed.into());
            }
            SessionState::Live => {}
            SessionState::Opening | SessionState::Replaying => {
                self.transition(SessionState::Live);
            }
        }

        self.replay_cursor = None;

        loop {
            let outcome = match self.subscription.next().await {
                Ok(notification) => self.resolve(notification).await,
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(Some(event)) => {
                    self.consecutive_skips = 0;
                    if let StreamEvent::Message(message) = &event {
                        self.last_delivered_id = Some(message.id);
                    }
                    return Ok(event);
                }
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.consecutive_skips += 1;
                    debug!("Session {} skipped notification: {}", self.id(), e);

                    if self.policy.should_close(self.consecutive_skips) {
                        return Err(SessionError::TooManySkips(self.consecutive_skips));
                    }
                }
            }
        }
    }

    /// Turn a notification into an event. `Ok(None)` means the message was
    /// already delivered by replay.
    async fn resolve(
        &mut self,
        notification: Notification,
    ) -> Result<Option<StreamEvent>, SessionError> {
        match notification.channel.as_str() {
            CHANGE_CHANNEL => {
                let id: i64 = notification
                    .payload
                    .trim()
                    .parse()
                    .map_err(|_| SessionError::InvalidIdentifier(notification.payload.clone()))?;

                if self.already_replayed(id) {
                    debug!("Session {}: message {} already replayed", self.id(), id);
                    return Ok(None);
                }

                let store = self.store.clone();
                let message = tokio::task::spawn_blocking(move || store.message_by_id(id))
                    .await
                    .map_err(|e| SessionError::Store(anyhow::anyhow!("lookup task failed: {}", e)))?
                    .map_err(SessionError::Store)?
                    .ok_or(SessionError::LookupMiss(id))?;

                Ok(Some(StreamEvent::Message(message)))
            }
            TYPING_CHANNEL => Ok(Some(StreamEvent::typing(&notification.payload)?)),
            other => Err(SessionError::UnknownChannel(other.to_string())),
        }
    }

    /// Replay returns every committed id above the watermark, so anything up
    /// to the last replayed id has been sent already.
    fn already_replayed(&self, id: i64) -> bool {
        self.replayed_through.is_some_and(|highest| id <= highest)
    }

    /// Release the subscription, then the registry slot. Idempotent; also
    /// runs on drop, so a cancelled or failed session always cleans up.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.transition(SessionState::Closing);
        self.replay_cursor = None;
        self.subscription.close();
        self.slot.release();
        self.transition(SessionState::Closed);

        info!("Session {} closed (last delivered id: {:?})", self.id(), self.last_delivered_id);
    }

    /// Drive the session: replay, then live events until the transport fails
    /// or the consumer drops the stream.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let mut session = self;
        stream! {
            while let Some(page) = session.next_replay_page().await {
                for event in page {
                    yield event;
                }
            }

            loop {
                match session.next_live().await {
                    Ok(event) => {
                        yield event;
                    }
                    Err(e) => {
                        warn!("Session {} ending: {}", session.id(), e);
                        break;
                    }
                }
            }

            session.close();
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.id(), self.state, next);
        self.state = next;
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
