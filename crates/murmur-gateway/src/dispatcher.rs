use std::sync::Arc;

use tracing::warn;

use murmur_db::notify::{NotificationChannel, NotifyError};
use murmur_types::events::{CHANGE_CHANNEL, TYPING_CHANNEL};

use crate::error::TypingError;
use crate::registry::SessionRegistry;
use crate::session::{FailurePolicy, StreamSession};
use crate::store::ChangeLogStore;
use crate::typing;

/// Opens stream sessions and relays typing signals.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    notifier: Arc<dyn NotificationChannel>,
    store: Arc<dyn ChangeLogStore>,
    registry: SessionRegistry,
    policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(
        notifier: Arc<dyn NotificationChannel>,
        store: Arc<dyn ChangeLogStore>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                notifier,
                store,
                registry: SessionRegistry::new(),
                policy,
            }),
        }
    }

    /// Open a session for one client connection.
    ///
    /// The subscription is taken here, before the caller starts replaying, so
    /// every notification published from this point on reaches the session.
    pub fn open_session(&self, watermark: Option<i64>) -> Result<StreamSession, NotifyError> {
        let subscription = self
            .inner
            .notifier
            .subscribe(&[CHANGE_CHANNEL, TYPING_CHANNEL])
            .inspect_err(|e| warn!("Failed to open stream session: {}", e))?;

        let slot = self.inner.registry.register(watermark);

        Ok(StreamSession::new(
            subscription,
            slot,
            self.inner.store.clone(),
            watermark,
            self.inner.policy,
        ))
    }

    pub fn publish_typing(
        &self,
        username: &str,
        avatar: &str,
        is_typing: bool,
    ) -> Result<(), TypingError> {
        typing::publish_typing(self.inner.notifier.as_ref(), username, avatar, is_typing)
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationChannel> {
        &self.inner.notifier
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    #[tokio::test]
    async fn sessions_are_registered_until_closed() {
        let h = Harness::new();

        let first = h.dispatcher.open_session(None).unwrap();
        let mut second = h.dispatcher.open_session(Some(3)).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(h.dispatcher.registry().active_count(), 2);
        assert_eq!(h.notifier.listener_count(), 2);

        second.close();
        assert_eq!(h.dispatcher.registry().active_count(), 1);

        drop(first);
        assert_eq!(h.dispatcher.registry().active_count(), 0);
        assert_eq!(h.notifier.listener_count(), 0);
    }

    #[tokio::test]
    async fn open_fails_once_transport_is_gone() {
        let h = Harness::new();
        h.notifier.shutdown();

        assert!(matches!(
            h.dispatcher.open_session(None),
            Err(NotifyError::TransportLost)
        ));
        assert_eq!(h.dispatcher.registry().active_count(), 0);
    }
}
