use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct SessionInfo {
    watermark: Option<i64>,
    opened_at: DateTime<Utc>,
}

/// Tracks every open stream session.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. The returned slot removes it again when
    /// released or dropped.
    pub fn register(&self, watermark: Option<i64>) -> SessionSlot {
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            SessionInfo {
                watermark,
                opened_at: Utc::now(),
            },
        );

        SessionSlot {
            id,
            registry: self.clone(),
            released: false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, id: Uuid) {
        if let Some(info) = self.lock().remove(&id) {
            debug!(
                "Session {} (Last-Event-ID: {:?}) unregistered after {}",
                id,
                info.watermark,
                Utc::now() - info.opened_at
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SessionInfo>> {
        // Entries are plain data; a panic elsewhere cannot leave them half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A session's place in the registry.
pub struct SessionSlot {
    id: Uuid,
    registry: SessionRegistry,
    released: bool,
}

impl SessionSlot {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Leave the registry. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.remove(self.id);
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.release();
    }
}
