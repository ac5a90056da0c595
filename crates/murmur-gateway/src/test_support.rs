use std::sync::Arc;

use murmur_db::Database;
use murmur_db::models::NewMessage;
use murmur_db::notify::LocalNotifier;
use murmur_types::events::StreamEvent;
use murmur_types::models::ChatMessage;

use crate::dispatcher::Dispatcher;
use crate::session::FailurePolicy;
use crate::store::ChangeLogStore;

pub struct Harness {
    pub db: Arc<Database>,
    pub notifier: Arc<LocalNotifier>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::Tolerate)
    }

    pub fn with_policy(policy: FailurePolicy) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Self::build(db.clone(), db, policy)
    }

    /// Live lookups work, backlog queries always fail.
    pub fn with_failing_replay() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = Arc::new(FailingReplay(db.clone()));
        Self::build(db, store, FailurePolicy::Tolerate)
    }

    fn build(db: Arc<Database>, store: Arc<dyn ChangeLogStore>, policy: FailurePolicy) -> Self {
        let notifier = Arc::new(LocalNotifier::new(1024));
        let dispatcher = Dispatcher::new(notifier.clone(), store, policy);
        Self {
            db,
            notifier,
            dispatcher,
        }
    }

    pub fn insert(&self, text: &str) -> i64 {
        self.db
            .insert_message(
                &NewMessage {
                    username: "alice",
                    avatar: "/static/avatars/fox.png",
                    message: text,
                    is_bot: false,
                },
                self.notifier.as_ref(),
            )
            .unwrap()
            .id
    }
}

struct FailingReplay(Arc<Database>);

impl ChangeLogStore for FailingReplay {
    fn message_by_id(&self, id: i64) -> anyhow::Result<Option<ChatMessage>> {
        self.0.message_by_id(id)
    }

    fn messages_after(&self, _watermark: i64, _limit: u32) -> anyhow::Result<Vec<ChatMessage>> {
        anyhow::bail!("database is locked")
    }
}

pub fn message_ids(events: &[StreamEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message(m) => Some(m.id),
            StreamEvent::Typing { .. } => None,
        })
        .collect()
}
