use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use nutrio_common::time::{Clock, SystemClock};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{ChatError, Result},
    types::{ChangeEvent, ConnectionStatus, Message, NewMessage},
};

pub type ChangeStream = BoxStream<'static, ChangeEvent>;

const EVENT_CAPACITY: usize = 256;

/// Persistence and change feed for direct messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    /// Returns one page of the conversation in chronological order. Page
    /// boundaries are counted from the newest message backwards.
    async fn load_page(
        &self,
        user_id: &str,
        partner_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Marks every unread message from `sender_id` to `reader_id` as read and
    /// returns the rows that changed.
    async fn mark_read(
        &self,
        reader_id: &str,
        sender_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    async fn update_content(&self, id: &str, editor_id: &str, content: &str) -> Result<Message>;

    async fn soft_delete(&self, id: &str, requester_id: &str) -> Result<Message>;

    /// Subscribes to inserts and updates for the conversation between the two
    /// users.
    fn subscribe(&self, user_id: &str, partner_id: &str) -> ChangeStream;
}

/// Process-local store backed by a vector and a broadcast channel.
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
    events: broadcast::Sender<ChangeEvent>,
    clock: Arc<dyn Clock>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            messages: RwLock::new(Vec::new()),
            events,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.read().map(|messages| messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages
            .read()
            .ok()
            .and_then(|messages| messages.iter().find(|message| message.id == id).cloned())
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error; nobody has the conversation open.
        let _ = self.events.send(event);
    }

    /// Applies `apply` to the sender's own message under the write lock.
    fn modify<F>(&self, id: &str, actor_id: &str, apply: F) -> Result<Message>
    where
        F: FnOnce(&mut Message, DateTime<Utc>) -> Result<()>,
    {
        let updated = {
            let mut messages = self
                .messages
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let message = messages
                .iter_mut()
                .find(|message| message.id == id)
                .ok_or_else(|| ChatError::NotFound(id.to_string()))?;
            if message.sender_id != actor_id {
                return Err(ChatError::Unauthorized);
            }
            apply(message, self.clock.now())?;
            message.clone()
        };

        self.publish(ChangeEvent::Updated(updated.clone()));
        Ok(updated)
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, new: NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            created_at: self.clock.now(),
            read_at: None,
            is_deleted: false,
            edited_at: None,
        };

        self.messages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        debug!(id = %message.id, sender = %message.sender_id, "message stored");

        self.publish(ChangeEvent::Inserted(message.clone()));
        Ok(message)
    }

    async fn load_page(
        &self,
        user_id: &str,
        partner_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut conversation = self
            .messages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|message| message.is_between(user_id, partner_id))
            .cloned()
            .collect::<Vec<_>>();

        conversation.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut page = conversation
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect::<Vec<_>>();
        page.reverse();
        Ok(page)
    }

    async fn mark_read(
        &self,
        reader_id: &str,
        sender_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let updated = {
            let mut messages = self
                .messages
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            messages
                .iter_mut()
                .filter(|message| message.sender_id == sender_id && message.is_unread_for(reader_id))
                .map(|message| {
                    message.read_at = Some(at);
                    message.clone()
                })
                .collect::<Vec<_>>()
        };

        for message in &updated {
            self.publish(ChangeEvent::Updated(message.clone()));
        }
        Ok(updated)
    }

    async fn update_content(&self, id: &str, editor_id: &str, content: &str) -> Result<Message> {
        self.modify(id, editor_id, |message, now| {
            if message.is_deleted {
                return Err(ChatError::NotFound(message.id.clone()));
            }
            message.content = content.to_string();
            message.edited_at = Some(now);
            Ok(())
        })
    }

    async fn soft_delete(&self, id: &str, requester_id: &str) -> Result<Message> {
        self.modify(id, requester_id, |message, _| {
            message.is_deleted = true;
            Ok(())
        })
    }

    fn subscribe(&self, user_id: &str, partner_id: &str) -> ChangeStream {
        let receiver = self.events.subscribe();
        let user_id = user_id.to_string();
        let partner_id = partner_id.to_string();

        let changes = stream::unfold(receiver, move |mut receiver| {
            let user_id = user_id.clone();
            let partner_id = partner_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.involves(&user_id, &partner_id) => {
                            return Some((event, receiver));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "change feed lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        stream::once(async { ChangeEvent::Status(ConnectionStatus::Subscribed) })
            .chain(changes)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use nutrio_common::time::ManualClock;

    use super::*;

    fn new_message(from: &str, to: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            content: content.to_string(),
        }
    }

    async fn seeded(count: usize) -> (MemoryMessageStore, ManualClock) {
        let clock = ManualClock::default();
        let store = MemoryMessageStore::with_clock(Arc::new(clock.clone()));
        for index in 0..count {
            let (from, to) = if index % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
            store.insert(new_message(from, to, &format!("m{index}"))).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }
        (store, clock)
    }

    #[tokio::test]
    async fn pages_walk_backwards_in_chronological_order() {
        let (store, _) = seeded(7).await;
        store.insert(new_message("alice", "carol", "elsewhere")).await.unwrap();

        let newest = store.load_page("alice", "bob", 0, 3).await.unwrap();
        let contents = newest.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["m4", "m5", "m6"]);

        let oldest = store.load_page("bob", "alice", 6, 3).await.unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].content, "m0");
    }

    #[tokio::test]
    async fn mark_read_only_touches_incoming_unread() {
        let (store, _) = seeded(4).await;

        let first = store.mark_read("bob", "alice", Utc::now()).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|m| m.sender_id == "alice"));

        let again = store.mark_read("bob", "alice", Utc::now()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn only_sender_may_edit_or_delete() {
        let (store, _) = seeded(1).await;
        let id = store.load_page("alice", "bob", 0, 1).await.unwrap()[0].id.clone();

        assert_eq!(
            store.update_content(&id, "bob", "hijack").await,
            Err(ChatError::Unauthorized)
        );
        assert_eq!(store.soft_delete(&id, "bob").await, Err(ChatError::Unauthorized));

        let edited = store.update_content(&id, "alice", "fixed").await.unwrap();
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited_at.is_some());

        let deleted = store.soft_delete(&id, "alice").await.unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.update_content(&id, "alice", "again").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn edits_never_land_on_deleted_messages() {
        let store = Arc::new(MemoryMessageStore::new());

        for round in 0..200 {
            let id = store
                .insert(new_message("alice", "bob", &format!("draft {round}")))
                .await
                .unwrap()
                .id;

            let delete = tokio::spawn({
                let store = Arc::clone(&store);
                let id = id.clone();
                async move { store.soft_delete(&id, "alice").await }
            });
            let edit = tokio::spawn({
                let store = Arc::clone(&store);
                let id = id.clone();
                async move { store.update_content(&id, "alice", "edited").await }
            });

            assert!(delete.await.unwrap().unwrap().is_deleted);
            match edit.await.unwrap() {
                Ok(edited) => assert!(!edited.is_deleted),
                Err(err) => assert_eq!(err, ChatError::NotFound(id.clone())),
            }

            let stored = store.get(&id).unwrap();
            assert!(stored.is_deleted);
            if stored.edited_at.is_some() {
                assert_eq!(stored.content, "edited");
            }
        }
    }

    #[tokio::test]
    async fn subscription_filters_to_conversation() {
        let store = MemoryMessageStore::new();
        let mut feed = store.subscribe("alice", "bob");

        assert_eq!(
            feed.next().await,
            Some(ChangeEvent::Status(ConnectionStatus::Subscribed))
        );

        store.insert(new_message("carol", "alice", "nope")).await.unwrap();
        let kept = store.insert(new_message("bob", "alice", "yes")).await.unwrap();

        assert_eq!(feed.next().await, Some(ChangeEvent::Inserted(kept)));
    }
}
