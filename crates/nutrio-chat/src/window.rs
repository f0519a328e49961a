//! Conversation view between the signed-in user and one partner.
//!
//! Holds the ordered local message list and reconciles three sources: pages
//! loaded from the store, optimistic sends, and the realtime change feed.
//! Every entry in the list is unique by server id.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use nutrio_common::time::{Clock, SystemClock, millis_between};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{ChatError, Result},
    input::MessageSender,
    store::MessageStore,
    types::{
        ChangeEvent, ConnectionStatus, LocalMessage, Message, MessageView, NewMessage,
        PendingMessage,
    },
    validation::{MAX_MESSAGE_LENGTH, validate},
};

pub const PAGE_SIZE: usize = 50;
pub const PENDING_MATCH_WINDOW: Duration = Duration::from_secs(30);

/// Invoked with the number of messages marked read.
pub type ReadCallback = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Clone)]
pub struct WindowOptions {
    pub clock: Arc<dyn Clock>,
    pub page_size: usize,
    pub on_read: Option<ReadCallback>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            page_size: PAGE_SIZE,
            on_read: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Duplicate,
    ReplacedPending,
    Inserted,
}

#[derive(Clone)]
pub struct ChatWindow {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    store: Arc<dyn MessageStore>,
    user_id: String,
    partner_id: String,
    options: WindowOptions,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    messages: Vec<LocalMessage>,
    page: usize,
    has_more: bool,
    loading: bool,
    open: bool,
    error: Option<ChatError>,
    connection: ConnectionStatus,
    /// Bumped on open and close; async results from an older generation are
    /// dropped.
    generation: u64,
    subscription: Option<JoinHandle<()>>,
}

impl ChatWindow {
    pub fn new(
        store: Arc<dyn MessageStore>,
        user_id: impl Into<String>,
        partner_id: impl Into<String>,
    ) -> Self {
        Self::with_options(store, user_id, partner_id, WindowOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn MessageStore>,
        user_id: impl Into<String>,
        partner_id: impl Into<String>,
        options: WindowOptions,
    ) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                store,
                user_id: user_id.into(),
                partner_id: partner_id.into(),
                options,
                state: Mutex::new(WindowState::default()),
            }),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn partner_id(&self) -> &str {
        &self.inner.partner_id
    }

    /// Subscribes to the change feed, loads the newest page and marks incoming
    /// messages read.
    pub async fn open(&self) -> Result<()> {
        let generation = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            state.open = true;
            state.messages.clear();
            state.page = 0;
            state.has_more = false;
            state.error = None;
            state.connection = ConnectionStatus::Connecting;
            if let Some(task) = state.subscription.take() {
                task.abort();
            }
            state.generation
        };

        let subscription = self.inner.spawn_subscription(generation);
        self.inner.lock_state().subscription = Some(subscription);

        self.load_initial(generation).await?;

        if let Err(err) = self.inner.mark_as_read().await {
            warn!(error = %err, "failed to mark conversation read");
        }
        Ok(())
    }

    pub fn close(&self) {
        let mut state = self.inner.lock_state();
        state.generation += 1;
        state.open = false;
        state.connection = ConnectionStatus::Disconnected;
        if let Some(task) = state.subscription.take() {
            task.abort();
        }
    }

    async fn load_initial(&self, generation: u64) -> Result<()> {
        self.inner.lock_state().loading = true;
        let result = self
            .inner
            .store
            .load_page(&self.inner.user_id, &self.inner.partner_id, 0, self.inner.options.page_size)
            .await;

        let mut state = self.inner.lock_state();
        if state.generation != generation {
            return Ok(());
        }
        state.loading = false;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                state.error = Some(err.clone());
                return Err(err);
            }
        };

        state.has_more = page.len() == self.inner.options.page_size;
        state.page = 0;
        // The feed may already have delivered some of these.
        let loaded = page
            .into_iter()
            .filter(|message| state.position_of(&message.id).is_none())
            .map(LocalMessage::Confirmed)
            .collect::<Vec<_>>();
        let live = std::mem::take(&mut state.messages);
        state.messages = loaded;
        state.messages.extend(live);
        debug!(count = state.messages.len(), has_more = state.has_more, "conversation loaded");
        Ok(())
    }

    /// Prepends the next older page. Returns how many messages were added.
    pub async fn load_more(&self) -> Result<usize> {
        let (offset, generation) = {
            let mut state = self.inner.lock_state();
            if !state.open || !state.has_more || state.loading {
                return Ok(0);
            }
            state.loading = true;
            ((state.page + 1) * self.inner.options.page_size, state.generation)
        };

        let result = self
            .inner
            .store
            .load_page(
                &self.inner.user_id,
                &self.inner.partner_id,
                offset,
                self.inner.options.page_size,
            )
            .await;

        let mut state = self.inner.lock_state();
        if state.generation != generation {
            return Ok(0);
        }
        state.loading = false;
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                state.error = Some(err.clone());
                return Err(err);
            }
        };

        state.page += 1;
        state.has_more = page.len() == self.inner.options.page_size;
        let known = state
            .messages
            .iter()
            .filter_map(|message| message.server_id().map(str::to_string))
            .collect::<HashSet<_>>();
        let older = page
            .into_iter()
            .filter(|message| !known.contains(&message.id))
            .map(LocalMessage::Confirmed)
            .collect::<Vec<_>>();
        let added = older.len();
        let mut merged = older;
        merged.append(&mut state.messages);
        state.messages = merged;
        Ok(added)
    }

    /// Sends `content` optimistically: a pending entry appears immediately and
    /// is swapped in place for the stored message once confirmed.
    pub async fn send_message(&self, content: &str) -> Result<Message> {
        let content = validate(content, MAX_MESSAGE_LENGTH)?;
        let pending = PendingMessage {
            client_id: Uuid::new_v4(),
            sender_id: self.inner.user_id.clone(),
            receiver_id: self.inner.partner_id.clone(),
            content,
            created_at: self.inner.options.clock.now(),
        };

        let generation = {
            let mut state = self.inner.lock_state();
            if !state.open {
                return Err(ChatError::Closed);
            }
            state.messages.push(LocalMessage::Pending(pending.clone()));
            state.generation
        };
        let mut guard = PendingGuard {
            inner: &self.inner,
            client_id: pending.client_id,
            armed: true,
        };

        let result = self
            .inner
            .store
            .insert(NewMessage {
                sender_id: pending.sender_id.clone(),
                receiver_id: pending.receiver_id.clone(),
                content: pending.content.clone(),
            })
            .await;
        guard.armed = false;

        let mut state = self.inner.lock_state();
        if state.generation != generation {
            return result;
        }
        match result {
            Ok(message) => {
                state.confirm(pending.client_id, message.clone());
                Ok(message)
            }
            Err(err) => {
                state.remove_pending(pending.client_id);
                state.error = Some(err.clone());
                warn!(error = %err, rate_limited = err.is_rate_limited(), "message insert failed");
                Err(err)
            }
        }
    }

    pub async fn edit_message(&self, id: &str, content: &str) -> Result<Message> {
        let content = validate(content, MAX_MESSAGE_LENGTH)?;
        let updated = self
            .inner
            .store
            .update_content(id, &self.inner.user_id, &content)
            .await?;
        self.inner.lock_state().replace(&updated);
        Ok(updated)
    }

    pub async fn delete_message(&self, id: &str) -> Result<()> {
        let deleted = self.inner.store.soft_delete(id, &self.inner.user_id).await?;
        self.inner.lock_state().replace(&deleted);
        Ok(())
    }

    /// Marks every unread incoming message read. Returns how many changed.
    pub async fn mark_as_read(&self) -> Result<usize> {
        self.inner.mark_as_read().await
    }

    /// Entry point for change-feed events.
    pub async fn handle_change(&self, event: ChangeEvent) {
        self.inner.handle_change(event).await;
    }

    pub fn messages(&self) -> Vec<LocalMessage> {
        self.inner.lock_state().messages.clone()
    }

    pub fn views(&self) -> Vec<MessageView> {
        self.inner
            .lock_state()
            .messages
            .iter()
            .map(|message| MessageView::from_local(message, &self.inner.user_id))
            .collect()
    }

    /// Views bucketed by calendar day (UTC), oldest day first.
    pub fn grouped_by_date(&self) -> Vec<(NaiveDate, Vec<MessageView>)> {
        let mut groups: BTreeMap<NaiveDate, Vec<MessageView>> = BTreeMap::new();
        for view in self.views() {
            groups.entry(view.date()).or_default().push(view);
        }
        groups.into_iter().collect()
    }

    pub fn has_more(&self) -> bool {
        self.inner.lock_state().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock_state().loading
    }

    pub fn error(&self) -> Option<ChatError> {
        self.inner.lock_state().error.clone()
    }

    pub fn dismiss_error(&self) {
        self.inner.lock_state().error = None;
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.lock_state().connection
    }
}

/// Drops the optimistic entry when a send is abandoned before the store
/// answers.
struct PendingGuard<'a> {
    inner: &'a WindowInner,
    client_id: Uuid,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock_state().remove_pending(self.client_id);
        }
    }
}

#[async_trait]
impl MessageSender for ChatWindow {
    async fn send(&self, content: &str) -> Result<()> {
        self.send_message(content).await.map(|_| ())
    }
}

impl WindowInner {
    fn lock_state(&self) -> MutexGuard<'_, WindowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_subscription(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let mut changes = self.store.subscribe(&self.user_id, &self.partner_id);
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.lock_state().generation != generation {
                    break;
                }
                inner.handle_change(event).await;
            }

            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock_state();
                if state.generation == generation {
                    state.connection = ConnectionStatus::Disconnected;
                }
            }
        })
    }

    async fn handle_change(&self, event: ChangeEvent) {
        if !event.involves(&self.user_id, &self.partner_id) {
            return;
        }

        let needs_read = {
            let mut state = self.lock_state();
            if !state.open {
                return;
            }
            match event {
                ChangeEvent::Inserted(message) => {
                    let incoming_unread = message.is_unread_for(&self.user_id);
                    let merge = state.merge_incoming(message, &self.user_id);
                    debug!(?merge, "realtime insert");
                    incoming_unread && merge != Merge::Duplicate
                }
                ChangeEvent::Updated(message) => {
                    state.replace(&message);
                    false
                }
                ChangeEvent::Status(status) => {
                    debug!(?status, "change feed status");
                    state.connection = status;
                    false
                }
            }
        };

        if needs_read && let Err(err) = self.mark_as_read().await {
            warn!(error = %err, "failed to mark incoming message read");
        }
    }

    async fn mark_as_read(&self) -> Result<usize> {
        let (at, generation) = {
            let state = self.lock_state();
            (self.options.clock.now(), state.generation)
        };

        let updated = self
            .store
            .mark_read(&self.user_id, &self.partner_id, at)
            .await?;

        {
            let mut state = self.lock_state();
            if state.generation == generation {
                for message in &updated {
                    state.replace(message);
                }
            }
        }

        if !updated.is_empty() {
            debug!(count = updated.len(), "messages marked read");
            if let Some(on_read) = &self.options.on_read {
                on_read(updated.len());
            }
        }
        Ok(updated.len())
    }
}

impl WindowState {
    fn position_of(&self, id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.server_id() == Some(id))
    }

    fn pending_position(&self, client_id: Uuid) -> Option<usize> {
        self.messages.iter().position(|message| {
            matches!(message, LocalMessage::Pending(pending) if pending.client_id == client_id)
        })
    }

    /// Swaps the pending entry for the stored message, unless the feed
    /// already delivered it.
    fn confirm(&mut self, client_id: Uuid, message: Message) {
        let pending = self.pending_position(client_id);
        if self.position_of(&message.id).is_some() {
            if let Some(index) = pending {
                self.messages.remove(index);
            }
            return;
        }

        match pending {
            Some(index) => self.messages[index] = LocalMessage::Confirmed(message),
            None => self.insert_sorted(message),
        }
    }

    fn remove_pending(&mut self, client_id: Uuid) {
        if let Some(index) = self.pending_position(client_id) {
            self.messages.remove(index);
        }
    }

    fn merge_incoming(&mut self, message: Message, user_id: &str) -> Merge {
        if self.position_of(&message.id).is_some() {
            return Merge::Duplicate;
        }

        if message.sender_id == user_id {
            let window_ms = u64::try_from(PENDING_MATCH_WINDOW.as_millis()).unwrap_or(u64::MAX);
            let matching = self.messages.iter().position(|local| match local {
                LocalMessage::Pending(pending) => {
                    pending.content == message.content
                        && pending.sender_id == message.sender_id
                        && millis_between(pending.created_at, message.created_at)
                            .max(millis_between(message.created_at, pending.created_at))
                            <= window_ms
                }
                LocalMessage::Confirmed(_) => false,
            });
            if let Some(index) = matching {
                self.messages[index] = LocalMessage::Confirmed(message);
                return Merge::ReplacedPending;
            }
        }

        self.insert_sorted(message);
        Merge::Inserted
    }

    fn insert_sorted(&mut self, message: Message) {
        let index = self
            .messages
            .iter()
            .rposition(|local| local.created_at() <= message.created_at)
            .map_or(0, |index| index + 1);
        self.messages.insert(index, LocalMessage::Confirmed(message));
    }

    /// Replaces a confirmed entry in place. Read receipts never revert.
    fn replace(&mut self, updated: &Message) {
        let Some(index) = self.position_of(&updated.id) else {
            return;
        };
        let mut next = updated.clone();
        if let LocalMessage::Confirmed(current) = &self.messages[index]
            && next.read_at.is_none()
        {
            next.read_at = current.read_at;
        }
        self.messages[index] = LocalMessage::Confirmed(next);
    }
}

impl Drop for WindowInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = state.subscription.take() {
            task.abort();
        }
    }
}
