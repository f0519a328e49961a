use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use nutrio_common::time::ManualClock;
use tokio::{sync::Semaphore, time::Instant};

use crate::{
    error::{ChatError, Result},
    input::{MessageSender, TypingNotifier},
    store::{ChangeStream, MemoryMessageStore, MessageStore},
    types::{Message, NewMessage, TypingSignal},
};

pub(crate) const ALICE: &str = "alice";
pub(crate) const BOB: &str = "bob";

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 30, 0).unwrap()
}

pub(crate) fn manual_clock() -> ManualClock {
    ManualClock::new(start_time())
}

/// Sender that fails a fixed number of times before succeeding.
pub(crate) struct ScriptedSender {
    failures_left: AtomicUsize,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedSender {
    pub(crate) fn succeeding() -> Arc<Self> {
        Self::failing(0)
    }

    pub(crate) fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(times),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send(&self, content: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((content.to_string(), Instant::now()));

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            Err(ChatError::Delivery("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    signals: Mutex<Vec<(TypingSignal, Instant)>>,
}

impl RecordingNotifier {
    pub(crate) fn signals(&self) -> Vec<TypingSignal> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .map(|(signal, _)| *signal)
            .collect()
    }
}

impl TypingNotifier for RecordingNotifier {
    fn notify(&self, signal: TypingSignal) {
        self.signals.lock().unwrap().push((signal, Instant::now()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Hold inserts before they reach the store.
    BeforeInsert,
    /// Store and publish the insert, then hold the response.
    AfterInsert,
}

/// Wraps a [`MemoryMessageStore`] with a gate and scripted insert failures.
pub(crate) struct ScriptedStore {
    pub(crate) inner: MemoryMessageStore,
    gate: Option<(Gate, Semaphore)>,
    insert_error: Mutex<Option<ChatError>>,
    hold_loads: AtomicBool,
    load_gate: Semaphore,
}

impl ScriptedStore {
    pub(crate) fn new(clock: &ManualClock) -> Arc<Self> {
        Arc::new(Self::build(clock, None))
    }

    pub(crate) fn gated(clock: &ManualClock, gate: Gate) -> Arc<Self> {
        Arc::new(Self::build(clock, Some((gate, Semaphore::new(0)))))
    }

    fn build(clock: &ManualClock, gate: Option<(Gate, Semaphore)>) -> Self {
        Self {
            inner: MemoryMessageStore::with_clock(Arc::new(clock.clone())),
            gate,
            insert_error: Mutex::new(None),
            hold_loads: AtomicBool::new(false),
            load_gate: Semaphore::new(0),
        }
    }

    pub(crate) fn release(&self) {
        if let Some((_, semaphore)) = &self.gate {
            semaphore.add_permits(1);
        }
    }

    /// Page loads started from now on wait for [`Self::release_load`].
    pub(crate) fn hold_loads(&self, hold: bool) {
        self.hold_loads.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn release_load(&self) {
        self.load_gate.add_permits(1);
    }

    pub(crate) fn fail_next_insert(&self, err: ChatError) {
        *self.insert_error.lock().unwrap() = Some(err);
    }

    async fn wait_at(&self, point: Gate) {
        if let Some((gate, semaphore)) = &self.gate
            && *gate == point
        {
            semaphore.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        self.wait_at(Gate::BeforeInsert).await;
        let scripted = self.insert_error.lock().unwrap().take();
        if let Some(err) = scripted {
            return Err(err);
        }
        let stored = self.inner.insert(message).await?;
        self.wait_at(Gate::AfterInsert).await;
        Ok(stored)
    }

    async fn load_page(
        &self,
        user_id: &str,
        partner_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        if self.hold_loads.load(Ordering::SeqCst) {
            self.load_gate.acquire().await.unwrap().forget();
        }
        self.inner.load_page(user_id, partner_id, offset, limit).await
    }

    async fn mark_read(
        &self,
        reader_id: &str,
        sender_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        self.inner.mark_read(reader_id, sender_id, at).await
    }

    async fn update_content(&self, id: &str, editor_id: &str, content: &str) -> Result<Message> {
        self.inner.update_content(id, editor_id, content).await
    }

    async fn soft_delete(&self, id: &str, requester_id: &str) -> Result<Message> {
        self.inner.soft_delete(id, requester_id).await
    }

    fn subscribe(&self, user_id: &str, partner_id: &str) -> ChangeStream {
        self.inner.subscribe(user_id, partner_id)
    }
}

/// Lets spawned tasks on the current-thread runtime make progress.
pub(crate) async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
