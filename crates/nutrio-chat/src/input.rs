//! Message composer: validation, client-side rate limiting, typing signals and
//! background retry of failed sends.
//!
//! Retry attempts run on spawned tasks that only hold a weak reference to the
//! input, so dropping the last [`MessageInput`] handle stops them.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutrio_common::time::{Clock, SystemClock, millis_between};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    error::{ChatError, Result},
    rate_limit::{RATE_LIMIT_MAX_MESSAGES, RATE_LIMIT_WINDOW, SlidingWindowLimiter},
    types::{FailedMessage, TypingSignal},
    validation::{MAX_MESSAGE_LENGTH, sanitize, validate},
};

pub const MAX_RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const TYPING_TIMEOUT: Duration = Duration::from_millis(2000);

/// Delivers sanitized content. Implemented by the conversation view.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, content: &str) -> Result<()>;
}

/// Receives typing start/stop signals for the partner.
pub trait TypingNotifier: Send + Sync {
    fn notify(&self, signal: TypingSignal);
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub max_length: usize,
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub typing_debounce: Duration,
    pub typing_timeout: Duration,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_length: MAX_MESSAGE_LENGTH,
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
            rate_limit_window: RATE_LIMIT_WINDOW,
            rate_limit_max: RATE_LIMIT_MAX_MESSAGES,
            typing_debounce: TYPING_DEBOUNCE,
            typing_timeout: TYPING_TIMEOUT,
        }
    }
}

impl InputConfig {
    /// Delay before automatic attempt `attempt` (1-based): base * 2^(attempt-1).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Another send is in flight or the input is disabled.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub shift: bool,
}

impl KeyPress {
    pub fn plain(key: Key) -> Self {
        Self { key, shift: false }
    }

    pub fn shifted(key: Key) -> Self {
        Self { key, shift: true }
    }
}

#[derive(Clone)]
pub struct MessageInput {
    inner: Arc<InputInner>,
}

struct InputInner {
    sender: Arc<dyn MessageSender>,
    typing: Option<Arc<dyn TypingNotifier>>,
    clock: Arc<dyn Clock>,
    config: InputConfig,
    state: Mutex<InputState>,
}

struct InputState {
    draft: String,
    sending: bool,
    disabled: bool,
    error: Option<ChatError>,
    limiter: SlidingWindowLimiter,
    failed: Option<FailedMessage>,
    retry_task: Option<JoinHandle<()>>,
    /// Bumped whenever the failed message is replaced or cancelled so that
    /// in-flight retries can tell their result is stale.
    retry_epoch: u64,
    /// Set while a retry attempt is inside the sender. Such an attempt is
    /// never aborted, only invalidated.
    retry_in_flight: bool,
    last_typing: Option<DateTime<Utc>>,
    stop_typing_task: Option<JoinHandle<()>>,
}

impl MessageInput {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self::with_options(sender, None, Arc::new(SystemClock), InputConfig::default())
    }

    pub fn with_options(
        sender: Arc<dyn MessageSender>,
        typing: Option<Arc<dyn TypingNotifier>>,
        clock: Arc<dyn Clock>,
        config: InputConfig,
    ) -> Self {
        let limiter = SlidingWindowLimiter::new(config.rate_limit_window, config.rate_limit_max);
        Self {
            inner: Arc::new(InputInner {
                sender,
                typing,
                clock,
                config,
                state: Mutex::new(InputState {
                    draft: String::new(),
                    sending: false,
                    disabled: false,
                    error: None,
                    limiter,
                    failed: None,
                    retry_task: None,
                    retry_epoch: 0,
                    retry_in_flight: false,
                    last_typing: None,
                    stop_typing_task: None,
                }),
            }),
        }
    }

    pub fn draft(&self) -> String {
        self.inner.lock_state().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.edit(|draft| *draft = text);
    }

    pub fn error(&self) -> Option<ChatError> {
        self.inner.lock_state().error.clone()
    }

    pub fn failed_message(&self) -> Option<FailedMessage> {
        self.inner.lock_state().failed.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.inner.lock_state().sending
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner
            .lock_state()
            .retry_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.inner.lock_state().disabled = disabled;
    }

    /// Clears the visible error. A terminal failure also drops its failed
    /// message.
    pub fn dismiss_error(&self) {
        let mut state = self.inner.lock_state();
        if matches!(state.error, Some(ChatError::RetriesExhausted { .. })) {
            state.failed = None;
        }
        state.error = None;
    }

    pub fn cancel_retry(&self) {
        let mut state = self.inner.lock_state();
        state.cancel_scheduled_retry();
        if state.failed.take().is_some() {
            debug!("pending retry cancelled");
        }
    }

    /// Applies a key press. Enter without shift submits and returns the send
    /// result; anything else edits the draft.
    pub async fn handle_key(&self, press: KeyPress) -> Option<Result<SendOutcome>> {
        match press.key {
            Key::Enter if !press.shift => Some(self.send().await),
            Key::Enter => {
                self.edit(|draft| draft.push('\n'));
                None
            }
            Key::Char(c) => {
                self.edit(|draft| draft.push(c));
                None
            }
            Key::Backspace => {
                self.edit(|draft| {
                    draft.pop();
                });
                None
            }
        }
    }

    pub async fn send(&self) -> Result<SendOutcome> {
        let (content, raw, sent_at) = {
            let mut state = self.inner.lock_state();
            if state.sending || state.disabled {
                return Ok(SendOutcome::Skipped);
            }

            let content = match validate(&state.draft, self.inner.config.max_length) {
                Ok(content) => content,
                Err(err) => {
                    let err = ChatError::from(err);
                    state.error = Some(err.clone());
                    return Err(err);
                }
            };

            let resends_failed = state
                .failed
                .as_ref()
                .is_some_and(|failed| failed.content == content);
            if resends_failed && state.retry_in_flight {
                return Ok(SendOutcome::Skipped);
            }

            let now = self.inner.clock.now();
            if let Err(err) = state.limiter.check(now) {
                state.error = Some(err.clone());
                return Err(err);
            }

            if resends_failed {
                state.cancel_scheduled_retry();
            }

            state.limiter.record(now);
            state.sending = true;
            state.error = None;
            let raw = std::mem::take(&mut state.draft);
            (content, raw, now)
        };

        self.inner.stop_typing();

        let result = self.inner.sender.send(&content).await;

        let mut state = self.inner.lock_state();
        state.sending = false;
        match result {
            Ok(()) => {
                if state
                    .failed
                    .as_ref()
                    .is_some_and(|failed| failed.content == content)
                {
                    state.cancel_scheduled_retry();
                    state.failed = None;
                }
                debug!(length = content.chars().count(), "message sent");
                Ok(SendOutcome::Delivered)
            }
            Err(err) => {
                state.limiter.forget(sent_at);
                if state.draft.is_empty() {
                    state.draft = raw;
                }
                state.error = Some(err.clone());
                state.failed = Some(FailedMessage {
                    content,
                    timestamp: sent_at,
                    retry_count: 0,
                    error: err.to_string(),
                });
                state.cancel_scheduled_retry();
                warn!(error = %err, "message send failed; scheduling retry");
                self.inner.schedule_retry(&mut state, 1);
                Err(err)
            }
        }
    }

    /// Resends the failed message immediately, cancelling any scheduled
    /// attempt. Automatic retry is not re-armed on failure. Skipped while an
    /// automatic attempt is already sending.
    pub async fn retry_now(&self) -> Result<SendOutcome> {
        let (content, epoch) = {
            let mut state = self.inner.lock_state();
            if state.retry_in_flight {
                return Ok(SendOutcome::Skipped);
            }
            let Some(content) = state.failed.as_ref().map(|failed| failed.content.clone()) else {
                return Ok(SendOutcome::Skipped);
            };
            state.cancel_scheduled_retry();
            (content, state.retry_epoch)
        };

        let result = self.inner.sender.send(&content).await;

        let mut state = self.inner.lock_state();
        if state.retry_epoch != epoch {
            return result.map(|()| SendOutcome::Delivered);
        }
        match result {
            Ok(()) => {
                state.resolve_failed(&content);
                info!("failed message delivered on manual retry");
                Ok(SendOutcome::Delivered)
            }
            Err(err) => {
                if let Some(failed) = state.failed.as_mut() {
                    failed.retry_count += 1;
                    failed.error = err.to_string();
                }
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn edit<F>(&self, apply: F)
    where
        F: FnOnce(&mut String),
    {
        {
            let mut state = self.inner.lock_state();
            apply(&mut state.draft);
            if matches!(state.error, Some(ChatError::Validation(_))) {
                state.error = None;
            }
        }
        self.inner.on_keystroke();
    }
}

impl InputInner {
    fn lock_state(&self) -> MutexGuard<'_, InputState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arms the next automatic attempt. Callers invalidate any previous one
    /// first.
    fn schedule_retry(self: &Arc<Self>, state: &mut InputState, attempt: u32) {
        let delay = self.config.retry_delay(attempt);
        let epoch = state.retry_epoch;
        let weak = Arc::downgrade(self);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");

        state.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.run_retry(attempt, epoch).await;
            }
        }));
    }

    async fn run_retry(self: Arc<Self>, attempt: u32, epoch: u64) {
        let content = {
            let mut state = self.lock_state();
            if state.retry_epoch != epoch {
                return;
            }
            let Some(failed) = state.failed.as_mut() else {
                return;
            };
            failed.retry_count = attempt;
            let content = failed.content.clone();
            state.retry_in_flight = true;
            content
        };

        let result = self.sender.send(&content).await;

        let mut state = self.lock_state();
        state.retry_in_flight = false;
        if state.retry_epoch != epoch {
            return;
        }
        match result {
            Ok(()) => {
                state.resolve_failed(&content);
                info!(attempt, "failed message delivered on retry");
            }
            Err(err) => {
                if let Some(failed) = state.failed.as_mut() {
                    failed.error = err.to_string();
                }
                if attempt >= self.config.max_retry_attempts {
                    warn!(attempt, error = %err, "giving up on failed message");
                    state.retry_task = None;
                    state.error = Some(ChatError::RetriesExhausted { attempts: attempt });
                } else {
                    state.error = Some(err);
                    state.retry_task = None;
                    self.schedule_retry(&mut state, attempt + 1);
                }
            }
        }
    }

    fn on_keystroke(self: &Arc<Self>) {
        let Some(notifier) = self.typing.clone() else {
            return;
        };

        let now = self.clock.now();
        let debounce = u64::try_from(self.config.typing_debounce.as_millis()).unwrap_or(u64::MAX);
        let emit = {
            let mut state = self.lock_state();
            let emit = state
                .last_typing
                .is_none_or(|last| millis_between(last, now) > debounce);
            if emit {
                state.last_typing = Some(now);
            }

            if let Some(task) = state.stop_typing_task.take() {
                task.abort();
            }
            // Without a runtime there is no idle timer; the next send still
            // emits the stop signal.
            if let Ok(runtime) = Handle::try_current() {
                let timeout = self.config.typing_timeout;
                let stop_notifier = notifier.clone();
                let weak = Arc::downgrade(self);
                state.stop_typing_task = Some(runtime.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.lock_state().last_typing = None;
                        stop_notifier.notify(TypingSignal::StoppedTyping);
                    }
                }));
            }
            emit
        };

        if emit {
            notifier.notify(TypingSignal::Typing);
        }
    }

    fn stop_typing(&self) {
        let Some(notifier) = self.typing.as_ref() else {
            return;
        };
        {
            let mut state = self.lock_state();
            if let Some(task) = state.stop_typing_task.take() {
                task.abort();
            }
            state.last_typing = None;
        }
        notifier.notify(TypingSignal::StoppedTyping);
    }
}

impl InputState {
    /// Invalidates the scheduled retry. An attempt that is already sending is
    /// left to finish and its result is dropped by the epoch check.
    fn cancel_scheduled_retry(&mut self) {
        self.retry_epoch += 1;
        if let Some(task) = self.retry_task.take()
            && !self.retry_in_flight
        {
            task.abort();
        }
    }

    fn resolve_failed(&mut self, content: &str) {
        self.failed = None;
        self.retry_task = None;
        self.error = None;
        if sanitize(&self.draft) == content {
            self.draft.clear();
        }
    }
}

impl Drop for InputInner {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = state.retry_task.take() {
            task.abort();
        }
        if let Some(task) = state.stop_typing_task.take() {
            task.abort();
        }
    }
}
