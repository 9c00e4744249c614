//! Conversation polling: one repeating timer fetching the active
//! conversation and appending whatever the log has not seen yet.

use crate::api::ChatBackend;
use crate::config::PollSettings;
use crate::error::ApiError;
use crate::message_log::MessageLog;
use crate::models::Message;
use crate::validation::{validate_attachments, Attachment};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a single poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The fetch completed; this many messages were new.
    Appended(usize),
    /// Another fetch was still outstanding.
    Skipped,
    /// No conversation is being polled.
    Idle,
    /// Polling moved on (or stopped) while the fetch was outstanding.
    Discarded,
    /// The fetch failed. `surfaced` is false for expected polling errors.
    Failed { surfaced: bool },
}

/// The log as seen at one instant. `epoch` changes whenever the log is
/// cleared, so a reader can tell a fresh log from a grown one.
#[derive(Debug, Clone, PartialEq)]
pub struct LogView {
    pub epoch: u64,
    pub messages: Vec<Message>,
}

struct ActivePoll {
    conversation_id: String,
    handle: JoinHandle<()>,
}

pub struct ConversationPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    backend: Arc<dyn ChatBackend>,
    settings: PollSettings,
    log: Mutex<MessageLog>,
    active: Mutex<Option<ActivePoll>>,
    generation: AtomicU64,
    in_flight: AtomicBool,
    sending: AtomicUsize,
    epoch: AtomicU64,
    last_error: Mutex<Option<String>>,
    revision: watch::Sender<u64>,
}

/// Clears the in-flight flag even if the poll future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts one outstanding send for as long as it lives.
struct Sending<'a>(&'a AtomicUsize);

impl<'a> Sending<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConversationPoller {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: PollSettings) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(PollerInner {
                backend,
                settings,
                log: Mutex::new(MessageLog::new()),
                active: Mutex::new(None),
                generation: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                sending: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
                last_error: Mutex::new(None),
                revision,
            }),
        }
    }

    /// Replace any running timer with one polling `conversation_id`.
    pub fn start_polling(&self, conversation_id: impl Into<String>) {
        let conversation_id = conversation_id.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let period = self.inner.settings.interval;
        let inner = Arc::clone(&self.inner);
        let id = conversation_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let inner = Arc::clone(&inner);
                let id = id.clone();
                tokio::spawn(async move {
                    inner.poll(&id, generation).await;
                });
            }
        });

        let previous = self.inner.active.lock().replace(ActivePoll {
            conversation_id: conversation_id.clone(),
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(previous = %previous.conversation_id, "replaced poll timer");
        }
        info!(conversation = %conversation_id, "polling started");
    }

    /// Disarm the timer. Safe to call when not polling.
    pub fn stop_polling(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(active) = self.inner.active.lock().take() {
            active.handle.abort();
            info!(conversation = %active.conversation_id, "polling stopped");
        }
    }

    pub fn active_conversation(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.conversation_id.clone())
    }

    /// Run one tick against the active conversation right now.
    pub async fn poll_once(&self) -> PollOutcome {
        let target = {
            let active = self.inner.active.lock();
            active.as_ref().map(|active| {
                (
                    active.conversation_id.clone(),
                    self.inner.generation.load(Ordering::SeqCst),
                )
            })
        };
        match target {
            Some((id, generation)) => self.inner.poll(&id, generation).await,
            None => PollOutcome::Idle,
        }
    }

    /// Optimistically log `text` as a user message, then submit it. Errors
    /// are recorded and returned; the local entry stays.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
        conversation_id: Option<&str>,
    ) -> Result<Value, ApiError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ApiError::Validation("Message cannot be empty".to_string()));
        }
        validate_attachments(attachments)?;

        let _sending = Sending::enter(&self.inner.sending);
        *self.inner.last_error.lock() = None;
        self.inner.append_local(Message::user(text));

        let result = self
            .inner
            .backend
            .send_message(text, attachments, conversation_id)
            .await;

        result.map_err(|err| {
            error!(%err, "failed to send message");
            *self.inner.last_error.lock() = Some("Failed to send message".to_string());
            err
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.log.lock().messages().to_vec()
    }

    /// Messages together with the clear epoch, read under one lock.
    pub fn log_view(&self) -> LogView {
        let log = self.inner.log.lock();
        LogView {
            epoch: self.inner.epoch.load(Ordering::Acquire),
            messages: log.messages().to_vec(),
        }
    }

    /// Drop every logged message, e.g. when switching conversations.
    pub fn clear(&self) {
        {
            let mut log = self.inner.log.lock();
            log.clear();
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.bump_revision();
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// True while any send is outstanding.
    pub fn is_sending(&self) -> bool {
        self.inner.sending.load(Ordering::Acquire) > 0
    }

    /// Ticks once per change to the log.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

impl Drop for ConversationPoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl PollerInner {
    async fn poll(&self, conversation_id: &str, generation: u64) -> PollOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(conversation = conversation_id, "previous poll still in flight");
            return PollOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let result = self.backend.conversation_messages(conversation_id).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return PollOutcome::Discarded;
        }

        match result {
            Ok(messages) => {
                let added = self.log.lock().merge(messages);
                if added > 0 {
                    debug!(conversation = conversation_id, added, "new messages");
                    self.bump_revision();
                }
                PollOutcome::Appended(added)
            }
            Err(err) if err.is_expected_while_polling() => {
                debug!(conversation = conversation_id, %err, "poll failed");
                PollOutcome::Failed { surfaced: false }
            }
            Err(err) => {
                warn!(conversation = conversation_id, %err, "polling error");
                *self.last_error.lock() = Some(err.to_string());
                PollOutcome::Failed { surfaced: true }
            }
        }
    }

    fn append_local(&self, message: Message) {
        self.log.lock().push(message);
        self.bump_revision();
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}
