//! Token session: a cached usage record kept warm by a refresh timer.
//!
//! Fetches go through a bounded retry loop with exponential backoff and fall
//! back to the last good record, so a slow refresh never blanks the display.
//! A 401 from the service ends the session.

use crate::api::ChatBackend;
use crate::config::TokenSettings;
use crate::error::ApiError;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Usage/quota payload as returned by `GET /user/tokens`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub payload: Value,
    pub fetched_at: Instant,
}

impl TokenRecord {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            fetched_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, window: std::time::Duration) -> bool {
        self.fetched_at.elapsed() < window
    }

    pub fn tokens_remaining(&self) -> Option<i64> {
        self.payload.get("tokens_remaining").and_then(Value::as_i64)
    }

    pub fn tokens_used(&self) -> Option<i64> {
        self.payload.get("tokens_used").and_then(Value::as_i64)
    }

    pub fn subscription_tier(&self) -> Option<&str> {
        self.payload.get("subscription_tier").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub token: Option<TokenRecord>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

pub struct TokenSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn ChatBackend>,
    settings: TokenSettings,
    state: Mutex<SessionSnapshot>,
    timer: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    updates: watch::Sender<SessionSnapshot>,
}

impl TokenSession {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: TokenSettings) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(SessionInner {
                backend,
                settings,
                state: Mutex::new(SessionSnapshot::default()),
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.lock().clone()
    }

    /// Receives a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().is_authenticated
    }

    pub fn token(&self) -> Option<TokenRecord> {
        self.inner.state.lock().token.clone()
    }

    /// Whether the refresh timer is armed.
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Mark the session authenticated, wait out the warm-up delay, force a
    /// fetch and arm the periodic refresh.
    pub async fn start_session(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.disarm();
        self.inner.update(|state| {
            state.is_authenticated = true;
            state.is_loading = true;
        });
        info!("token session started");

        time::sleep(self.inner.settings.warmup_delay).await;
        if !self.inner.is_current(generation) {
            debug!("session restarted or stopped during warm-up");
            return;
        }

        self.inner.fetch_token(true).await;
        if self.inner.is_current(generation) && self.is_authenticated() {
            self.inner.arm(generation);
        }
        self.inner.update(|state| state.is_loading = false);
    }

    /// Disarm the refresh timer and forget the cached record.
    pub fn stop_session(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.disarm();
        self.inner.update(|state| {
            state.is_authenticated = false;
            state.is_loading = false;
            state.token = None;
            state.retry_count = 0;
        });
        info!("token session stopped");
    }

    /// Return the cached record when fresh, otherwise ask the service. Never
    /// fails: errors end up in [`SessionSnapshot::last_error`] and the last
    /// known record (if any) is returned instead.
    pub async fn fetch_token(&self, force_refresh: bool) -> Option<TokenRecord> {
        self.inner.fetch_token(force_refresh).await
    }
}

impl Drop for TokenSession {
    fn drop(&mut self) {
        self.inner.disarm();
    }
}

impl SessionInner {
    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        let snapshot = {
            let mut state = self.state.lock();
            apply(&mut state);
            state.clone()
        };
        self.updates.send_replace(snapshot);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn arm(self: &Arc<Self>, generation: u64) {
        let period = self.settings.refresh_interval;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !inner.is_current(generation) || !inner.state.lock().is_authenticated {
                    break;
                }
                inner.fetch_token(false).await;
            }
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn disarm(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }

    /// Results that land after the session was stopped or restarted are
    /// dropped without touching state.
    async fn fetch_token(&self, force_refresh: bool) -> Option<TokenRecord> {
        let generation = self.generation.load(Ordering::SeqCst);
        if !force_refresh {
            let state = self.state.lock();
            if let Some(record) = state
                .token
                .as_ref()
                .filter(|record| record.is_fresh(self.settings.cache_window))
            {
                debug!("token cache hit");
                return Some(record.clone());
            }
        }

        self.update(|state| {
            state.is_loading = true;
            state.last_error = None;
            state.retry_count = 0;
        });

        loop {
            let outcome = match time::timeout(
                self.settings.request_timeout,
                self.backend.fetch_tokens(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout),
            };
            if !self.is_current(generation) {
                debug!("session changed during token fetch, dropping result");
                return None;
            }

            match outcome {
                Ok(payload) => {
                    let record = TokenRecord::new(payload);
                    self.update(|state| {
                        state.token = Some(record.clone());
                        state.retry_count = 0;
                        state.is_loading = false;
                    });
                    debug!("token record refreshed");
                    return Some(record);
                }
                Err(ApiError::Unauthorized) => {
                    info!("token fetch unauthorized, ending session");
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    self.disarm();
                    self.update(|state| {
                        state.is_authenticated = false;
                        state.is_loading = false;
                        state.token = None;
                        state.retry_count = 0;
                    });
                    return None;
                }
                Err(err) => {
                    let attempt = {
                        let mut state = self.state.lock();
                        state.last_error = Some(err.to_string());
                        if state.retry_count < self.settings.max_retries {
                            state.retry_count += 1;
                            Some(state.retry_count)
                        } else {
                            None
                        }
                    };
                    self.updates.send_replace(self.state.lock().clone());

                    match attempt {
                        Some(attempt) => {
                            let delay = self.settings.backoff_delay(attempt);
                            warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "token fetch failed, retrying");
                            time::sleep(delay).await;
                            if !self.is_current(generation) {
                                debug!("session changed during backoff, giving up");
                                return None;
                            }
                        }
                        None => {
                            warn!(%err, "token fetch retries exhausted, using cached record");
                            let mut fallback = None;
                            self.update(|state| {
                                state.is_loading = false;
                                fallback = state.token.clone();
                            });
                            return fallback;
                        }
                    }
                }
            }
        }
    }
}
