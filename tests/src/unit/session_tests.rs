use crate::support::{usage, FakeBackend};
use reelchat_core::{ApiError, TokenSession, TokenSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

fn session(backend: &Arc<FakeBackend>) -> TokenSession {
    TokenSession::new(backend.clone(), TokenSettings::default())
}

#[tokio::test(start_paused = true)]
async fn fresh_record_is_served_from_cache() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Ok(usage(90)));
    let session = session(&backend);

    let first = session.fetch_token(false).await.expect("first fetch");
    time::sleep(Duration::from_secs(4)).await;
    let second = session.fetch_token(false).await.expect("cached fetch");

    assert_eq!(first, second);
    assert_eq!(backend.token_calls(), 1);
    assert_eq!(second.tokens_remaining(), Some(90));
}

#[tokio::test(start_paused = true)]
async fn forced_fetch_bypasses_cache() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Ok(usage(90))).push_tokens(Ok(usage(80)));
    let session = session(&backend);

    session.fetch_token(false).await.expect("first fetch");
    let forced = session.fetch_token(true).await.expect("forced fetch");

    assert_eq!(backend.token_calls(), 2);
    assert_eq!(forced.tokens_remaining(), Some(80));
}

#[tokio::test(start_paused = true)]
async fn stale_record_triggers_network_call() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Ok(usage(90))).push_tokens(Ok(usage(70)));
    let session = session(&backend);

    session.fetch_token(false).await.expect("first fetch");
    time::sleep(Duration::from_secs(31)).await;
    let refreshed = session.fetch_token(false).await.expect("refresh");

    assert_eq!(backend.token_calls(), 2);
    assert_eq!(refreshed.tokens_remaining(), Some(70));
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_then_fall_back_to_cached_record() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Ok(usage(50)));
    for _ in 0..4 {
        backend.push_tokens(Err(ApiError::Network("connection reset".into())));
    }
    let session = session(&backend);

    let original = session.fetch_token(true).await.expect("seed");
    let fallback = session.fetch_token(true).await;

    assert_eq!(fallback, Some(original));
    let calls = backend.token_call_times();
    assert_eq!(calls.len(), 5);
    let gaps: Vec<u128> = calls[1..]
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(gaps, [1000, 2000, 4000]);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.retry_count, 3);
    assert!(snapshot
        .last_error
        .as_deref()
        .is_some_and(|err| err.contains("connection reset")));
    assert!(!snapshot.is_loading);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_without_cache_return_none() {
    let backend = Arc::new(FakeBackend::new());
    let session = session(&backend);

    let started = Instant::now();
    assert_eq!(session.fetch_token(false).await, None);
    assert_eq!(backend.token_calls(), 4);
    assert_eq!(started.elapsed(), Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn success_after_failure_resets_retry_counter() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .push_tokens(Err(ApiError::Timeout))
        .push_tokens(Ok(usage(10)));
    let session = session(&backend);

    let record = session.fetch_token(true).await.expect("recovered");
    assert_eq!(record.tokens_remaining(), Some(10));
    assert_eq!(session.snapshot().retry_count, 0);
    assert_eq!(backend.token_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_response_times_out() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .default_tokens(usage(1))
        .token_delay(Duration::from_secs(10));
    let settings = TokenSettings {
        max_retries: 0,
        ..TokenSettings::default()
    };
    let session = TokenSession::new(backend.clone(), settings);

    let started = Instant::now();
    assert_eq!(session.fetch_token(true).await, None);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(
        session.snapshot().last_error.as_deref(),
        Some("Request timed out")
    );
}

#[tokio::test(start_paused = true)]
async fn start_session_waits_for_warm_up_then_refreshes_periodically() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_tokens(usage(42));
    let session = session(&backend);

    let started = Instant::now();
    session.start_session().await;
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(backend.token_calls(), 1);
    assert!(session.is_authenticated());
    assert!(session.is_refreshing());
    assert!(!session.snapshot().is_loading);

    time::sleep(Duration::from_secs(61)).await;
    assert_eq!(backend.token_calls(), 2);
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.token_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_ends_session_and_stops_timer() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .push_tokens(Ok(usage(42)))
        .push_tokens(Err(ApiError::Unauthorized))
        .default_tokens(usage(41));
    let session = session(&backend);

    session.start_session().await;
    assert!(session.token().is_some());

    time::sleep(Duration::from_secs(61)).await;
    assert_eq!(backend.token_calls(), 2);
    assert!(!session.is_authenticated());
    assert_eq!(session.token(), None);
    assert!(!session.is_refreshing());

    time::sleep(Duration::from_secs(600)).await;
    assert_eq!(backend.token_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_is_never_retried() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Err(ApiError::Unauthorized));
    let session = session(&backend);

    let started = Instant::now();
    assert_eq!(session.fetch_token(true).await, None);
    assert_eq!(backend.token_calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn stop_session_discards_record_and_disarms() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_tokens(usage(42));
    let session = session(&backend);

    session.start_session().await;
    session.stop_session();

    assert!(!session.is_authenticated());
    assert_eq!(session.token(), None);
    assert!(!session.is_refreshing());
    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(backend.token_calls(), 1);

    session.stop_session();
    assert!(!session.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_state_changes() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_tokens(usage(7));
    let session = session(&backend);
    let mut updates = session.subscribe();

    session.fetch_token(true).await;

    assert!(updates.has_changed().expect("sender alive"));
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(
        snapshot.token.and_then(|record| record.tokens_remaining()),
        Some(7)
    );
}

#[tokio::test(start_paused = true)]
async fn fetch_completing_after_stop_is_dropped() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .default_tokens(usage(42))
        .token_delay(Duration::from_secs(1));
    let session = Arc::new(session(&backend));

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_token(true).await }
    });
    time::sleep(Duration::from_millis(500)).await;
    session.stop_session();

    assert_eq!(pending.await.expect("join"), None);
    assert_eq!(session.token(), None);
    assert!(!session.is_authenticated());
    assert!(!session.snapshot().is_loading);
}

#[tokio::test(start_paused = true)]
async fn stop_during_warm_up_fetch_leaves_session_empty() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .default_tokens(usage(42))
        .token_delay(Duration::from_secs(1));
    let session = Arc::new(session(&backend));

    let starter = tokio::spawn({
        let session = session.clone();
        async move { session.start_session().await }
    });
    time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(backend.token_calls(), 1);
    session.stop_session();
    starter.await.expect("join");

    assert_eq!(session.token(), None);
    assert!(!session.is_authenticated());
    assert!(!session.is_refreshing());
    time::sleep(Duration::from_secs(120)).await;
    assert_eq!(backend.token_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_abandons_retries() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_tokens(Err(ApiError::Network("connection reset".into())));
    backend.default_tokens(usage(42));
    let session = Arc::new(session(&backend));

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_token(true).await }
    });
    time::sleep(Duration::from_millis(500)).await;
    session.stop_session();

    assert_eq!(pending.await.expect("join"), None);
    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.token_calls(), 1);
    assert_eq!(session.token(), None);
}
