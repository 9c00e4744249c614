use crate::support::{bot, FakeBackend};
use reelchat_core::validation::Attachment;
use reelchat_core::{
    ApiError, ConversationPoller, Message, MessageKind, PollOutcome, PollSettings,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

fn poller(backend: &Arc<FakeBackend>) -> ConversationPoller {
    ConversationPoller::new(backend.clone(), PollSettings::default())
}

fn contents(poller: &ConversationPoller) -> Vec<String> {
    poller.messages().into_iter().map(|m| m.content).collect()
}

#[tokio::test(start_paused = true)]
async fn repeated_poll_does_not_duplicate() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_messages(vec![bot("hi", "T1")]);
    let poller = poller(&backend);

    poller.start_polling("c1");
    time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        poller.messages(),
        vec![Message::new(MessageKind::Bot, "hi", "T1")]
    );

    time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(poller.messages().len(), 1);
    assert_eq!(backend.message_calls(), ["c1", "c1"]);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_fetched_before_first_interval() {
    let backend = Arc::new(FakeBackend::new());
    let poller = poller(&backend);

    poller.start_polling("c1");
    time::sleep(Duration::from_millis(900)).await;
    assert!(backend.message_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn appends_only_the_delta_in_received_order() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .push_messages(Ok(vec![bot("a", "T1"), bot("b", "T2")]))
        .push_messages(Ok(vec![
            bot("a", "T1"),
            bot("c", "T3"),
            bot("b", "T2"),
            bot("d", "T4"),
        ]));
    let poller = poller(&backend);
    poller.start_polling("c1");

    assert_eq!(poller.poll_once().await, PollOutcome::Appended(2));
    assert_eq!(poller.poll_once().await, PollOutcome::Appended(2));
    assert_eq!(contents(&poller), ["a", "b", "c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn overlapping_tick_is_skipped() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .default_messages(vec![bot("slow", "T1")])
        .message_delay(Duration::from_millis(500));
    let poller = poller(&backend);
    poller.start_polling("c1");

    let (first, second) = tokio::join!(poller.poll_once(), poller.poll_once());
    assert_eq!(first, PollOutcome::Appended(1));
    assert_eq!(second, PollOutcome::Skipped);
    assert_eq!(backend.message_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_drops_ticks_while_fetch_outstanding() {
    let backend = Arc::new(FakeBackend::new());
    backend.message_delay(Duration::from_millis(2500));
    let poller = poller(&backend);

    poller.start_polling("c1");
    time::sleep(Duration::from_millis(5500)).await;

    // Fetches start at 1s and 4s; the ticks at 2s, 3s and 5s find one in flight.
    assert_eq!(backend.message_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn expected_errors_stay_quiet() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .push_messages(Err(ApiError::NotFound("conversation not found".into())))
        .push_messages(Err(ApiError::Timeout));
    let poller = poller(&backend);
    poller.start_polling("c1");

    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Failed { surfaced: false }
    );
    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Failed { surfaced: false }
    );
    assert_eq!(poller.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn unexpected_errors_are_surfaced_and_polling_continues() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .push_messages(Err(ApiError::Service("quota exceeded".into())))
        .default_messages(vec![bot("back", "T9")]);
    let poller = poller(&backend);

    poller.start_polling("c1");
    time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(poller.last_error().as_deref(), Some("quota exceeded"));
    assert!(poller.messages().is_empty());

    time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(contents(&poller), ["back"]);
}

#[tokio::test(start_paused = true)]
async fn stop_polling_is_idempotent_and_final() {
    let backend = Arc::new(FakeBackend::new());
    let poller = poller(&backend);

    poller.stop_polling();
    poller.start_polling("c1");
    time::sleep(Duration::from_millis(1100)).await;
    poller.stop_polling();
    poller.stop_polling();

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.message_calls().len(), 1);
    assert_eq!(poller.active_conversation(), None);
    assert_eq!(poller.poll_once().await, PollOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn switching_conversation_replaces_timer() {
    let backend = Arc::new(FakeBackend::new());
    let poller = poller(&backend);

    poller.start_polling("c1");
    time::sleep(Duration::from_millis(1100)).await;
    poller.start_polling("c2");
    time::sleep(Duration::from_millis(3050)).await;

    assert_eq!(backend.message_calls(), ["c1", "c2", "c2", "c2"]);
    assert_eq!(poller.active_conversation().as_deref(), Some("c2"));
}

#[tokio::test(start_paused = true)]
async fn results_for_abandoned_conversation_are_discarded() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .default_messages(vec![bot("old", "T1")])
        .message_delay(Duration::from_millis(500));
    let poller = Arc::new(poller(&backend));
    poller.start_polling("c1");

    let pending = tokio::spawn({
        let poller = poller.clone();
        async move { poller.poll_once().await }
    });
    tokio::task::yield_now().await;
    poller.stop_polling();

    assert_eq!(pending.await.expect("join"), PollOutcome::Discarded);
    assert!(poller.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_inserts_optimistically_before_network_completes() {
    let backend = Arc::new(FakeBackend::new());
    backend.send_delay(Duration::from_secs(1));
    let poller = Arc::new(poller(&backend));

    let send = tokio::spawn({
        let poller = poller.clone();
        async move { poller.send_message("hello", &[], Some("c1")).await }
    });
    tokio::task::yield_now().await;

    assert!(!send.is_finished());
    assert!(poller.is_sending());
    let messages = poller.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::User);
    assert_eq!(messages[0].content, "hello");
    assert!(chrono::DateTime::parse_from_rfc3339(&messages[0].timestamp).is_ok());

    send.await.expect("join").expect("send");
    assert!(!poller.is_sending());
    assert_eq!(backend.sent(), [("hello".to_string(), Some("c1".to_string()))]);
}

#[tokio::test(start_paused = true)]
async fn echo_with_same_identity_is_deduplicated() {
    let backend = Arc::new(FakeBackend::new());
    let poller = poller(&backend);
    poller.start_polling("c1");

    poller
        .send_message("hello", &[], Some("c1"))
        .await
        .expect("send");
    let local = poller.messages()[0].clone();

    backend.push_messages(Ok(vec![local.clone(), bot("hi back", "T2")]));
    assert_eq!(poller.poll_once().await, PollOutcome::Appended(1));
    assert_eq!(contents(&poller), ["hello", "hi back"]);

    backend.push_messages(Ok(vec![Message::new(
        MessageKind::User,
        "hello",
        "2000-01-01T00:00:00.000Z",
    )]));
    assert_eq!(poller.poll_once().await, PollOutcome::Appended(1));
    assert_eq!(contents(&poller), ["hello", "hi back", "hello"]);
}

#[tokio::test(start_paused = true)]
async fn failed_send_keeps_local_entry_and_reports() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_send(Err(ApiError::Service("Conversation is archived".into())));
    let poller = poller(&backend);

    let err = poller
        .send_message("are you there?", &[], Some("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Service(_)));
    assert_eq!(poller.last_error().as_deref(), Some("Failed to send message"));
    assert_eq!(contents(&poller), ["are you there?"]);
}

#[tokio::test(start_paused = true)]
async fn non_video_attachment_is_rejected_locally() {
    let backend = Arc::new(FakeBackend::new());
    let poller = poller(&backend);
    let attachments = [Attachment::new("notes.pdf", "application/pdf", vec![0])];

    let err = poller
        .send_message("see attached", &attachments, Some("c1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(backend.send_calls(), 0);
    assert!(poller.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn video_attachment_is_forwarded() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_send(Ok(json!({"analysis": "queued"})));
    let poller = poller(&backend);
    let attachments = [Attachment::new("clip.mp4", "video/mp4", vec![0, 1])];

    let response = poller
        .send_message("analyse this", &attachments, None)
        .await
        .expect("send");
    assert_eq!(response["analysis"], "queued");
    assert_eq!(backend.sent(), [("analyse this".to_string(), None)]);
}

#[tokio::test(start_paused = true)]
async fn clear_empties_log_and_notifies() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_messages(vec![bot("hi", "T1")]);
    let poller = poller(&backend);
    let mut revisions = poller.subscribe();
    poller.start_polling("c1");

    poller.poll_once().await;
    assert!(revisions.has_changed().expect("sender alive"));
    revisions.borrow_and_update();

    poller.clear();
    assert!(poller.messages().is_empty());
    assert!(revisions.has_changed().expect("sender alive"));
}

#[tokio::test(start_paused = true)]
async fn overlapping_sends_keep_sending_until_last_completes() {
    let backend = Arc::new(FakeBackend::new());
    backend.send_delay(Duration::from_secs(1));
    let poller = Arc::new(poller(&backend));

    let first = tokio::spawn({
        let poller = poller.clone();
        async move { poller.send_message("one", &[], Some("c1")).await }
    });
    time::sleep(Duration::from_millis(500)).await;
    let second = tokio::spawn({
        let poller = poller.clone();
        async move { poller.send_message("two", &[], Some("c1")).await }
    });

    first.await.expect("join").expect("first send");
    assert!(poller.is_sending());
    second.await.expect("join").expect("second send");
    assert!(!poller.is_sending());
}

#[tokio::test(start_paused = true)]
async fn clear_starts_a_new_log_epoch() {
    let backend = Arc::new(FakeBackend::new());
    backend.default_messages(vec![bot("a", "T1"), bot("b", "T2")]);
    let poller = poller(&backend);
    poller.start_polling("c1");

    poller.poll_once().await;
    let before = poller.log_view();
    assert_eq!(before.messages.len(), 2);

    poller.clear();
    backend.default_messages(vec![bot("x", "T3"), bot("y", "T4"), bot("z", "T5")]);
    poller.poll_once().await;

    let after = poller.log_view();
    assert_ne!(after.epoch, before.epoch);
    assert_eq!(after.messages.len(), 3);
}
