//! Relay engine behaviour against an in-process messenger and store.

mod common;

use async_trait::async_trait;
use common::{engine, event, FakeMessenger, DEVELOPER, OPERATOR};
use lib::channels::{ChatId, MessageId, ParseMode};
use lib::config::RelayConfig;
use lib::relay::{Escalator, RejectReason, RelayEngine, RelayResult, MAX_MESSAGE_CHARS};
use lib::store::{
    CorrelationStore, FileCorrelationStore, MemoryCorrelationStore, StoreError,
};
use std::sync::Arc;

fn memory_store() -> Arc<dyn CorrelationStore> {
    Arc::new(MemoryCorrelationStore::new())
}

#[tokio::test]
async fn user_hello_is_forwarded_and_operator_reply_routed_back() {
    let messenger = FakeMessenger::new(555);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);
    let texts = RelayConfig::default();

    let result = engine.handle(&event(1, 1001, "hello", None)).await;
    let RelayResult::Forwarded(entry) = result else {
        panic!("expected Forwarded, got {:?}", result);
    };
    assert_eq!(entry.relayed_message_id, 555);
    assert_eq!(entry.originating_user_id, 1001);
    assert_eq!(store.get(555).await, Some(1001));

    let to_operator = messenger.sent_to(OPERATOR);
    assert_eq!(to_operator.len(), 1);
    assert!(to_operator[0].text.contains("1001"));
    assert!(to_operator[0].text.ends_with("hello"));
    let to_user = messenger.sent_to(1001);
    assert_eq!(to_user.len(), 1);
    assert_eq!(to_user[0].text, texts.ack_success);
    assert_eq!(to_user[0].reply_to, Some(10));

    let result = engine.handle(&event(2, OPERATOR, "hi back", Some(555))).await;
    assert!(matches!(result, RelayResult::Replied(1001)), "{:?}", result);

    let to_user = messenger.sent_to(1001);
    assert_eq!(to_user.len(), 2);
    assert!(to_user[1].text.contains("hi back"));
    let to_operator = messenger.sent_to(OPERATOR);
    assert_eq!(to_operator.len(), 2);
    assert_eq!(to_operator[1].text, texts.ack_success);
    assert!(messenger.sent_to(DEVELOPER).is_empty());
}

#[tokio::test]
async fn reply_to_unknown_message_is_rejected_without_sending_to_users() {
    let messenger = FakeMessenger::new(1);
    let engine = engine(messenger.clone(), memory_store(), None);

    let result = engine.handle(&event(1, OPERATOR, "anyone?", Some(777))).await;
    assert!(matches!(
        result,
        RelayResult::Rejected(RejectReason::NotForwarded { replied_to: 777 })
    ));

    let sent = messenger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.chat_id, OPERATOR);
    assert_eq!(sent[0].1.text, RelayConfig::default().ack_not_found);
}

#[tokio::test]
async fn operator_plain_message_is_forwarded_like_a_user_message() {
    let messenger = FakeMessenger::new(300);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);

    let result = engine.handle(&event(1, OPERATOR, "note to self", None)).await;
    let RelayResult::Forwarded(entry) = result else {
        panic!("expected Forwarded, got {:?}", result);
    };
    assert_eq!(entry.relayed_message_id, 300);
    assert_eq!(entry.originating_user_id, OPERATOR);
    assert_eq!(store.get(300).await, Some(OPERATOR));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn user_reply_is_forwarded_not_routed() {
    let messenger = FakeMessenger::new(555);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);

    engine.handle(&event(1, 1001, "hello", None)).await;
    // A different user quoting some message id that happens to be tracked.
    let result = engine.handle(&event(2, 2002, "me too", Some(555))).await;
    assert!(matches!(result, RelayResult::Forwarded(_)), "{:?}", result);
    assert!(messenger
        .sent_to(1001)
        .iter()
        .all(|m| !m.text.contains("me too")));
}

#[tokio::test]
async fn start_command_greets_without_touching_the_store() {
    let messenger = FakeMessenger::new(1);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);

    let result = engine.handle(&event(1, 1001, "/start", None)).await;
    assert!(matches!(result, RelayResult::Greeted));
    let sent = messenger.sent_to(1001);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, RelayConfig::default().greeting);
    assert_eq!(store.len().await, 0);
    assert!(messenger.sent_to(OPERATOR).is_empty());
}

#[tokio::test]
async fn unknown_command_gets_a_negative_ack() {
    let messenger = FakeMessenger::new(1);
    let engine = engine(messenger.clone(), memory_store(), None);

    let result = engine.handle(&event(1, 1001, "/frobnicate", None)).await;
    assert!(matches!(
        result,
        RelayResult::Rejected(RejectReason::UnknownCommand(ref name)) if name == "frobnicate"
    ));
    let sent = messenger.sent_to(1001);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, RelayConfig::default().ack_unknown_command);
}

#[tokio::test]
async fn reply_send_failure_escalates_exactly_once() {
    let messenger = FakeMessenger::new(555);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);
    engine.handle(&event(1, 1001, "hello", None)).await;

    messenger.fail_chat(1001);
    let result = engine.handle(&event(2, OPERATOR, "hi back", Some(555))).await;
    assert!(matches!(result, RelayResult::Escalated(_)), "{:?}", result);

    let reports = messenger.sent_to(DEVELOPER);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].parse_mode, Some(ParseMode::Html));
    assert!(reports[0].text.contains("update = "));
    assert!(reports[0].text.contains("operator reply"));
    assert!(reports[0].text.contains("caused by: telegram api error"));
    assert!(reports[0].text.contains("correlation[555] = Some(1001)"));

    let to_operator = messenger.sent_to(OPERATOR);
    assert_eq!(
        to_operator.last().map(|m| m.text.clone()),
        Some(RelayConfig::default().ack_failure)
    );
}

#[tokio::test]
async fn failing_escalation_is_swallowed_and_not_retried() {
    let messenger = FakeMessenger::new(555);
    let engine = engine(messenger.clone(), memory_store(), None);
    engine.handle(&event(1, 1001, "hello", None)).await;

    messenger.fail_chat(1001);
    messenger.fail_chat(DEVELOPER);
    let result = engine.handle(&event(2, OPERATOR, "hi back", Some(555))).await;
    assert!(matches!(result, RelayResult::Escalated(_)));
    assert_eq!(messenger.attempts_to(DEVELOPER), 1);

    // The engine keeps working afterwards.
    let result = engine.handle(&event(3, 2002, "still there?", None)).await;
    assert!(matches!(result, RelayResult::Forwarded(_)));
}

#[tokio::test]
async fn forward_send_failure_records_nothing_and_acks_failure() {
    let messenger = FakeMessenger::new(1);
    let store = memory_store();
    let engine = engine(messenger.clone(), store.clone(), None);
    messenger.fail_chat(OPERATOR);

    let result = engine.handle(&event(1, 1001, "hello", None)).await;
    assert!(matches!(result, RelayResult::Escalated(_)));
    assert_eq!(store.len().await, 0);
    let to_user = messenger.sent_to(1001);
    assert_eq!(to_user.len(), 1);
    assert_eq!(to_user[0].text, RelayConfig::default().ack_failure);
    assert_eq!(messenger.sent_to(DEVELOPER).len(), 1);
}

struct BrokenStore;

#[async_trait]
impl CorrelationStore for BrokenStore {
    async fn put(&self, _: MessageId, _: ChatId) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: "/dev/full".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        })
    }

    async fn get(&self, _: MessageId) -> Option<ChatId> {
        None
    }

    async fn len(&self) -> usize {
        0
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn store_failure_withholds_success_ack() {
    let messenger = FakeMessenger::new(1);
    let engine = engine(messenger.clone(), Arc::new(BrokenStore), None);

    let result = engine.handle(&event(1, 1001, "hello", None)).await;
    assert!(matches!(result, RelayResult::Escalated(_)));
    let to_user = messenger.sent_to(1001);
    assert_eq!(to_user.len(), 1);
    assert_eq!(to_user[0].text, RelayConfig::default().ack_failure);
    let reports = messenger.sent_to(DEVELOPER);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].text.contains("no space left on device"));
}

#[tokio::test]
async fn oversized_report_is_truncated_to_the_platform_limit() {
    let messenger = FakeMessenger::new(1);
    let engine = engine(messenger.clone(), memory_store(), None);
    messenger.fail_chat(OPERATOR);

    let huge = "<&>".repeat(5000);
    engine.handle(&event(1, 1001, &huge, None)).await;
    let reports = messenger.sent_to(DEVELOPER);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].text.chars().count() <= MAX_MESSAGE_CHARS);
    assert!(reports[0].text.contains("(truncated)"));
    assert!(reports[0].text.contains("caused by"));
}

#[tokio::test]
async fn audit_chat_mirrors_forwards_and_replies() {
    const AUDIT: ChatId = 7;
    let messenger = FakeMessenger::new(555);
    let engine = engine(messenger.clone(), memory_store(), Some(AUDIT));

    engine.handle(&event(1, 1001, "hello", None)).await;
    engine.handle(&event(2, OPERATOR, "hi back", Some(555))).await;

    let mirrored = messenger.sent_to(AUDIT);
    assert_eq!(mirrored.len(), 2);
    assert_eq!(mirrored[0].text, messenger.sent_to(OPERATOR)[0].text);
    assert!(mirrored[1].text.contains("1001"));
    assert!(mirrored[1].text.contains("hi back"));
}

#[tokio::test]
async fn audit_mirror_failure_does_not_fail_the_forward() {
    const AUDIT: ChatId = 7;
    let messenger = FakeMessenger::new(555);
    let engine = engine(messenger.clone(), memory_store(), Some(AUDIT));
    messenger.fail_chat(AUDIT);

    let result = engine.handle(&event(1, 1001, "hello", None)).await;
    assert!(matches!(result, RelayResult::Forwarded(_)));
    assert!(messenger.sent_to(DEVELOPER).is_empty());
}

#[tokio::test]
async fn correlations_survive_a_restart() {
    let path = common::temp_store_path();
    let messenger = FakeMessenger::new(900);
    {
        let store: Arc<dyn CorrelationStore> =
            Arc::new(FileCorrelationStore::open(&path).await.unwrap());
        let engine = engine(messenger.clone(), store, None);
        for (i, user) in [1001, 1002, 1003].into_iter().enumerate() {
            let result = engine.handle(&event(i as i64 + 1, user, "hi", None)).await;
            assert!(matches!(result, RelayResult::Forwarded(_)));
        }
    }

    let relayed: Vec<MessageId> = messenger
        .sent()
        .into_iter()
        .filter(|(_, m)| m.chat_id == OPERATOR)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(relayed.len(), 3);

    let store: Arc<dyn CorrelationStore> =
        Arc::new(FileCorrelationStore::open(&path).await.unwrap());
    assert_eq!(store.len().await, 3);
    let engine = engine(messenger.clone(), store, None);
    let result = engine
        .handle(&event(10, OPERATOR, "answer", Some(relayed[1])))
        .await;
    assert!(matches!(result, RelayResult::Replied(1002)), "{:?}", result);
    assert!(messenger
        .sent_to(1002)
        .iter()
        .any(|m| m.text.contains("answer")));
}

#[tokio::test]
async fn reply_mirror_uses_configured_template() {
    const AUDIT: ChatId = 7;
    let messenger = FakeMessenger::new(555);
    let store = memory_store();
    let mut settings = common::settings(Some(AUDIT));
    settings.mirror_reply_template = "audit: {user_id} <- {text}".to_string();
    let escalator = Escalator::new(messenger.clone(), DEVELOPER, store.clone());
    let engine = RelayEngine::new(settings, store, messenger.clone(), escalator);

    engine.handle(&event(1, 1001, "hello", None)).await;
    engine.handle(&event(2, OPERATOR, "hi back", Some(555))).await;

    let mirrored = messenger.sent_to(AUDIT);
    assert_eq!(mirrored.len(), 2);
    assert_eq!(mirrored[1].text, "audit: 1001 <- hi back");
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn handling_can_run_on_a_spawned_task() {
    let messenger = FakeMessenger::new(555);
    let engine = Arc::new(engine(messenger.clone(), memory_store(), None));
    messenger.fail_chat(OPERATOR);

    let ev = event(1, 1001, "hello", None);
    assert_send(&engine.handle(&ev));

    // The failure path escalates across awaits; it must stay spawnable too.
    let task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.handle(&ev).await }
    });
    let result = task.await.expect("relay task");
    assert!(matches!(result, RelayResult::Escalated(_)));
    assert_eq!(messenger.sent_to(DEVELOPER).len(), 1);
}
