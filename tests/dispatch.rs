//! Upstream dispatch through a session: acknowledgments, retries, backpressure.

mod common;

use common::{dispatch_config, SessionHarness};
use meshd::config::DispatchConfig;
use meshd::producer::message::{PROPERTY_TTL, PROPERTY_UNIQ_KEY};
use meshd::producer::BackendMessage;
use meshd::protocol::{Command, OpStatus, WireMessage};
use meshd::time::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

fn order(body: &str) -> WireMessage {
    WireMessage::new("orders", body).with_property("BIZSEQNO", "biz-1")
}

#[tokio::test]
async fn async_message_success_is_acked_once() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    h.send(Command::AsyncMessageToServer, "42", order("hello")).await;

    let ack = h.next_written().await;
    assert_eq!(ack.header.command, Command::AsyncMessageToServerAck);
    assert_eq!(ack.header.status(), Some(OpStatus::Success));
    assert_eq!(ack.header.seq, "42");
    assert_eq!(ack.message().unwrap().body, "hello");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.written.try_recv().is_err());
    assert_eq!(h.backend.accepted_count(), 1);
    assert_eq!(h.session.upstream_buffer().available(), 1000);
}

#[tokio::test(start_paused = true)]
async fn broadcast_failure_acks_and_schedules_retry() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    h.backend.fail_next(1);
    let before = SystemClock.now();
    h.send(Command::BroadcastMessageToServer, "7", order("x")).await;

    let ack = h.next_written().await;
    assert_eq!(ack.header.command, Command::BroadcastMessageToServerAck);
    assert_eq!(ack.header.status(), Some(OpStatus::Fail));
    assert_eq!(ack.header.seq, "7");

    let pending = h.session.retryer().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);
    assert!(pending[0].execute_at >= before + Duration::from_secs(10));
    assert!(pending[0].execute_at <= SystemClock.now() + Duration::from_secs(10));
    assert_eq!(h.session.stats().fail_msg_count, 1);
    assert_eq!(h.session.upstream_buffer().available(), 1000);
}

#[tokio::test(start_paused = true)]
async fn retry_after_failure_is_accepted_once() {
    let mut h = SessionHarness::new(dispatch_config(200, 1000));
    h.backend.fail_next(1);
    h.send(Command::AsyncMessageToServer, "5", order("once")).await;

    let fail = h.next_written().await;
    assert_eq!(fail.header.status(), Some(OpStatus::Fail));
    let ok = h.next_written().await;
    assert_eq!(ok.header.status(), Some(OpStatus::Success));
    assert_eq!(ok.header.seq, "5");

    let accepted = h.backend.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(
        accepted[0].property(PROPERTY_UNIQ_KEY),
        fail.message().unwrap().properties.get(PROPERTY_UNIQ_KEY).map(String::as_str)
    );
    assert!(h.session.retryer().is_empty());
}

#[tokio::test]
async fn buffer_saturation_blocks_the_next_send() {
    let capacity = 1000;
    let h = SessionHarness::new(dispatch_config(10_000, capacity));
    h.backend.hold_completions();
    for i in 0..capacity {
        h.send(Command::AsyncMessageToServer, &i.to_string(), order("x"))
            .await;
    }
    assert_eq!(h.session.upstream_buffer().available(), 0);
    assert_eq!(h.backend.attempts(), capacity as u64);

    let blocked = {
        let session = Arc::clone(&h.session);
        tokio::spawn(async move {
            session
                .handle_upstream(
                    meshd::protocol::Header::request(Command::AsyncMessageToServer, "1001"),
                    Some(order("x")),
                    SystemClock.now(),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    assert_eq!(h.backend.attempts(), capacity as u64);

    h.backend.release_completions(1);
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("unblocked after one completion")
        .unwrap()
        .unwrap();
    assert_eq!(h.backend.attempts(), capacity as u64 + 1);

    h.backend.resume_completions();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.session.upstream_buffer().available(), capacity);
}

#[tokio::test]
async fn failed_attempts_return_their_permits() {
    let mut h = SessionHarness::new(dispatch_config(10_000, 4));
    h.backend.fail_next(4);
    for i in 0..4 {
        h.send(Command::AsyncMessageToServer, &i.to_string(), order("x"))
            .await;
    }
    for _ in 0..4 {
        assert_eq!(h.next_written().await.header.status(), Some(OpStatus::Fail));
    }
    assert_eq!(h.session.upstream_buffer().available(), 4);
    assert_eq!(h.session.retryer().len(), 4);
}

#[tokio::test]
async fn request_to_server_replies_with_response_to_client() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    h.backend.set_responder(Arc::new(|req: &BackendMessage| {
        let mut reply = req.clone();
        reply.body = bytes::Bytes::from_static(b"pong");
        Some(reply)
    }));
    h.send(Command::RequestToServer, "rr-1", WireMessage::new("rpc", "ping"))
        .await;

    let reply = h.next_written().await;
    assert_eq!(reply.header.command, Command::ResponseToClient);
    assert_eq!(reply.header.status(), Some(OpStatus::Success));
    assert_eq!(reply.header.seq, "rr-1");
    assert_eq!(reply.message().unwrap().body, "pong");
    assert_eq!(h.session.upstream_buffer().available(), 1000);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_uses_ttl_and_is_not_retried() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    let start = SystemClock.now();
    let message = WireMessage::new("rpc", "ping").with_property(PROPERTY_TTL, "1500");
    h.send(Command::RequestToServer, "rr-2", message).await;

    let reply = h.next_written().await;
    assert_eq!(reply.header.command, Command::ResponseToClient);
    assert_eq!(reply.header.status(), Some(OpStatus::Fail));
    assert!(reply.header.desc.starts_with("timeout"));
    let waited = SystemClock.now().saturating_duration_since(start);
    assert!(waited >= Duration::from_millis(1500));
    assert!(waited < Duration::from_millis(3000));
    assert!(h.session.retryer().is_empty());
}

#[tokio::test]
async fn blank_topic_fails_without_retry() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    h.send(Command::AsyncMessageToServer, "9", WireMessage::new(" ", "x"))
        .await;
    let ack = h.next_written().await;
    assert_eq!(ack.header.status(), Some(OpStatus::Fail));
    assert!(ack.header.desc.starts_with("serialization_failed"));
    assert!(h.session.retryer().is_empty());
    assert_eq!(h.backend.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn synchronous_send_failure_is_rescheduled() {
    let mut h = SessionHarness::new(dispatch_config(200, 1000));
    h.backend.reject_next(1);
    h.send(Command::AsyncMessageToServer, "11", order("sync")).await;

    let fail = h.next_written().await;
    assert_eq!(fail.header.status(), Some(OpStatus::Fail));
    assert!(fail.header.desc.starts_with("send_failed"));
    let pending = h.session.retryer().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);
    assert_eq!(h.session.upstream_buffer().available(), 1000);

    let ok = h.next_written().await;
    assert_eq!(ok.header.status(), Some(OpStatus::Success));
    assert_eq!(ok.header.seq, "11");
    let accepted = h.backend.accepted();
    assert_eq!(accepted.len(), 1);
    assert_eq!(
        accepted[0].property(PROPERTY_UNIQ_KEY),
        fail.message().unwrap().properties.get(PROPERTY_UNIQ_KEY).map(String::as_str)
    );
}

#[tokio::test]
async fn synchronous_request_failure_is_not_rescheduled() {
    let mut h = SessionHarness::new(DispatchConfig::default());
    h.backend.reject_next(1);
    h.send(Command::RequestToServer, "rr-3", WireMessage::new("rpc", "ping"))
        .await;

    let reply = h.next_written().await;
    assert_eq!(reply.header.command, Command::ResponseToClient);
    assert_eq!(reply.header.status(), Some(OpStatus::Fail));
    assert!(h.session.retryer().is_empty());
    assert_eq!(h.session.upstream_buffer().available(), 1000);
}
