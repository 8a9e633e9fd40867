//! Request/result correlation -- matching, ordering, stale and foreign replies.

use std::collections::HashSet;
use std::sync::Arc;

use remproc_channel::{ChannelError, ChannelState};
use remproc_protocol::{Envelope, ErrorPayload, Ping, PingResult, ERROR, PING};

use crate::harness::{open_channel, spawn_echo_responder, Echo, EchoResult, ECHO, STEP_TIMEOUT};

#[tokio::test]
async fn test_ping_resolves_with_remote_result() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let slot = channel.issue(&Ping {}).await.unwrap();

    let request = peer.next_request().await;
    assert_eq!(request.type_tag, PING);
    assert_eq!(request.payload, b"{}");
    assert_eq!(request.request_id, 1);

    peer.reply(Envelope::new(PING, br#"{"ok":true}"#.to_vec(), 1))
        .await;

    let result = slot.wait_timeout(STEP_TIMEOUT).await.unwrap();
    assert_eq!(result, PingResult { ok: true });
    assert_eq!(channel.pending_count().await, 0);
}

#[tokio::test]
async fn test_results_resolve_out_of_order() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let mut slots = Vec::new();
    for value in [10, 20, 30] {
        slots.push(channel.issue(&Echo { value }).await.unwrap());
    }

    let mut requests = Vec::new();
    for _ in 0..3 {
        requests.push(peer.next_request().await);
    }

    // Answer newest first, with values derived from the request.
    for request in requests.iter().rev() {
        let echo: Echo = request.decode_json(ECHO).unwrap();
        peer.reply_json(
            ECHO,
            &EchoResult {
                value: echo.value + 1,
            },
            request.request_id,
        )
        .await;
    }

    let mut values = Vec::new();
    for slot in slots {
        values.push(slot.wait_timeout(STEP_TIMEOUT).await.unwrap().value);
    }
    assert_eq!(values, vec![11, 21, 31]);
}

#[tokio::test]
async fn test_unmatched_reply_is_discarded() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    peer.reply(Envelope::new(PING, br#"{"ok":true}"#.to_vec(), 4242))
        .await;

    // The channel keeps serving after the stray reply.
    let slot = channel.issue(&Ping {}).await.unwrap();
    let request = peer.next_request().await;
    peer.reply(Envelope::new(PING, br#"{"ok":true}"#.to_vec(), request.request_id))
        .await;

    assert!(slot.wait_timeout(STEP_TIMEOUT).await.unwrap().ok);
    assert_eq!(channel.state().await, ChannelState::Open);
    assert!(channel.last_error().await.is_none());
}

#[tokio::test]
async fn test_duplicate_reply_is_discarded() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let first = channel.issue(&Echo { value: 1 }).await.unwrap();
    let request = peer.next_request().await;
    peer.reply_json(ECHO, &EchoResult { value: 1 }, request.request_id)
        .await;
    peer.reply_json(ECHO, &EchoResult { value: 999 }, request.request_id)
        .await;

    assert_eq!(first.wait_timeout(STEP_TIMEOUT).await.unwrap().value, 1);

    let second = channel.issue(&Echo { value: 2 }).await.unwrap();
    let request = peer.next_request().await;
    assert_eq!(request.request_id, 2);
    peer.reply_json(ECHO, &EchoResult { value: 2 }, 2).await;
    assert_eq!(second.wait_timeout(STEP_TIMEOUT).await.unwrap().value, 2);
}

#[tokio::test]
async fn test_malformed_result_only_fails_its_caller() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let broken = channel.issue(&Echo { value: 1 }).await.unwrap();
    let healthy = channel.issue(&Echo { value: 2 }).await.unwrap();

    let a = peer.next_request().await;
    let b = peer.next_request().await;
    peer.reply(Envelope::new(ECHO, b"{not json".to_vec(), a.request_id))
        .await;
    peer.reply_json(ECHO, &EchoResult { value: 2 }, b.request_id)
        .await;

    assert!(matches!(
        broken.wait_timeout(STEP_TIMEOUT).await,
        Err(ChannelError::Decode(_))
    ));
    assert_eq!(healthy.wait_timeout(STEP_TIMEOUT).await.unwrap().value, 2);
    assert!(channel.is_open().await);
}

#[tokio::test]
async fn test_error_envelope_surfaces_as_remote_error() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let slot = channel.issue(&Ping {}).await.unwrap();
    let request = peer.next_request().await;
    peer.reply_json(
        ERROR,
        &ErrorPayload {
            message: "unsupported request type".into(),
        },
        request.request_id,
    )
    .await;

    match slot.wait_timeout(STEP_TIMEOUT).await {
        Err(ChannelError::Remote(message)) => assert_eq!(message, "unsupported request type"),
        other => panic!("expected remote error, got {other:?}"),
    }
    assert!(channel.is_open().await);
}

#[tokio::test]
async fn test_concurrent_issuers_get_unique_ids() {
    const CALLERS: usize = 32;
    let (channel, peer, _dispatch) = open_channel().await;
    let responder = spawn_echo_responder(peer, CALLERS);

    let mut tasks = Vec::new();
    for value in 0..CALLERS as u32 {
        let channel = Arc::clone(&channel);
        tasks.push(tokio::spawn(async move {
            let slot = channel.issue(&Echo { value }).await.unwrap();
            let id = slot.request_id();
            let result = slot.wait_timeout(STEP_TIMEOUT).await.unwrap();
            assert_eq!(result.value, value);
            id
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        assert!(ids.insert(task.await.unwrap()), "request id issued twice");
    }
    let expected: HashSet<u64> = (1..=CALLERS as u64).collect();
    assert_eq!(ids, expected);
    assert_eq!(channel.last_issued_id().await, CALLERS as u64);

    responder.await.unwrap();
}
