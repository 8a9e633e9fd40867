//! Dialer and ping adapters against a scripted agent.

use std::sync::Arc;

use remproc_channel::{ping, ChannelError};
use remproc_protocol::{
    PingResult, RemoteIpCloseRequest, RemoteIpCloseResult, RemoteIpDialRequest,
    RemoteIpDialResult, PING, REMOTE_IP_CLOSE, REMOTE_IP_DIAL,
};

use crate::harness::{join_dispatch, open_channel, STEP_TIMEOUT};

#[tokio::test]
async fn test_dial_returns_agent_handle() {
    let (channel, mut peer, _dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let dial = tokio::spawn(async move { dialer.dial("tcp", "10.0.0.5:22").await });

    let request = peer.next_request().await;
    let body: RemoteIpDialRequest = request.decode_json(REMOTE_IP_DIAL).unwrap();
    assert_eq!(body.network, "tcp");
    assert_eq!(body.address, "10.0.0.5:22");
    peer.reply_json(REMOTE_IP_DIAL, &RemoteIpDialResult::connected(17), request.request_id)
        .await;

    let conn = dial.await.unwrap().unwrap();
    assert_eq!(conn.handle(), 17);
}

#[tokio::test]
async fn test_refused_dial_surfaces_reason() {
    let (channel, mut peer, _dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let dial = tokio::spawn(async move { dialer.dial("tcp", "10.0.0.5:1").await });

    let request = peer.next_request().await;
    peer.reply_json(
        REMOTE_IP_DIAL,
        &RemoteIpDialResult::refused("connection refused"),
        request.request_id,
    )
    .await;

    match dial.await.unwrap() {
        Err(ChannelError::Remote(reason)) => assert_eq!(reason, "connection refused"),
        other => panic!("expected remote refusal, got {other:?}"),
    }
    assert!(channel.is_open().await);
}

#[tokio::test]
async fn test_dial_success_without_handle_is_rejected() {
    let (channel, mut peer, _dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let dial = tokio::spawn(async move { dialer.dial("tcp", "10.0.0.5:22").await });

    let request = peer.next_request().await;
    peer.reply_json(
        REMOTE_IP_DIAL,
        &RemoteIpDialResult {
            success: true,
            error: None,
            handle: None,
        },
        request.request_id,
    )
    .await;

    assert!(matches!(dial.await.unwrap(), Err(ChannelError::Remote(_))));
}

#[tokio::test]
async fn test_dial_cancelled_by_close() {
    let (channel, mut peer, dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let dial = tokio::spawn(async move { dialer.dial("tcp", "10.0.0.5:22").await });

    // Wait until the request is on the wire, then close before answering.
    peer.next_request().await;
    channel.close().await;
    join_dispatch(dispatch).await;

    let outcome = tokio::time::timeout(STEP_TIMEOUT, dial)
        .await
        .expect("dial never woke")
        .unwrap();
    assert!(matches!(outcome, Err(ChannelError::RequestCancelled)));
}

#[tokio::test]
async fn test_conn_close_sends_handle() {
    let (channel, mut peer, _dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let peer_task = tokio::spawn(async move {
        let dial = peer.next_request().await;
        peer.reply_json(REMOTE_IP_DIAL, &RemoteIpDialResult::connected(3), dial.request_id)
            .await;

        let close = peer.next_request().await;
        let body: RemoteIpCloseRequest = close.decode_json(REMOTE_IP_CLOSE).unwrap();
        peer.reply_json(
            REMOTE_IP_CLOSE,
            &RemoteIpCloseResult {
                success: true,
                error: None,
            },
            close.request_id,
        )
        .await;
        body.handle
    });

    let conn = dialer.dial("tcp4", "192.0.2.1:80").await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(peer_task.await.unwrap(), 3);
    assert_eq!(channel.last_issued_id().await, 2);
}

#[tokio::test]
async fn test_conn_close_failure_is_remote_error() {
    let (channel, mut peer, _dispatch) = open_channel().await;
    let dialer = channel.remote_ip_dialer();

    let peer_task = tokio::spawn(async move {
        let dial = peer.next_request().await;
        peer.reply_json(REMOTE_IP_DIAL, &RemoteIpDialResult::connected(9), dial.request_id)
            .await;
        let close = peer.next_request().await;
        peer.reply_json(
            REMOTE_IP_CLOSE,
            &RemoteIpCloseResult {
                success: false,
                error: Some("unknown connection handle 9".into()),
            },
            close.request_id,
        )
        .await;
    });

    let conn = dialer.dial("tcp", "192.0.2.1:80").await.unwrap();
    match conn.close().await {
        Err(ChannelError::Remote(reason)) => assert_eq!(reason, "unknown connection handle 9"),
        other => panic!("expected remote error, got {other:?}"),
    }
    peer_task.await.unwrap();
}

#[tokio::test]
async fn test_ping_helper() {
    let (channel, mut peer, _dispatch) = open_channel().await;

    let probe = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { ping(&channel).await })
    };

    let request = peer.next_request().await;
    assert_eq!(request.type_tag, PING);
    peer.reply_json(PING, &PingResult { ok: true }, request.request_id)
        .await;

    assert_eq!(probe.await.unwrap().unwrap(), PingResult { ok: true });
}
