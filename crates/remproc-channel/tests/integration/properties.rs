//! Property tests -- every issued request resolves exactly once, whatever
//! order the peer answers in and wherever a close lands.

use std::collections::HashSet;

use proptest::prelude::*;
use remproc_channel::{ChannelError, SlotOutcome};

use crate::harness::{open_channel, Echo, EchoResult, ECHO, STEP_TIMEOUT};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Answered requests get their own value back; IDs are 1..=n with no repeats.
    #[test]
    fn prop_any_reply_order_matches_callers(order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()) {
        let n = order.len();
        runtime().block_on(async move {
            let (channel, mut peer, _dispatch) = open_channel().await;

            let mut slots = Vec::new();
            for value in 0..n as u32 {
                slots.push(channel.issue(&Echo { value }).await.unwrap());
            }
            let mut requests = Vec::new();
            for _ in 0..n {
                requests.push(peer.next_request().await);
            }

            for &i in &order {
                let request = &requests[i];
                let echo: Echo = request.decode_json(ECHO).unwrap();
                peer.reply_json(ECHO, &EchoResult { value: echo.value }, request.request_id).await;
            }

            let mut ids = HashSet::new();
            for (value, slot) in slots.into_iter().enumerate() {
                assert!(ids.insert(slot.request_id()));
                let result = slot.wait_timeout(STEP_TIMEOUT).await.unwrap();
                assert_eq!(result.value, value as u32);
            }
            assert_eq!(ids, (1..=n as u64).collect::<HashSet<_>>());
            assert_eq!(channel.pending_count().await, 0);
        });
    }

    /// Answer a prefix, close, then every slot is either delivered or cancelled
    /// -- never both, never neither.
    #[test]
    fn prop_close_partitions_outcomes(total in 1usize..16, answered in 0usize..16) {
        let answered = answered.min(total);
        runtime().block_on(async move {
            let (channel, mut peer, _dispatch) = open_channel().await;

            let mut slots = Vec::new();
            for value in 0..total as u32 {
                slots.push(channel.issue(&Echo { value }).await.unwrap());
            }
            for _ in 0..total {
                let request = peer.next_request().await;
                let echo: Echo = request.decode_json(ECHO).unwrap();
                if (echo.value as usize) < answered {
                    peer.reply_json(ECHO, &EchoResult { value: echo.value }, request.request_id).await;
                }
            }

            // Drain answered results before closing so the split is deterministic.
            let mut delivered = 0;
            let mut cancelled = 0;
            let mut remaining = Vec::new();
            for (value, slot) in slots.into_iter().enumerate() {
                if value < answered {
                    let result = slot.wait_timeout(STEP_TIMEOUT).await.unwrap();
                    assert_eq!(result.value, value as u32);
                    delivered += 1;
                } else {
                    remaining.push(slot);
                }
            }

            channel.close().await;

            for slot in remaining {
                match slot.outcome().await {
                    SlotOutcome::Cancelled => cancelled += 1,
                    other => panic!("expected cancellation, got {other:?}"),
                }
            }

            assert_eq!(delivered, answered);
            assert_eq!(cancelled, total - answered);
            assert_eq!(channel.pending_count().await, 0);
            assert!(matches!(
                channel.issue(&Echo { value: 0 }).await,
                Err(ChannelError::ChannelNotOpen)
            ));
        });
    }
}
