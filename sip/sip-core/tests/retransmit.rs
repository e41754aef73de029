//! Retransmit pacing and expiry, measured on a paused clock.

mod common;

use common::{response_to, uac_invite, MockTransport};
use lark_sip_core::transaction::TsxEvent;
use lark_sip_core::{Engine, EngineConfig, FailureReason};
use sip_types::{Method, StatusCode};
use std::time::Duration;
use tokio::time::Instant;

const LOCAL: &str = "10.0.0.1:5060";
const REMOTE: &str = "10.0.0.2:5060";

fn options_request(call_id: &str) -> sip_types::Request {
    let mut request = uac_invite(call_id);
    request.method = Method::OPTIONS;
    request.cseq.method = Method::OPTIONS;
    request
}

/// Scenario: unanswered OPTIONS. Retransmit intervals follow
/// `min(2^(n-1) * T1, T2)`, nothing is sent after `T6` and the
/// transaction fails with `TimedOut`.
#[tokio::test(start_paused = true)]
async fn non_invite_retransmit_schedule() {
    let transport = MockTransport::new();
    let engine = Engine::new(transport.clone(), EngineConfig::default());

    let start = Instant::now();

    let mut tsx = engine
        .send_request(options_request("options-1"), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(40)).await;

    let times = transport.request_times(&Method::OPTIONS);

    // initial send plus the full retransmit ladder:
    // 0.5, 1.5, 3.5, 7.5, 11.5, 15.5, 19.5, 23.5, 27.5, 31.5
    let expected = [0.0, 0.5, 1.5, 3.5, 7.5, 11.5, 15.5, 19.5, 23.5, 27.5, 31.5];

    assert_eq!(
        times.len(),
        expected.len(),
        "unexpected transmission count: {:?}",
        times
            .iter()
            .map(|t| (*t - start).as_secs_f64())
            .collect::<Vec<_>>()
    );

    for (at, want) in times.iter().zip(expected) {
        let got = (*at - start).as_secs_f64();
        assert!(
            (got - want).abs() < 0.15,
            "transmission at {got:.2}s, expected {want:.2}s"
        );
    }

    // nothing is transmitted after first_transmit + T6
    let last = (*times.last().unwrap() - start).as_secs_f64();
    assert!(last < 32.0);

    let mut timed_out = false;

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), tsx.event()).await
    {
        if matches!(event, TsxEvent::Failed(FailureReason::TimedOut)) {
            timed_out = true;
            break;
        }
    }

    assert!(timed_out);
    assert_eq!(engine.pending_transactions(), 0);
}

/// A provisional response stops client INVITE request retransmissions
#[tokio::test(start_paused = true)]
async fn provisional_stops_invite_retransmits() {
    let transport = MockTransport::new();
    let engine = Engine::new(transport.clone(), EngineConfig::default());

    let _tsx = engine.send_invite(uac_invite("inv-1"), None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;

    // one initial send plus the 500ms retransmit
    assert_eq!(transport.request_times(&Method::INVITE).len(), 2);

    let invite = transport.sent_requests()[0].clone();
    let mut ringing = response_to(&invite, StatusCode::RINGING, "t-server");
    ringing.to.tag = None;

    engine
        .on_response(LOCAL.parse().unwrap(), REMOTE.parse().unwrap(), ringing)
        .await;

    let before = transport.request_times(&Method::INVITE).len();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.request_times(&Method::INVITE).len(), before);
}

/// A ringing INVITE client transaction gives up after MAX_RING_TIME
#[tokio::test(start_paused = true)]
async fn ringing_times_out_after_max_ring_time() {
    let transport = MockTransport::new();

    // shortened ring limit to keep virtual time manageable
    let engine = Engine::new(
        transport.clone(),
        EngineConfig {
            max_ring_time: Duration::from_secs(60),
            ..Default::default()
        },
    );

    let mut tsx = engine.send_invite(uac_invite("inv-2"), None).await.unwrap();

    let invite = transport.sent_requests()[0].clone();
    let mut ringing = response_to(&invite, StatusCode::RINGING, "t-server");
    ringing.to.tag = None;

    engine
        .on_response(LOCAL.parse().unwrap(), REMOTE.parse().unwrap(), ringing)
        .await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    let mut timed_out = false;

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), tsx.event()).await
    {
        if matches!(event, TsxEvent::Failed(FailureReason::TimedOut)) {
            timed_out = true;
            break;
        }
    }

    assert!(timed_out);
    assert_eq!(engine.pending_transactions(), 0);
}

/// disable_retransmit_sending ticks the state machine without socket work
#[tokio::test(start_paused = true)]
async fn suppressed_retransmits_still_expire() {
    let transport = MockTransport::new();
    let engine = Engine::new(
        transport.clone(),
        EngineConfig {
            disable_retransmit_sending: true,
            ..Default::default()
        },
    );

    let mut tsx = engine
        .send_request(options_request("options-2"), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(40)).await;

    // only the initial transmission hit the wire
    assert_eq!(transport.request_times(&Method::OPTIONS).len(), 1);

    let mut timed_out = false;

    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), tsx.event()).await
    {
        if matches!(event, TsxEvent::Failed(FailureReason::TimedOut)) {
            timed_out = true;
            break;
        }
    }

    assert!(timed_out);
}
