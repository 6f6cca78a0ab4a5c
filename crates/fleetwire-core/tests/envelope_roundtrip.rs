//! Envelope construction, expiry, and encode/decode round-trip tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;
use uuid::Uuid;

use fleetwire_core::envelope::Envelope;
use fleetwire_core::node::NodeId;
use fleetwire_core::wire::{decode, encode};

fn sample(target: Option<&str>, correlation: Option<Uuid>) -> Envelope {
    Envelope {
        id: Uuid::new_v4(),
        msg_type: "player-sync".to_string(),
        timestamp_ms: 1_700_000_000_123,
        source: NodeId::new("lobby-1"),
        target: target.map(NodeId::new),
        correlation,
        ttl_ms: 30_000,
        payload: Bytes::from_static(b"{\"players\":7}"),
    }
}

#[test]
fn roundtrip_broadcast_no_optionals() {
    let mut env = sample(None, None);
    env.ttl_ms = 0;
    env.payload = Bytes::new();

    let decoded = decode(encode(&env).unwrap()).unwrap();
    assert_eq!(decoded, env);
    assert!(decoded.target.is_none());
    assert!(decoded.correlation.is_none());
}

#[test]
fn roundtrip_unicast_with_correlation() {
    let env = sample(Some("world-3"), Some(Uuid::new_v4()));
    let decoded = decode(encode(&env).unwrap()).unwrap();
    assert_eq!(decoded, env);
}

#[test]
fn roundtrip_target_without_correlation() {
    let env = sample(Some("world-3"), None);
    let decoded = decode(encode(&env).unwrap()).unwrap();
    assert_eq!(decoded, env);
}

#[test]
fn reply_links_back_to_request() {
    let req = Envelope::unicast(
        "transfer",
        NodeId::new("lobby-1"),
        NodeId::new("world-3"),
        Bytes::from_static(b"req"),
        1_000,
    );
    let reply = Envelope::reply(&req, NodeId::new("world-3"), Bytes::from_static(b"ok"));

    assert_ne!(reply.id, req.id);
    assert_eq!(reply.correlation, Some(req.id));
    assert_eq!(reply.target.as_ref(), Some(&req.source));
    assert_eq!(reply.msg_type, req.msg_type);
    assert!(reply.is_reply());
    assert!(!req.is_reply());
}

#[test]
fn expiry_boundaries() {
    let mut env = sample(None, None);
    env.timestamp_ms = 10_000;
    env.ttl_ms = 500;

    assert!(!env.is_expired_at(10_499));
    assert!(!env.is_expired_at(10_500));
    assert!(env.is_expired_at(10_501));
}

#[test]
fn zero_ttl_never_expires() {
    let mut env = sample(None, None);
    env.timestamp_ms = 0;
    env.ttl_ms = 0;
    assert!(!env.is_expired_at(u64::MAX));
}

#[test]
fn encode_rejects_oversized_string_field() {
    let mut env = sample(None, None);
    env.msg_type = "x".repeat(u16::MAX as usize + 1);
    let err = encode(&env).expect_err("must fail");
    assert_eq!(err.code().as_str(), "MALFORMED_ENVELOPE");
}
