//! Service-level behavior: request/response correlation, timeouts,
//! broadcast requests, disconnect semantics, directory queries.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use fleetwire_core::node::NodeId;
use fleetwire_fabric::adapter::{ChannelAdapter, MemoryAdapter, MemoryHub, NodeSelector, ServerInfo};
use fleetwire_fabric::{Fabric, FabricMessage, Inbound};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
}

impl FabricMessage for Ping {
    fn channel() -> &'static str {
        "ping"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pong {
    seq: u32,
    who: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    name: String,
}

impl FabricMessage for Event {
    fn channel() -> &'static str {
        "event"
    }
}

/// Deliberate channel-name collision with `Ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Imposter {
    x: u8,
}

impl FabricMessage for Imposter {
    fn channel() -> &'static str {
        "ping"
    }
}

async fn node(hub: &Arc<MemoryHub>, name: &str) -> Fabric {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let fabric = Fabric::with_defaults(MemoryAdapter::new(Arc::clone(hub), name));
    fabric.connect().await.unwrap();
    fabric
}

async fn answer_pings(fabric: &Fabric, who: &str, delay: Option<Duration>) {
    let who = who.to_string();
    fabric
        .handle_requests::<Ping, Pong, _, _>(move |req: Inbound<Ping>| {
            let who = who.clone();
            async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                Ok(Pong {
                    seq: req.payload.seq,
                    who,
                })
            }
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn request_completes_with_reply_and_clears_pending() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;
    answer_pings(&b, "b", None).await;

    let pong: Pong = a
        .request(
            Some(NodeId::from("b")),
            &Ping { seq: 7 },
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert_eq!(pong, Pong { seq: 7, who: "b".into() });
    assert_eq!(a.pending_requests(), 0);
    assert_eq!(b.pending_requests(), 0);
}

#[tokio::test]
async fn reply_never_reaches_ordinary_subscribers() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;
    answer_pings(&b, "b", None).await;

    let seen = Arc::new(Mutex::new(Vec::<u32>::new()));
    let ch_a = a.channel::<Ping>().await.unwrap();
    {
        let seen = Arc::clone(&seen);
        ch_a.subscribe(move |msg: &Inbound<Ping>| {
            seen.lock().unwrap().push(msg.payload.seq);
            Ok(())
        })
        .unwrap();
    }

    let _pong: Pong = a
        .request(
            Some(NodeId::from("b")),
            &Ping { seq: 1 },
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();

    assert!(
        seen.lock().unwrap().is_empty(),
        "correlated reply must be intercepted before fan-out"
    );
    assert_eq!(a.pending_requests(), 0);
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let _b = node(&hub, "b").await;

    let err = a
        .request::<Ping, Pong>(
            Some(NodeId::from("b")),
            &Ping { seq: 1 },
            Some(Duration::from_millis(50)),
        )
        .await
        .expect_err("no responder");

    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert_eq!(a.pending_requests(), 0, "timeout removes the pending entry");
}

#[tokio::test]
async fn failed_send_fails_the_request_immediately() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;

    let err = a
        .request::<Ping, Pong>(
            Some(NodeId::from("ghost")),
            &Ping { seq: 1 },
            Some(Duration::from_secs(5)),
        )
        .await
        .expect_err("unknown node");

    assert_eq!(err.code().as_str(), "TRANSPORT");
    assert_eq!(a.pending_requests(), 0, "send failure removes the pending entry");
}

#[tokio::test]
async fn response_inside_the_window_beats_the_timer() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;
    answer_pings(&b, "b", Some(Duration::from_millis(30))).await;

    let pong: Pong = a
        .request(
            Some(NodeId::from("b")),
            &Ping { seq: 2 },
            Some(Duration::from_millis(1_000)),
        )
        .await
        .unwrap();

    assert_eq!(pong.seq, 2);
    assert_eq!(a.pending_requests(), 0);
}

#[tokio::test]
async fn late_reply_after_timeout_is_dropped_silently() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;
    answer_pings(&b, "b", Some(Duration::from_millis(200))).await;

    let err = a
        .request::<Ping, Pong>(
            Some(NodeId::from("b")),
            &Ping { seq: 3 },
            Some(Duration::from_millis(40)),
        )
        .await
        .expect_err("responder too slow");
    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert_eq!(a.pending_requests(), 0);

    // The reply still arrives later; it must be swallowed, not crash or
    // resolve anything.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.pending_requests(), 0);
}

#[tokio::test]
async fn broadcast_request_takes_the_first_response() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;
    let c = node(&hub, "c").await;
    answer_pings(&b, "b", None).await;
    answer_pings(&c, "c", Some(Duration::from_millis(80))).await;

    let pong: Pong = a
        .request(None, &Ping { seq: 4 }, Some(Duration::from_millis(500)))
        .await
        .unwrap();

    assert_eq!(pong.who, "b", "fastest responder wins");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(a.pending_requests(), 0, "late reply discarded");
}

#[tokio::test]
async fn broadcast_request_with_no_responders_waits_out_the_window() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;

    let started = std::time::Instant::now();
    let err = a
        .request::<Ping, Pong>(None, &Ping { seq: 5 }, Some(Duration::from_millis(80)))
        .await
        .expect_err("nobody listening");

    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert!(
        started.elapsed() >= Duration::from_millis(80),
        "zero reachable nodes is not distinguishable from slow nodes"
    );
}

#[tokio::test]
async fn disconnect_fails_outstanding_requests() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let _b = node(&hub, "b").await;

    let ch_a = a.channel::<Ping>().await.unwrap();
    let requester = a.clone();
    let handle = tokio::spawn(async move {
        requester
            .request::<Ping, Pong>(
                Some(NodeId::from("b")),
                &Ping { seq: 6 },
                Some(Duration::from_secs(30)),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.pending_requests(), 1);
    a.disconnect().await.unwrap();

    let err = handle.await.unwrap().expect_err("must not wait out the window");
    assert_eq!(err.code().as_str(), "DISCONNECTED");
    assert_eq!(a.pending_requests(), 0);
    assert!(!a.is_connected());

    let err = ch_a.broadcast(&Ping { seq: 7 }).await.expect_err("closed");
    assert_eq!(err.code().as_str(), "CHANNEL_CLOSED");
}

#[tokio::test]
async fn default_timeout_applies_when_no_window_is_given() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let _b = node(&hub, "b").await;

    a.set_default_timeout(Duration::from_millis(60));
    assert_eq!(a.default_timeout(), Duration::from_millis(60));

    let started = std::time::Instant::now();
    let err = a
        .request::<Ping, Pong>(Some(NodeId::from("b")), &Ping { seq: 8 }, None)
        .await
        .expect_err("no responder");
    assert_eq!(err.code().as_str(), "TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(3), "default window used");
}

#[tokio::test]
async fn rebinding_a_channel_name_to_another_type_fails() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;

    a.channel::<Ping>().await.unwrap();
    let err = a.channel::<Imposter>().await.expect_err("type mismatch");
    assert_eq!(err.code().as_str(), "UNKNOWN_CHANNEL");
}

#[tokio::test]
async fn service_level_sends_resolve_the_payload_channel() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let b = node(&hub, "b").await;

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let ch_b = b.channel::<Event>().await.unwrap();
    {
        let seen = Arc::clone(&seen);
        ch_b.subscribe(move |msg: &Inbound<Event>| {
            seen.lock().unwrap().push(msg.payload.name.clone());
            Ok(())
        })
        .unwrap();
    }

    a.broadcast(&Event { name: "boot".into() }).await.unwrap();
    a.send_to(&NodeId::from("b"), &Event { name: "direct".into() })
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["boot".to_string(), "direct".to_string()]);
}

#[tokio::test]
async fn directory_snapshot_and_selectors() {
    let hub = MemoryHub::new();
    let a = node(&hub, "a").await;
    let _b = node(&hub, "b").await;
    let _c = node(&hub, "c").await;

    hub.set_server_info(ServerInfo {
        node: NodeId::from("b"),
        online: true,
        player_count: 10,
        session_count: 12,
        groups: vec!["lobby".into()],
        rtt_ms: Some(3),
    });
    hub.set_server_info(ServerInfo {
        node: NodeId::from("c"),
        online: true,
        player_count: 3,
        session_count: 4,
        groups: vec!["lobby".into()],
        rtt_ms: Some(9),
    });
    hub.set_server_info(ServerInfo {
        node: NodeId::from("d"),
        online: false,
        player_count: 0,
        session_count: 0,
        groups: vec!["lobby".into()],
        rtt_ms: None,
    });

    let servers = a.servers().await.unwrap();
    let lobby = NodeSelector::ByGroup("lobby".into());
    assert_eq!(
        lobby.least_loaded(&servers),
        Some(NodeId::from("c")),
        "offline nodes are never selected"
    );

    let mut in_lobby = lobby.select(&servers);
    in_lobby.sort();
    assert_eq!(in_lobby, vec![NodeId::from("b"), NodeId::from("c")]);

    let by_name = NodeSelector::ByName(NodeId::from("b"));
    assert_eq!(by_name.select(&servers), vec![NodeId::from("b")]);

    let fast = NodeSelector::ByPredicate(Arc::new(|s: &ServerInfo| {
        s.rtt_ms.map(|r| r < 5).unwrap_or(false)
    }));
    assert_eq!(fast.select(&servers), vec![NodeId::from("b")]);

    let info = a.server(&NodeId::from("b")).await.unwrap().unwrap();
    assert_eq!(info.player_count, 10);
    assert!(info.in_group("lobby"));
    assert!(a.server(&NodeId::from("zz")).await.unwrap().is_none());
}

#[tokio::test]
async fn undecodable_frames_are_counted_and_dropped() {
    let hub = MemoryHub::new();
    let b = node(&hub, "b").await;
    b.channel::<Ping>().await.unwrap();

    let raw = MemoryAdapter::new(Arc::clone(&hub), "x");
    raw.send_to("ping", &NodeId::from("b"), Bytes::from_static(b"junk"))
        .await
        .unwrap();

    assert_eq!(b.decode_errors(), 1);
}
