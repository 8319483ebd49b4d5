#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use peerlink_core::protocol::frame::Frame;
use peerlink_core::protocol::rpc::MetricsSnapshot;
use peerlink_core::protocol::upcall::Upcall;
use peerlink_helper::host::{Host, MemoryHost, MemoryNetwork};

use common::{b64, peer, remote, spawn_helper, Daemon};

const BASE: &str = r#"
version: 1
helper:
  listen_addrs: ["/ip4/10.0.0.1/tcp/4001"]
"#;

const REMOTE: &str = "/ip4/10.0.0.2/tcp/4001";

fn with_helper(extra: &str) -> String {
    format!("{BASE}{extra}")
}

fn is_gossip(u: &Upcall) -> bool {
    matches!(u, Upcall::GossipReceived { .. })
}

fn is_validation(u: &Upcall) -> bool {
    matches!(u, Upcall::ValidationNeeded { .. })
}

/// Helper subscribed to `t`, connected to a bare remote host that can publish.
async fn helper_with_publisher(net: &MemoryNetwork, yaml: &str) -> (Daemon, MemoryHost, u64) {
    let mut d = spawn_helper(net, 1, yaml).await;
    let (r, _events) = remote(net, 2, REMOTE).await;
    d.ok("add_peer", json!({ "addr": format!("{REMOTE}/p2p/{}", peer(2)) })).await;
    let sub = d.ok("subscribe", json!({ "topic": "t" })).await["subscription_id"]
        .as_u64()
        .unwrap();
    (d, r, sub)
}

#[tokio::test]
async fn every_request_gets_one_response_carrying_its_seq() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;

    let a = d.send("identity", json!({})).await;
    let b = d.send("get_listening_addrs", json!({})).await;
    let c = d.send("no_such_method", json!({})).await;
    let e = d.send("subscribe", json!({ "topic": 5 })).await;

    let rc = d.response(c).await;
    assert_eq!(rc.outcome, Err("unknown method: no_such_method".to_string()));
    let re = d.response(e).await;
    assert!(re.outcome.unwrap_err().starts_with("bad request"));
    let rb = d.response(b).await;
    assert_eq!(rb.outcome.unwrap()["addrs"], json!(["/ip4/10.0.0.1/tcp/4001"]));
    let ra = d.response(a).await;
    assert_eq!(ra.outcome.unwrap()["peer_id"], json!(peer(1).to_string()));
}

#[tokio::test]
async fn undecodable_frames_do_not_stop_the_stream() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;

    d.send_raw(&[9, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]).await;
    d.send_raw(&[1]).await;
    d.send_raw(&Frame::request(77, Bytes::from_static(b"not json")).encode()).await;

    let bad = d.response(77).await;
    assert!(bad.outcome.unwrap_err().contains("invalid call envelope"));

    d.ok("identity", json!({})).await;
    let m = d.state.metrics();
    assert_eq!(m.decode_errors.get(&[("code", "UNSUPPORTED_VERSION")]), 1);
    assert_eq!(m.decode_errors.get(&[("code", "BAD_REQUEST")]), 1);
}

#[tokio::test]
async fn unsubscribe_twice_reports_not_found() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;

    let id = d.ok("subscribe", json!({ "topic": "blocks" })).await["subscription_id"]
        .as_u64()
        .unwrap();
    d.ok("unsubscribe", json!({ "subscription_id": id })).await;
    let cause = d.err("unsubscribe", json!({ "subscription_id": id })).await;
    assert!(cause.contains("not found"), "{cause}");

    let again = d.ok("subscribe", json!({ "topic": "blocks" })).await["subscription_id"]
        .as_u64()
        .unwrap();
    assert!(again > id);
}

#[tokio::test]
async fn second_subscription_to_a_topic_is_rejected() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;
    d.ok("subscribe", json!({ "topic": "blocks" })).await;
    let cause = d.err("subscribe", json!({ "topic": "blocks" })).await;
    assert!(cause.contains("already exists"), "{cause}");
}

#[tokio::test]
async fn subscribe_is_visible_to_a_publish_sent_right_after_it() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;

    let s = d.send("subscribe", json!({ "topic": "blocks" })).await;
    let p = d.send("publish", json!({ "topic": "blocks", "data": b64(b"hello") })).await;

    let sub = d.response(s).await.outcome.unwrap()["subscription_id"].as_u64().unwrap();
    let Upcall::ValidationNeeded { validation_id, subscription_id, sender, data, .. } =
        d.upcall_where(is_validation).await
    else {
        unreachable!()
    };
    assert_eq!(subscription_id, sub);
    assert_eq!(sender, peer(1));
    assert_eq!(data, Bytes::from_static(b"hello"));

    d.ok("validation_result", json!({ "validation_id": validation_id, "verdict": "accept" })).await;
    assert!(d.response(p).await.outcome.is_ok());

    let Upcall::GossipReceived { subscription_id, data, .. } = d.upcall_where(is_gossip).await else {
        unreachable!()
    };
    assert_eq!(subscription_id, sub);
    assert_eq!(data, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn remote_gossip_is_delivered_after_accept() {
    let net = MemoryNetwork::new();
    let (mut d, r, sub) = helper_with_publisher(&net, BASE).await;

    d.upcall_where(|u| matches!(u, Upcall::PeerConnected { peer_id } if *peer_id == peer(2)))
        .await;
    r.publish("t", Bytes::from_static(b"x")).await.unwrap();

    let Upcall::ValidationNeeded { validation_id, sender, .. } = d.upcall_where(is_validation).await else {
        unreachable!()
    };
    assert_eq!(sender, peer(2));
    d.ok("validation_result", json!({ "validation_id": validation_id, "verdict": "accept" })).await;

    let Upcall::GossipReceived { subscription_id, topic, sender, data } = d.upcall_where(is_gossip).await else {
        unreachable!()
    };
    assert_eq!((subscription_id, topic.as_str()), (sub, "t"));
    assert_eq!(sender, peer(2));
    assert_eq!(data, Bytes::from_static(b"x"));
}

#[tokio::test]
async fn rejected_gossip_never_surfaces() {
    let net = MemoryNetwork::new();
    let (mut d, r, _sub) = helper_with_publisher(&net, BASE).await;

    r.publish("t", Bytes::from_static(b"spam")).await.unwrap();
    let Upcall::ValidationNeeded { validation_id, .. } = d.upcall_where(is_validation).await else {
        unreachable!()
    };
    d.ok("validation_result", json!({ "validation_id": validation_id, "verdict": "reject" })).await;

    assert!(d.quiet_for(Duration::from_millis(300), is_gossip).await);
    let cause = d
        .err("validation_result", json!({ "validation_id": validation_id, "verdict": "accept" }))
        .await;
    assert!(cause.contains("not found"));
}

#[tokio::test]
async fn suppressed_upcalls_hide_gossip_but_not_responses() {
    let net = MemoryNetwork::new();
    let yaml = with_helper("  no_upcalls: true\n");
    let (mut d, r, _sub) = helper_with_publisher(&net, &yaml).await;

    r.publish("t", Bytes::from_static(b"x")).await.unwrap();

    let metrics = d.state.metrics().clone();
    tokio::time::timeout(common::WAIT, async {
        while metrics.upcalls_suppressed.get(&[("type", "gossip_received")]) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("gossip was never delivered to the subscription");

    assert!(d.quiet_for(Duration::from_millis(200), |_| true).await);
    d.ok("publish", json!({ "topic": "t", "data": b64(b"y") })).await;
    assert_eq!(metrics.upcalls.get(&[("type", "gossip_received")]), 0);
}

#[tokio::test]
async fn unanswered_validation_times_out_as_ignore() {
    let net = MemoryNetwork::new();
    let yaml = with_helper("  validation_timeout_ms: 100\n");
    let (mut d, r, _sub) = helper_with_publisher(&net, &yaml).await;

    r.publish("t", Bytes::from_static(b"slow")).await.unwrap();
    let Upcall::ValidationNeeded { validation_id, .. } = d.upcall_where(is_validation).await else {
        unreachable!()
    };
    tokio::time::sleep(Duration::from_millis(300)).await;

    let cause = d
        .err("validation_result", json!({ "validation_id": validation_id, "verdict": "accept" }))
        .await;
    assert!(cause.contains("not found"));
    assert!(d.quiet_for(Duration::from_millis(100), is_gossip).await);
    assert_eq!(
        d.state.metrics().validations.get(&[("verdict", "ignore"), ("source", "timeout")]),
        1
    );
}

#[tokio::test]
async fn unsubscribe_drops_pending_validations() {
    let net = MemoryNetwork::new();
    let (mut d, r, sub) = helper_with_publisher(&net, BASE).await;

    r.publish("t", Bytes::from_static(b"x")).await.unwrap();
    let Upcall::ValidationNeeded { validation_id, .. } = d.upcall_where(is_validation).await else {
        unreachable!()
    };
    d.ok("unsubscribe", json!({ "subscription_id": sub })).await;
    let cause = d
        .err("validation_result", json!({ "validation_id": validation_id, "verdict": "accept" }))
        .await;
    assert!(cause.contains("not found"));
}

#[tokio::test]
async fn get_metrics_before_first_tick_is_the_default_snapshot() {
    let net = MemoryNetwork::new();
    let yaml = with_helper("  metrics_refresh_ms: 600000\n");
    let mut d = spawn_helper(&net, 1, &yaml).await;

    let v = d.ok("get_metrics", json!({})).await;
    assert_eq!(v, serde_json::to_value(MetricsSnapshot::default()).unwrap());
}

#[tokio::test]
async fn get_metrics_serves_the_collected_snapshot() {
    let net = MemoryNetwork::new();
    let yaml = with_helper("  metrics_refresh_ms: 100\n");
    let (mut d, _r, _sub) = helper_with_publisher(&net, &yaml).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    let snap: MetricsSnapshot = serde_json::from_value(d.ok("get_metrics", json!({})).await).unwrap();
    assert!(snap.ticks >= 1);
    assert_eq!(snap.connected_peers, 1);
    assert_eq!(snap.outbound_connections, 1);
    assert_eq!(snap.subscriptions, 1);
    assert_eq!(snap.topics, 1);
}

#[tokio::test]
async fn generate_keypair_returns_a_fresh_identity() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;

    let a = d.ok("generate_keypair", json!({})).await;
    let b = d.ok("generate_keypair", json!({})).await;
    assert_eq!(a["secret_key"].as_str().unwrap().len(), 64);
    assert_eq!(a["public_key"], a["peer_id"]);
    assert_ne!(a["peer_id"], b["peer_id"]);
}

#[tokio::test]
async fn listen_adds_addresses_and_rejects_taken_ones() {
    let net = MemoryNetwork::new();
    let mut d = spawn_helper(&net, 1, BASE).await;
    let (_r, _events) = remote(&net, 2, REMOTE).await;

    let v = d.ok("listen", json!({ "addrs": ["/ip4/10.0.0.1/tcp/4002"] })).await;
    assert_eq!(v["addrs"].as_array().unwrap().len(), 2);

    let cause = d.err("listen", json!({ "addrs": [REMOTE] })).await;
    assert!(cause.contains("address in use"), "{cause}");
}
