#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use peerlink_helper::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
helper:
  listen_addrs: ["/ip4/127.0.0.1/tcp/7000"]
  upcall_queu: 32 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.helper.upcall_queue, 64);
    assert_eq!(cfg.helper.metrics_refresh_ms, 2000);
    assert_eq!(cfg.helper.max_connections, 50);
    assert!(!cfg.helper.no_upcalls);
    assert!(cfg.helper.validation_timeout_ms.is_none());
    assert_eq!(cfg.helper.listen_addrs[0].to_string(), "/ip4/127.0.0.1/tcp/7000");
}

#[test]
fn full_config_parses() {
    let ok = r#"
version: 1
helper:
  listen_addrs: ["/ip4/0.0.0.0/tcp/7001", "/ip6/::1/tcp/7001"]
  protocol: "/chain/2.0.0"
  max_connections: 8
  metrics_refresh_ms: 500
  upcall_queue: 128
  no_upcalls: true
  validation_timeout_ms: 1500
  metrics_listen: "127.0.0.1:9100"
keypair:
  secret_key: "0101010101010101010101010101010101010101010101010101010101010101"
seeds:
  - "/ip4/10.1.1.1/tcp/7001/p2p/0202020202020202020202020202020202020202020202020202020202020202"
gating:
  trusted_addrs: ["10.1.0.0/16"]
  banned_addrs: ["192.0.2.7"]
  isolate: true
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.helper.listen_addrs.len(), 2);
    assert_eq!(cfg.helper.validation_timeout_ms, Some(1500));
    assert_eq!(cfg.seeds.len(), 1);
    assert!(cfg.gating.isolate);
}

#[test]
fn version_must_be_one() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert!(err.to_string().contains("unsupported config version"));
}

#[test]
fn range_checks() {
    for body in [
        "helper: { metrics_refresh_ms: 10 }",
        "helper: { upcall_queue: 0 }",
        "helper: { max_frame_bytes: 16 }",
        "helper: { max_connections: 0 }",
        "helper: { validation_timeout_ms: 0 }",
        "helper: { protocol: \"peerlink\" }",
        "helper: { metrics_listen: \"nowhere\" }",
        "keypair: { secret_key: \"abcd\" }",
        "gating: { banned_addrs: [\"10.0.0.0/99\"] }",
        "seeds: [\"/ip4/10.0.0.1/tcp/1\"]",
    ] {
        let yaml = format!("version: 1\n{body}\n");
        let err = config::load_from_str(&yaml).expect_err(body);
        assert_eq!(err.code().as_str(), "BAD_REQUEST", "{body}");
    }
}
