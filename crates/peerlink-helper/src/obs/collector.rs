//! Cached host statistics for `get_metrics`.
//!
//! A timer task refreshes the snapshot; readers never wait on collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;

use peerlink_core::protocol::rpc::MetricsSnapshot;

use crate::host::HostStats;

/// Registry sizes sampled alongside the host counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistrySizes {
    pub subscriptions: u64,
    pub pending_validations: u64,
    pub open_streams: u64,
}

pub struct MetricsCollector {
    latest: ArcSwap<MetricsSnapshot>,
    ticks: AtomicU64,
    period: Duration,
}

impl MetricsCollector {
    pub fn new(period: Duration) -> Self {
        Self {
            latest: ArcSwap::from_pointee(MetricsSnapshot::default()),
            ticks: AtomicU64::new(0),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Last collected snapshot; all zeros before the first tick.
    pub fn latest(&self) -> Arc<MetricsSnapshot> {
        self.latest.load_full()
    }

    pub fn record(&self, host: HostStats, sizes: RegistrySizes) -> Arc<MetricsSnapshot> {
        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let collected_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let snap = Arc::new(MetricsSnapshot {
            ticks,
            collected_at_ms,
            connected_peers: host.connected_peers,
            inbound_connections: host.inbound_connections,
            outbound_connections: host.outbound_connections,
            topics: host.topics,
            messages_published: host.messages_published,
            messages_received: host.messages_received,
            streams_opened: host.streams_opened,
            subscriptions: sizes.subscriptions,
            pending_validations: sizes.pending_validations,
            open_streams: sizes.open_streams,
        });
        self.latest.store(Arc::clone(&snap));
        snap
    }

    /// Gauge lines for the `/metrics` endpoint.
    pub fn render_extra(&self) -> Vec<(&'static str, u64)> {
        let s = self.latest();
        vec![
            ("peerlink_snapshot_ticks", s.ticks),
            ("peerlink_host_connected_peers", s.connected_peers),
            ("peerlink_host_inbound_connections", s.inbound_connections),
            ("peerlink_host_outbound_connections", s.outbound_connections),
            ("peerlink_host_topics", s.topics),
            ("peerlink_host_messages_published", s.messages_published),
            ("peerlink_host_messages_received", s.messages_received),
            ("peerlink_host_streams_opened", s.streams_opened),
            ("peerlink_subscriptions", s.subscriptions),
            ("peerlink_pending_validations", s.pending_validations),
            ("peerlink_open_streams", s.open_streams),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_before_first_tick() {
        let c = MetricsCollector::new(Duration::from_secs(2));
        assert_eq!(*c.latest(), MetricsSnapshot::default());
    }

    #[test]
    fn record_replaces_the_snapshot() {
        let c = MetricsCollector::new(Duration::from_secs(2));
        let host = HostStats { connected_peers: 3, inbound_connections: 1, ..Default::default() };
        c.record(host, RegistrySizes { subscriptions: 2, ..Default::default() });
        let s = c.latest();
        assert_eq!((s.ticks, s.connected_peers, s.subscriptions), (1, 3, 2));
        assert!(s.collected_at_ms > 0);
        assert!(c.render_extra().contains(&("peerlink_host_connected_peers", 3)));
    }
}
