//! Shared state for the helper process.
//!
//! Built once at startup and handed by clone to every task: the transport
//! loop, spawned handlers, the host event consumer and the metrics timer.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use peerlink_core::error::Result;
use peerlink_core::protocol::rpc::RpcCall;
use peerlink_core::protocol::upcall::Upcall;

use crate::config::HelperConfig;
use crate::dispatch::Dispatcher;
use crate::gating::{GatingEvaluator, GatingState};
use crate::host::{Host, HostEvent, StreamFrame};
use crate::obs::{HelperMetrics, MetricsCollector, RegistrySizes};
use crate::registry::{StreamRegistry, SubscriptionRegistry, ValidationRegistry};
use crate::services;
use crate::upcall::{OutboundQueue, UpcallEmitter};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: HelperConfig,
    host: Arc<dyn Host>,
    subscriptions: SubscriptionRegistry,
    validations: Arc<ValidationRegistry>,
    streams: Arc<StreamRegistry>,
    gating: Arc<GatingEvaluator>,
    emitter: UpcallEmitter,
    metrics: Arc<HelperMetrics>,
    collector: Arc<MetricsCollector>,
    dispatcher: Dispatcher,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Build state, install the gating evaluator into `host` and accept
    /// streams on the configured protocol.
    /// The returned queue belongs to the single outbound writer.
    pub fn new(cfg: HelperConfig, host: Arc<dyn Host>) -> Result<(Self, OutboundQueue)> {
        let metrics = Arc::new(HelperMetrics::default());

        let gating = Arc::new(GatingEvaluator::new(GatingState::from_config(&cfg)?, Arc::clone(&metrics)));
        host.set_gater(gating.clone());
        host.set_stream_handler(&cfg.helper.protocol);

        let (emitter, queue) =
            UpcallEmitter::new(cfg.helper.upcall_queue, cfg.helper.no_upcalls, Arc::clone(&metrics));
        let collector = Arc::new(MetricsCollector::new(Duration::from_millis(cfg.helper.metrics_refresh_ms)));

        let dispatcher = Dispatcher::new();
        services::register_all(&dispatcher);

        let state = Self {
            inner: Arc::new(AppStateInner {
                cfg,
                host,
                subscriptions: SubscriptionRegistry::new(),
                validations: Arc::new(ValidationRegistry::new()),
                streams: Arc::new(StreamRegistry::new()),
                gating,
                emitter,
                metrics,
                collector,
                dispatcher,
                tasks: Mutex::new(Vec::new()),
            }),
        };
        Ok((state, queue))
    }

    pub fn cfg(&self) -> &HelperConfig {
        &self.inner.cfg
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    pub fn validations(&self) -> &Arc<ValidationRegistry> {
        &self.inner.validations
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.inner.streams
    }

    pub fn gating(&self) -> &Arc<GatingEvaluator> {
        &self.inner.gating
    }

    pub fn emitter(&self) -> &UpcallEmitter {
        &self.inner.emitter
    }

    pub fn metrics(&self) -> &Arc<HelperMetrics> {
        &self.inner.metrics
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.inner.collector
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    pub fn registry_sizes(&self) -> RegistrySizes {
        RegistrySizes {
            subscriptions: self.inner.subscriptions.len() as u64,
            pending_validations: self.inner.validations.len() as u64,
            open_streams: self.inner.streams.len() as u64,
        }
    }

    /// Run the inline stage of one request now; the returned future
    /// dispatches it and enqueues its response. It fails only when the
    /// outbound queue is gone.
    pub fn handle_request(
        &self,
        seq: u64,
        call: Result<RpcCall>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let call = call.and_then(|c| self.inner.dispatcher.prepare(self, c));
        let method = call.as_ref().ok().and_then(|c| c.method().ok());
        let state = self.clone();
        async move {
            let resp = state.inner.dispatcher.dispatch(state.clone(), seq, call).await;
            state.inner.emitter.respond(&resp).await?;
            if let (Some(method), Ok(result)) = (method, &resp.outcome) {
                state.inner.dispatcher.after_reply(&state, method, result);
            }
            Ok(())
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    /// Consume host notifications and turn them into upcalls.
    pub fn spawn_host_events(&self, mut events: mpsc::Receiver<HostEvent>) {
        let state = self.clone();
        let task = tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                match ev {
                    HostEvent::PeerConnected { peer, direction } => {
                        tracing::info!(%peer, direction = direction.as_str(), "peer connected");
                        state.emitter().emit(Upcall::PeerConnected { peer_id: peer }).await;
                    }
                    HostEvent::PeerDisconnected { peer } => {
                        tracing::info!(%peer, "peer disconnected");
                        state.emitter().emit(Upcall::PeerDisconnected { peer_id: peer }).await;
                    }
                    HostEvent::IncomingStream(conn) => {
                        services::streams::accept_incoming(&state, conn).await;
                    }
                }
            }
            tracing::debug!("host event stream ended");
        });
        self.track(task);
    }

    /// Start the metrics timer. The first collection happens one period in.
    pub fn spawn_metrics(&self) {
        let state = self.clone();
        let period = self.inner.collector.period();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snap = state
                    .collector()
                    .record(state.host().stats(), state.registry_sizes());
                tracing::trace!(ticks = snap.ticks, peers = snap.connected_peers, "metrics collected");
            }
        });
        self.track(task);
    }

    /// Drain registries and close the host. Handlers still running may finish
    /// or be abandoned.
    pub async fn shutdown(&self) {
        self.inner.metrics.set_draining();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for t in tasks {
            t.abort();
        }

        let dropped = self.inner.validations.drain();

        let subs = self.inner.subscriptions.drain();
        for (_, sub) in &subs {
            sub.forwarder.abort();
            if let Err(e) = self.inner.host.leave(&sub.topic).await {
                tracing::debug!(topic = %sub.topic, error = %e, "leave during shutdown failed");
            }
        }

        let streams = self.inner.streams.drain();
        let stream_count = streams.len();
        for (_, entry) in streams {
            entry.finish(StreamFrame::Reset);
        }

        if let Err(e) = self.inner.host.close().await {
            tracing::warn!(error = %e, "host close failed");
        }
        tracing::info!(
            pending_validations = dropped,
            subscriptions = subs.len(),
            streams = stream_count,
            "helper drained"
        );
    }
}
