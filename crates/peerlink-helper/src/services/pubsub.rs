//! Publish/subscribe methods and the validator round trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::{
    Empty, Method, PublishReq, RpcCall, SubscribeReq, SubscribeResp, UnsubscribeReq, ValidationResultReq,
};
use peerlink_core::protocol::upcall::Upcall;
use peerlink_core::Verdict;

use crate::app_state::AppState;
use crate::dispatch::{reply, RpcService};
use crate::host::{GossipMessage, TopicValidator};
use crate::obs::metrics::HelperMetrics;
use crate::registry::{Subscription, ValidationRegistry};
use crate::upcall::UpcallEmitter;

const SINK_BUFFER: usize = 64;

pub struct PubSubService;

#[async_trait]
impl RpcService for PubSubService {
    fn methods(&self) -> &'static [Method] {
        &[Method::Subscribe, Method::Unsubscribe, Method::Publish, Method::ValidationResult]
    }

    async fn handle(&self, ctx: AppState, method: Method, call: RpcCall) -> Result<Value> {
        match method {
            Method::Subscribe => subscribe(&ctx, call.data()?).await,
            Method::Unsubscribe => unsubscribe(&ctx, call.data()?).await,
            Method::Publish => publish(&ctx, call.data()?).await,
            Method::ValidationResult => validation_result(&ctx, call.data()?),
            other => Err(PeerlinkError::UnknownMethod(other.as_str().to_string())),
        }
    }
}

async fn subscribe(ctx: &AppState, req: SubscribeReq) -> Result<Value> {
    if req.topic.is_empty() {
        return Err(PeerlinkError::BadRequest("topic must not be empty".into()));
    }
    let subs = ctx.subscriptions();
    let id = subs.reserve(&req.topic)?;

    let hook = Arc::new(SubscriptionValidator {
        subscription_id: id,
        topic: req.topic.clone(),
        validations: Arc::clone(ctx.validations()),
        emitter: ctx.emitter().clone(),
        timeout: ctx.cfg().helper.validation_timeout_ms.map(Duration::from_millis),
        metrics: Arc::clone(ctx.metrics()),
    });
    let (sink_tx, sink_rx) = mpsc::channel(SINK_BUFFER);
    if let Err(e) = ctx.host().join(&req.topic, hook, sink_tx).await {
        subs.release(&req.topic, id);
        return Err(e);
    }

    let forwarder = tokio::spawn(forward_gossip(id, sink_rx, ctx.emitter().clone()));
    subs.commit(id, Subscription { topic: req.topic.clone(), forwarder })?;

    tracing::info!(subscription_id = id, topic = %req.topic, "subscribed");
    reply(&SubscribeResp { subscription_id: id })
}

async fn unsubscribe(ctx: &AppState, req: UnsubscribeReq) -> Result<Value> {
    let id = req.subscription_id;
    let sub = ctx
        .subscriptions()
        .remove(id)
        .ok_or_else(|| PeerlinkError::NotFound(format!("subscription {id}")))?;
    sub.forwarder.abort();

    let dropped = ctx.validations().cancel_subscription(id);
    if let Err(e) = ctx.host().leave(&sub.topic).await {
        tracing::warn!(subscription_id = id, topic = %sub.topic, error = %e, "leave failed");
    }
    tracing::info!(subscription_id = id, topic = %sub.topic, dropped_validations = dropped, "unsubscribed");
    reply(&Empty {})
}

async fn publish(ctx: &AppState, req: PublishReq) -> Result<Value> {
    if req.topic.is_empty() {
        return Err(PeerlinkError::BadRequest("topic must not be empty".into()));
    }
    ctx.host().publish(&req.topic, req.data).await?;
    reply(&Empty {})
}

fn validation_result(ctx: &AppState, req: ValidationResultReq) -> Result<Value> {
    ctx.validations().resolve(req.validation_id, req.verdict)?;
    reply(&Empty {})
}

async fn forward_gossip(subscription_id: u64, mut rx: mpsc::Receiver<GossipMessage>, emitter: UpcallEmitter) {
    while let Some(msg) = rx.recv().await {
        emitter
            .emit(Upcall::GossipReceived {
                subscription_id,
                topic: msg.topic,
                sender: msg.from,
                data: msg.data,
            })
            .await;
    }
}

/// Per-topic hook: parks each inbound message until the daemon's verdict.
struct SubscriptionValidator {
    subscription_id: u64,
    topic: String,
    validations: Arc<ValidationRegistry>,
    emitter: UpcallEmitter,
    timeout: Option<Duration>,
    metrics: Arc<HelperMetrics>,
}

impl SubscriptionValidator {
    fn count(&self, verdict: Verdict, source: &str) -> Verdict {
        self.metrics
            .validations
            .inc(&[("verdict", verdict.as_str()), ("source", source)]);
        verdict
    }
}

#[async_trait]
impl TopicValidator for SubscriptionValidator {
    async fn validate(&self, msg: &GossipMessage) -> Verdict {
        // nobody will answer a suppressed validation_needed
        if self.emitter.suppressed() {
            return self.count(Verdict::Accept, "auto");
        }

        let (vid, rx) = match self.validations.open(self.subscription_id, msg.from.clone(), msg.data.clone()) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(subscription_id = self.subscription_id, error = %e, "cannot park validation");
                return self.count(Verdict::Ignore, "internal");
            }
        };

        let upcall = Upcall::ValidationNeeded {
            validation_id: vid,
            subscription_id: self.subscription_id,
            topic: self.topic.clone(),
            sender: msg.from.clone(),
            data: msg.data.clone(),
        };
        if !self.emitter.emit(upcall).await {
            self.validations.cancel(vid);
            return self.count(Verdict::Ignore, "closed");
        }

        let verdict = match self.timeout {
            None => rx.await.ok(),
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(v) => v.ok(),
                Err(_) => {
                    self.validations.cancel(vid);
                    tracing::warn!(validation_id = vid, topic = %self.topic, "validation timed out");
                    return self.count(Verdict::Ignore, "timeout");
                }
            },
        };
        match verdict {
            Some(v) => self.count(v, "daemon"),
            None => self.count(Verdict::Ignore, "cancelled"),
        }
    }
}
