//! peerlink helper process.
//!
//! - Byte channel: stdin (requests) / stdout (responses and upcalls)
//! - Logs: stderr, filtered by `RUST_LOG`
//! - Config: YAML path from the first argument, default `peerlink.yaml`
//!
//! The binary runs its host on a private in-process `MemoryNetwork`, so on
//! its own it reaches no peers: seed dials fail and are logged. Embedders that
//! need real connectivity build `AppState` from the library with their own
//! `Host` implementation and drive `transport::serve` themselves.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::{fmt, EnvFilter};

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_helper::app_state::AppState;
use peerlink_helper::host::{Host, MemoryHost, MemoryNetwork};
use peerlink_helper::identity::Keypair;
use peerlink_helper::{config, router, transport};

const HOST_EVENT_BUFFER: usize = 256;
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "peerlink-helper exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "peerlink.yaml".to_string());
    let cfg = config::load_from_file(&path)?;

    let keypair = match &cfg.keypair.secret_key {
        Some(k) => Keypair::from_hex(k)?,
        None => Keypair::generate(),
    };

    let network = MemoryNetwork::new();
    let (events_tx, events_rx) = mpsc::channel(HOST_EVENT_BUFFER);
    let host = Arc::new(MemoryHost::new(&network, keypair.peer_id(), events_tx));

    let (state, queue) = AppState::new(cfg.clone(), host.clone())?;
    state.spawn_host_events(events_rx);

    let addrs = host.listen(cfg.helper.listen_addrs.clone()).await?;
    tracing::info!(peer_id = %host.local_id(), ?addrs, protocol = %cfg.helper.protocol, "peerlink-helper starting");

    for seed in &cfg.seeds {
        if let Some(p) = seed.peer_id() {
            host.add_addrs(p, vec![seed.clone()]);
        }
        if let Err(e) = host.dial(seed).await {
            tracing::warn!(%seed, error = %e, "seed dial failed");
        }
    }

    state.spawn_metrics();

    if let Some(listen) = &cfg.helper.metrics_listen {
        let addr: SocketAddr = listen
            .parse()
            .map_err(|_| PeerlinkError::BadRequest(format!("invalid metrics_listen: {listen}")))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| PeerlinkError::Internal(format!("ops bind failed: {e}")))?;
        let app = router::build_router(state.clone());
        tracing::info!(%addr, "ops endpoint listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "ops server failed");
            }
        });
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let mut writer = tokio::spawn(queue.run(tokio::io::stdout(), stop_rx));

    let outcome = tokio::select! {
        r = transport::serve(state.clone(), tokio::io::stdin()) => r,
        w = &mut writer => match w {
            Ok(Ok(())) => Err(PeerlinkError::ChannelClosed),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(PeerlinkError::Internal(format!("writer task failed: {e}"))),
        },
    };

    state.shutdown().await;
    let _ = stop_tx.send(());
    if !writer.is_finished() && tokio::time::timeout(DRAIN_GRACE, &mut writer).await.is_err() {
        tracing::warn!("outbound queue not drained before exit");
    }
    outcome
}
