use serde::Deserialize;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::Multiaddr;

use crate::gating::filters::AddrFilter;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    pub version: u32,

    #[serde(default)]
    pub helper: HelperSection,

    #[serde(default)]
    pub keypair: KeypairSection,

    /// Bootstrap peers; always admitted regardless of capacity.
    #[serde(default)]
    pub seeds: Vec<Multiaddr>,

    #[serde(default)]
    pub gating: GatingSection,
}

impl HelperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PeerlinkError::BadRequest(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        for s in &self.seeds {
            if s.peer_id().is_none() {
                return Err(PeerlinkError::BadRequest(format!("seed {s} must include /p2p/<peer>")));
            }
        }

        self.helper.validate()?;
        self.keypair.validate()?;
        self.gating.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperSection {
    #[serde(default = "default_listen_addrs")]
    pub listen_addrs: Vec<Multiaddr>,

    /// Stream protocol accepted from startup, as if added by `add_stream_handler`.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_metrics_refresh_ms")]
    pub metrics_refresh_ms: u64,

    #[serde(default = "default_upcall_queue")]
    pub upcall_queue: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Suppress asynchronous upcalls (RPC responses are still written).
    #[serde(default)]
    pub no_upcalls: bool,

    /// Upper bound on waiting for a `validation_result`. Unset waits forever.
    #[serde(default)]
    pub validation_timeout_ms: Option<u64>,

    /// Serve `/healthz` and `/metrics` on this socket address.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl Default for HelperSection {
    fn default() -> Self {
        Self {
            listen_addrs: default_listen_addrs(),
            protocol: default_protocol(),
            max_connections: default_max_connections(),
            metrics_refresh_ms: default_metrics_refresh_ms(),
            upcall_queue: default_upcall_queue(),
            max_frame_bytes: default_max_frame_bytes(),
            no_upcalls: false,
            validation_timeout_ms: None,
            metrics_listen: None,
        }
    }
}

impl HelperSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600000).contains(&self.metrics_refresh_ms) {
            return Err(PeerlinkError::BadRequest(
                "helper.metrics_refresh_ms must be between 100 and 600000".into(),
            ));
        }
        if !(1..=65536).contains(&self.upcall_queue) {
            return Err(PeerlinkError::BadRequest(
                "helper.upcall_queue must be between 1 and 65536".into(),
            ));
        }
        if self.max_frame_bytes < 1024 {
            return Err(PeerlinkError::BadRequest(
                "helper.max_frame_bytes must be at least 1024".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(PeerlinkError::BadRequest(
                "helper.max_connections must be greater than 0".into(),
            ));
        }
        if self.validation_timeout_ms == Some(0) {
            return Err(PeerlinkError::BadRequest(
                "helper.validation_timeout_ms must be greater than 0 when set".into(),
            ));
        }
        if !self.protocol.starts_with('/') {
            return Err(PeerlinkError::BadRequest("helper.protocol must start with '/'".into()));
        }
        if let Some(l) = &self.metrics_listen {
            l.parse::<std::net::SocketAddr>().map_err(|_| {
                PeerlinkError::BadRequest(format!("helper.metrics_listen is not a socket address: {l}"))
            })?;
        }
        Ok(())
    }
}

fn default_listen_addrs() -> Vec<Multiaddr> {
    vec![Multiaddr::new(std::net::Ipv4Addr::LOCALHOST.into(), 7000)]
}
fn default_protocol() -> String {
    "/peerlink/1.0.0".into()
}
fn default_max_connections() -> usize {
    50
}
fn default_metrics_refresh_ms() -> u64 {
    2000
}
fn default_upcall_queue() -> usize {
    64
}
fn default_max_frame_bytes() -> usize {
    8 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeypairSection {
    /// Hex ed25519 secret key; a fresh one is generated when absent.
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl KeypairSection {
    pub fn validate(&self) -> Result<()> {
        if let Some(k) = &self.secret_key {
            crate::identity::Keypair::from_hex(k)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatingSection {
    #[serde(default)]
    pub trusted_peers: Vec<peerlink_core::PeerId>,
    #[serde(default)]
    pub trusted_addrs: Vec<String>,
    #[serde(default)]
    pub banned_peers: Vec<peerlink_core::PeerId>,
    #[serde(default)]
    pub banned_addrs: Vec<String>,
    #[serde(default)]
    pub isolate: bool,
}

impl GatingSection {
    pub fn validate(&self) -> Result<()> {
        for a in self.trusted_addrs.iter().chain(&self.banned_addrs) {
            AddrFilter::parse(a)?;
        }
        Ok(())
    }
}
