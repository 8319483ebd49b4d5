//! Value types crossing the process boundary.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PeerlinkError, Result};

/// Stable identifier of a network participant.
///
/// Canonical form is the lowercase hex encoding of the participant's 32-byte
/// ed25519 public key; equality and hashing go through that string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    pub fn from_public_key(key: &[u8; 32]) -> Self {
        Self(hex::encode(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = PeerlinkError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.to_ascii_lowercase();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PeerlinkError::BadRequest(format!("invalid peer id: {s}")));
        }
        Ok(Self(s))
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerlinkError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PeerId> for String {
    fn from(p: PeerId) -> Self {
        p.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address: `/ip4/<ip>/tcp/<port>[/p2p/<peer>]` (or `/ip6/...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Multiaddr {
    ip: IpAddr,
    port: u16,
    peer: Option<PeerId>,
}

impl Multiaddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, peer: None }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// Attach (or replace) the `/p2p/` component.
    pub fn with_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Transport part only (no `/p2p/` component).
    pub fn transport(&self) -> Multiaddr {
        Self { ip: self.ip, port: self.port, peer: None }
    }
}

impl FromStr for Multiaddr {
    type Err = PeerlinkError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || PeerlinkError::BadRequest(format!("invalid multiaddr: {s}"));

        let mut parts = s.split('/');
        if parts.next() != Some("") {
            return Err(bad());
        }

        let ip: IpAddr = match (parts.next(), parts.next()) {
            (Some("ip4"), Some(v)) => IpAddr::V4(v.parse().map_err(|_| bad())?),
            (Some("ip6"), Some(v)) => IpAddr::V6(v.parse().map_err(|_| bad())?),
            _ => return Err(bad()),
        };
        let port: u16 = match (parts.next(), parts.next()) {
            (Some("tcp"), Some(v)) => v.parse().map_err(|_| bad())?,
            _ => return Err(bad()),
        };
        let peer = match (parts.next(), parts.next()) {
            (None, _) => None,
            (Some("p2p"), Some(v)) => Some(v.parse()?),
            _ => return Err(bad()),
        };
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self { ip, port, peer })
    }
}

impl TryFrom<String> for Multiaddr {
    type Error = PeerlinkError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Multiaddr> for String {
    fn from(a: Multiaddr) -> Self {
        a.to_string()
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = if self.ip.is_ipv4() { "ip4" } else { "ip6" };
        write!(f, "/{proto}/{}/tcp/{}", self.ip, self.port)?;
        if let Some(p) = &self.peer {
            write!(f, "/p2p/{p}")?;
        }
        Ok(())
    }
}

/// A peer and the addresses it is known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    #[serde(default)]
    pub addrs: Vec<Multiaddr>,
}

/// Validator decision for one gossip message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Deliver and propagate.
    Accept,
    /// Drop and penalize the sender.
    Reject,
    /// Drop silently.
    Ignore,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Reject => "reject",
            Verdict::Ignore => "ignore",
        }
    }
}

/// Serde adapter: `Bytes` <-> standard base64 string.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Bytes, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Bytes, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const PEER: &str = "8a88e3dd7409f195fd52db2d3cba5d72ca6709bf1d94121bf3748801b40f6f5c";

    #[test]
    fn multiaddr_with_peer_round_trips_through_display() {
        let s = format!("/ip4/10.1.2.3/tcp/7000/p2p/{PEER}");
        let a: Multiaddr = s.parse().unwrap();
        assert_eq!(a.port(), 7000);
        assert_eq!(a.peer_id().map(PeerId::as_str), Some(PEER));
        assert_eq!(a.to_string(), s);
        assert_eq!(a.transport().to_string(), "/ip4/10.1.2.3/tcp/7000");
    }

    #[test]
    fn multiaddr_rejects_garbage() {
        for s in ["", "ip4/1.2.3.4/tcp/1", "/ip4/1.2.3.4", "/ip4/x/tcp/1", "/ip4/1.2.3.4/udp/1", "/ip4/1.2.3.4/tcp/1/p2p/zz"] {
            assert!(s.parse::<Multiaddr>().is_err(), "{s}");
        }
    }

    #[test]
    fn peer_id_is_case_insensitive() {
        let upper: PeerId = PEER.to_ascii_uppercase().parse().unwrap();
        assert_eq!(upper.as_str(), PEER);
    }

    #[test]
    fn verdict_wire_names() {
        assert_eq!(serde_json::to_string(&Verdict::Ignore).unwrap(), "\"ignore\"");
    }
}
