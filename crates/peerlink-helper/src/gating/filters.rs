//! Address filter compilation and matching.
//!
//! Entries are a bare IP (`10.0.0.7`), a CIDR block (`10.0.0.0/8`) or a
//! multiaddr (`/ip4/10.0.0.7/tcp/7000`), the latter two collapsing to a
//! host-width block.

use std::fmt;
use std::net::IpAddr;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::Multiaddr;

/// Compiled address rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrFilter {
    net: IpAddr,
    prefix: u8,
}

impl AddrFilter {
    pub fn host(ip: IpAddr) -> Self {
        Self { net: ip, prefix: max_prefix(ip) }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('/') {
            let addr: Multiaddr = s.parse()?;
            return Ok(Self::host(addr.ip()));
        }

        let (ip_s, prefix_s) = match s.split_once('/') {
            Some((ip, p)) => (ip, Some(p)),
            None => (s, None),
        };
        let ip: IpAddr = ip_s
            .parse()
            .map_err(|_| PeerlinkError::BadRequest(format!("invalid address filter: {s}")))?;

        let prefix = match prefix_s {
            None => max_prefix(ip),
            Some(p) => {
                let p: u8 = p
                    .parse()
                    .map_err(|_| PeerlinkError::BadRequest(format!("invalid prefix in filter: {s}")))?;
                if p > max_prefix(ip) {
                    return Err(PeerlinkError::BadRequest(format!("prefix out of range: {s}")));
                }
                p
            }
        };

        Ok(Self { net: ip, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.net, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(self.prefix)) };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(self.prefix)) };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

impl fmt::Display for AddrFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.net, self.prefix)
    }
}

fn max_prefix(ip: IpAddr) -> u8 {
    if ip.is_ipv4() { 32 } else { 128 }
}

pub fn compile_filters(raw: &[String]) -> Result<Vec<AddrFilter>> {
    raw.iter().map(|s| AddrFilter::parse(s)).collect()
}

pub fn any_match(filters: &[AddrFilter], ip: IpAddr) -> bool {
    filters.iter().any(|f| f.contains(ip))
}
