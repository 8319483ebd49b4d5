//! Helper config loader (strict parsing).

pub mod schema;

use std::fs;

use peerlink_core::error::{PeerlinkError, Result};

pub use schema::{GatingSection, HelperConfig, HelperSection, KeypairSection};

pub fn load_from_file(path: &str) -> Result<HelperConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| PeerlinkError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<HelperConfig> {
    let cfg: HelperConfig = serde_yaml::from_str(s)
        .map_err(|e| PeerlinkError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
