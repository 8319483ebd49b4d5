//! Node identity: ed25519 keypair and the derived `PeerId`.

use ed25519_dalek::SigningKey;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::protocol::rpc::KeypairResp;
use peerlink_core::PeerId;

#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&rand::random::<[u8; 32]>()),
        }
    }

    pub fn from_hex(secret: &str) -> Result<Self> {
        let raw = hex::decode(secret.trim())
            .map_err(|e| PeerlinkError::BadRequest(format!("secret key is not hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| PeerlinkError::BadRequest("secret key must be 32 bytes".into()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(self.signing_key.verifying_key().as_bytes())
    }

    pub fn to_resp(&self) -> KeypairResp {
        KeypairResp {
            secret_key: hex::encode(self.signing_key.to_bytes()),
            public_key: hex::encode(self.signing_key.verifying_key().as_bytes()),
            peer_id: self.peer_id(),
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair").field("peer_id", &self.peer_id()).finish_non_exhaustive()
    }
}
