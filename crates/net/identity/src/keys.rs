//! Ephemeral Ed25519 keypair generation.

use std::fmt;

use libp2p::PeerId;
use libp2p::identity::{Keypair, PublicKey, ed25519};
use rand_08::RngCore;
use rand_08::rngs::OsRng;
use tracing::debug;

/// Errors from identity generation.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand_08::Error),

    #[error("invalid secret key material: {0}")]
    InvalidKey(#[from] libp2p::identity::DecodingError),
}

/// The keypair this process speaks for, plus the peer id derived from it.
#[derive(Clone)]
pub struct LocalIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl LocalIdentity {
    /// Generate a fresh Ed25519 identity from the OS CSPRNG.
    ///
    /// Entropy failure is surfaced rather than retried: a process that cannot
    /// obtain key material has no identity to probe with.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut secret = [0u8; 32];
        OsRng.try_fill_bytes(&mut secret)?;
        let identity = Self::from_secret_bytes(secret)?;
        debug!(peer_id = %identity.peer_id, "Generated ephemeral identity");
        Ok(identity)
    }

    /// Build an identity from raw Ed25519 secret key bytes.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Self, IdentityError> {
        let secret = ed25519::SecretKey::try_from_bytes(secret)?;
        Ok(Self::from_keypair(Keypair::from(ed25519::Keypair::from(secret))))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = keypair.public().to_peer_id();
        Self { keypair, peer_id }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}
