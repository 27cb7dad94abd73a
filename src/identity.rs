// src/identity.rs
use std::fmt;

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};

use crate::codec::{encode_base64url, fingerprint};
use crate::error::HandshakeError;

/// Ephemeral Ed25519 device identity. Lives only as long as the session that
/// created it.
pub struct Identity {
    device_id: String,
    public_key: [u8; 32],
    private_key: [u8; 32],
}

impl Identity {
    pub fn generate() -> Result<Self, HandshakeError> {
        Self::generate_with(&mut OsRng)
    }

    pub fn generate_with<R: RngCore>(rng: &mut R) -> Result<Self, HandshakeError> {
        let mut seed = [0u8; 32];
        rng.try_fill_bytes(&mut seed)
            .map_err(|e| HandshakeError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = signing_key.verifying_key().to_bytes();
        Self {
            device_id: fingerprint(&public_key),
            public_key,
            private_key: seed,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn public_key_base64url(&self) -> String {
        encode_base64url(&self.public_key)
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("device_id", &self.device_id)
            .field("public_key", &self.public_key_base64url())
            .finish_non_exhaustive()
    }
}
