//! Shared-secret authentication for server-to-server calls.
//!
//! Callers send `hex(sha256(secret))` in the `X-Auth-Token` header. The
//! digest is computed once when the gate is built or reloaded; requests only
//! compare bytes, in constant time.

use std::sync::RwLock;

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::domain::Error;

pub const TOKEN_HEADER: &str = "x-auth-token";

type TokenDigest = [u8; 32];

#[derive(Debug)]
pub struct AuthGate {
    digest: RwLock<Option<TokenDigest>>,
}

fn digest(secret: &SecretString) -> TokenDigest {
    Sha256::digest(secret.expose_secret().as_bytes()).into()
}

impl AuthGate {
    pub fn new(secret: &SecretString) -> Self {
        Self {
            digest: RwLock::new(Some(digest(secret))),
        }
    }

    /// The header value a caller holding `secret` must send.
    pub fn token_for(secret: &SecretString) -> String {
        hex::encode(digest(secret))
    }

    /// Swaps in a new secret; requests using the old token fail from now on.
    pub fn reload(&self, secret: &SecretString) {
        let next = digest(secret);
        match self.digest.write() {
            Ok(mut slot) => *slot = Some(next),
            Err(poisoned) => *poisoned.into_inner() = Some(next),
        }
        info!("shared secret reloaded");
    }

    /// Rejects every request until the next reload.
    pub fn revoke(&self) {
        match self.digest.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        info!("shared secret revoked");
    }

    pub fn verify(&self, presented: Option<&str>) -> Result<(), Error> {
        let presented = presented
            .and_then(|raw| hex::decode(raw.trim()).ok())
            .ok_or(Error::Unauthorized)?;

        let guard = self.digest.read().map_err(|_| Error::Unauthorized)?;
        let expected = guard.as_ref().ok_or(Error::Unauthorized)?;

        // ct_eq on slices of different length is false without leaking where
        // they differ.
        if bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}
