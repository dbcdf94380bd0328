//! ==============================================================================
//! auth.rs - challenge-response hash chain for the upstream api
//! ==============================================================================
//!
//! purpose:
//!     every poll is authorized with a hash derived from the password and a
//!     pair of server-issued salts. the password itself never leaves the device.
//!
//! algorithm (must match the api bit for bit):
//!
//! ```text
//!     base     = sha256^5(password)            round 1 hashes the raw password,
//!                                              rounds 2..5 hash the previous hex
//!     perm     = sha256(base + permanent_salt)
//!     response = sha256(one_time_salt + perm)
//!
//!     all digests are chained as lower-case hex TEXT, not raw bytes.
//! ```
//!
//! relationships:
//!     - used by: api.rs (builds the data request)
//!     - uses: sha2 (digest), hex (encoding)
//!
//! ==============================================================================

use crate::domain::Challenge;
use crate::error::AuthProtocolError;
use sha2::{Digest, Sha256};

/// rounds applied to the bare password
pub const PASSWORD_ROUNDS: usize = 5;

/// sha-256 of `text`, lower-case hex (64 chars)
pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// apply sha-256 `rounds` times, feeding each hex digest into the next round
pub fn sha256_iterated(text: &str, rounds: usize) -> String {
    let mut digest = text.to_string();
    for _ in 0..rounds {
        digest = sha256_hex(&digest);
    }
    digest
}

/// Compute the response hash the api expects for one challenge.
pub fn compute_response(password: &str, permanent_salt: &str, one_time_salt: &str) -> String {
    let base = sha256_iterated(password, PASSWORD_ROUNDS);
    let perm = sha256_hex(&format!("{}{}", base, permanent_salt));
    sha256_hex(&format!("{}{}", one_time_salt, perm))
}

impl Challenge {
    /// Answer the challenge. Takes `self` so a salt pair can only be used once.
    pub fn respond(self, password: &str) -> String {
        compute_response(password, &self.permanent_salt, &self.one_time_salt)
    }
}

/// Remembers the last consumed one-time salt.
///
/// The api must hand out a fresh salt for every attempt; seeing the same one
/// twice in a row means the challenge is stale and the poll fails.
#[derive(Debug, Default)]
pub struct SaltGuard {
    last_one_time_salt: Option<String>,
}

impl SaltGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a freshly fetched challenge and mark its one-time salt as used.
    pub fn accept(&mut self, challenge: &Challenge) -> Result<(), AuthProtocolError> {
        if challenge.permanent_salt.is_empty() {
            return Err(AuthProtocolError::MalformedChallenge("empty permasalt".into()));
        }
        if challenge.one_time_salt.is_empty() {
            return Err(AuthProtocolError::MalformedChallenge("empty salt".into()));
        }
        if self.last_one_time_salt.as_deref() == Some(challenge.one_time_salt.as_str()) {
            return Err(AuthProtocolError::ReusedSalt);
        }
        self.last_one_time_salt = Some(challenge.one_time_salt.clone());
        Ok(())
    }
}
