//! Privacy-preserving vote commitments.
//!
//! A commitment binds a voter, an election and a fresh nonce into a keyed
//! digest. It is published on the ledger in place of the voter's identity, so
//! the ledger entry can be correlated with local state by the server but
//! cannot be traced back to a voter by anyone without the commitment key.

use std::fmt;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

pub type HmacSha256 = Hmac<Sha256>;

/// Length of a commitment digest, in bytes.
pub const COMMITMENT_LEN: usize = 32;

/// Domain separator so commitments can never collide with other HMACs made
/// under the same key.
const DOMAIN: &[u8] = b"ballot-ledger/vote-commitment/v1";

/// A freshness value bound into a commitment: the cast time plus 128 random bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Generate a new nonce for a vote cast at `at`.
    pub fn fresh(rng: &mut (impl RngCore + CryptoRng), at: DateTime<Utc>) -> Self {
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        Self(format!(
            "{}-{}",
            at.timestamp_millis(),
            HEXLOWER.encode(&random)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A fixed-length, hex-encoded vote commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment(String);

impl Commitment {
    /// Parse a commitment from its hex form.
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into().to_lowercase();
        match HEXLOWER.decode(hex.as_bytes()) {
            Ok(bytes) if bytes.len() == COMMITMENT_LEN => Some(Self(hex)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Commitment {
    type Error = String;

    fn try_from(hex: String) -> std::result::Result<Self, Self::Error> {
        Self::from_hex(hex.clone()).ok_or_else(|| format!("'{hex}' is not a valid commitment"))
    }
}

impl From<Commitment> for String {
    fn from(commitment: Commitment) -> Self {
        commitment.0
    }
}

/// Derives vote commitments under a server-held secret key.
#[derive(Clone)]
pub struct IdentityHasher {
    key: Vec<u8>,
}

impl IdentityHasher {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// Commit to a vote by `voter_id` in `election_id`.
    ///
    /// Pure: the same inputs always give the same commitment, and any change
    /// of voter, election or nonce gives a different one.
    pub fn commit(&self, voter_id: &str, election_id: &str, nonce: &Nonce) -> Result<Commitment> {
        if voter_id.is_empty() {
            return Err(Error::InvalidArgument("voter ID is empty".to_string()));
        }
        if election_id.is_empty() {
            return Err(Error::InvalidArgument("election ID is empty".to_string()));
        }
        if nonce.as_str().is_empty() {
            return Err(Error::InvalidArgument("nonce is empty".to_string()));
        }

        let mut hmac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        hmac.update(DOMAIN);
        // Length-prefix every field so no two distinct inputs share an encoding.
        for field in [voter_id, election_id, nonce.as_str()] {
            hmac.update(&(field.len() as u64).to_be_bytes());
            hmac.update(field.as_bytes());
        }
        let digest = hmac.finalize().into_bytes();
        Ok(Commitment(HEXLOWER.encode(&digest)))
    }
}
