//! The external ledger: an append-only, independently verifiable log of vote
//! commitments.
//!
//! [`LedgerClient`] owns the signing key, sequences submissions per signing
//! account and waits for confirmation. The network itself is reached through a
//! [`LedgerTransport`]: [`RpcTransport`] speaks JSON-RPC over HTTP, and
//! [`MemoryLedger`] is an in-process ledger for development and tests.

use rocket::serde::json::serde_json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commitment::Commitment;

mod client;
mod memory;
mod rpc;

pub use client::{LedgerClient, LedgerSettings, SigningIdentity};
pub use memory::{Fault, MemoryLedger};
pub use rpc::RpcTransport;

/// Failures of the ledger leg.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The network could not be reached; nothing was submitted. Retryable.
    #[error("ledger network unavailable: {0}")]
    NetworkUnavailable(String),
    /// The signing account cannot pay the transaction fee. Fatal.
    #[error("signing account has insufficient funds: {0}")]
    InsufficientFunds(String),
    /// The transaction may or may not have been accepted. Must be reconciled.
    #[error("ledger did not confirm transaction {} in time", .transaction_id.as_deref().unwrap_or("<unknown>"))]
    Timeout { transaction_id: Option<String> },
    /// The ledger refused the transaction. Fatal.
    #[error("ledger rejected transaction: {0}")]
    Rejected(String),
    /// The account nonce was already used. The client resynchronises once
    /// before surfacing this as a rejection.
    #[error("account nonce {0} was already used")]
    StaleNonce(u64),
}

/// The vote data published on the ledger. Carries the commitment, never the
/// voter's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    pub election_id: String,
    pub candidate_id: String,
    pub commitment: Commitment,
    /// Cast time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Proof that the ledger has ordered a vote transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_id: String,
    /// Position of the transaction in the ledger's ordering.
    pub sequence_number: u64,
    pub fee_spent: u64,
}

/// A vote transaction before signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    /// Hex-encoded verifying key of the signing account.
    pub from: String,
    /// Per-account nonce; must strictly increase.
    pub nonce: u64,
    pub payload: VotePayload,
}

impl UnsignedTransaction {
    /// The canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, LedgerError> {
        // Field order is fixed by the struct definition, so this is canonical.
        serde_json::to_vec(self)
            .map_err(|e| LedgerError::Rejected(format!("transaction cannot be encoded: {e}")))
    }
}

/// A vote transaction in the ledger's transport encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: UnsignedTransaction,
    /// Hex-encoded ed25519 signature over [`UnsignedTransaction::signing_bytes`].
    pub signature: String,
}

/// What the ledger knows about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not (yet) known to the ledger.
    Unknown,
    /// Accepted but not yet ordered.
    Pending,
    Confirmed { sequence_number: u64, fee: u64 },
    Rejected { reason: String },
}

/// Access to a ledger network.
#[rocket::async_trait]
pub trait LedgerTransport: Send + Sync {
    /// The next unused nonce of the given account.
    async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError>;

    /// Broadcast a signed transaction, returning its transaction ID.
    async fn send_transaction(&self, transaction: &SignedTransaction)
        -> Result<String, LedgerError>;

    async fn transaction_status(&self, transaction_id: &str)
        -> Result<TransactionStatus, LedgerError>;

    /// Look up a confirmed transaction publishing the given commitment.
    async fn find_by_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<Receipt>, LedgerError>;
}
