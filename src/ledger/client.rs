use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use ed25519_dalek::{Signer, SigningKey};
use rocket::tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};

use crate::commitment::Commitment;

use super::{
    LedgerError, LedgerTransport, Receipt, SignedTransaction, TransactionStatus,
    UnsignedTransaction, VotePayload,
};

/// Timing policy for talking to the ledger.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// How long to wait for a broadcast transaction to be ordered.
    pub confirm_timeout: Duration,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// How long to keep looking for a commitment whose submission outcome is unknown.
    pub reconcile_timeout: Duration,
}

/// The process-wide signing credential, together with the nonce sequence of
/// its account.
///
/// Every submission signs and broadcasts while holding the nonce lock, so
/// concurrent votes are queued per signing account and never reuse a nonce.
pub struct SigningIdentity {
    key: SigningKey,
    address: String,
    /// Next nonce to use, or `None` if it must be fetched from the ledger.
    next_nonce: Mutex<Option<u64>>,
}

impl SigningIdentity {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let address = HEXLOWER.encode(key.verifying_key().as_bytes());
        Self {
            key,
            address,
            next_nonce: Mutex::new(None),
        }
    }

    /// Load a signing key from its hex-encoded 32-byte seed.
    pub fn from_hex_seed(seed: &str) -> Result<Self, String> {
        let bytes = HEXLOWER_PERMISSIVE
            .decode(seed.trim().as_bytes())
            .map_err(|e| format!("signing key is not valid hex: {e}"))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("signing key must be 32 bytes, got {}", b.len()))?;
        Ok(Self::from_seed(seed))
    }

    /// The account address: the hex-encoded verifying key.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, nonce: u64, payload: VotePayload) -> Result<SignedTransaction, LedgerError> {
        let transaction = UnsignedTransaction {
            from: self.address.clone(),
            nonce,
            payload,
        };
        let signature = self.key.sign(&transaction.signing_bytes()?);
        Ok(SignedTransaction {
            transaction,
            signature: HEXLOWER.encode(&signature.to_bytes()),
        })
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Signs vote payloads, submits them to the ledger and waits for confirmation.
pub struct LedgerClient {
    transport: Arc<dyn LedgerTransport>,
    identity: SigningIdentity,
    settings: LedgerSettings,
}

impl LedgerClient {
    pub fn new(
        transport: Arc<dyn LedgerTransport>,
        identity: SigningIdentity,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            transport,
            identity,
            settings,
        }
    }

    /// The address of the signing account.
    pub fn address(&self) -> &str {
        self.identity.address()
    }

    /// Submit a vote and block until the ledger has ordered it.
    ///
    /// A transaction that was broadcast but not confirmed within the
    /// confirmation timeout fails with [`LedgerError::Timeout`]; its outcome is
    /// unknown and must be reconciled, never resubmitted blindly.
    pub async fn submit(&self, payload: VotePayload) -> Result<Receipt, LedgerError> {
        let transaction_id = self.broadcast(payload).await?;
        debug!("Broadcast ledger transaction {transaction_id}, awaiting confirmation");
        self.await_confirmation(&transaction_id).await
    }

    /// Sign and broadcast under the account's nonce lock.
    async fn broadcast(&self, payload: VotePayload) -> Result<String, LedgerError> {
        let mut next_nonce = self.identity.next_nonce.lock().await;
        let mut resynced = false;
        loop {
            let nonce = match *next_nonce {
                Some(nonce) => nonce,
                None => self.transport.account_nonce(self.address()).await?,
            };
            let transaction = self.identity.sign(nonce, payload.clone())?;
            match self.transport.send_transaction(&transaction).await {
                Ok(transaction_id) => {
                    *next_nonce = Some(nonce + 1);
                    return Ok(transaction_id);
                }
                Err(LedgerError::StaleNonce(used)) if !resynced => {
                    warn!("Ledger nonce {used} already used, resynchronising with the ledger");
                    *next_nonce = None;
                    resynced = true;
                }
                Err(LedgerError::StaleNonce(used)) => {
                    *next_nonce = None;
                    return Err(LedgerError::Rejected(format!(
                        "nonce {used} still stale after resynchronising"
                    )));
                }
                Err(err @ LedgerError::Timeout { .. }) => {
                    // The nonce may or may not have been consumed.
                    *next_nonce = None;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Poll the ledger until the transaction is ordered, rejected, or the
    /// confirmation timeout passes.
    async fn await_confirmation(&self, transaction_id: &str) -> Result<Receipt, LedgerError> {
        let deadline = Instant::now() + self.settings.confirm_timeout;
        loop {
            match self.transport.transaction_status(transaction_id).await {
                Ok(TransactionStatus::Confirmed {
                    sequence_number,
                    fee,
                }) => {
                    return Ok(Receipt {
                        transaction_id: transaction_id.to_string(),
                        sequence_number,
                        fee_spent: fee,
                    })
                }
                Ok(TransactionStatus::Rejected { reason }) => {
                    return Err(LedgerError::Rejected(reason));
                }
                Ok(TransactionStatus::Pending | TransactionStatus::Unknown) => {}
                Err(e) => debug!("Status check for {transaction_id} failed: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::Timeout {
                    transaction_id: Some(transaction_id.to_string()),
                });
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Look for a confirmed transaction carrying `commitment`, waiting up to
    /// the reconcile timeout for it to appear.
    ///
    /// `Ok(None)` means the ledger was reachable and the commitment was not
    /// found. If the ledger could not be queried at all, the last error is
    /// returned instead, since absence was never established.
    pub async fn reconcile(&self, commitment: &Commitment) -> Result<Option<Receipt>, LedgerError> {
        let deadline = Instant::now() + self.settings.reconcile_timeout;
        loop {
            let last_error = match self.transport.find_by_commitment(commitment).await {
                Ok(Some(receipt)) => return Ok(Some(receipt)),
                Ok(None) => None,
                Err(e) => Some(e),
            };

            let now = Instant::now();
            if now >= deadline {
                return match last_error {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }
}
