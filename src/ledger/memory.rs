use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use data_encoding::HEXLOWER;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::commitment::Commitment;

use super::{LedgerError, LedgerTransport, Receipt, SignedTransaction, TransactionStatus};

/// A failure to inject into the next transaction broadcast to a [`MemoryLedger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The network cannot be reached; nothing is recorded.
    Unavailable,
    /// The signing account appears unable to pay the fee.
    InsufficientFunds,
    /// The ledger refuses the transaction.
    Reject,
    /// The transaction is confirmed, but the sender sees a timeout.
    LoseResponse,
    /// The transaction is accepted but stays pending until [`MemoryLedger::confirm_pending`].
    NeverConfirm,
}

#[derive(Debug, Default)]
struct Account {
    next_nonce: u64,
    balance: u64,
}

#[derive(Debug)]
struct Entry {
    transaction: SignedTransaction,
    /// `None` while pending.
    sequence_number: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    transactions: HashMap<String, Entry>,
    /// Transaction IDs in broadcast order.
    order: Vec<String>,
    by_commitment: HashMap<Commitment, String>,
    next_sequence: u64,
    faults: VecDeque<Fault>,
    offline: bool,
}

/// An in-process ledger with scriptable failures.
///
/// Verifies signatures and nonces like a real ledger and charges a fixed fee
/// per transaction. Used by the test suite, and for development when the
/// ledger URL is `memory://`.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    /// Fee charged for each vote transaction.
    pub const FEE: u64 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the state half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Credit `amount` to an account.
    pub fn fund(&self, address: &str, amount: u64) {
        self.state()
            .accounts
            .entry(address.to_string())
            .or_default()
            .balance += amount;
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.state()
            .accounts
            .get(address)
            .map_or(0, |account| account.balance)
    }

    /// Advance an account's nonce, as if it had been used elsewhere.
    pub fn bump_nonce(&self, address: &str, next_nonce: u64) {
        let mut state = self.state();
        let account = state.accounts.entry(address.to_string()).or_default();
        account.next_nonce = account.next_nonce.max(next_nonce);
    }

    /// Queue a fault for the next broadcast. Faults are consumed in order.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push_back(fault);
    }

    /// While offline, every call fails with [`LedgerError::NetworkUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Order every pending transaction.
    pub fn confirm_pending(&self) {
        let mut state = self.state();
        let state = &mut *state;
        for id in &state.order {
            let Some(entry) = state.transactions.get_mut(id) else {
                continue;
            };
            if entry.sequence_number.is_none() {
                entry.sequence_number = Some(state.next_sequence);
                state.next_sequence += 1;
                state
                    .by_commitment
                    .entry(entry.transaction.transaction.payload.commitment.clone())
                    .or_insert_with(|| id.clone());
            }
        }
    }

    /// Every accepted transaction, in broadcast order.
    pub fn transactions(&self) -> Vec<SignedTransaction> {
        let state = self.state();
        state
            .order
            .iter()
            .filter_map(|id| state.transactions.get(id))
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    pub fn transaction(&self, transaction_id: &str) -> Option<SignedTransaction> {
        self.state()
            .transactions
            .get(transaction_id)
            .map(|entry| entry.transaction.clone())
    }

    /// Number of transactions publishing `commitment`.
    pub fn count_commitment(&self, commitment: &Commitment) -> usize {
        self.state()
            .transactions
            .values()
            .filter(|entry| &entry.transaction.transaction.payload.commitment == commitment)
            .count()
    }

    fn check_online(state: &State) -> Result<(), LedgerError> {
        if state.offline {
            Err(LedgerError::NetworkUnavailable(
                "memory ledger is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn verify_signature(transaction: &SignedTransaction) -> Result<(), String> {
    let key: [u8; 32] = HEXLOWER
        .decode(transaction.transaction.from.as_bytes())
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or("malformed sender address")?;
    let signature: [u8; 64] = HEXLOWER
        .decode(transaction.signature.as_bytes())
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or("malformed signature")?;
    let key = VerifyingKey::from_bytes(&key).map_err(|_| "invalid sender key")?;
    let signed_bytes = transaction
        .transaction
        .signing_bytes()
        .map_err(|_| "transaction cannot be encoded")?;
    key.verify(&signed_bytes, &Signature::from_bytes(&signature))
        .map_err(|_| "signature does not verify")?;
    Ok(())
}

#[rocket::async_trait]
impl LedgerTransport for MemoryLedger {
    async fn account_nonce(&self, address: &str) -> Result<u64, LedgerError> {
        let state = self.state();
        Self::check_online(&state)?;
        Ok(state
            .accounts
            .get(address)
            .map_or(0, |account| account.next_nonce))
    }

    async fn send_transaction(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<String, LedgerError> {
        let mut state = self.state();
        Self::check_online(&state)?;
        let fault = state.faults.pop_front();
        match fault {
            Some(Fault::Unavailable) => {
                return Err(LedgerError::NetworkUnavailable(
                    "injected network failure".to_string(),
                ))
            }
            Some(Fault::InsufficientFunds) => {
                return Err(LedgerError::InsufficientFunds(
                    "injected insufficient funds".to_string(),
                ))
            }
            Some(Fault::Reject) => {
                return Err(LedgerError::Rejected("injected rejection".to_string()))
            }
            _ => {}
        }

        verify_signature(transaction).map_err(LedgerError::Rejected)?;

        let unsigned = &transaction.transaction;
        let account = state.accounts.entry(unsigned.from.clone()).or_default();
        if unsigned.nonce < account.next_nonce {
            return Err(LedgerError::StaleNonce(unsigned.nonce));
        }
        if account.balance < Self::FEE {
            return Err(LedgerError::InsufficientFunds(format!(
                "balance {} is below the fee of {}",
                account.balance,
                Self::FEE
            )));
        }
        account.balance -= Self::FEE;
        account.next_nonce = unsigned.nonce + 1;

        let transaction_id = HEXLOWER.encode(&Sha256::digest(transaction.signature.as_bytes()));
        let sequence_number = if fault == Some(Fault::NeverConfirm) {
            None
        } else {
            let sequence_number = state.next_sequence;
            state.next_sequence += 1;
            state
                .by_commitment
                .entry(unsigned.payload.commitment.clone())
                .or_insert_with(|| transaction_id.clone());
            Some(sequence_number)
        };
        state.transactions.insert(
            transaction_id.clone(),
            Entry {
                transaction: transaction.clone(),
                sequence_number,
            },
        );
        state.order.push(transaction_id.clone());

        if fault == Some(Fault::LoseResponse) {
            return Err(LedgerError::Timeout {
                transaction_id: None,
            });
        }
        Ok(transaction_id)
    }

    async fn transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatus, LedgerError> {
        let state = self.state();
        Self::check_online(&state)?;
        Ok(match state.transactions.get(transaction_id) {
            None => TransactionStatus::Unknown,
            Some(Entry {
                sequence_number: None,
                ..
            }) => TransactionStatus::Pending,
            Some(Entry {
                sequence_number: Some(sequence_number),
                ..
            }) => TransactionStatus::Confirmed {
                sequence_number: *sequence_number,
                fee: Self::FEE,
            },
        })
    }

    async fn find_by_commitment(
        &self,
        commitment: &Commitment,
    ) -> Result<Option<Receipt>, LedgerError> {
        let state = self.state();
        Self::check_online(&state)?;
        let found = state.by_commitment.get(commitment).and_then(|id| {
            let sequence_number = state.transactions.get(id)?.sequence_number?;
            Some(Receipt {
                transaction_id: id.clone(),
                sequence_number,
                fee_spent: Self::FEE,
            })
        });
        Ok(found)
    }
}
