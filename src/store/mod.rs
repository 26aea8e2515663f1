//! The local system of record: tallies, membership relations and the vote
//! saga log.
//!
//! [`VoteStore`] is implemented by [`MongoStore`] for deployment and by
//! [`MemoryStore`] for development and tests. Every multi-document mutation is
//! all-or-nothing in both.

use std::time::Duration;

use mongodb::{bson, error::Error as DbError};
use thiserror::Error;

use crate::ledger::Receipt;
use crate::model::{
    db::{
        candidate::Candidate,
        compensation::{Compensation, NewCompensation},
        election::Election,
        intent::{IntentState, VoteIntent},
        voter::{LedgerVote, Voter},
    },
    mongodb::{is_transient_transaction_error, Id},
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("voter {voter} has already voted in election {election}")]
    AlreadyVoted { voter: Id, election: Id },
    #[error("{0} not found")]
    NotFound(String),
    #[error("ledger transaction {0} was already credited to the candidate")]
    DuplicateTransaction(String),
    /// The storage layer aborted the transaction, e.g. on a write conflict.
    /// Retrying the whole local step is safe.
    #[error("local transaction aborted: {0}")]
    TransactionAborted(String),
    #[error(transparent)]
    Db(DbError),
    #[error(transparent)]
    Bson(#[from] bson::ser::Error),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_transient_transaction_error(&err) {
            Self::TransactionAborted(err.to_string())
        } else {
            Self::Db(err)
        }
    }
}

/// The outcome of trying to take ownership of the vote intent for a
/// (voter, election) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentClaim {
    /// No intent existed; the given one was created and is owned by the caller.
    Claimed(VoteIntent),
    /// An abandoned intent was taken over; the caller must resume it.
    Resumed(VoteIntent),
    /// Another task owns the intent, or it is finished.
    Held(VoteIntent),
}

/// A ledger-confirmed vote to apply to local state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedVote {
    /// The intent that is completed by this vote.
    pub intent: Id,
    pub voter: Id,
    /// The history entry; carries the election, candidate and ledger receipt.
    pub record: LedgerVote,
    /// Whether the vote went through the ledger. Votes in elections without a
    /// ledger are not counted as ledger transactions.
    pub ledger_backed: bool,
}

#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    async fn candidate(&self, id: Id) -> Result<Option<Candidate>, StoreError>;

    async fn election(&self, id: Id) -> Result<Option<Election>, StoreError>;

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError>;

    /// Create `intent`, or take over the existing intent for the same
    /// (voter, election) if its lease has expired and it can still progress.
    /// A taken-over intent is leased for `lease`.
    async fn claim_intent(
        &self,
        intent: VoteIntent,
        lease: Duration,
    ) -> Result<IntentClaim, StoreError>;

    /// Record the ledger receipt of an intent and mark it confirmed. The lease
    /// is kept.
    async fn record_receipt(&self, intent: Id, receipt: &Receipt) -> Result<(), StoreError>;

    /// Give up the lease on an intent, leaving it in `state`.
    async fn release_intent(&self, intent: Id, state: IntentState) -> Result<(), StoreError>;

    /// Delete an intent whose vote is known to be absent from the ledger, so
    /// the voter may vote again.
    async fn discard_intent(&self, intent: Id) -> Result<(), StoreError>;

    /// Take over every intent whose lease has expired and which can still
    /// progress, leasing each for `lease`.
    async fn reclaim_stale_intents(&self, lease: Duration)
        -> Result<Vec<VoteIntent>, StoreError>;

    /// Apply a confirmed vote atomically and mark its intent applied.
    ///
    /// Applying the same ledger transaction twice is a no-op.
    async fn apply_vote(&self, vote: &AppliedVote) -> Result<(), StoreError>;

    /// Record a ledger transaction that will not be reflected locally.
    /// Recording the same transaction again returns the existing record's ID.
    async fn record_compensation(&self, compensation: NewCompensation)
        -> Result<Id, StoreError>;

    /// List compensation records, optionally filtered on whether they are resolved.
    async fn compensations(&self, resolved: Option<bool>) -> Result<Vec<Compensation>, StoreError>;

    /// Mark a compensation record as handled.
    async fn resolve_compensation(&self, id: Id) -> Result<Compensation, StoreError>;

    /// Delete an election together with its candidates, and remove it from the
    /// history of every voter. Voters themselves are never deleted.
    async fn delete_election(&self, id: Id) -> Result<(), StoreError>;
}
