use std::ops::{Deref, DerefMut};

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::model::mongodb::Id;

/// Why a confirmed ledger transaction could not be applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationReason {
    /// The voter had already voted in the election by the time the local
    /// transaction ran.
    AlreadyVoted,
    /// The voter, election or candidate no longer exists.
    EntityMissing,
    /// The candidate was already credited with the transaction, but the voter
    /// was not. Local state needs inspection.
    DuplicateTransaction,
}

impl CompensationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyVoted => "already_voted",
            Self::EntityMissing => "entity_missing",
            Self::DuplicateTransaction => "duplicate_transaction",
        }
    }
}

/// A reconciliation item: a ledger transaction that is deliberately ignored
/// by local state. The ledger entry cannot be removed, so it is recorded here
/// for operators instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationCore {
    pub transaction_id: String,
    pub sequence_number: u64,
    pub commitment: Commitment,
    pub voter: Id,
    pub election: Id,
    pub candidate: Id,
    pub reason: CompensationReason,
    pub detail: String,
    pub created_at: DateTime,
    /// Set once an operator has handled the item.
    pub resolved_at: Option<DateTime>,
}

/// A compensation record without an ID.
pub type NewCompensation = CompensationCore;

/// A compensation record from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensation {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub compensation: CompensationCore,
}

impl Deref for Compensation {
    type Target = CompensationCore;

    fn deref(&self) -> &Self::Target {
        &self.compensation
    }
}

impl DerefMut for Compensation {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.compensation
    }
}
