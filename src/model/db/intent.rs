use std::time::Duration;

use mongodb::bson::{Bson, DateTime};
use serde::{Deserialize, Serialize};

use crate::commitment::{Commitment, Nonce};
use crate::ledger::Receipt;
use crate::model::mongodb::{datetime_after, Id};

/// Progress of a vote through the cast saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    /// The ledger leg has started; its outcome may not be known yet.
    InFlight,
    /// The ledger confirmed the vote; the local leg has not completed.
    Confirmed,
    /// The ledger outcome could not be determined. Must be reconciled
    /// against the ledger before anything else is submitted.
    Unresolved,
    /// Both legs completed.
    Applied,
    /// The ledger recorded the vote but it can never be applied locally.
    Orphaned,
}

impl IntentState {
    /// States from which the saga can still make progress.
    pub const RESUMABLE: [IntentState; 3] = [
        IntentState::InFlight,
        IntentState::Confirmed,
        IntentState::Unresolved,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Confirmed => "confirmed",
            Self::Unresolved => "unresolved",
            Self::Applied => "applied",
            Self::Orphaned => "orphaned",
        }
    }

    /// Is the saga finished for this intent?
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Orphaned)
    }
}

impl From<IntentState> for Bson {
    fn from(state: IntentState) -> Self {
        Bson::String(state.as_str().to_string())
    }
}

/// The durable record of one voter's attempt to vote in one election.
///
/// There is at most one intent per (voter, election) pair. It pins the nonce
/// and commitment of the vote so that every retry publishes the same
/// commitment, and it carries a lease so only one task drives it at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteIntent {
    #[serde(rename = "_id")]
    pub id: Id,
    pub voter: Id,
    pub election: Id,
    pub candidate: Id,
    pub nonce: Nonce,
    pub commitment: Commitment,
    /// When the vote was cast; this is the timestamp published on the ledger.
    pub cast_at: DateTime,
    pub state: IntentState,
    /// The ledger receipt, once the ledger has confirmed the vote.
    pub receipt: Option<Receipt>,
    pub lease_expires_at: DateTime,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl VoteIntent {
    /// Create a fresh in-flight intent, leased to its creator for `lease`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        voter: Id,
        election: Id,
        candidate: Id,
        nonce: Nonce,
        commitment: Commitment,
        cast_at: DateTime,
        lease: Duration,
    ) -> Self {
        let now = DateTime::now();
        Self {
            id: Id::new(),
            voter,
            election,
            candidate,
            nonce,
            commitment,
            cast_at,
            state: IntentState::InFlight,
            receipt: None,
            lease_expires_at: datetime_after(lease),
            created_at: now,
            updated_at: now,
        }
    }

    /// Can another task take over this intent at time `now`?
    pub fn is_claimable(&self, now: DateTime) -> bool {
        IntentState::RESUMABLE.contains(&self.state) && self.lease_expires_at <= now
    }
}
