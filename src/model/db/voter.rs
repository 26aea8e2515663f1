use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::model::mongodb::Id;

/// One vote as recorded on the ledger, kept in the voter's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVote {
    pub election: Id,
    pub candidate: Id,
    pub transaction_id: String,
    /// Position of the transaction in the ledger's ordering.
    pub sequence_number: u64,
    /// The privacy commitment published on the ledger for this vote.
    pub commitment: Commitment,
    pub timestamp: DateTime,
}

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    pub full_name: String,
    pub email: String,
    /// Opaque credential hash owned by the auth collaborator.
    pub password_hash: String,
    /// Elections this voter has voted in. A voter votes at most once per election.
    pub voted_elections: Vec<Id>,
    /// Ledger records of every vote this voter has cast.
    pub ledger_votes: Vec<LedgerVote>,
}

impl VoterCore {
    /// Create a new voter who has not voted yet.
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into().to_lowercase(),
            password_hash: password_hash.into(),
            voted_elections: Vec::new(),
            ledger_votes: Vec::new(),
        }
    }

    /// Has this voter voted in the given election?
    pub fn has_voted_in(&self, election: Id) -> bool {
        self.voted_elections.contains(&election)
    }

    /// The number of voted elections must match the number of distinct
    /// elections in the ledger history.
    pub fn history_is_consistent(&self) -> bool {
        let in_history = self
            .ledger_votes
            .iter()
            .map(|vote| vote.election)
            .collect::<HashSet<_>>();
        let voted = self.voted_elections.iter().copied().collect::<HashSet<_>>();
        voted.len() == self.voted_elections.len() && voted == in_history
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
