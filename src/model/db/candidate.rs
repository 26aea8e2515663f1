use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub full_name: String,
    pub motto: String,
    /// URL of the candidate's hosted image.
    pub image: String,
    /// The election this candidate stands in.
    pub election: Id,
    /// Number of confirmed, uniquely-identified votes credited to this candidate.
    pub vote_count: u64,
    /// Ledger transactions credited to this candidate, in application order.
    /// Never contains duplicates.
    pub ledger_tx_ids: Vec<String>,
}

impl CandidateCore {
    /// Create a new candidate with no votes.
    pub fn new(
        full_name: impl Into<String>,
        motto: impl Into<String>,
        image: impl Into<String>,
        election: Id,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            motto: motto.into(),
            image: image.into(),
            election,
            vote_count: 0,
            ledger_tx_ids: Vec::new(),
        }
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
