use std::ops::{Deref, DerefMut};

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core election data, as stored in the database.
///
/// An election references its candidates and the voters who have taken part,
/// but owns neither. Its candidates are cascade-deleted with it; its voters
/// are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    /// Candidates standing in this election; each points back here.
    pub candidates: Vec<Id>,
    /// Voters who have cast a vote in this election.
    pub voters: Vec<Id>,
    /// Number of ledger transactions credited to this election.
    pub total_ledger_txs: u64,
    /// When a ledger-backed vote was last applied to this election.
    pub last_ledger_sync: Option<DateTime>,
    /// Whether votes in this election are recorded on the ledger.
    #[serde(default = "ledger_enabled_default")]
    pub ledger_enabled: bool,
}

fn ledger_enabled_default() -> bool {
    true
}

impl ElectionCore {
    /// Create a new, empty, ledger-backed election.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        thumbnail: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            thumbnail: thumbnail.into(),
            candidates: Vec::new(),
            voters: Vec::new(),
            total_ledger_txs: 0,
            last_ledger_sync: None,
            ledger_enabled: true,
        }
    }
}

/// An election without an ID.
pub type NewElection = ElectionCore;

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl ElectionCore {
        pub fn example() -> Self {
            Self::new(
                "Student Union President",
                "Annual election for the student union presidency",
                "https://img.example/union.png",
            )
        }
    }
}
