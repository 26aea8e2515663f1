use serde::{Deserialize, Serialize};

use crate::ledger::Receipt;
use crate::model::db::voter::LedgerVote;

/// Body of a vote-cast request. The candidate comes from the path and the
/// voter from the auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Hex ID of the election to vote in.
    pub election: String,
}

/// Proof that a vote was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub transaction_id: String,
    pub sequence_number: u64,
}

impl From<Receipt> for VoteReceipt {
    fn from(receipt: Receipt) -> Self {
        Self {
            transaction_id: receipt.transaction_id,
            sequence_number: receipt.sequence_number,
        }
    }
}

/// One entry of a voter's vote history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerVoteDesc {
    pub election: String,
    pub candidate: String,
    pub transaction_id: String,
    pub sequence_number: u64,
    pub commitment: String,
    pub timestamp: i64,
}

impl From<LedgerVote> for LedgerVoteDesc {
    fn from(vote: LedgerVote) -> Self {
        Self {
            election: vote.election.to_string(),
            candidate: vote.candidate.to_string(),
            transaction_id: vote.transaction_id,
            sequence_number: vote.sequence_number,
            commitment: vote.commitment.to_string(),
            timestamp: vote.timestamp.timestamp_millis(),
        }
    }
}
