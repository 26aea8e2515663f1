use serde::{Deserialize, Serialize};

use crate::model::db::compensation::{Compensation, CompensationReason};

/// A reconciliation item, as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDesc {
    pub id: String,
    pub transaction_id: String,
    pub sequence_number: u64,
    pub commitment: String,
    pub voter: String,
    pub election: String,
    pub candidate: String,
    pub reason: CompensationReason,
    pub detail: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

impl From<Compensation> for CompensationDesc {
    fn from(compensation: Compensation) -> Self {
        Self {
            id: compensation.id.to_string(),
            transaction_id: compensation.compensation.transaction_id,
            sequence_number: compensation.compensation.sequence_number,
            commitment: compensation.compensation.commitment.to_string(),
            voter: compensation.compensation.voter.to_string(),
            election: compensation.compensation.election.to_string(),
            candidate: compensation.compensation.candidate.to_string(),
            reason: compensation.compensation.reason,
            detail: compensation.compensation.detail,
            created_at: compensation.compensation.created_at.timestamp_millis(),
            resolved_at: compensation
                .compensation
                .resolved_at
                .map(|at| at.timestamp_millis()),
        }
    }
}
