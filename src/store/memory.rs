use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use mongodb::bson::DateTime;

use crate::ledger::Receipt;
use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        compensation::{Compensation, NewCompensation},
        election::{Election, NewElection},
        intent::{IntentState, VoteIntent},
        voter::{NewVoter, Voter},
    },
    mongodb::{datetime_after, Id},
};

use super::{AppliedVote, IntentClaim, StoreError, VoteStore};

#[derive(Debug, Default)]
struct State {
    candidates: HashMap<Id, Candidate>,
    elections: HashMap<Id, Election>,
    voters: HashMap<Id, Voter>,
    intents: HashMap<Id, VoteIntent>,
    compensations: Vec<Compensation>,
    /// Number of upcoming `apply_vote` calls to abort.
    aborts: u32,
}

/// A [`VoteStore`] held in process memory.
///
/// Every operation runs under a single lock, so each is trivially atomic and
/// concurrent operations are serialised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an election, returning its ID.
    pub fn insert_election(&self, election: NewElection) -> Id {
        let id = Id::new();
        self.state()
            .elections
            .insert(id, Election { id, election });
        id
    }

    /// Insert a candidate and register it with its election.
    pub fn insert_candidate(&self, candidate: NewCandidate) -> Result<Id, StoreError> {
        let mut state = self.state();
        let election = state
            .elections
            .get_mut(&candidate.election)
            .ok_or_else(|| StoreError::NotFound(format!("election {}", candidate.election)))?;
        let id = Id::new();
        election.candidates.push(id);
        state.candidates.insert(id, Candidate { id, candidate });
        Ok(id)
    }

    pub fn insert_voter(&self, voter: NewVoter) -> Id {
        let id = Id::new();
        self.state().voters.insert(id, Voter { id, voter });
        id
    }

    /// Abort the next `count` calls to `apply_vote` as if they hit a write conflict.
    pub fn abort_next_applies(&self, count: u32) {
        self.state().aborts = count;
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.state().candidates.values().cloned().collect()
    }

    pub fn voters(&self) -> Vec<Voter> {
        self.state().voters.values().cloned().collect()
    }

    pub fn intents(&self) -> Vec<VoteIntent> {
        self.state().intents.values().cloned().collect()
    }

    pub fn intent_for(&self, voter: Id, election: Id) -> Option<VoteIntent> {
        self.state()
            .intents
            .values()
            .find(|intent| intent.voter == voter && intent.election == election)
            .cloned()
    }

    /// Expire the lease on every intent, as if its owner had crashed.
    pub fn expire_leases(&self) {
        let past = DateTime::from_millis(DateTime::now().timestamp_millis() - 1);
        for intent in self.state().intents.values_mut() {
            intent.lease_expires_at = past;
        }
    }

    fn intent_mut<'a>(state: &'a mut State, id: Id) -> Result<&'a mut VoteIntent, StoreError> {
        state
            .intents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("vote intent {id}")))
    }
}

#[rocket::async_trait]
impl VoteStore for MemoryStore {
    async fn candidate(&self, id: Id) -> Result<Option<Candidate>, StoreError> {
        Ok(self.state().candidates.get(&id).cloned())
    }

    async fn election(&self, id: Id) -> Result<Option<Election>, StoreError> {
        Ok(self.state().elections.get(&id).cloned())
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError> {
        Ok(self.state().voters.get(&id).cloned())
    }

    async fn claim_intent(
        &self,
        intent: VoteIntent,
        lease: Duration,
    ) -> Result<IntentClaim, StoreError> {
        let mut state = self.state();
        let now = DateTime::now();
        let existing = state
            .intents
            .values_mut()
            .find(|existing| existing.voter == intent.voter && existing.election == intent.election);
        match existing {
            None => {
                state.intents.insert(intent.id, intent.clone());
                Ok(IntentClaim::Claimed(intent))
            }
            Some(existing) if existing.is_claimable(now) => {
                existing.lease_expires_at = datetime_after(lease);
                existing.updated_at = now;
                Ok(IntentClaim::Resumed(existing.clone()))
            }
            Some(existing) => Ok(IntentClaim::Held(existing.clone())),
        }
    }

    async fn record_receipt(&self, intent: Id, receipt: &Receipt) -> Result<(), StoreError> {
        let mut state = self.state();
        let intent = Self::intent_mut(&mut state, intent)?;
        intent.state = IntentState::Confirmed;
        intent.receipt = Some(receipt.clone());
        intent.updated_at = DateTime::now();
        Ok(())
    }

    async fn release_intent(&self, intent: Id, new_state: IntentState) -> Result<(), StoreError> {
        let mut state = self.state();
        let intent = Self::intent_mut(&mut state, intent)?;
        let now = DateTime::now();
        intent.state = new_state;
        intent.lease_expires_at = now;
        intent.updated_at = now;
        Ok(())
    }

    async fn discard_intent(&self, intent: Id) -> Result<(), StoreError> {
        self.state().intents.remove(&intent);
        Ok(())
    }

    async fn reclaim_stale_intents(
        &self,
        lease: Duration,
    ) -> Result<Vec<VoteIntent>, StoreError> {
        let mut state = self.state();
        let now = DateTime::now();
        let reclaimed = state
            .intents
            .values_mut()
            .filter(|intent| intent.is_claimable(now))
            .map(|intent| {
                intent.lease_expires_at = datetime_after(lease);
                intent.updated_at = now;
                intent.clone()
            })
            .collect();
        Ok(reclaimed)
    }

    async fn apply_vote(&self, vote: &AppliedVote) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.aborts > 0 {
            state.aborts -= 1;
            return Err(StoreError::TransactionAborted(
                "injected write conflict".to_string(),
            ));
        }

        let record = &vote.record;
        let voter = state
            .voters
            .get(&vote.voter)
            .ok_or_else(|| StoreError::NotFound(format!("voter {}", vote.voter)))?;
        if voter.has_voted_in(record.election) {
            let already_applied = voter
                .ledger_votes
                .iter()
                .any(|existing| existing.transaction_id == record.transaction_id);
            if !already_applied {
                return Err(StoreError::AlreadyVoted {
                    voter: vote.voter,
                    election: record.election,
                });
            }
            Self::intent_mut(&mut state, vote.intent)?.state = IntentState::Applied;
            return Ok(());
        }
        if !state.elections.contains_key(&record.election) {
            return Err(StoreError::NotFound(format!("election {}", record.election)));
        }
        match state.candidates.get(&record.candidate) {
            Some(candidate) if candidate.election == record.election => {
                if candidate.ledger_tx_ids.contains(&record.transaction_id) {
                    return Err(StoreError::DuplicateTransaction(
                        record.transaction_id.clone(),
                    ));
                }
            }
            _ => {
                return Err(StoreError::NotFound(format!(
                    "candidate {} in election {}",
                    record.candidate, record.election
                )))
            }
        }
        Self::intent_mut(&mut state, vote.intent)?;

        // Every check has passed; the mutations below cannot fail.
        let now = DateTime::now();
        if let Some(candidate) = state.candidates.get_mut(&record.candidate) {
            candidate.vote_count += 1;
            candidate.ledger_tx_ids.push(record.transaction_id.clone());
        }
        if let Some(election) = state.elections.get_mut(&record.election) {
            if !election.voters.contains(&vote.voter) {
                election.voters.push(vote.voter);
            }
            if vote.ledger_backed {
                election.total_ledger_txs += 1;
                election.last_ledger_sync = Some(now);
            }
        }
        if let Some(voter) = state.voters.get_mut(&vote.voter) {
            voter.voted_elections.push(record.election);
            voter.ledger_votes.push(record.clone());
        }
        if let Some(intent) = state.intents.get_mut(&vote.intent) {
            intent.state = IntentState::Applied;
            intent.updated_at = now;
        }
        Ok(())
    }

    async fn record_compensation(
        &self,
        compensation: NewCompensation,
    ) -> Result<Id, StoreError> {
        let mut state = self.state();
        if let Some(existing) = state
            .compensations
            .iter()
            .find(|existing| existing.transaction_id == compensation.transaction_id)
        {
            return Ok(existing.id);
        }
        let id = Id::new();
        state.compensations.push(Compensation { id, compensation });
        Ok(id)
    }

    async fn compensations(
        &self,
        resolved: Option<bool>,
    ) -> Result<Vec<Compensation>, StoreError> {
        Ok(self
            .state()
            .compensations
            .iter()
            .filter(|c| resolved.map_or(true, |resolved| c.resolved_at.is_some() == resolved))
            .cloned()
            .collect())
    }

    async fn resolve_compensation(&self, id: Id) -> Result<Compensation, StoreError> {
        let mut state = self.state();
        let compensation = state
            .compensations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("compensation {id}")))?;
        compensation.resolved_at.get_or_insert_with(DateTime::now);
        Ok(compensation.clone())
    }

    async fn delete_election(&self, id: Id) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.elections.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("election {id}")));
        }
        state.candidates.retain(|_, candidate| candidate.election != id);
        for voter in state.voters.values_mut() {
            voter.voted_elections.retain(|election| *election != id);
            voter.ledger_votes.retain(|vote| vote.election != id);
        }
        state
            .intents
            .retain(|_, intent| !(intent.election == id && intent.state == IntentState::Applied));
        Ok(())
    }
}
