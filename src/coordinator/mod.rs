//! The vote-casting saga.
//!
//! A vote is first written to the ledger, then applied to local state. The
//! ledger leg cannot be rolled back, so every failure after it is handled by
//! moving forward: reconciling against the ledger, retrying the local leg, or
//! recording a compensation item for operators. Progress is kept in a
//! [`VoteIntent`] so that a crash, a timeout or a client disconnect at any point
//! can be recovered without a second ledger transaction for the same vote.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mongodb::bson::DateTime;
use rocket::tokio::{self, time::sleep};
use serde::{Deserialize, Serialize};

use crate::commitment::{IdentityHasher, Nonce};
use crate::error::{Error, Result};
use crate::ledger::{LedgerClient, LedgerError, Receipt, VotePayload};
use crate::logging::RequestId;
use crate::model::{
    api::vote::VoteReceipt,
    db::{
        compensation::{CompensationReason, NewCompensation},
        intent::{IntentState, VoteIntent},
        voter::LedgerVote,
    },
    mongodb::Id,
};
use crate::store::{AppliedVote, IntentClaim, StoreError, VoteStore};

mod sweeper;

pub use sweeper::Sweeper;

/// Bounds on the saga's retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Ledger submission attempts while the network is unavailable.
    pub max_attempts: u32,
    /// Delay before the second submission attempt; doubled on each further one.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Attempts at the local transaction when the store aborts it.
    pub local_apply_attempts: u32,
    /// How long one task owns a vote intent.
    pub intent_lease: Duration,
    /// How long after an unconfirmed submission the ledger is assumed to have
    /// dropped it.
    pub abandon_after: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

/// A request to cast a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastVote {
    pub voter: Id,
    pub election: Id,
    pub candidate: Id,
}

/// Who is driving a saga; used to tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Request(RequestId),
    Sweep,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(id) => write!(f, "req{id}"),
            Self::Sweep => write!(f, "sweep"),
        }
    }
}

/// How an intent came to be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Newly created by this request; nothing has been submitted yet.
    Fresh,
    /// Taken over by a new request from the same voter for the same candidate.
    Resumed,
    /// Taken over by the background sweeper, which never submits anything new.
    Sweep,
}

/// What one reconciliation sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Abandoned intents taken over.
    pub reclaimed: usize,
    /// Votes applied locally.
    pub applied: usize,
    /// Votes found to be absent from the ledger and dropped.
    pub discarded: usize,
    /// Votes whose ledger outcome is still unknown.
    pub unresolved: usize,
    /// Ledger votes that could not be applied locally.
    pub conflicts: usize,
    /// Intents that failed for any other reason; retried next sweep.
    pub failed: usize,
}

/// Orchestrates vote casting across the ledger and the local store.
///
/// Holds no per-vote state: everything that must survive a request lives in
/// the store.
pub struct Coordinator {
    store: Arc<dyn VoteStore>,
    ledger: Arc<LedgerClient>,
    hasher: IdentityHasher,
    policy: RetryPolicy,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn VoteStore>,
        ledger: Arc<LedgerClient>,
        hasher: IdentityHasher,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            hasher,
            policy,
        }
    }

    /// Cast a vote, returning the ledger receipt once both systems of record
    /// hold it.
    ///
    /// The saga runs on its own task: if the caller goes away, it still runs
    /// to completion.
    pub async fn cast_vote(self: &Arc<Self>, origin: Origin, vote: CastVote) -> Result<VoteReceipt> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run_cast(origin, vote).await })
            .await
            .map_err(|e| Error::Internal(format!("vote task failed: {e}")))?
    }

    /// Drive every abandoned intent forward.
    pub async fn sweep(self: &Arc<Self>) -> Result<SweepReport> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run_sweep().await })
            .await
            .map_err(|e| Error::Internal(format!("sweep task failed: {e}")))?
    }

    async fn run_cast(&self, origin: Origin, vote: CastVote) -> Result<VoteReceipt> {
        // INIT
        info!(
            "{origin} INIT voter {} election {} candidate {}",
            vote.voter, vote.election, vote.candidate
        );
        let voter = self
            .store
            .voter(vote.voter)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {}", vote.voter)))?;
        let election = self
            .store
            .election(vote.election)
            .await?
            .ok_or_else(|| Error::NotFound(format!("election {}", vote.election)))?;
        let candidate = self
            .store
            .candidate(vote.candidate)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {}", vote.candidate)))?;
        if candidate.election != election.id {
            return Err(Error::InvalidArgument(format!(
                "candidate {} does not stand in election {}",
                candidate.id, election.id
            )));
        }
        // Advisory only; the local transaction re-checks.
        if voter.has_voted_in(election.id) {
            return Err(Error::AlreadyVoted {
                voter: voter.id,
                election: election.id,
            });
        }

        // HASHING
        let cast_at = Utc::now();
        // The scoped block forces `rng` to be dropped before the next `await`.
        let nonce = {
            let mut rng = rand::thread_rng();
            Nonce::fresh(&mut rng, cast_at)
        };
        let commitment =
            self.hasher
                .commit(&voter.id.to_string(), &election.id.to_string(), &nonce)?;
        let intent = VoteIntent::new(
            voter.id,
            election.id,
            candidate.id,
            nonce,
            commitment,
            DateTime::from_chrono(cast_at),
            self.policy.intent_lease,
        );

        let claim = self
            .store
            .claim_intent(intent, self.policy.intent_lease)
            .await?;
        match claim {
            IntentClaim::Claimed(intent) => {
                debug!("{origin} HASHING commitment {}", intent.commitment);
                self.drive(origin, intent, election.ledger_enabled, Mode::Fresh)
                    .await
            }
            IntentClaim::Resumed(intent) if intent.candidate != vote.candidate => {
                // The earlier vote may still land on the ledger.
                self.release(origin, intent.id, intent.state).await;
                Err(Error::VoteInProgress {
                    voter: vote.voter,
                    election: vote.election,
                })
            }
            IntentClaim::Resumed(intent) => {
                info!(
                    "{origin} resuming {} vote intent {}",
                    intent.state.as_str(),
                    intent.id
                );
                self.drive(origin, intent, election.ledger_enabled, Mode::Resumed)
                    .await
            }
            IntentClaim::Held(intent) if intent.state.is_terminal() => Err(Error::AlreadyVoted {
                voter: vote.voter,
                election: vote.election,
            }),
            IntentClaim::Held(_) => Err(Error::VoteInProgress {
                voter: vote.voter,
                election: vote.election,
            }),
        }
    }

    async fn run_sweep(&self) -> Result<SweepReport> {
        let intents = self
            .store
            .reclaim_stale_intents(self.policy.intent_lease)
            .await?;
        let mut report = SweepReport {
            reclaimed: intents.len(),
            ..Default::default()
        };
        if intents.is_empty() {
            return Ok(report);
        }
        info!("Reconciling {} abandoned vote intents", intents.len());

        for intent in intents {
            let id = intent.id;
            let ledger_enabled = match self.store.election(intent.election).await {
                Ok(election) => election.map_or(true, |election| election.ledger_enabled),
                Err(e) => {
                    warn!("sweep could not load election for intent {id}: {e}");
                    self.release(Origin::Sweep, id, intent.state).await;
                    report.failed += 1;
                    continue;
                }
            };
            match self
                .drive(Origin::Sweep, intent, ledger_enabled, Mode::Sweep)
                .await
            {
                Ok(_) => report.applied += 1,
                Err(Error::VoteNotRecorded(_)) => report.discarded += 1,
                Err(Error::LedgerTimeout { .. } | Error::LedgerUnavailable(_)) => {
                    report.unresolved += 1
                }
                Err(Error::LocalConflict { .. }) => report.conflicts += 1,
                Err(e) => {
                    warn!("sweep failed to resolve intent {id}: {e}");
                    report.failed += 1;
                }
            }
        }
        info!("Reconciliation sweep finished: {report:?}");
        Ok(report)
    }

    /// Take an owned intent through the ledger leg (if needed) and the local leg.
    async fn drive(
        &self,
        origin: Origin,
        intent: VoteIntent,
        ledger_enabled: bool,
        mode: Mode,
    ) -> Result<VoteReceipt> {
        let receipt = if !ledger_enabled {
            Receipt {
                transaction_id: format!("local:{}", intent.commitment),
                sequence_number: 0,
                fee_spent: 0,
            }
        } else if let Some(receipt) = intent.receipt.clone() {
            receipt
        } else {
            let receipt = self.ledger_leg(origin, &intent, mode).await?;
            if let Err(e) = self.store.record_receipt(intent.id, &receipt).await {
                // The lease runs out and the sweeper finds the vote by its commitment.
                error!(
                    "{origin} failed to record receipt for ledger transaction {}: {e}",
                    receipt.transaction_id
                );
                return Err(Error::LocalConflict {
                    transaction_id: receipt.transaction_id,
                    detail: format!("local state will be updated in the background: {e}"),
                });
            }
            receipt
        };
        self.local_leg(origin, &intent, receipt, ledger_enabled)
            .await
    }

    /// Get the vote onto the ledger, or prove that it is not there.
    async fn ledger_leg(&self, origin: Origin, intent: &VoteIntent, mode: Mode) -> Result<Receipt> {
        if mode != Mode::Fresh {
            // An earlier attempt may have landed; never submit without checking.
            match self.ledger.reconcile(&intent.commitment).await {
                Ok(Some(receipt)) => {
                    info!(
                        "{origin} RECONCILE found ledger transaction {} for intent {}",
                        receipt.transaction_id, intent.id
                    );
                    return Ok(receipt);
                }
                Ok(None) if self.is_abandoned(intent) => {
                    if mode == Mode::Sweep {
                        info!(
                            "{origin} RECONCILE intent {} never reached the ledger, discarding",
                            intent.id
                        );
                        self.discard(origin, intent.id).await;
                        return Err(Error::VoteNotRecorded(
                            "vote was never confirmed by the ledger".to_string(),
                        ));
                    }
                    info!(
                        "{origin} RECONCILE intent {} never reached the ledger, resubmitting",
                        intent.id
                    );
                }
                Ok(None) => {
                    debug!("{origin} RECONCILE intent {} not on the ledger yet", intent.id);
                    self.release(origin, intent.id, IntentState::Unresolved)
                        .await;
                    return Err(Error::LedgerTimeout {
                        transaction_id: None,
                    });
                }
                Err(e) => {
                    warn!("{origin} RECONCILE could not query the ledger: {e}");
                    self.release(origin, intent.id, IntentState::Unresolved)
                        .await;
                    return Err(Error::LedgerUnavailable(e.to_string()));
                }
            }
        }
        self.submit(origin, intent).await
    }

    /// LEDGER_SUBMIT, with RECONCILE on timeout.
    async fn submit(&self, origin: Origin, intent: &VoteIntent) -> Result<Receipt> {
        let payload = VotePayload {
            election_id: intent.election.to_string(),
            candidate_id: intent.candidate.to_string(),
            commitment: intent.commitment.clone(),
            timestamp: intent.cast_at.timestamp_millis(),
        };

        let mut attempt = 1;
        loop {
            debug!("{origin} LEDGER_SUBMIT attempt {attempt} for intent {}", intent.id);
            match self.ledger.submit(payload.clone()).await {
                Ok(receipt) => {
                    info!(
                        "{origin} LEDGER_SUBMIT confirmed transaction {} at sequence {}",
                        receipt.transaction_id, receipt.sequence_number
                    );
                    return Ok(receipt);
                }
                Err(LedgerError::NetworkUnavailable(e)) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!("{origin} ledger unavailable ({e}), retrying in {delay:?}");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(LedgerError::NetworkUnavailable(e)) => {
                    warn!("{origin} ledger unavailable after {attempt} attempts, aborting: {e}");
                    self.discard(origin, intent.id).await;
                    return Err(Error::VoteNotRecorded(format!(
                        "ledger unreachable after {attempt} attempts: {e}"
                    )));
                }
                Err(LedgerError::Timeout { transaction_id }) => {
                    return self.reconcile_timeout(origin, intent, transaction_id).await;
                }
                Err(e) => {
                    error!("{origin} LEDGER_FAILED for intent {}: {e}", intent.id);
                    self.discard(origin, intent.id).await;
                    return Err(e.into());
                }
            }
        }
    }

    /// RECONCILE after a submission whose outcome is unknown.
    async fn reconcile_timeout(
        &self,
        origin: Origin,
        intent: &VoteIntent,
        transaction_id: Option<String>,
    ) -> Result<Receipt> {
        warn!(
            "{origin} LEDGER_TIMEOUT for transaction {}, reconciling commitment {}",
            transaction_id.as_deref().unwrap_or("<unknown>"),
            intent.commitment
        );
        match self.ledger.reconcile(&intent.commitment).await {
            Ok(Some(receipt)) => {
                info!(
                    "{origin} RECONCILE found ledger transaction {}",
                    receipt.transaction_id
                );
                Ok(receipt)
            }
            outcome => {
                if let Err(e) = outcome {
                    warn!("{origin} RECONCILE could not query the ledger: {e}");
                }
                // It may still land; resubmitting now could record it twice.
                self.release(origin, intent.id, IntentState::Unresolved)
                    .await;
                Err(Error::LedgerTimeout { transaction_id })
            }
        }
    }

    /// LOCAL_APPLY, retrying aborted transactions.
    async fn local_leg(
        &self,
        origin: Origin,
        intent: &VoteIntent,
        receipt: Receipt,
        ledger_backed: bool,
    ) -> Result<VoteReceipt> {
        let vote = AppliedVote {
            intent: intent.id,
            voter: intent.voter,
            record: LedgerVote {
                election: intent.election,
                candidate: intent.candidate,
                transaction_id: receipt.transaction_id.clone(),
                sequence_number: receipt.sequence_number,
                commitment: intent.commitment.clone(),
                timestamp: intent.cast_at,
            },
            ledger_backed,
        };

        let mut attempt = 1;
        loop {
            match self.store.apply_vote(&vote).await {
                Ok(()) => {
                    info!(
                        "{origin} DONE voter {} election {} transaction {}",
                        intent.voter, intent.election, receipt.transaction_id
                    );
                    return Ok(receipt.into());
                }
                Err(StoreError::TransactionAborted(e))
                    if attempt < self.policy.local_apply_attempts =>
                {
                    debug!("{origin} LOCAL_APPLY attempt {attempt} aborted, retrying: {e}");
                    attempt += 1;
                }
                Err(e @ (StoreError::AlreadyVoted { .. } | StoreError::NotFound(_)))
                    if !ledger_backed =>
                {
                    // Nothing exists outside local state, so nothing to compensate.
                    self.discard(origin, intent.id).await;
                    return Err(e.into());
                }
                Err(
                    e @ (StoreError::AlreadyVoted { .. }
                    | StoreError::NotFound(_)
                    | StoreError::DuplicateTransaction(_)),
                ) => return Err(self.orphan(origin, intent, &receipt, e).await),
                Err(e) => {
                    error!(
                        "{origin} LOCAL_APPLY failed for ledger transaction {}: {e}",
                        receipt.transaction_id
                    );
                    self.release(origin, intent.id, IntentState::Confirmed)
                        .await;
                    return Err(Error::LocalConflict {
                        transaction_id: receipt.transaction_id,
                        detail: format!("local state will be updated in the background: {e}"),
                    });
                }
            }
        }
    }

    /// LOCAL_CONFLICT: the ledger holds a vote that will never be counted
    /// locally. Flag it for operators.
    async fn orphan(
        &self,
        origin: Origin,
        intent: &VoteIntent,
        receipt: &Receipt,
        cause: StoreError,
    ) -> Error {
        let reason = match cause {
            StoreError::AlreadyVoted { .. } => CompensationReason::AlreadyVoted,
            StoreError::DuplicateTransaction(_) => CompensationReason::DuplicateTransaction,
            _ => CompensationReason::EntityMissing,
        };
        let detail = cause.to_string();
        error!(
            "{origin} ORPHANED ledger transaction {} (commitment {}): {detail}",
            receipt.transaction_id, intent.commitment
        );

        let compensation = NewCompensation {
            transaction_id: receipt.transaction_id.clone(),
            sequence_number: receipt.sequence_number,
            commitment: intent.commitment.clone(),
            voter: intent.voter,
            election: intent.election,
            candidate: intent.candidate,
            reason,
            detail: detail.clone(),
            created_at: DateTime::now(),
            resolved_at: None,
        };
        match self.store.record_compensation(compensation).await {
            Ok(id) => {
                info!("{origin} recorded compensation {id} ({})", reason.as_str());
                self.release(origin, intent.id, IntentState::Orphaned)
                    .await;
            }
            Err(e) => {
                // Leave the intent confirmed so the sweeper tries again.
                error!(
                    "{origin} failed to record compensation for {}: {e}",
                    receipt.transaction_id
                );
                self.release(origin, intent.id, IntentState::Confirmed)
                    .await;
            }
        }

        Error::LocalConflict {
            transaction_id: receipt.transaction_id.clone(),
            detail,
        }
    }

    /// Has the ledger had long enough to confirm this intent's submission?
    fn is_abandoned(&self, intent: &VoteIntent) -> bool {
        let abandon_after = i64::try_from(self.policy.abandon_after.as_millis()).unwrap_or(i64::MAX);
        intent
            .created_at
            .timestamp_millis()
            .saturating_add(abandon_after)
            <= DateTime::now().timestamp_millis()
    }

    async fn release(&self, origin: Origin, intent: Id, state: IntentState) {
        if let Err(e) = self.store.release_intent(intent, state).await {
            // The lease expires by itself.
            warn!("{origin} failed to release intent {intent}: {e}");
        }
    }

    async fn discard(&self, origin: Origin, intent: Id) {
        if let Err(e) = self.store.discard_intent(intent).await {
            warn!("{origin} failed to discard intent {intent}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use mongodb::bson::DateTime;

    use crate::commitment::{IdentityHasher, Nonce};
    use crate::ledger::{
        Fault, LedgerClient, LedgerSettings, MemoryLedger, Receipt, SigningIdentity, VotePayload,
    };
    use crate::model::db::{compensation::CompensationReason, intent::IntentState};
    use crate::testing::TestEnv;
    use crate::Config;

    use super::*;

    fn policy() -> RetryPolicy {
        Config::example().retry_policy()
    }

    fn vote(env: &TestEnv, voter: usize, candidate: usize) -> CastVote {
        CastVote {
            voter: env.voters[voter],
            election: env.election,
            candidate: env.candidates[candidate],
        }
    }

    fn origin() -> Origin {
        Origin::Request(RequestId(0))
    }

    /// Leave an in-flight intent behind, as a request that crashed before
    /// submitting would.
    async fn stranded_intent(env: &TestEnv, voter: usize, candidate: usize) -> VoteIntent {
        let hasher = IdentityHasher::new(Config::example().commitment_secret());
        let nonce = Nonce::fresh(&mut rand::thread_rng(), Utc::now());
        let commitment = hasher
            .commit(
                &env.voters[voter].to_string(),
                &env.election.to_string(),
                &nonce,
            )
            .unwrap();
        let intent = VoteIntent::new(
            env.voters[voter],
            env.election,
            env.candidates[candidate],
            nonce,
            commitment,
            DateTime::now(),
            Duration::from_secs(60),
        );
        match env
            .store
            .claim_intent(intent, Duration::from_secs(60))
            .await
            .unwrap()
        {
            IntentClaim::Claimed(intent) => intent,
            other => panic!("expected a new intent, got {other:?}"),
        }
    }

    /// Put a stranded intent's vote on the ledger, as if the request crashed
    /// straight after submitting.
    async fn submit_directly(env: &TestEnv, intent: &VoteIntent) -> Receipt {
        let client = LedgerClient::new(
            env.ledger.clone(),
            SigningIdentity::example(),
            LedgerSettings::example(),
        );
        client
            .submit(VotePayload {
                election_id: intent.election.to_string(),
                candidate_id: intent.candidate.to_string(),
                commitment: intent.commitment.clone(),
                timestamp: intent.cast_at.timestamp_millis(),
            })
            .await
            .unwrap()
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(500),
            ..policy()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[rocket::async_test]
    async fn vote_pays_one_fee_and_publishes_the_commitment() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        let receipt = coordinator.cast_vote(origin(), vote(&env, 0, 0)).await.unwrap();

        let transactions = env.ledger.transactions();
        assert_eq!(transactions.len(), 1);
        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(transactions[0].transaction.payload.commitment, intent.commitment);
        assert_eq!(intent.receipt.unwrap().transaction_id, receipt.transaction_id);
        assert_eq!(
            env.ledger.balance(&env.signing_address()),
            TestEnv::FUNDS - MemoryLedger::FEE
        );
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn unknown_entities_fail_before_the_ledger() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());

        let mut unknown_voter = vote(&env, 0, 0);
        unknown_voter.voter = Id::new();
        assert!(matches!(
            coordinator.cast_vote(origin(), unknown_voter).await,
            Err(Error::NotFound(_))
        ));

        let mut unknown_candidate = vote(&env, 0, 0);
        unknown_candidate.candidate = Id::new();
        assert!(matches!(
            coordinator.cast_vote(origin(), unknown_candidate).await,
            Err(Error::NotFound(_))
        ));

        assert!(env.ledger.transactions().is_empty());
        assert!(env.store.intents().is_empty());
    }

    #[rocket::async_test]
    async fn rejected_vote_leaves_no_trace() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        env.ledger.inject(Fault::Reject);

        assert!(matches!(
            coordinator.cast_vote(origin(), vote(&env, 0, 0)).await,
            Err(Error::LedgerRejected(_))
        ));
        assert!(env.store.intents().is_empty());
        let voter = env.store.voter(env.voters[0]).await.unwrap().unwrap();
        assert!(voter.voted_elections.is_empty());
    }

    #[rocket::async_test]
    async fn transient_outage_is_retried() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        env.ledger.inject(Fault::Unavailable);
        env.ledger.inject(Fault::Unavailable);

        coordinator.cast_vote(origin(), vote(&env, 0, 1)).await.unwrap();
        assert_eq!(env.ledger.transactions().len(), 1);
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn aborted_local_transactions_are_retried() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        env.store.abort_next_applies(2);

        coordinator.cast_vote(origin(), vote(&env, 0, 0)).await.unwrap();
        let candidate = env.store.candidate(env.candidates[0]).await.unwrap().unwrap();
        assert_eq!(candidate.vote_count, 1);
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn persistent_local_failure_is_finished_by_the_sweep() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        env.store.abort_next_applies(3);

        let err = coordinator
            .cast_vote(origin(), vote(&env, 0, 0))
            .await
            .unwrap_err();
        let Error::LocalConflict { transaction_id, .. } = err else {
            panic!("expected a local conflict, got {err:?}");
        };
        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(intent.state, IntentState::Confirmed);

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(env.ledger.transactions().len(), 1);
        let candidate = env.store.candidate(env.candidates[0]).await.unwrap().unwrap();
        assert_eq!(candidate.ledger_tx_ids, vec![transaction_id]);
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn sweep_applies_votes_left_on_the_ledger() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        let intent = stranded_intent(&env, 1, 1).await;
        let receipt = submit_directly(&env, &intent).await;
        env.store.expire_leases();

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                reclaimed: 1,
                applied: 1,
                ..Default::default()
            }
        );
        let voter = env.store.voter(env.voters[1]).await.unwrap().unwrap();
        assert_eq!(voter.ledger_votes[0].transaction_id, receipt.transaction_id);
        assert_eq!(env.ledger.transactions().len(), 1);
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn sweep_waits_for_young_intents() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        stranded_intent(&env, 0, 0).await;
        env.store.expire_leases();

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(report.unresolved, 1);
        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(intent.state, IntentState::Unresolved);
        assert!(env.ledger.transactions().is_empty());
    }

    #[rocket::async_test]
    async fn sweep_discards_abandoned_intents() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(RetryPolicy {
            abandon_after: Duration::ZERO,
            ..policy()
        });
        stranded_intent(&env, 0, 0).await;
        env.store.expire_leases();

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(report.discarded, 1);
        assert!(env.store.intents().is_empty());
        assert!(env.ledger.transactions().is_empty());

        // The voter may vote again.
        coordinator.cast_vote(origin(), vote(&env, 0, 1)).await.unwrap();
    }

    #[rocket::async_test]
    async fn resumed_vote_reuses_its_commitment() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(RetryPolicy {
            abandon_after: Duration::ZERO,
            ..policy()
        });
        let stranded = stranded_intent(&env, 0, 1).await;
        env.store.expire_leases();

        coordinator.cast_vote(origin(), vote(&env, 0, 1)).await.unwrap();
        let transactions = env.ledger.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction.payload.commitment, stranded.commitment);
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn resuming_for_another_candidate_is_refused() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        stranded_intent(&env, 0, 0).await;

        // Still leased to its owner.
        assert!(matches!(
            coordinator.cast_vote(origin(), vote(&env, 0, 1)).await,
            Err(Error::VoteInProgress { .. })
        ));

        env.store.expire_leases();
        assert!(matches!(
            coordinator.cast_vote(origin(), vote(&env, 0, 1)).await,
            Err(Error::VoteInProgress { .. })
        ));
        assert!(env.ledger.transactions().is_empty());
        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(intent.candidate, env.candidates[0]);
    }

    #[rocket::async_test]
    async fn vote_for_deleted_election_is_compensated() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        let intent = stranded_intent(&env, 0, 0).await;
        let receipt = submit_directly(&env, &intent).await;
        env.store.delete_election(env.election).await.unwrap();
        env.store.expire_leases();

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(report.conflicts, 1);

        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(intent.state, IntentState::Orphaned);
        let open = env.store.compensations(Some(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].transaction_id, receipt.transaction_id);
        assert_eq!(open[0].reason, CompensationReason::EntityMissing);

        // Orphaned intents are finished; the next sweep leaves them alone.
        assert_eq!(coordinator.sweep().await.unwrap(), SweepReport::default());
    }

    /// Drop the intent of a finished vote, as a purge of the saga log would,
    /// so a second intent for the same pair can exist.
    async fn forget_intent(env: &TestEnv, voter: usize) {
        let intent = env.store.intent_for(env.voters[voter], env.election).unwrap();
        env.store.discard_intent(intent.id).await.unwrap();
    }

    #[rocket::async_test]
    async fn ledger_vote_by_a_voter_who_already_voted_is_compensated() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        coordinator.cast_vote(origin(), vote(&env, 0, 0)).await.unwrap();
        forget_intent(&env, 0).await;
        let stranded = stranded_intent(&env, 0, 1).await;
        let receipt = submit_directly(&env, &stranded).await;
        env.store.expire_leases();
        let mut reclaimed = env
            .store
            .reclaim_stale_intents(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);

        let err = coordinator
            .drive(origin(), reclaimed.remove(0), true, Mode::Resumed)
            .await
            .unwrap_err();
        let Error::LocalConflict { transaction_id, .. } = err else {
            panic!("expected a local conflict, got {err:?}");
        };
        assert_eq!(transaction_id, receipt.transaction_id);

        let intent = env.store.intent_for(env.voters[0], env.election).unwrap();
        assert_eq!(intent.id, stranded.id);
        assert_eq!(intent.state, IntentState::Orphaned);
        let open = env.store.compensations(Some(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].reason, CompensationReason::AlreadyVoted);
        assert_eq!(open[0].transaction_id, receipt.transaction_id);
        assert_eq!(open[0].candidate, env.candidates[1]);

        // The first vote stands; the orphaned one is not counted.
        let first = env.store.candidate(env.candidates[0]).await.unwrap().unwrap();
        assert_eq!(first.vote_count, 1);
        let second = env.store.candidate(env.candidates[1]).await.unwrap().unwrap();
        assert_eq!(second.vote_count, 0);
        let voter = env.store.voter(env.voters[0]).await.unwrap().unwrap();
        assert_eq!(voter.ledger_votes.len(), 1);

        assert_eq!(coordinator.sweep().await.unwrap(), SweepReport::default());
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn transaction_credited_twice_is_compensated() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        coordinator.cast_vote(origin(), vote(&env, 0, 0)).await.unwrap();
        let credited = env
            .store
            .intent_for(env.voters[0], env.election)
            .unwrap()
            .receipt
            .unwrap();

        // Another voter's intent whose receipt names the credited transaction.
        let intent = stranded_intent(&env, 1, 0).await;
        env.store.record_receipt(intent.id, &credited).await.unwrap();
        env.store.expire_leases();

        let report = coordinator.sweep().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                reclaimed: 1,
                conflicts: 1,
                ..Default::default()
            }
        );

        let intent = env.store.intent_for(env.voters[1], env.election).unwrap();
        assert_eq!(intent.state, IntentState::Orphaned);
        let open = env.store.compensations(Some(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].reason, CompensationReason::DuplicateTransaction);
        assert_eq!(open[0].transaction_id, credited.transaction_id);

        let candidate = env.store.candidate(env.candidates[0]).await.unwrap().unwrap();
        assert_eq!(candidate.vote_count, 1);
        let voter = env.store.voter(env.voters[1]).await.unwrap().unwrap();
        assert!(voter.voted_elections.is_empty());
        env.check_invariants().await;
    }

    #[rocket::async_test]
    async fn local_only_vote_skips_the_ledger() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        let (election, candidate) = env.local_only_election();
        env.ledger.set_offline(true);

        let receipt = coordinator
            .cast_vote(
                origin(),
                CastVote {
                    voter: env.voters[0],
                    election,
                    candidate,
                },
            )
            .await
            .unwrap();
        assert!(receipt.transaction_id.starts_with("local:"));
        let election = env.store.election(election).await.unwrap().unwrap();
        assert_eq!(election.total_ledger_txs, 0);
        assert!(election.last_ledger_sync.is_none());
    }

    // The loser of the race gets `VoteInProgress` while the winner's intent
    // is leased and `AlreadyVoted` only once it has finished. Both are
    // conflicts to the caller and neither reaches the ledger.
    #[rocket::async_test]
    async fn concurrent_votes_for_one_pair_submit_once_and_report_in_progress() {
        let env = TestEnv::new();
        let coordinator = env.coordinator(policy());
        let (first, second) = rocket::futures::future::join(
            coordinator.cast_vote(origin(), vote(&env, 0, 0)),
            coordinator.cast_vote(origin(), vote(&env, 0, 0)),
        )
        .await;

        assert!(first.is_ok() != second.is_ok());
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(
            loser,
            Err(Error::VoteInProgress { .. } | Error::AlreadyVoted { .. })
        ));
        assert_eq!(env.ledger.transactions().len(), 1);
        env.check_invariants().await;
    }
}
