//! Shared fixtures for route and coordinator tests.

use std::collections::HashSet;
use std::sync::Arc;

use mongodb::bson::DateTime;
use rocket::{figment::Figment, Build, Rocket};

use crate::commitment::{Commitment, IdentityHasher};
use crate::coordinator::{Coordinator, RetryPolicy};
use crate::ledger::{LedgerClient, LedgerSettings, MemoryLedger, SigningIdentity};
use crate::model::{
    auth::mint_token,
    db::{
        candidate::CandidateCore,
        compensation::{CompensationReason, NewCompensation},
        election::ElectionCore,
        voter::VoterCore,
    },
    mongodb::Id,
};
use crate::store::{MemoryStore, VoteStore};
use crate::Config;

/// One election with two candidates and two voters who have not voted yet,
/// backed by an in-memory store and ledger.
#[derive(Clone)]
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MemoryLedger>,
    pub election: Id,
    pub candidates: [Id; 2],
    pub voters: [Id; 2],
}

impl TestEnv {
    /// Balance of the signing account at the start of every test.
    pub const FUNDS: u64 = 1_000;

    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let election = store.insert_election(ElectionCore::example());
        let candidates = [
            store
                .insert_candidate(CandidateCore::example1(election))
                .unwrap(),
            store
                .insert_candidate(CandidateCore::example2(election))
                .unwrap(),
        ];
        let voters = [
            store.insert_voter(VoterCore::example1()),
            store.insert_voter(VoterCore::example2()),
        ];

        let ledger = Arc::new(MemoryLedger::new());
        ledger.fund(SigningIdentity::example().address(), Self::FUNDS);

        Self {
            store,
            ledger,
            election,
            candidates,
            voters,
        }
    }

    /// Rocket config for tests: fast timeouts, no background sweeps, and the
    /// signing key of [`SigningIdentity::example`].
    pub fn figment() -> Figment {
        rocket::Config::figment()
            .merge(("admin_ids", Vec::<String>::new()))
            .merge(("vote_max_attempts", 3))
            .merge(("vote_backoff_base_ms", 1))
            .merge(("vote_backoff_cap_ms", 5))
            .merge(("local_apply_max_attempts", 3))
            .merge(("intent_lease_secs", 60))
            .merge(("sweep_interval_secs", 0))
            .merge(("abandon_after_secs", 600))
            .merge(("jwt_secret", "test-jwt-secret"))
            .merge(("commitment_secret", "test-commitment-secret"))
            .merge(("ledger_url", "memory://"))
            .merge(("ledger_request_timeout_ms", 1_000))
            .merge(("ledger_confirm_timeout_ms", 200))
            .merge(("ledger_poll_interval_ms", 10))
            .merge(("ledger_reconcile_timeout_ms", 100))
            .merge(("ledger_signing_key", "07".repeat(32)))
    }

    pub fn rocket(&self) -> Rocket<Build> {
        crate::rocket_for_backends(Self::figment(), self.store.clone(), self.ledger.clone())
    }

    /// A coordinator over this environment's store and ledger, for driving
    /// the saga without HTTP.
    pub fn coordinator(&self, policy: RetryPolicy) -> Arc<Coordinator> {
        let ledger = LedgerClient::new(
            self.ledger.clone(),
            SigningIdentity::example(),
            LedgerSettings::example(),
        );
        Arc::new(Coordinator::new(
            self.store.clone(),
            Arc::new(ledger),
            IdentityHasher::new(Config::example().commitment_secret()),
            policy,
        ))
    }

    pub fn signing_address(&self) -> String {
        SigningIdentity::example().address().to_string()
    }

    pub fn voter_token(&self, voter: usize) -> String {
        mint_token(self.voters[voter], false, &Config::example())
    }

    pub fn admin_token(&self) -> String {
        mint_token(Id::new(), true, &Config::example())
    }

    /// A second ledger-backed election with a candidate of its own.
    pub fn other_election(&self) -> Id {
        let election = self.store.insert_election(ElectionCore::example());
        self.store
            .insert_candidate(CandidateCore::example1(election))
            .unwrap();
        election
    }

    /// An election that is not recorded on the ledger, and its candidate.
    pub fn local_only_election(&self) -> (Id, Id) {
        let mut election = ElectionCore::example();
        election.ledger_enabled = false;
        let election = self.store.insert_election(election);
        let candidate = self
            .store
            .insert_candidate(CandidateCore::example2(election))
            .unwrap();
        (election, candidate)
    }

    pub fn compensation(voter: Id, election: Id, candidate: Id) -> NewCompensation {
        NewCompensation {
            transaction_id: "4f1c".repeat(16),
            sequence_number: 7,
            commitment: Commitment::from_hex("5a".repeat(32)).unwrap(),
            voter,
            election,
            candidate,
            reason: CompensationReason::EntityMissing,
            detail: "candidate deleted".to_string(),
            created_at: DateTime::now(),
            resolved_at: None,
        }
    }

    /// Check the relations that must hold between tallies, voters and the
    /// ledger whatever a test did.
    pub async fn check_invariants(&self) {
        let mut credited = HashSet::new();
        for candidate in self.store.candidates() {
            assert_eq!(
                candidate.vote_count as usize,
                candidate.ledger_tx_ids.len(),
                "tally of candidate {} does not match its transactions",
                candidate.id
            );
            for tx in &candidate.ledger_tx_ids {
                assert!(credited.insert(tx.clone()), "transaction {tx} credited twice");
            }
        }

        for voter in self.store.voters() {
            assert!(
                voter.history_is_consistent(),
                "history of voter {} is inconsistent",
                voter.id
            );
            for vote in &voter.ledger_votes {
                let Some(election) = self.store.election(vote.election).await.unwrap() else {
                    continue;
                };
                assert!(election.voters.contains(&voter.id));
                if election.ledger_enabled {
                    assert_eq!(
                        self.ledger.count_commitment(&vote.commitment),
                        1,
                        "vote of {} is not on the ledger exactly once",
                        voter.id
                    );
                }
            }
        }
    }
}
