use std::time::Duration;

use mongodb::{
    bson::{doc, to_bson, Bson, DateTime, Document},
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

use crate::ledger::Receipt;
use crate::model::{
    db::{
        candidate::Candidate,
        compensation::{Compensation, NewCompensation},
        election::Election,
        intent::{IntentState, VoteIntent},
        voter::Voter,
    },
    mongodb::{datetime_after, is_duplicate_key_error, is_unknown_commit_result, Coll, Id},
};

use super::{AppliedVote, IntentClaim, StoreError, VoteStore};

/// How many times to retry a commit whose outcome is unknown.
const COMMIT_ATTEMPTS: usize = 3;

/// A [`VoteStore`] backed by MongoDB.
///
/// Multi-document updates use transactions, so the server must be a replica
/// set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    candidates: Coll<Candidate>,
    elections: Coll<Election>,
    voters: Coll<Voter>,
    intents: Coll<VoteIntent>,
    compensations: Coll<Compensation>,
    new_compensations: Coll<NewCompensation>,
}

impl MongoStore {
    pub fn new(client: Client, db: &Database) -> Self {
        Self {
            client,
            candidates: Coll::from_db(db),
            elections: Coll::from_db(db),
            voters: Coll::from_db(db),
            intents: Coll::from_db(db),
            compensations: Coll::from_db(db),
            new_compensations: Coll::from_db(db),
        }
    }

    async fn start_transaction(&self) -> Result<ClientSession, StoreError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(session)
    }

    async fn apply_vote_in(
        &self,
        session: &mut ClientSession,
        vote: &AppliedVote,
    ) -> Result<(), StoreError> {
        let record = &vote.record;
        let now = DateTime::now();

        // Re-check the voter under transaction isolation.
        let voter = self
            .voters
            .find_one_with_session(vote.voter.as_doc(), None, session)
            .await?
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
            self.mark_applied(session, vote.intent, now).await?;
            return Ok(());
        }

        let election_filter = record.election.as_doc();
        if self
            .elections
            .find_one_with_session(election_filter.clone(), None, session)
            .await?
            .is_none()
        {
            return Err(StoreError::NotFound(format!("election {}", record.election)));
        }

        // Credit the candidate, refusing a transaction it already holds.
        let credited = self
            .candidates
            .update_one_with_session(
                doc! {
                    "_id": record.candidate,
                    "election": record.election,
                    "ledger_tx_ids": { "$ne": record.transaction_id.as_str() },
                },
                doc! {
                    "$inc": { "vote_count": 1_i64 },
                    "$push": { "ledger_tx_ids": record.transaction_id.as_str() },
                },
                None,
                session,
            )
            .await?;
        if credited.matched_count == 0 {
            let candidate = self
                .candidates
                .find_one_with_session(record.candidate.as_doc(), None, session)
                .await?;
            return Err(match candidate {
                Some(candidate) if candidate.election == record.election => {
                    StoreError::DuplicateTransaction(record.transaction_id.clone())
                }
                _ => StoreError::NotFound(format!(
                    "candidate {} in election {}",
                    record.candidate, record.election
                )),
            });
        }

        // The filter closes the race with a concurrent vote by the same voter.
        let recorded = self
            .voters
            .update_one_with_session(
                doc! {
                    "_id": vote.voter,
                    "voted_elections": { "$ne": record.election },
                },
                doc! {
                    "$addToSet": { "voted_elections": record.election },
                    "$push": { "ledger_votes": to_bson(record)? },
                },
                None,
                session,
            )
            .await?;
        if recorded.matched_count == 0 {
            return Err(StoreError::AlreadyVoted {
                voter: vote.voter,
                election: record.election,
            });
        }

        let mut election_update = doc! {
            "$addToSet": { "voters": vote.voter },
        };
        if vote.ledger_backed {
            election_update.insert("$inc", doc! { "total_ledger_txs": 1_i64 });
            election_update.insert("$set", doc! { "last_ledger_sync": now });
        }
        self.elections
            .update_one_with_session(election_filter, election_update, None, session)
            .await?;

        self.mark_applied(session, vote.intent, now).await
    }

    async fn mark_applied(
        &self,
        session: &mut ClientSession,
        intent: Id,
        now: DateTime,
    ) -> Result<(), StoreError> {
        // A vote without its intent must not be counted; the error aborts the
        // transaction.
        let updated = self
            .intents
            .update_one_with_session(
                intent.as_doc(),
                doc! { "$set": { "state": IntentState::Applied, "updated_at": now } },
                None,
                session,
            )
            .await?;
        if updated.matched_count == 0 {
            return Err(StoreError::NotFound(format!("vote intent {intent}")));
        }
        Ok(())
    }

    async fn delete_election_in(
        &self,
        session: &mut ClientSession,
        id: Id,
    ) -> Result<(), StoreError> {
        let deleted = self
            .elections
            .delete_one_with_session(id.as_doc(), None, session)
            .await?;
        if deleted.deleted_count == 0 {
            return Err(StoreError::NotFound(format!("election {id}")));
        }
        self.candidates
            .delete_many_with_session(doc! { "election": id }, None, session)
            .await?;
        self.voters
            .update_many_with_session(
                doc! { "voted_elections": id },
                doc! {
                    "$pull": {
                        "voted_elections": id,
                        "ledger_votes": { "election": id },
                    }
                },
                None,
                session,
            )
            .await?;
        self.intents
            .delete_many_with_session(
                doc! { "election": id, "state": IntentState::Applied },
                None,
                session,
            )
            .await?;
        Ok(())
    }

    /// Atomically take over a claimable intent matching `filter`.
    async fn take_over(
        &self,
        mut filter: Document,
        lease: Duration,
    ) -> Result<Option<VoteIntent>, StoreError> {
        let now = DateTime::now();
        restrict_to_claimable(&mut filter, now);
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let intent = self
            .intents
            .find_one_and_update(
                filter,
                doc! { "$set": { "lease_expires_at": datetime_after(lease), "updated_at": now } },
                options,
            )
            .await?;
        Ok(intent)
    }
}

/// Restrict `filter` to intents that may be taken over at `now`.
fn restrict_to_claimable(filter: &mut Document, now: DateTime) {
    let resumable = IntentState::RESUMABLE
        .iter()
        .map(|state| state.as_str())
        .collect::<Vec<_>>();
    filter.insert("state", doc! { "$in": resumable });
    filter.insert("lease_expires_at", doc! { "$lte": now });
}

/// Commit the transaction if `result` is a success, abort it otherwise.
async fn finish<T>(
    session: &mut ClientSession,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            commit(session).await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_err) = session.abort_transaction().await {
                warn!("Failed to abort transaction: {abort_err}");
            }
            Err(e)
        }
    }
}

/// Commit the session's transaction, retrying while the outcome is unknown.
async fn commit(session: &mut ClientSession) -> Result<(), StoreError> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(e) if is_unknown_commit_result(&e) && attempt < COMMIT_ATTEMPTS => {
                debug!("Commit outcome unknown, retrying: {e}");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn candidate(&self, id: Id) -> Result<Option<Candidate>, StoreError> {
        Ok(self.candidates.find_one(id.as_doc(), None).await?)
    }

    async fn election(&self, id: Id) -> Result<Option<Election>, StoreError> {
        Ok(self.elections.find_one(id.as_doc(), None).await?)
    }

    async fn voter(&self, id: Id) -> Result<Option<Voter>, StoreError> {
        Ok(self.voters.find_one(id.as_doc(), None).await?)
    }

    async fn claim_intent(
        &self,
        intent: VoteIntent,
        lease: Duration,
    ) -> Result<IntentClaim, StoreError> {
        let pair = doc! { "voter": intent.voter, "election": intent.election };
        // The existing intent may be discarded between our reads; a few
        // attempts settle the race.
        for _ in 0..3 {
            match self.intents.insert_one(&intent, None).await {
                Ok(_) => return Ok(IntentClaim::Claimed(intent)),
                Err(e) if is_duplicate_key_error(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(resumed) = self.take_over(pair.clone(), lease).await? {
                return Ok(IntentClaim::Resumed(resumed));
            }
            if let Some(held) = self.intents.find_one(pair.clone(), None).await? {
                return Ok(IntentClaim::Held(held));
            }
        }
        Err(StoreError::TransactionAborted(format!(
            "vote intent for voter {} in election {} is contended",
            intent.voter, intent.election
        )))
    }

    async fn record_receipt(&self, intent: Id, receipt: &Receipt) -> Result<(), StoreError> {
        let updated = self
            .intents
            .update_one(
                intent.as_doc(),
                doc! {
                    "$set": {
                        "state": IntentState::Confirmed,
                        "receipt": to_bson(receipt)?,
                        "updated_at": DateTime::now(),
                    }
                },
                None,
            )
            .await?;
        if updated.matched_count == 0 {
            return Err(StoreError::NotFound(format!("vote intent {intent}")));
        }
        Ok(())
    }

    async fn release_intent(&self, intent: Id, state: IntentState) -> Result<(), StoreError> {
        let now = DateTime::now();
        let updated = self
            .intents
            .update_one(
                intent.as_doc(),
                doc! {
                    "$set": { "state": state, "lease_expires_at": now, "updated_at": now }
                },
                None,
            )
            .await?;
        if updated.matched_count == 0 {
            return Err(StoreError::NotFound(format!("vote intent {intent}")));
        }
        Ok(())
    }

    async fn discard_intent(&self, intent: Id) -> Result<(), StoreError> {
        self.intents.delete_one(intent.as_doc(), None).await?;
        Ok(())
    }

    async fn reclaim_stale_intents(
        &self,
        lease: Duration,
    ) -> Result<Vec<VoteIntent>, StoreError> {
        let mut filter = Document::new();
        restrict_to_claimable(&mut filter, DateTime::now());
        let candidates: Vec<VoteIntent> = self
            .intents
            .find(filter, None)
            .await?
            .try_collect()
            .await?;

        // Another sweeper may get there first; only keep the ones we took over.
        let mut reclaimed = Vec::with_capacity(candidates.len());
        for intent in candidates {
            if let Some(intent) = self.take_over(intent.id.as_doc(), lease).await? {
                reclaimed.push(intent);
            }
        }
        Ok(reclaimed)
    }

    async fn apply_vote(&self, vote: &AppliedVote) -> Result<(), StoreError> {
        let mut session = self.start_transaction().await?;
        let result = self.apply_vote_in(&mut session, vote).await;
        finish(&mut session, result).await
    }

    async fn record_compensation(
        &self,
        compensation: NewCompensation,
    ) -> Result<Id, StoreError> {
        let transaction_id = compensation.transaction_id.clone();
        match self
            .new_compensations
            .insert_one(&compensation, None)
            .await
        {
            Ok(result) => Ok(result
                .inserted_id
                .as_object_id()
                .map(Id::from)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("ID of compensation for {transaction_id}"))
                })?),
            Err(e) if is_duplicate_key_error(&e) => {
                let existing = self
                    .compensations
                    .find_one(doc! { "transaction_id": transaction_id.as_str() }, None)
                    .await?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!("compensation for {transaction_id}"))
                    })?;
                Ok(existing.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn compensations(
        &self,
        resolved: Option<bool>,
    ) -> Result<Vec<Compensation>, StoreError> {
        let filter = match resolved {
            None => doc! {},
            Some(true) => doc! { "resolved_at": { "$ne": null } },
            Some(false) => doc! { "resolved_at": null },
        };
        let compensations: Vec<Compensation> = self
            .compensations
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(compensations)
    }

    async fn resolve_compensation(&self, id: Id) -> Result<Compensation, StoreError> {
        let mut filter = id.as_doc();
        filter.insert("resolved_at", Bson::Null);
        self.compensations
            .update_one(
                filter,
                doc! { "$set": { "resolved_at": DateTime::now() } },
                None,
            )
            .await?;
        self.compensations
            .find_one(id.as_doc(), None)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("compensation {id}")))
    }

    async fn delete_election(&self, id: Id) -> Result<(), StoreError> {
        let mut session = self.start_transaction().await?;
        let result = self.delete_election_in(&mut session, id).await;
        finish(&mut session, result).await
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::panic::{resume_unwind, AssertUnwindSafe};

    use rocket::futures::FutureExt;

    use super::*;
    use crate::commitment::{Commitment, Nonce};
    use crate::config::get_database_name;
    use crate::model::db::{
        candidate::CandidateCore,
        compensation::CompensationReason,
        election::ElectionCore,
        voter::{LedgerVote, VoterCore},
    };
    use crate::model::mongodb::ensure_indexes_exist;

    const LEASE: Duration = Duration::from_secs(60);

    struct Fixture {
        store: MongoStore,
        election: Id,
        candidates: [Id; 2],
        voters: [Id; 2],
    }

    /// Run `test` against a fresh `test<N>` database on the `db_uri` server,
    /// dropping the database however the test ends.
    async fn with_fixture<F, Fut>(test: F)
    where
        F: FnOnce(Fixture) -> Fut,
        Fut: Future<Output = ()>,
    {
        let db_uri: String = rocket::Config::figment()
            .extract_inner("db_uri")
            .expect("`db_uri` must be configured for the active profile");
        let client = Client::with_uri_str(&db_uri).await.unwrap();
        let db = client.database(&get_database_name());
        ensure_indexes_exist(&db).await.unwrap();
        let fixture = seed(MongoStore::new(client, &db)).await;

        let result = AssertUnwindSafe(test(fixture)).catch_unwind().await;
        db.drop(None).await.unwrap();
        if let Err(cause) = result {
            resume_unwind(cause);
        }
    }

    async fn seed(store: MongoStore) -> Fixture {
        let election = insert_election(&store).await;
        let candidates = [
            insert_candidate(&store, CandidateCore::example1(election)).await,
            insert_candidate(&store, CandidateCore::example2(election)).await,
        ];
        let voters = [Id::new(), Id::new()];
        store
            .voters
            .insert_many(
                [
                    Voter {
                        id: voters[0],
                        voter: VoterCore::example1(),
                    },
                    Voter {
                        id: voters[1],
                        voter: VoterCore::example2(),
                    },
                ],
                None,
            )
            .await
            .unwrap();
        Fixture {
            store,
            election,
            candidates,
            voters,
        }
    }

    async fn insert_election(store: &MongoStore) -> Id {
        let id = Id::new();
        store
            .elections
            .insert_one(
                Election {
                    id,
                    election: ElectionCore::example(),
                },
                None,
            )
            .await
            .unwrap();
        id
    }

    async fn insert_candidate(store: &MongoStore, candidate: CandidateCore) -> Id {
        let id = Id::new();
        store
            .elections
            .update_one(
                candidate.election.as_doc(),
                doc! { "$push": { "candidates": id } },
                None,
            )
            .await
            .unwrap();
        store
            .candidates
            .insert_one(Candidate { id, candidate }, None)
            .await
            .unwrap();
        id
    }

    fn intent(voter: Id, election: Id, candidate: Id) -> VoteIntent {
        VoteIntent::new(
            voter,
            election,
            candidate,
            Nonce::example(),
            Commitment::from_hex("11".repeat(32)).unwrap(),
            DateTime::now(),
            LEASE,
        )
    }

    fn vote(intent: &VoteIntent, transaction_id: &str) -> AppliedVote {
        AppliedVote {
            intent: intent.id,
            voter: intent.voter,
            record: LedgerVote {
                election: intent.election,
                candidate: intent.candidate,
                transaction_id: transaction_id.to_string(),
                sequence_number: 1,
                commitment: intent.commitment.clone(),
                timestamp: intent.cast_at,
            },
            ledger_backed: true,
        }
    }

    async fn claimed(f: &Fixture, voter: Id, candidate: Id) -> VoteIntent {
        match f
            .store
            .claim_intent(intent(voter, f.election, candidate), LEASE)
            .await
            .unwrap()
        {
            IntentClaim::Claimed(intent) => intent,
            other => panic!("unexpected claim {other:?}"),
        }
    }

    async fn vote_count(f: &Fixture, candidate: Id) -> u64 {
        f.store
            .candidate(candidate)
            .await
            .unwrap()
            .unwrap()
            .vote_count
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn apply_vote_updates_every_relation() {
        with_fixture(|f| async move {
            let intent = claimed(&f, f.voters[0], f.candidates[0]).await;
            f.store.apply_vote(&vote(&intent, "tx1")).await.unwrap();

            let candidate = f.store.candidate(f.candidates[0]).await.unwrap().unwrap();
            assert_eq!(candidate.vote_count, 1);
            assert_eq!(candidate.ledger_tx_ids, vec!["tx1".to_string()]);

            let election = f.store.election(f.election).await.unwrap().unwrap();
            assert_eq!(election.voters, vec![f.voters[0]]);
            assert_eq!(election.total_ledger_txs, 1);
            assert!(election.last_ledger_sync.is_some());

            let voter = f.store.voter(f.voters[0]).await.unwrap().unwrap();
            assert_eq!(voter.voted_elections, vec![f.election]);
            assert!(voter.history_is_consistent());

            let stored = f
                .store
                .intents
                .find_one(intent.id.as_doc(), None)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.state, IntentState::Applied);

            // Applying the same ledger transaction again changes nothing.
            f.store.apply_vote(&vote(&intent, "tx1")).await.unwrap();
            assert_eq!(vote_count(&f, f.candidates[0]).await, 1);
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn second_vote_in_election_is_rejected_without_mutation() {
        with_fixture(|f| async move {
            let intent = claimed(&f, f.voters[0], f.candidates[0]).await;
            f.store.apply_vote(&vote(&intent, "tx1")).await.unwrap();

            let mut second = vote(&intent, "tx2");
            second.record.candidate = f.candidates[1];
            assert!(matches!(
                f.store.apply_vote(&second).await,
                Err(StoreError::AlreadyVoted { voter, election })
                    if voter == f.voters[0] && election == f.election
            ));

            assert_eq!(vote_count(&f, f.candidates[1]).await, 0);
            let voter = f.store.voter(f.voters[0]).await.unwrap().unwrap();
            assert_eq!(voter.ledger_votes.len(), 1);
            let election = f.store.election(f.election).await.unwrap().unwrap();
            assert_eq!(election.total_ledger_txs, 1);
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn duplicate_transaction_is_refused() {
        with_fixture(|f| async move {
            let first = claimed(&f, f.voters[0], f.candidates[0]).await;
            f.store.apply_vote(&vote(&first, "tx1")).await.unwrap();

            let second = claimed(&f, f.voters[1], f.candidates[0]).await;
            assert!(matches!(
                f.store.apply_vote(&vote(&second, "tx1")).await,
                Err(StoreError::DuplicateTransaction(tx)) if tx == "tx1"
            ));

            assert_eq!(vote_count(&f, f.candidates[0]).await, 1);
            let voter = f.store.voter(f.voters[1]).await.unwrap().unwrap();
            assert!(voter.voted_elections.is_empty());
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn candidate_from_another_election_is_not_found() {
        with_fixture(|f| async move {
            let other_election = insert_election(&f.store).await;
            let outsider =
                insert_candidate(&f.store, CandidateCore::example1(other_election)).await;
            let intent = claimed(&f, f.voters[0], outsider).await;
            assert!(matches!(
                f.store.apply_vote(&vote(&intent, "tx1")).await,
                Err(StoreError::NotFound(_))
            ));

            assert_eq!(vote_count(&f, outsider).await, 0);
            let voter = f.store.voter(f.voters[0]).await.unwrap().unwrap();
            assert!(voter.voted_elections.is_empty());
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn vote_without_its_intent_is_rolled_back() {
        with_fixture(|f| async move {
            let orphan = intent(f.voters[0], f.election, f.candidates[0]);
            assert!(matches!(
                f.store.apply_vote(&vote(&orphan, "tx1")).await,
                Err(StoreError::NotFound(what)) if what.starts_with("vote intent")
            ));

            // The tally and history writes ran before the intent update and
            // must have been aborted with it.
            assert_eq!(vote_count(&f, f.candidates[0]).await, 0);
            let voter = f.store.voter(f.voters[0]).await.unwrap().unwrap();
            assert!(voter.voted_elections.is_empty());
            let election = f.store.election(f.election).await.unwrap().unwrap();
            assert!(election.voters.is_empty());
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn intents_are_held_until_released() {
        with_fixture(|f| async move {
            let first = claimed(&f, f.voters[0], f.candidates[0]).await;

            let again = f
                .store
                .claim_intent(intent(f.voters[0], f.election, f.candidates[1]), LEASE)
                .await
                .unwrap();
            assert!(matches!(again, IntentClaim::Held(held) if held.id == first.id));

            f.store
                .release_intent(first.id, IntentState::Unresolved)
                .await
                .unwrap();
            match f
                .store
                .claim_intent(intent(f.voters[0], f.election, f.candidates[1]), LEASE)
                .await
                .unwrap()
            {
                IntentClaim::Resumed(resumed) => {
                    assert_eq!(resumed.id, first.id);
                    assert_eq!(resumed.candidate, f.candidates[0]);
                }
                other => panic!("unexpected claim {other:?}"),
            }

            // The resumed intent is leased again.
            assert!(f.store.reclaim_stale_intents(LEASE).await.unwrap().is_empty());
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn compensations_are_recorded_once() {
        with_fixture(|f| async move {
            let compensation = NewCompensation {
                transaction_id: "tx9".to_string(),
                sequence_number: 9,
                commitment: Commitment::from_hex("22".repeat(32)).unwrap(),
                voter: f.voters[0],
                election: f.election,
                candidate: f.candidates[0],
                reason: CompensationReason::AlreadyVoted,
                detail: "voter had already voted".to_string(),
                created_at: DateTime::now(),
                resolved_at: None,
            };
            let id = f
                .store
                .record_compensation(compensation.clone())
                .await
                .unwrap();
            assert_eq!(
                f.store.record_compensation(compensation).await.unwrap(),
                id
            );

            assert_eq!(f.store.compensations(Some(false)).await.unwrap().len(), 1);
            let resolved = f.store.resolve_compensation(id).await.unwrap();
            assert!(resolved.resolved_at.is_some());
            assert!(f.store.compensations(Some(false)).await.unwrap().is_empty());
        })
        .await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at the configured `db_uri`"]
    async fn delete_election_cascades() {
        with_fixture(|f| async move {
            let intent = claimed(&f, f.voters[0], f.candidates[0]).await;
            f.store.apply_vote(&vote(&intent, "tx1")).await.unwrap();
            let other_election = insert_election(&f.store).await;
            let survivor =
                insert_candidate(&f.store, CandidateCore::example1(other_election)).await;

            f.store.delete_election(f.election).await.unwrap();

            assert!(f.store.election(f.election).await.unwrap().is_none());
            for candidate in f.candidates {
                assert!(f.store.candidate(candidate).await.unwrap().is_none());
            }
            assert!(f.store.candidate(survivor).await.unwrap().is_some());

            let voter = f.store.voter(f.voters[0]).await.unwrap().unwrap();
            assert!(voter.voted_elections.is_empty());
            assert!(voter.ledger_votes.is_empty());
            assert!(f
                .store
                .intents
                .find_one(intent.id.as_doc(), None)
                .await
                .unwrap()
                .is_none());

            assert!(matches!(
                f.store.delete_election(f.election).await,
                Err(StoreError::NotFound(_))
            ));
        })
        .await;
    }
}
