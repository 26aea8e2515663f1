use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{
    candidate::Candidate,
    compensation::{Compensation, NewCompensation},
    election::Election,
    intent::VoteIntent,
    voter::Voter,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Candidate collection
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}

// Election collection
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}

// Voter collection
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}

// Vote intent collection
const VOTE_INTENTS: &str = "vote_intents";
impl MongoCollection for VoteIntent {
    const NAME: &'static str = VOTE_INTENTS;
}

// Compensation collections
const COMPENSATIONS: &str = "compensations";
impl MongoCollection for Compensation {
    const NAME: &'static str = COMPENSATIONS;
}
impl MongoCollection for NewCompensation {
    const NAME: &'static str = COMPENSATIONS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // One vote intent per voter per election.
    let intent_index = IndexModel::builder()
        .keys(doc! {"voter": 1, "election": 1})
        .options(unique.clone())
        .build();
    Coll::<VoteIntent>::from_db(db)
        .create_index(intent_index, None)
        .await?;

    // The sweeper scans for expired leases.
    let lease_index = IndexModel::builder()
        .keys(doc! {"state": 1, "lease_expires_at": 1})
        .build();
    Coll::<VoteIntent>::from_db(db)
        .create_index(lease_index, None)
        .await?;

    // A ledger transaction is orphaned at most once.
    let compensation_index = IndexModel::builder()
        .keys(doc! {"transaction_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Compensation>::from_db(db)
        .create_index(compensation_index, None)
        .await?;

    // Candidates are looked up by election and by credited transaction.
    let candidate_election_index = IndexModel::builder()
        .keys(doc! {"election": 1})
        .build();
    let candidate_tx_index = IndexModel::builder()
        .keys(doc! {"ledger_tx_ids": 1})
        .build();
    Coll::<Candidate>::from_db(db)
        .create_indexes([candidate_election_index, candidate_tx_index], None)
        .await?;

    // Voter emails are unique.
    let voter_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique)
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    Ok(())
}
