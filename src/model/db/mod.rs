//! DB-compatible (e.g. de/serialisable) types.
//!
//! IDs and datetimes are serialised in MongoDB's own format.

pub mod candidate;
pub mod compensation;
pub mod election;
pub mod intent;
pub mod voter;
