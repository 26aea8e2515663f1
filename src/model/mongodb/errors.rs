//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{
    Error as DbError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref e)) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Return true if the given error aborted a transaction that is safe to retry
/// from the start, e.g. a write conflict with a concurrent transaction.
pub fn is_transient_transaction_error(err: &DbError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

/// Return true if a transaction commit may or may not have been applied and
/// the commit itself should be retried.
pub fn is_unknown_commit_result(err: &DbError) -> bool {
    err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
}
