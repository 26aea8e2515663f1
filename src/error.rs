use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{status, Responder},
    serde::json::{json, Json},
    Request,
};
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::model::mongodb::Id;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The voter has already voted in the election. Definitive.
    #[error("Voter {voter} has already voted in election {election}")]
    AlreadyVoted { voter: Id, election: Id },
    /// Another request is casting this voter's vote in this election.
    #[error("A vote by voter {voter} in election {election} is already in progress")]
    VoteInProgress { voter: Id, election: Id },
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
    /// The ledger outcome is unknown. Resubmitting the same vote is safe.
    #[error("Ledger did not confirm the vote in time")]
    LedgerTimeout { transaction_id: Option<String> },
    #[error("Ledger rejected the vote: {0}")]
    LedgerRejected(String),
    #[error("Ledger signing account has insufficient funds: {0}")]
    InsufficientFunds(String),
    /// Nothing was recorded anywhere.
    #[error("Vote not recorded: {0}")]
    VoteNotRecorded(String),
    /// The ledger recorded the vote but local state did not.
    #[error("Vote recorded on the ledger as {transaction_id} but not locally: {detail}")]
    LocalConflict {
        transaction_id: String,
        detail: String,
    },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A stable, machine-readable name for this kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::AlreadyVoted { .. } => "AlreadyVoted",
            Self::VoteInProgress { .. } => "VoteInProgress",
            Self::LedgerUnavailable(_) => "LedgerUnavailable",
            Self::LedgerTimeout { .. } => "LedgerTimeout",
            Self::LedgerRejected(_) => "LedgerRejected",
            Self::InsufficientFunds(_) => "InsufficientFunds",
            Self::VoteNotRecorded(_) => "VoteNotRecorded",
            Self::LocalConflict { .. } => "LocalConflict",
            Self::Db(_) | Self::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::InvalidArgument(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::AlreadyVoted { .. } | Self::VoteInProgress { .. } => Status::Conflict,
            Self::LedgerUnavailable(_) | Self::VoteNotRecorded(_) => Status::ServiceUnavailable,
            Self::LedgerTimeout { .. } => Status::GatewayTimeout,
            Self::LedgerRejected(_) | Self::InsufficientFunds(_) => Status::BadGateway,
            Self::LocalConflict { .. } | Self::Db(_) | Self::Internal(_) => {
                Status::InternalServerError
            }
        }
    }

    /// The ledger transaction this error refers to, if the ledger recorded
    /// (or may have recorded) something.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::LedgerTimeout { transaction_id } => transaction_id.as_deref(),
            Self::LocalConflict { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyVoted { voter, election } => Self::AlreadyVoted { voter, election },
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Db(e) => Self::Db(e),
            e @ (StoreError::DuplicateTransaction(_)
            | StoreError::TransactionAborted(_)
            | StoreError::Bson(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NetworkUnavailable(e) => Self::LedgerUnavailable(e),
            LedgerError::InsufficientFunds(e) => Self::InsufficientFunds(e),
            LedgerError::Timeout { transaction_id } => Self::LedgerTimeout { transaction_id },
            LedgerError::Rejected(e) => Self::LedgerRejected(e),
            e @ LedgerError::StaleNonce(_) => Self::LedgerRejected(e.to_string()),
        }
    }
}

impl From<JwtError> for Error {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                Self::Unauthorized("token has expired".to_string())
            }
            _ => Self::Unauthorized(format!("invalid token: {err}")),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("{self}"),
            _ => debug!("{self}"),
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Some(transaction_id) = self.transaction_id() {
            body["transactionId"] = json!(transaction_id);
        }
        status::Custom(status, Json(body)).respond_to(req)
    }
}
