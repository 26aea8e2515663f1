use std::{fmt, ops::Deref, str::FromStr};

use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A database ID, stored natively as a MongoDB `ObjectId`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(ObjectId);

impl Id {
    /// Generate a fresh unique ID.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(ObjectId::new())
    }

    /// Parse an ID supplied by a caller, naming what it was meant to identify
    /// so a malformed value can be reported precisely.
    pub fn parse_arg(value: &str, what: &str) -> Result<Self, Error> {
        if value.trim().is_empty() {
            return Err(Error::InvalidArgument(format!("{what} ID is missing")));
        }
        value
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("{what} ID '{value}' is malformed")))
    }

    /// Get a filter document matching this ID.
    pub fn as_doc(&self) -> Document {
        doc! { "_id": self.0 }
    }
}

impl Deref for Id {
    type Target = ObjectId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for Id {
    type Err = mongodb::bson::oid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse::<ObjectId>()?))
    }
}

impl From<ObjectId> for Id {
    fn from(id: ObjectId) -> Self {
        Self(id)
    }
}

impl From<Id> for Bson {
    fn from(id: Id) -> Self {
        Bson::ObjectId(id.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// The current time, offset into the future by `offset`.
pub fn datetime_after(offset: std::time::Duration) -> DateTime {
    let offset = i64::try_from(offset.as_millis()).unwrap_or(i64::MAX);
    DateTime::from_millis(DateTime::now().timestamp_millis().saturating_add(offset))
}
