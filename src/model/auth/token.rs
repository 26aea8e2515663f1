use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::mongodb::Id;

use super::user::{Access, Rights};

/// An authenticated caller, admitted with at least the rights `A` requires.
///
/// Tokens are issued by the auth service as a bearer JWT carrying the user
/// ID and an admin flag; this service only verifies them.
pub struct AuthToken<A> {
    id: Id,
    rights: Rights,
    phantom: PhantomData<A>,
}

impl<A> AuthToken<A> {
    /// Get the user ID.
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights >= target
    }

    /// May this caller act on the given voter's data?
    pub fn may_act_for(&self, voter: Id) -> bool {
        self.id == voter || self.permits(Rights::Admin)
    }
}

impl<A: Access> AuthToken<A> {
    /// Verify a bearer token.
    pub fn from_bearer(token: &str, config: &Config) -> Result<Self, Error> {
        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )?
        .claims;
        let id = Id::parse_arg(&claims.id, "Token user")
            .map_err(|e| Error::Unauthorized(e.to_string()))?;

        let rights = if claims.is_admin || config.is_admin(id) {
            Rights::Admin
        } else {
            Rights::Voter
        };
        let token = Self {
            id,
            rights,
            phantom: PhantomData,
        };
        if !token.permits(A::RIGHTS) {
            return Err(Error::Forbidden(format!(
                "{} rights required, user {id} has {rights} rights",
                A::RIGHTS
            )));
        }
        Ok(token)
    }
}

/// Token claims, as minted by the auth service.
#[derive(Serialize, Deserialize)]
struct Claims {
    id: String,
    #[serde(rename = "isAdmin", default)]
    is_admin: bool,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, A> FromRequest<'r> for AuthToken<A>
where
    A: Access + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the `Authorization` header and verify that it
    /// has sufficient rights.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Error((
                Status::InternalServerError,
                Error::Internal("config is not loaded".to_string()),
            ));
        };

        let bearer = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        let Some(bearer) = bearer else {
            return Outcome::Error((
                Status::Unauthorized,
                Error::Unauthorized("missing bearer token".to_string()),
            ));
        };

        match Self::from_bearer(bearer.trim(), config) {
            Ok(token) => Outcome::Success(token),
            Err(e) => Outcome::Error((e.status(), e)),
        }
    }
}

/// Token minting, which belongs to the auth service; tests stand in for it.
#[cfg(test)]
pub(crate) mod examples {
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    /// Mint a bearer token for the given user.
    pub fn mint(id: Id, is_admin: bool, config: &Config) -> String {
        mint_claims(id.to_string(), is_admin, Utc::now() + Duration::hours(1), config)
    }

    pub fn mint_claims(
        id: String,
        is_admin: bool,
        expire_at: DateTime<Utc>,
        config: &Config,
    ) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                id,
                is_admin,
                expire_at,
            },
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap()
    }
}
