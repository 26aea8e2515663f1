mod token;
mod user;

pub use token::AuthToken;
pub use user::{Access, AdminAccess, Rights, VoterAccess};

#[cfg(test)]
pub(crate) use token::examples::mint as mint_token;
