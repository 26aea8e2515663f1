use std::fmt::Display;

/// A kind of caller that a route admits.
pub trait Access {
    /// The rights a caller needs.
    const RIGHTS: Rights;
}

/// Admits any authenticated voter, admins included.
pub struct VoterAccess;

/// Admits admins only.
pub struct AdminAccess;

impl Access for VoterAccess {
    const RIGHTS: Rights = Rights::Voter;
}

impl Access for AdminAccess {
    const RIGHTS: Rights = Rights::Admin;
}

/// Different privilege levels. Each level includes the ones below it.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Rights {
    Voter,
    Admin,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}
