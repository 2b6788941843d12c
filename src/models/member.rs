//! Member role and related data structures
//!
//! Roles have a natural ordering: Member < Moderator < Admin

use serde::{Deserialize, Serialize};
use std::fmt;

/// Member role in a conversation with natural hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Regular member - can send messages
    Member = 0,
    /// Moderator - can add members, delete and pin messages
    Moderator = 1,
    /// Admin - every permission, manages roles
    Admin = 2,
}

impl MemberRole {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "moderator" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    pub fn is_privileged(&self) -> bool {
        *self == MemberRole::Admin
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

/// Parse from string (for API requests)
impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid role: {}", s))
    }
}
