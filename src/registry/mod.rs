//! Users, roles and access grants.

pub mod users;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable external identifier of a user (e.g. a chat account id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Wrap a raw account id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw account id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = crate::KeywardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| crate::KeywardenError::Validation(format!("invalid user id {:?}: {}", s, e)))
    }
}

/// Role of a user. Exactly one owner exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Top-level administrator seeded at bootstrap. Immutable.
    Owner,
    /// May issue keys and grant or revoke access.
    Admin,
    /// Regular user.
    #[default]
    Member,
}

impl Role {
    /// Owner and admins are always authorized and may administer access.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

/// A user's explicitly granted access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "until", rename_all = "snake_case")]
pub enum AccessGrant {
    /// No granted access.
    #[default]
    None,
    /// Access that never lapses.
    Permanent,
    /// Access that lapses at the given instant.
    Until(DateTime<Utc>),
}

impl AccessGrant {
    /// Build a grant from an optional expiry (`None` = permanent).
    pub fn from_expiry(expiry: Option<DateTime<Utc>>) -> Self {
        match expiry {
            Some(until) => AccessGrant::Until(until),
            None => AccessGrant::Permanent,
        }
    }

    /// Whether this grant authorizes at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self {
            AccessGrant::None => false,
            AccessGrant::Permanent => true,
            AccessGrant::Until(until) => now < *until,
        }
    }

    /// Expiry instant, if the grant is time-bound.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AccessGrant::Until(until) => Some(*until),
            _ => None,
        }
    }
}

/// A principal known to the system.
///
/// Records are never deleted; revocation only clears `access`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// External identifier.
    pub id: UserId,
    /// Current role.
    #[serde(default)]
    pub role: Role,
    /// Explicitly granted access.
    #[serde(default)]
    pub access: AccessGrant,
    /// First contact with the system.
    pub first_seen: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh, unauthorized member.
    pub fn new(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::Member,
            access: AccessGrant::None,
            first_seen: now,
        }
    }

    /// Role-based or grant-based authorization at `now`.
    pub fn is_authorized(&self, now: DateTime<Utc>) -> bool {
        self.role.is_privileged() || self.access.is_active(now)
    }
}
