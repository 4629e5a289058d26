//! Redemption keys: the credential model and its store.

pub mod code;
pub mod store;

use crate::registry::UserId;
use crate::KeywardenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A redemption credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Opaque, unguessable code the user presents.
    pub code: String,

    /// When the key was issued.
    pub created_at: DateTime<Utc>,

    /// When the key stops being redeemable (`None` = never).
    pub expires_at: Option<DateTime<Utc>>,

    /// Total successful redemptions allowed.
    pub max_uses: u32,

    /// Successful redemptions so far. Never exceeds `max_uses`.
    pub uses_consumed: u32,

    /// Failed tries against this key tolerated before it is retired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Failed tries recorded against this key.
    #[serde(default)]
    pub attempts_recorded: u32,

    /// Admin or owner who issued the key.
    pub issued_by: UserId,

    /// Users who already consumed a use of this key.
    #[serde(default)]
    pub redeemed_by: BTreeSet<UserId>,
}

impl Key {
    /// Whether the key is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Redemptions left before the key is exhausted.
    pub fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.uses_consumed)
    }

    fn attempts_depleted(&self) -> bool {
        self.max_attempts
            .is_some_and(|max| self.attempts_recorded >= max)
    }
}

/// Parameters for issuing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    /// Lifetime from issuance. `None` issues a key that never expires.
    pub ttl: Option<chrono::Duration>,

    /// Successful redemptions allowed. Must be positive.
    pub max_uses: u32,

    /// Optional key-scoped budget of failed tries.
    pub max_attempts: Option<u32>,
}

impl KeySpec {
    /// Single-use key expiring after `ttl`.
    pub fn single_use(ttl: chrono::Duration) -> Self {
        Self {
            ttl: Some(ttl),
            max_uses: 1,
            max_attempts: None,
        }
    }

    /// Check issuance parameters.
    pub fn validate(&self) -> Result<(), KeywardenError> {
        if self.ttl.is_some_and(|ttl| ttl <= chrono::Duration::zero()) {
            return Err(KeywardenError::Validation(
                "ttl must be positive".to_string(),
            ));
        }
        if self.max_uses == 0 {
            return Err(KeywardenError::Validation(
                "max_uses must be positive".to_string(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(KeywardenError::Validation(
                "max_attempts must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal state of a retired key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retirement {
    /// All uses (or the attempt budget) consumed.
    Exhausted,
    /// Passed its expiry time.
    Expired,
    /// Retired early by an administrator.
    Revoked,
}

/// Why a redemption was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No key with this code was ever issued.
    NotFound,
    /// The key expired.
    Expired,
    /// The key has no uses (or attempts) left.
    Exhausted,
    /// The key was revoked.
    Revoked,
    /// The caller already redeemed this key.
    AlreadyRedeemed,
}

impl From<Retirement> for RejectReason {
    fn from(retirement: Retirement) -> Self {
        match retirement {
            Retirement::Exhausted => RejectReason::Exhausted,
            Retirement::Expired => RejectReason::Expired,
            Retirement::Revoked => RejectReason::Revoked,
        }
    }
}
