//! Snapshot record format.
//!
//! A snapshot stores the durable part of the engine's state:
//! - Live keys and retired codes (so retired codes are never reissued)
//! - User records with roles and grants
//!
//! The body is kept as the exact JSON string that was hashed, next to its
//! `sha-256=` digest. On load the digest is recomputed before the body is
//! parsed. Lockout state is deliberately absent: it is short-lived.

use crate::keys::{Key, Retirement};
use crate::registry::{UserId, UserRecord};
use crate::snapshot::digest::{format_digest, verify_digest};
use crate::KeywardenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Engine state captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Layout version.
    pub version: u32,

    /// When the state was captured.
    pub saved_at: DateTime<Utc>,

    /// Owner at capture time.
    pub owner: UserId,

    /// Live keys.
    pub keys: Vec<Key>,

    /// Retired codes and why they were retired.
    pub retired: BTreeMap<String, Retirement>,

    /// All known users.
    pub users: Vec<UserRecord>,
}

/// Authenticated on-disk record: a JSON body and its digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Digest of `body` (`sha-256=<base64>`).
    pub digest: String,

    /// Serialized [`SnapshotState`].
    pub body: String,
}

impl SnapshotRecord {
    /// Seal a state into a record.
    pub fn seal(state: &SnapshotState) -> Result<Self, KeywardenError> {
        let body = serde_json::to_string(state).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to serialize snapshot: {}", e))
        })?;
        Ok(Self {
            digest: format_digest(body.as_bytes()),
            body,
        })
    }

    /// Verify the digest and parse the state.
    ///
    /// # Errors
    /// * `SnapshotCorrupt` - Digest mismatch, unparsable body or
    ///   unsupported version
    pub fn open(&self) -> Result<SnapshotState, KeywardenError> {
        verify_digest(self.body.as_bytes(), &self.digest)?;

        let state: SnapshotState = serde_json::from_str(&self.body).map_err(|e| {
            KeywardenError::SnapshotCorrupt(format!("Failed to parse snapshot: {}", e))
        })?;

        if state.version != SNAPSHOT_VERSION {
            return Err(KeywardenError::SnapshotCorrupt(format!(
                "Unsupported snapshot version {}",
                state.version
            )));
        }
        Ok(state)
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> Result<String, KeywardenError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to serialize record: {}", e))
        })
    }

    /// Deserialize a record from JSON.
    pub fn from_json(json: &str) -> Result<Self, KeywardenError> {
        serde_json::from_str(json).map_err(|e| {
            KeywardenError::SnapshotIO(format!("Failed to deserialize record: {}", e))
        })
    }
}
