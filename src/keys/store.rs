//! In-memory key store with atomic consumption.
//!
//! All state lives behind one lock. `consume` validates and increments in a
//! single write-lock section, so concurrent redemptions of the same code can
//! never push `uses_consumed` past `max_uses`.

use crate::keys::code::generate_code;
use crate::keys::{Key, KeySpec, RejectReason, Retirement};
use crate::registry::UserId;
use crate::KeywardenError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Fresh codes tried before issuance gives up on collisions.
const MAX_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Default)]
struct KeyTable {
    live: HashMap<String, Key>,
    retired: HashMap<String, Retirement>,
}

impl KeyTable {
    fn is_taken(&self, code: &str) -> bool {
        self.live.contains_key(code) || self.retired.contains_key(code)
    }

    fn retire(&mut self, code: &str, reason: Retirement) {
        self.live.remove(code);
        self.retired.insert(code.to_string(), reason);
    }
}

/// Owner of all issued keys and their consumption state.
#[derive(Debug, Default)]
pub struct KeyStore {
    inner: RwLock<KeyTable>,
}

impl KeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new key with a random code.
    ///
    /// # Errors
    /// * `Validation` - Non-positive TTL, uses or attempts, or no free code
    ///   could be generated
    pub fn issue(
        &self,
        spec: KeySpec,
        issuer: UserId,
        now: DateTime<Utc>,
    ) -> Result<Key, KeywardenError> {
        self.issue_with(spec, issuer, now, generate_code)
    }

    pub(crate) fn issue_with(
        &self,
        spec: KeySpec,
        issuer: UserId,
        now: DateTime<Utc>,
        mut next_code: impl FnMut() -> String,
    ) -> Result<Key, KeywardenError> {
        spec.validate()?;

        let expires_at = match spec.ttl {
            Some(ttl) => Some(now.checked_add_signed(ttl).ok_or_else(|| {
                KeywardenError::Validation("ttl out of range".to_string())
            })?),
            None => None,
        };

        let mut table = self.inner.write();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = next_code();
            if table.is_taken(&code) {
                continue;
            }

            let key = Key {
                code: code.clone(),
                created_at: now,
                expires_at,
                max_uses: spec.max_uses,
                uses_consumed: 0,
                max_attempts: spec.max_attempts,
                attempts_recorded: 0,
                issued_by: issuer,
                redeemed_by: BTreeSet::new(),
            };
            table.live.insert(code, key.clone());
            return Ok(key);
        }

        Err(KeywardenError::Validation(
            "could not generate a unique key code".to_string(),
        ))
    }

    /// Read-only lookup of a live key.
    pub fn peek(&self, code: &str) -> Option<Key> {
        self.inner.read().live.get(code).cloned()
    }

    /// Terminal state of a retired code, if it was retired.
    pub fn retirement(&self, code: &str) -> Option<Retirement> {
        self.inner.read().retired.get(code).copied()
    }

    /// Validate and consume one use of `code` for `user`.
    ///
    /// Returns the key as it stands after this use. The key is retired when
    /// the use exhausts it, when it is found expired, or when a failed try
    /// depletes its attempt budget.
    pub fn consume(
        &self,
        code: &str,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<Key, RejectReason> {
        let mut table = self.inner.write();

        if let Some(retirement) = table.retired.get(code) {
            return Err((*retirement).into());
        }

        let Some(key) = table.live.get_mut(code) else {
            return Err(RejectReason::NotFound);
        };

        if key.is_expired(now) {
            table.retire(code, Retirement::Expired);
            return Err(RejectReason::Expired);
        }

        if key.redeemed_by.contains(&user) {
            key.attempts_recorded = key.attempts_recorded.saturating_add(1);
            if key.attempts_depleted() {
                table.retire(code, Retirement::Exhausted);
            }
            return Err(RejectReason::AlreadyRedeemed);
        }

        if key.uses_consumed >= key.max_uses {
            table.retire(code, Retirement::Exhausted);
            return Err(RejectReason::Exhausted);
        }

        key.uses_consumed += 1;
        key.redeemed_by.insert(user);
        let consumed = key.clone();

        if consumed.uses_consumed >= consumed.max_uses {
            table.retire(code, Retirement::Exhausted);
        }

        Ok(consumed)
    }

    /// Retire a live key early.
    ///
    /// # Errors
    /// * `NotFound` - No live key with this code
    pub fn revoke(&self, code: &str) -> Result<(), KeywardenError> {
        let mut table = self.inner.write();
        if !table.live.contains_key(code) {
            return Err(KeywardenError::NotFound);
        }
        table.retire(code, Retirement::Revoked);
        Ok(())
    }

    /// Retire every key whose expiry is strictly before `now`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut table = self.inner.write();
        let expired: Vec<String> = table
            .live
            .values()
            .filter(|key| key.expires_at.is_some_and(|t| t < now))
            .map(|key| key.code.clone())
            .collect();

        for code in &expired {
            table.retire(code, Retirement::Expired);
        }
        expired.len()
    }

    /// Snapshot of all live keys, oldest first.
    pub fn list_active(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.inner.read().live.values().cloned().collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.code.cmp(&b.code)));
        keys
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    /// Whether no live keys exist.
    pub fn is_empty(&self) -> bool {
        self.inner.read().live.is_empty()
    }

    /// Copy out live keys and retired codes for persistence.
    pub fn export(&self) -> (Vec<Key>, HashMap<String, Retirement>) {
        let table = self.inner.read();
        (table.live.values().cloned().collect(), table.retired.clone())
    }

    /// Replace the store's contents with persisted state.
    pub fn restore(&self, keys: Vec<Key>, retired: HashMap<String, Retirement>) {
        let mut table = self.inner.write();
        table.live = keys
            .into_iter()
            .filter(|key| !retired.contains_key(&key.code))
            .map(|key| (key.code.clone(), key))
            .collect();
        table.retired = retired;
    }
}
