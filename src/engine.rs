//! Access engine - the main public API for Keywarden.
//!
//! The `AccessEngine` is the only mutator of the key store, the attempt
//! limiter and the user registry:
//! - Key redemption with lockout enforcement
//! - Role-gated key issuance, grants and revocations
//! - Authorization queries
//! - Expiry sweeps and write-behind snapshots

use crate::clock::{Clock, SystemClock};
use crate::config::{deadline, to_chrono, AccessConfig};
use crate::keys::code::fingerprint;
use crate::keys::store::KeyStore;
use crate::keys::{Key, KeySpec, RejectReason};
use crate::policy::lockout::{AttemptLimiter, FailureOutcome};
use crate::policy::roles::check_privileged;
use crate::registry::users::AccessRegistry;
use crate::registry::{AccessGrant, Role, UserId, UserRecord};
use crate::snapshot::file::SnapshotFile;
use crate::snapshot::format::{SnapshotRecord, SnapshotState, SNAPSHOT_VERSION};
use crate::KeywardenError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Access granted until `expires_at` (`None` = permanent).
    Granted {
        /// End of the granted access.
        expires_at: Option<DateTime<Utc>>,
    },
    /// The key was refused.
    Rejected(RejectReason),
    /// The user is locked out and the key was not looked at.
    LockedOut {
        /// End of the lockout.
        until: DateTime<Utc>,
    },
}

impl RedeemOutcome {
    /// Whether access was granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, RedeemOutcome::Granted { .. })
    }
}

/// Entries purged by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired keys retired.
    pub keys: usize,
    /// Lapsed grants cleared.
    pub grants: usize,
    /// Stale lockout entries dropped.
    pub lockouts: usize,
}

impl SweepReport {
    /// Total entries purged.
    pub fn total(&self) -> usize {
        self.keys + self.grants + self.lockouts
    }
}

/// A user's access as seen by a status command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStatus {
    /// The user.
    pub user: UserId,
    /// Current role.
    pub role: Role,
    /// Explicitly granted access.
    pub access: AccessGrant,
    /// Whether the user is authorized right now.
    pub authorized: bool,
    /// End of an active redemption lockout.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Main access-control engine.
///
/// Create one instance per process, share it as `Arc<AccessEngine>`, and
/// route every command through it.
pub struct AccessEngine {
    config: AccessConfig,
    clock: Arc<dyn Clock>,
    keys: KeyStore,
    limiter: AttemptLimiter,
    registry: AccessRegistry,
    snapshot: Option<SnapshotFile>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
}

/// Resolve the configured snapshot location, if any.
fn open_snapshot(config: &AccessConfig) -> Result<Option<SnapshotFile>, KeywardenError> {
    if let Some(path) = &config.snapshot_path {
        return SnapshotFile::new(path).map(Some);
    }
    config
        .snapshot_namespace
        .as_deref()
        .map(SnapshotFile::with_namespace)
        .transpose()
}

impl AccessEngine {
    /// Create an engine with the given configuration.
    ///
    /// Uses the system clock for time operations.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Configuration validation fails
    /// - A configured snapshot cannot be read, or is corrupt
    pub fn new(config: AccessConfig) -> Result<Self, KeywardenError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine with a custom clock.
    pub fn with_clock(
        config: AccessConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeywardenError> {
        config.validate()?;

        let now = clock.now_utc();
        let registry = AccessRegistry::new(config.owner_id, now);
        let snapshot = open_snapshot(&config)?;

        let engine = Self {
            config,
            clock,
            keys: KeyStore::new(),
            limiter: AttemptLimiter::new(),
            registry,
            snapshot,
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        };
        engine.load_snapshot()?;

        info!(owner = %engine.config.owner_id, "Access engine ready");
        Ok(engine)
    }

    fn load_snapshot(&self) -> Result<(), KeywardenError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let Some(record) = file.load()? else {
            return Ok(());
        };

        let state = record.open().map_err(|e| {
            warn!(path = %file.path().display(), error = %e, "Rejecting snapshot");
            e
        })?;

        self.keys
            .restore(state.keys, state.retired.into_iter().collect());
        self.registry.restore(state.users, self.now());

        info!(
            path = %file.path().display(),
            keys = self.keys.len(),
            users = self.registry.len(),
            "Restored snapshot"
        );
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn require_privileged(&self, requester: UserId) -> Result<(), KeywardenError> {
        check_privileged(self.registry.role_of(requester)).map_err(|e| {
            debug!(user = %requester, "Privileged operation refused");
            e
        })
    }

    fn session_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .default_session_duration
            .map(|duration| deadline(now, duration))
    }

    /// Redeem a key for `user`.
    ///
    /// Locked-out users are refused before the key is looked up. Each
    /// attempt reserves a slot of the user's failure budget first, so
    /// concurrent guesses cannot outrun the lockout. Any other refusal counts
    /// as a failed attempt; a success clears the user's failures and grants
    /// the configured session.
    pub fn redeem_key(&self, user: UserId, code: &str) -> RedeemOutcome {
        let now = self.now();
        self.registry.touch(user, now);

        let attempt = match self
            .limiter
            .begin(user, now, self.config.max_failed_attempts)
        {
            Ok(attempt) => attempt,
            Err(until) => {
                debug!(user = %user, until = %until, "Redemption refused, user locked out");
                return RedeemOutcome::LockedOut { until };
            }
        };

        let code = code.trim();
        match self.keys.consume(code, user, now) {
            Ok(key) => {
                attempt.succeed();
                let expires_at = self.session_expiry(now);
                self.registry.grant(user, expires_at, now);
                self.mark_dirty();

                info!(
                    user = %user,
                    key = %fingerprint(code),
                    uses = key.uses_consumed,
                    max_uses = key.max_uses,
                    expires_at = ?expires_at,
                    "Key redeemed"
                );
                RedeemOutcome::Granted { expires_at }
            }
            Err(reason) => {
                if reason != RejectReason::NotFound {
                    self.mark_dirty();
                }

                match attempt.fail(
                    now,
                    self.config.max_failed_attempts,
                    self.config.lockout_duration,
                ) {
                    FailureOutcome::Locked { until } => {
                        warn!(user = %user, until = %until, "Too many failed redemptions, locking out");
                    }
                    FailureOutcome::Remaining(remaining) => {
                        debug!(
                            user = %user,
                            key = %fingerprint(code),
                            reason = ?reason,
                            remaining,
                            "Redemption rejected"
                        );
                    }
                }
                RedeemOutcome::Rejected(reason)
            }
        }
    }

    /// Issue a key. Requires owner or admin.
    ///
    /// # Errors
    /// - `Forbidden` - Requester is not privileged
    /// - `Validation` - Invalid key parameters
    pub fn issue_key(&self, requester: UserId, spec: KeySpec) -> Result<Key, KeywardenError> {
        self.require_privileged(requester)?;

        let key = self.keys.issue(spec, requester, self.now())?;
        self.mark_dirty();

        info!(
            issuer = %requester,
            key = %fingerprint(&key.code),
            max_uses = key.max_uses,
            expires_at = ?key.expires_at,
            "Key issued"
        );
        Ok(key)
    }

    /// Issue a key with the configured default TTL and use count.
    pub fn issue_default_key(&self, requester: UserId) -> Result<Key, KeywardenError> {
        self.issue_key(
            requester,
            KeySpec {
                ttl: self.config.default_key_ttl.map(to_chrono),
                max_uses: self.config.default_max_uses,
                max_attempts: None,
            },
        )
    }

    /// Retire a live key early. Requires owner or admin.
    ///
    /// # Errors
    /// - `Forbidden` - Requester is not privileged
    /// - `NotFound` - No live key with this code
    pub fn revoke_key(&self, requester: UserId, code: &str) -> Result<(), KeywardenError> {
        self.require_privileged(requester)?;

        self.keys.revoke(code.trim())?;
        self.mark_dirty();

        info!(admin = %requester, key = %fingerprint(code.trim()), "Key revoked");
        Ok(())
    }

    /// Live keys, oldest first. Requires owner or admin.
    pub fn list_keys(&self, requester: UserId) -> Result<Vec<Key>, KeywardenError> {
        self.require_privileged(requester)?;
        Ok(self.keys.list_active())
    }

    /// Grant `target` access for `duration` (`None` = permanent).
    /// Requires owner or admin. Replaces any earlier grant.
    ///
    /// # Errors
    /// - `Forbidden` - Requester is not privileged
    /// - `Validation` - Zero duration
    pub fn grant_access(
        &self,
        requester: UserId,
        target: UserId,
        duration: Option<Duration>,
    ) -> Result<AccessGrant, KeywardenError> {
        self.require_privileged(requester)?;
        if duration.is_some_and(|d| d.is_zero()) {
            return Err(KeywardenError::Validation(
                "grant duration must be positive".to_string(),
            ));
        }

        let now = self.now();
        let grant = self
            .registry
            .grant(target, duration.map(|d| deadline(now, d)), now);
        self.mark_dirty();

        info!(admin = %requester, user = %target, grant = ?grant, "Access granted");
        Ok(grant)
    }

    /// Revoke `target`'s granted access. Requires owner or admin.
    ///
    /// # Errors
    /// - `Forbidden` - Requester is not privileged
    /// - `NotFound` - Target had no active granted access
    pub fn revoke_access(&self, requester: UserId, target: UserId) -> Result<(), KeywardenError> {
        self.require_privileged(requester)?;

        self.registry.revoke(target, self.now())?;
        self.mark_dirty();

        info!(admin = %requester, user = %target, "Access revoked");
        Ok(())
    }

    /// Lift `target`'s redemption lockout and forget their failures.
    /// Requires owner or admin.
    ///
    /// # Errors
    /// - `Forbidden` - Requester is not privileged
    /// - `NotFound` - Target has no recorded failures
    pub fn clear_lockout(&self, requester: UserId, target: UserId) -> Result<(), KeywardenError> {
        self.require_privileged(requester)?;

        let was_locked = self.limiter.is_locked(target, self.now());
        if !self.limiter.clear(target) {
            return Err(KeywardenError::NotFound);
        }

        info!(admin = %requester, user = %target, was_locked, "Lockout cleared");
        Ok(())
    }

    /// Change `target`'s role.
    ///
    /// # Errors
    /// - `Forbidden` - Requester may not change roles, or is an admin
    ///   targeting themselves
    /// - `InvalidTarget` - Target is the owner, or `role` is owner
    pub fn set_role(
        &self,
        requester: UserId,
        target: UserId,
        role: Role,
    ) -> Result<(), KeywardenError> {
        self.registry.set_role(
            requester,
            target,
            role,
            self.config.allow_admin_promotion,
            self.now(),
        )?;
        self.mark_dirty();

        info!(acting = %requester, user = %target, role = ?role, "Role changed");
        Ok(())
    }

    /// Whether `user` is authorized now. Owner and admins always are.
    pub fn check_access(&self, user: UserId) -> bool {
        self.registry.is_authorized(user, self.now())
    }

    /// Role of `user`; unknown users are members.
    pub fn role_of(&self, user: UserId) -> Role {
        self.registry.role_of(user)
    }

    /// Record first contact with a user.
    pub fn register_user(&self, user: UserId) -> UserRecord {
        let record = self.registry.touch(user, self.now());
        self.mark_dirty();
        record
    }

    /// Full access picture for `user`.
    pub fn access_status(&self, user: UserId) -> AccessStatus {
        let now = self.now();
        let record = self.registry.get(user);
        AccessStatus {
            user,
            role: record.as_ref().map(|r| r.role).unwrap_or_default(),
            access: record.as_ref().map(|r| r.access).unwrap_or_default(),
            authorized: record.as_ref().is_some_and(|r| r.is_authorized(now)),
            locked_until: self.limiter.locked_until(user, now),
        }
    }

    /// Users authorized now, ascending by id.
    pub fn list_authorized(&self) -> Vec<UserId> {
        self.registry.list_authorized(self.now())
    }

    /// Owner and admins, ascending by id.
    pub fn list_admins(&self) -> Vec<UserId> {
        self.registry.list_admins()
    }

    /// Purge expired keys, lapsed grants and stale lockouts.
    pub fn sweep(&self) -> SweepReport {
        let now = self.now();
        let report = SweepReport {
            keys: self.keys.sweep_expired(now),
            grants: self.registry.sweep_expired(now),
            lockouts: self.limiter.sweep(now, self.config.lockout_duration),
        };

        if report.keys + report.grants > 0 {
            self.mark_dirty();
        }
        debug!(
            keys = report.keys,
            grants = report.grants,
            lockouts = report.lockouts,
            "Sweep complete"
        );
        report
    }

    /// Capture the durable state.
    ///
    /// Users are copied before keys. Redemption consumes a key before it
    /// grants access, so a redemption racing this copy is either fully
    /// captured, captured as a consumed key without its grant, or missed.
    /// A restore never hands back a use that was already paid for.
    pub fn snapshot_state(&self) -> SnapshotState {
        let users = self.registry.export();
        let (keys, retired) = self.keys.export();
        SnapshotState {
            version: SNAPSHOT_VERSION,
            saved_at: self.now(),
            owner: self.config.owner_id,
            keys,
            retired: retired.into_iter().collect(),
            users,
        }
    }

    /// Whether state changed since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the snapshot if state changed since the last flush.
    ///
    /// State is copied out under the stores' read locks; serialization and
    /// file I/O happen after those locks are released.
    ///
    /// Returns whether a snapshot was written.
    pub fn flush(&self) -> Result<bool, KeywardenError> {
        let Some(file) = &self.snapshot else {
            return Ok(false);
        };

        let _guard = self.flush_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let state = self.snapshot_state();
        let result = SnapshotRecord::seal(&state).and_then(|record| file.save(&record));
        if let Err(e) = result {
            self.mark_dirty();
            return Err(e);
        }

        debug!(path = %file.path().display(), "Snapshot written");
        Ok(true)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }
}
