//! Keywarden configuration.

use crate::registry::UserId;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Default lifetime of a freshly issued key (1 hour).
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(60 * 60);

/// Default access duration granted per successful redemption (1 hour).
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(60 * 60);

/// Failures tolerated before a user is locked out.
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long a lockout lasts (15 minutes).
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the access-control engine.
///
/// Consumed once at process start. Only `owner_id` has no default; use
/// [`AccessConfig::new`] and override the remaining fields as needed.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// The sole owner, seeded at bootstrap. Cannot be demoted.
    pub owner_id: UserId,

    /// Lifetime of keys issued without an explicit TTL.
    /// `None` issues keys that never expire.
    pub default_key_ttl: Option<Duration>,

    /// Use count of keys issued without an explicit limit.
    pub default_max_uses: u32,

    /// Access granted per successful redemption.
    /// `None` makes redemptions grant permanent access.
    pub default_session_duration: Option<Duration>,

    /// Failed redemptions before the user is locked out.
    pub max_failed_attempts: u32,

    /// Lockout length once `max_failed_attempts` is reached.
    pub lockout_duration: Duration,

    /// Interval of the background expiry sweep.
    pub sweep_interval: Duration,

    /// Let admins promote members to admin (and demote other admins).
    /// When false only the owner changes roles.
    pub allow_admin_promotion: bool,

    /// Where to persist state snapshots.
    pub snapshot_path: Option<PathBuf>,

    /// Persist snapshots under `dirs::data_dir()/<namespace>/state.json`
    /// instead of an explicit path. With neither set, state stays in memory.
    pub snapshot_namespace: Option<String>,
}

impl AccessConfig {
    /// Create a configuration with defaults for everything but the owner.
    pub fn new(owner_id: UserId) -> Self {
        Self {
            owner_id,
            default_key_ttl: Some(DEFAULT_KEY_TTL),
            default_max_uses: 1,
            default_session_duration: Some(DEFAULT_SESSION_DURATION),
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lockout_duration: DEFAULT_LOCKOUT_DURATION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            allow_admin_promotion: false,
            snapshot_path: None,
            snapshot_namespace: None,
        }
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), crate::KeywardenError> {
        if self.owner_id.get() == 0 {
            return Err(crate::KeywardenError::ConfigError(
                "owner_id must be set".to_string(),
            ));
        }
        if self.default_max_uses == 0 {
            return Err(crate::KeywardenError::ConfigError(
                "default_max_uses must be positive".to_string(),
            ));
        }
        if self.default_key_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(crate::KeywardenError::ConfigError(
                "default_key_ttl must be positive".to_string(),
            ));
        }
        if self.default_session_duration.is_some_and(|d| d.is_zero()) {
            return Err(crate::KeywardenError::ConfigError(
                "default_session_duration must be positive".to_string(),
            ));
        }
        if self.max_failed_attempts == 0 {
            return Err(crate::KeywardenError::ConfigError(
                "max_failed_attempts must be positive".to_string(),
            ));
        }
        if self.lockout_duration.is_zero() {
            return Err(crate::KeywardenError::ConfigError(
                "lockout_duration must be positive".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(crate::KeywardenError::ConfigError(
                "sweep_interval must be positive".to_string(),
            ));
        }
        if self.snapshot_path.is_some() && self.snapshot_namespace.is_some() {
            return Err(crate::KeywardenError::ConfigError(
                "set snapshot_path or snapshot_namespace, not both".to_string(),
            ));
        }
        if let Some(namespace) = &self.snapshot_namespace {
            let plain = !namespace.is_empty()
                && namespace != "."
                && namespace != ".."
                && !namespace.contains(['/', '\\']);
            if !plain {
                return Err(crate::KeywardenError::ConfigError(format!(
                    "snapshot_namespace must be a single directory name, got {:?}",
                    namespace
                )));
            }
        }
        Ok(())
    }
}

/// Convert a configured duration into a chrono offset.
///
/// Durations beyond chrono's range saturate to the maximum offset.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `now + duration`, saturating at the latest representable instant.
pub(crate) fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
