//! # Keywarden
//!
//! **Redemption-key access control for chat bots.**
//!
//! Keywarden is the access core a bot's command handlers call into. It
//! issues time-bound, use-limited redemption keys, keeps an allow-list of
//! users whose access may expire, and locks out users who keep guessing
//! keys.
//!
//! ## Features
//!
//! - **Atomic redemption** — validating and consuming a key is one critical
//!   section, so a key with `max_uses = n` is redeemed at most `n` times
//!   regardless of concurrency
//! - **Unguessable codes** — 128 bits from the OS RNG, never reissued
//! - **Brute-force lockout** — 5 failures lock a user out for 15 minutes by default
//! - **Roles** — one immutable owner, admins, members
//! - **Expiry sweeps** — one background task purges expired keys and grants
//! - **Durable snapshots** — optional, digest-checked, written outside locks
//!
//! ## Quickstart
//!
//! ```no_run
//! use keywarden::{AccessConfig, AccessEngine, KeySpec, RedeemOutcome, UserId};
//!
//! fn main() -> Result<(), keywarden::KeywardenError> {
//!     let owner = UserId::new(1001);
//!     let engine = AccessEngine::new(AccessConfig::new(owner))?;
//!
//!     let key = engine.issue_key(owner, KeySpec::single_use(chrono::Duration::hours(1)))?;
//!
//!     match engine.redeem_key(UserId::new(42), &key.code) {
//!         RedeemOutcome::Granted { expires_at } => println!("Welcome! Access until {:?}", expires_at),
//!         RedeemOutcome::Rejected(reason) => println!("Key refused: {:?}", reason),
//!         RedeemOutcome::LockedOut { until } => println!("Too many tries, wait until {}", until),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Scope
//!
//! Keywarden knows nothing about chat protocols. The transport adapter
//! parses commands, tracks conversational state ("awaiting key input"),
//! and renders outcomes into replies. It should never compare user ids
//! itself; ask [`AccessEngine::check_access`] or [`AccessEngine::role_of`].
//!
//! ## Configuration
//!
//! - `owner_id` — the sole owner (required)
//! - `default_session_duration` — access granted per redemption
//! - `max_failed_attempts` / `lockout_duration` — brute-force policy
//! - `sweep_interval` — background sweep period
//! - `snapshot_path` / `snapshot_namespace` — where state is persisted
//!
//! See [`AccessConfig`] for full documentation.

#![deny(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// State
pub mod keys;
pub mod policy;
pub mod registry;

// Persistence
pub mod snapshot;

// Engine (main public API)
pub mod engine;

// Background sweep
pub mod sweeper;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::AccessConfig;
pub use engine::{AccessEngine, AccessStatus, RedeemOutcome, SweepReport};
pub use errors::KeywardenError;
pub use keys::{Key, KeySpec, RejectReason};
pub use registry::{AccessGrant, Role, UserId};
pub use sweeper::{spawn_sweeper, SweeperHandle};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
