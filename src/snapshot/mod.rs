//! Durable snapshots of engine state.

pub mod digest;
pub mod file;
pub mod format;
