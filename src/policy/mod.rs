//! Access policy: role checks and brute-force lockout.

pub mod lockout;
pub mod roles;
