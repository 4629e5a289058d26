//! SHA-256 digest over snapshot bodies.
//!
//! The digest is unkeyed, so it detects corruption (a torn write, a bad
//! disk, a careless hand edit) but anyone able to rewrite the file can
//! recompute it.

use crate::KeywardenError;
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

/// Compute SHA-256 digest of body and return base64-encoded result.
pub fn sha256_b64(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    STANDARD.encode(hash)
}

/// Format digest as `sha-256=<base64>`.
pub fn format_digest(body: &[u8]) -> String {
    format!("sha-256={}", sha256_b64(body))
}

/// Parse a digest string and extract the base64 value.
///
/// Expected format: `sha-256=<base64>`
pub fn parse_digest(digest: &str) -> Option<&str> {
    digest.trim().strip_prefix("sha-256=")
}

/// Compare a body against its recorded digest.
///
/// # Returns
/// * `Ok(())` - Digest matches
/// * `Err(SnapshotCorrupt)` - Digest is malformed or does not match
pub fn verify_digest(body: &[u8], digest: &str) -> Result<(), KeywardenError> {
    let Some(expected_b64) = parse_digest(digest) else {
        return Err(KeywardenError::SnapshotCorrupt(
            "malformed digest".to_string(),
        ));
    };

    if sha256_b64(body) != expected_b64 {
        return Err(KeywardenError::SnapshotCorrupt(
            "digest mismatch".to_string(),
        ));
    }

    Ok(())
}
