//! Redemption code generation and fingerprinting.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind each code (128 bits).
pub const CODE_BYTES: usize = 16;

/// Length of a generated code in characters.
pub const CODE_LEN: usize = 22;

/// Generate a fresh redemption code from the operating system RNG.
///
/// The code is URL-safe base64 without padding, so it survives being pasted
/// into chat commands and URLs.
pub fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Short SHA-256 fingerprint of a code for logs.
///
/// Raw codes are bearer credentials and never appear in log output.
pub fn fingerprint(code: &str) -> String {
    let hash = Sha256::digest(code.as_bytes());
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), CODE_LEN);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generated_codes_are_distinct() {
        let codes: HashSet<String> = (0..1000).map(|_| generate_code()).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_fingerprint() {
        let fp1 = fingerprint("code-1");
        let fp2 = fingerprint("code-1");
        let fp3 = fingerprint("code-2");

        assert_eq!(fp1, fp2);
        assert_ne!(fp1, fp3);
        assert_eq!(fp1.len(), 16);
        assert!(!fp1.contains("code"));
    }
}
