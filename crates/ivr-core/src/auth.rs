//! PIN verification

use sha2::{Digest, Sha256};

/// Hex sha-256 of a PIN, the format stored on the staff record.
pub fn pin_hash(pin: &str) -> String {
    let digest = Sha256::digest(pin.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-shape comparison of an entered PIN against the stored hash.
pub fn pin_matches(entered: &str, stored_hash: &str) -> bool {
    pin_hash(entered) == stored_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        let stored = pin_hash("4321");
        assert!(pin_matches("4321", &stored));
        assert!(!pin_matches("1234", &stored));
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let h = pin_hash("0000");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
