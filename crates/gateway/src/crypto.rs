use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Raw refresh credentials are 256 bits of OS randomness.
pub const REFRESH_TOKEN_BYTES: usize = 32;

pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cheap structural check run before any store lookup.
pub fn is_well_formed_refresh_token(raw: &str) -> bool {
    match URL_SAFE_NO_PAD.decode(raw) {
        Ok(bytes) => bytes.len() == REFRESH_TOKEN_BYTES,
        Err(_) => false,
    }
}

/// 128-bit hex token used to keep object keys unique per upload.
pub fn generate_unique_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Only this digest of a refresh credential is ever persisted.
pub fn hash_token(raw: &str) -> String {
    sha256_hex(raw.as_bytes())
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = match Hmac::<Sha256>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Compares in time dependent only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_unique_and_well_formed() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert!(is_well_formed_refresh_token(&a));
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn malformed_refresh_tokens_are_rejected() {
        assert!(!is_well_formed_refresh_token(""));
        assert!(!is_well_formed_refresh_token("not a token"));
        assert!(!is_well_formed_refresh_token(&URL_SAFE_NO_PAD.encode([1u8; 16])));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let h1 = hash_token("abc");
        assert_eq!(h1, hash_token("abc"));
        assert_ne!(h1, hash_token("abd"));
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hmac_matches_rfc4231_case_two() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
