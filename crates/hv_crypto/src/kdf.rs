//! PBKDF2-HMAC-SHA256 credential hashing.
//!
//! `hash_secret` — derives the stored hash for a PIN or password.
//! `verify_secret` — recomputes and compares in constant time.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// Fixed KDF parameters. Bump `ITERATIONS` only together with a new
/// `ALGORITHM` tag so previously stored credentials keep verifying.
pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;
pub const ITERATIONS: u32 = 100_000;
pub const ALGORITHM: &str = "pbkdf2-sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Pin,
    Password,
}

impl SecretKind {
    /// Minimum accepted secret length: 4 digits for PINs, 8 characters
    /// for passwords.
    pub fn min_len(self) -> usize {
        match self {
            SecretKind::Pin => 4,
            SecretKind::Password => 8,
        }
    }
}

/// Output of [`hash_secret`]: the derived hash plus the salt that
/// produced it. The hash is a stored verifier, not secret key material.
#[derive(Debug, Clone)]
pub struct HashedSecret {
    pub hash: [u8; HASH_LEN],
    pub salt: [u8; SALT_LEN],
}

impl HashedSecret {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn salt_hex(&self) -> String {
        hex::encode(self.salt)
    }
}

/// Generate a fresh random salt. Salts are never reused across
/// accounts — every new credential gets its own.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the stored hash for `secret`, generating a salt when none is
/// supplied.
pub fn hash_secret(
    kind: SecretKind,
    secret: &str,
    salt: Option<[u8; SALT_LEN]>,
) -> Result<HashedSecret, CredentialError> {
    if secret.chars().count() < kind.min_len() {
        return Err(CredentialError::InvalidInput(format!(
            "secret must be at least {} characters",
            kind.min_len()
        )));
    }
    let salt = salt.unwrap_or_else(generate_salt);
    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, ITERATIONS, &mut hash);
    Ok(HashedSecret { hash, salt })
}

/// Verify `secret` against a stored hash + salt.
///
/// The stored lengths are enforced before anything is derived: PBKDF2
/// output is prefix-consistent, so sizing the candidate to a truncated
/// hash would let the truncation verify. A length mismatch returns
/// `false` immediately — lengths are not secret. The recomputed
/// candidate is compared in constant time so timing does not leak how
/// many leading bytes matched.
pub fn verify_secret(secret: &str, hash: &[u8], salt: &[u8]) -> bool {
    if hash.len() != HASH_LEN || salt.len() != SALT_LEN {
        return false;
    }
    let mut candidate = Zeroizing::new([0u8; HASH_LEN]);
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, ITERATIONS, &mut candidate[..]);
    constant_time_eq(&candidate[..], hash)
}

/// Constant-time byte comparison: bitwise OR of XORs across the full
/// buffers, no early exit on a mismatched byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
