//! hv_crypto — credential hashing primitives for Haven
//!
//! # Design principles
//! - NO custom crypto; the KDF comes from an audited RustCrypto crate.
//! - Derived key material is zeroized on drop.
//! - No device or storage dependencies — everything here is pure,
//!   unit-testable in isolation, and the KDF can be swapped for a
//!   stronger one without touching callers.
//!
//! # Module layout
//! - `kdf`      — PBKDF2-HMAC-SHA256 hashing + constant-time verification
//! - `strength` — PIN / password strength heuristics
//! - `error`    — unified error type

pub mod error;
pub mod kdf;
pub mod strength;

pub use error::CredentialError;
pub use kdf::{generate_salt, hash_secret, verify_secret, HashedSecret, SecretKind};
pub use strength::{assess_password_strength, assess_pin_strength, Strength, StrengthReport};
