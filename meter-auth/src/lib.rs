//! Integrity and confidentiality of metric payloads.
//!
//! - [`SigningKey`] computes the `HashSHA256` header: `hex(sha256(body || key))`. This is tamper
//!   evidence in transit between parties that share the key, not a MAC against key holders.
//! - [`EncryptionKey`] and [`DecryptionKey`] wrap RSA-OAEP with SHA-256. Payloads larger than a
//!   single OAEP block are split into blocks that are encrypted independently and concatenated.
#![warn(missing_docs)]

mod cipher;
mod digest;

pub use self::cipher::*;
pub use self::digest::*;

/// Header carrying the hex-encoded integrity digest of the request body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Header signaling that the request body is RSA encrypted.
pub const CIPHERED_HEADER: &str = "Ciphered";

/// Header carrying the agent's own address, checked against the collector's trusted subnet.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
