use std::fmt;

use sha2::{Digest, Sha256};

/// Raised if a digest header does not match the body.
#[derive(Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum DigestError {
    /// The header is not a hex-encoded SHA-256 digest.
    #[error("bad digest encoding")]
    BadEncoding,
    /// The digest does not match the body.
    #[error("digest does not match payload")]
    Mismatch,
}

/// The shared secret that agent and collector use to compute payload digests.
#[derive(Clone, Eq, PartialEq)]
pub struct SigningKey {
    secret: Vec<u8>,
}

impl SigningKey {
    /// Creates a key from the shared secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn digest(&self, body: &[u8]) -> [u8; 32] {
        let mut digest = Sha256::new();
        digest.update(body);
        digest.update(&self.secret);
        digest.finalize().into()
    }

    /// Returns the hex-encoded digest of `body` for the [`HASH_HEADER`](crate::HASH_HEADER).
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(self.digest(body))
    }

    /// Checks a hex-encoded digest against `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), DigestError> {
        let expected = hex::decode(signature.trim()).map_err(|_| DigestError::BadEncoding)?;
        if expected.len() != 32 {
            return Err(DigestError::BadEncoding);
        }

        let actual = self.digest(body);
        // Compare without an early exit.
        let diff = actual
            .iter()
            .zip(&expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(DigestError::Mismatch)
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(\"***\")")
    }
}
