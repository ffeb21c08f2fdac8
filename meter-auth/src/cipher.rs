use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Bytes of OAEP padding overhead for SHA-256: two digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// Rejects moduli that leave no room for a message after OAEP padding.
fn check_size(key: &impl PublicKeyParts) -> Result<(), KeyLoadError> {
    if key.size() <= OAEP_OVERHEAD {
        return Err(KeyLoadError::BadKey);
    }
    Ok(())
}

/// Raised if a key could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    /// The key file could not be read.
    #[error("could not read key file {}", .path.display())]
    Io {
        /// Location of the key.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// The file is not a PEM encoded RSA key, or the key is too small for OAEP.
    #[error("bad key data")]
    BadKey,
}

/// Raised if a payload could not be encrypted or decrypted.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The ciphertext is not a multiple of the key size.
    #[error("ciphertext has invalid length {0}")]
    BadLength(usize),
    /// RSA encryption or decryption failed.
    #[error("rsa operation failed")]
    Rsa(#[from] rsa::Error),
}

fn read_pem(path: &Path) -> Result<String, KeyLoadError> {
    fs::read_to_string(path).map_err(|source| KeyLoadError::Io {
        path: path.to_owned(),
        source,
    })
}

/// The collector's public key, used by the agent to encrypt payloads.
#[derive(Clone, PartialEq)]
pub struct EncryptionKey {
    inner: RsaPublicKey,
}

impl EncryptionKey {
    /// Reads a PEM encoded public key (SPKI or PKCS#1) from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyLoadError> {
        read_pem(path.as_ref())?.parse()
    }

    /// Encrypts the payload with RSA-OAEP (SHA-256).
    ///
    /// The payload is split into blocks of the maximum OAEP message size. The result is the
    /// concatenation of all encrypted blocks, each exactly as long as the key modulus.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block_size = self.inner.size() - OAEP_OVERHEAD;
        let blocks = plaintext.len().div_ceil(block_size).max(1);
        let mut ciphertext = Vec::with_capacity(blocks * self.inner.size());

        // An empty payload still produces one block.
        let mut chunks: Vec<&[u8]> = plaintext.chunks(block_size).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for chunk in chunks {
            let block = self
                .inner
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), chunk)?;
            ciphertext.extend_from_slice(&block);
        }

        Ok(ciphertext)
    }
}

impl TryFrom<RsaPublicKey> for EncryptionKey {
    type Error = KeyLoadError;

    fn try_from(inner: RsaPublicKey) -> Result<Self, Self::Error> {
        check_size(&inner)?;
        Ok(Self { inner })
    }
}

impl FromStr for EncryptionKey {
    type Err = KeyLoadError;

    fn from_str(pem: &str) -> Result<Self, Self::Err> {
        let inner = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|_| KeyLoadError::BadKey)?;
        Self::try_from(inner)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({} bits)", self.inner.size() * 8)
    }
}

/// The collector's private key, used to decrypt payloads.
#[derive(Clone)]
pub struct DecryptionKey {
    inner: RsaPrivateKey,
}

impl DecryptionKey {
    /// Reads a PEM encoded private key (PKCS#8 or PKCS#1) from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyLoadError> {
        read_pem(path.as_ref())?.parse()
    }

    /// Returns the matching public key.
    pub fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey {
            inner: self.inner.to_public_key(),
        }
    }

    /// Decrypts a payload produced by [`EncryptionKey::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let block_size = self.inner.size();
        if ciphertext.is_empty() || ciphertext.len() % block_size != 0 {
            return Err(CipherError::BadLength(ciphertext.len()));
        }

        let mut plaintext = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(block_size) {
            plaintext.extend(self.inner.decrypt(Oaep::new::<Sha256>(), block)?);
        }

        Ok(plaintext)
    }
}

impl TryFrom<RsaPrivateKey> for DecryptionKey {
    type Error = KeyLoadError;

    fn try_from(inner: RsaPrivateKey) -> Result<Self, Self::Error> {
        check_size(&inner)?;
        Ok(Self { inner })
    }
}

impl FromStr for DecryptionKey {
    type Err = KeyLoadError;

    fn from_str(pem: &str) -> Result<Self, Self::Err> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|_| KeyLoadError::BadKey)?;
        Self::try_from(inner)
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecryptionKey({} bits)", self.inner.size() * 8)
    }
}

#[cfg(test)]
mod tests {
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    use super::*;

    fn generate() -> DecryptionKey {
        DecryptionKey::try_from(RsaPrivateKey::new(&mut OsRng, 1024).unwrap()).unwrap()
    }

    #[test]
    fn test_roundtrip_single_block() {
        let private = generate();
        let public = private.encryption_key();

        let ciphertext = public.encrypt(b"[]").unwrap();
        assert_eq!(ciphertext.len(), 128);
        assert_eq!(private.decrypt(&ciphertext).unwrap(), b"[]");
    }

    #[test]
    fn test_roundtrip_multiple_blocks() {
        let private = generate();
        let public = private.encryption_key();

        let payload = br#"{"id":"HeapAlloc","type":"gauge","value":1934528.0}"#.repeat(10);
        let ciphertext = public.encrypt(&payload).unwrap();

        assert_eq!(ciphertext.len() % 128, 0);
        assert!(ciphertext.len() > 128);
        assert_eq!(private.decrypt(&ciphertext).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let private = generate();
        let ciphertext = private.encryption_key().encrypt(b"").unwrap();
        assert_eq!(private.decrypt(&ciphertext).unwrap(), b"");
    }

    #[test]
    fn test_decrypt_rejects_truncated() {
        let private = generate();
        let ciphertext = private.encryption_key().encrypt(b"payload").unwrap();

        assert!(matches!(
            private.decrypt(&ciphertext[..100]),
            Err(CipherError::BadLength(100))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = generate()
            .encryption_key()
            .encrypt(b"secret")
            .unwrap();

        let other = generate();
        assert!(matches!(other.decrypt(&ciphertext), Err(CipherError::Rsa(_))));
    }

    #[test]
    fn test_load_from_pem_files() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");

        fs::write(
            &private_path,
            private.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes(),
        )
        .unwrap();
        fs::write(
            &public_path,
            private
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap(),
        )
        .unwrap();

        let encryption = EncryptionKey::from_file(&public_path).unwrap();
        let decryption = DecryptionKey::from_file(&private_path).unwrap();
        let ciphertext = encryption.encrypt(b"hello").unwrap();
        assert_eq!(decryption.decrypt(&ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            "not a key".parse::<EncryptionKey>(),
            Err(KeyLoadError::BadKey)
        ));
        assert!(matches!(
            DecryptionKey::from_file("/nonexistent/key.pem"),
            Err(KeyLoadError::Io { .. })
        ));
    }

    #[test]
    fn test_key_too_small() {
        // 512 bits leave no room for SHA-256 OAEP padding.
        let small = RsaPrivateKey::new(&mut OsRng, 512).unwrap();
        let pem = small.to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_pem = small.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();

        assert!(matches!(
            pem.parse::<DecryptionKey>(),
            Err(KeyLoadError::BadKey)
        ));
        assert!(matches!(
            public_pem.parse::<EncryptionKey>(),
            Err(KeyLoadError::BadKey)
        ));
        assert!(matches!(
            DecryptionKey::try_from(small),
            Err(KeyLoadError::BadKey)
        ));
    }
}
