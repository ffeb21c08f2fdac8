use std::io::{self, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use meter_auth::{CipherError, EncryptionKey, SigningKey};
use meter_metrics::MetricSample;

/// Path segments of the single JSON update endpoint, `/update/`.
pub const UPDATE_PATH: [&str; 2] = ["update", ""];

/// Path segments of the batch update endpoint, `/updates/`.
pub const BATCH_UPDATE_PATH: [&str; 2] = ["updates", ""];

/// An error while encoding an [`Upload`].
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The samples could not be serialized.
    #[error("failed to serialize metrics")]
    Json(#[from] serde_json::Error),
    /// Compression failed.
    #[error("failed to compress payload")]
    Compression(#[from] io::Error),
    /// Encryption failed.
    #[error("failed to encrypt payload")]
    Cipher(#[from] CipherError),
}

/// A fully encoded request to the collector.
#[derive(Clone, Debug, PartialEq)]
pub struct Upload {
    /// Unencoded path segments below the collector's base URL.
    pub segments: Vec<String>,
    /// Value of the `Content-Type` header.
    pub content_type: &'static str,
    /// The request body as sent on the wire.
    pub body: Bytes,
    /// `true` if the body is gzip compressed.
    pub compressed: bool,
    /// `true` if the body was encrypted before compression.
    pub ciphered: bool,
    /// Hex digest of the body, sent in the `HashSHA256` header.
    pub signature: Option<String>,
}

/// Encodes metric samples into [`Upload`]s.
///
/// Signing happens last, over the body exactly as it is sent. For batches, the JSON document is
/// encrypted first and then compressed.
#[derive(Debug, Default)]
pub struct PayloadEncoder {
    signing_key: Option<SigningKey>,
    encryption_key: Option<EncryptionKey>,
}

impl PayloadEncoder {
    /// Creates an encoder with optional integrity and encryption keys.
    pub fn new(signing_key: Option<SigningKey>, encryption_key: Option<EncryptionKey>) -> Self {
        Self {
            signing_key,
            encryption_key,
        }
    }

    /// Encodes a sample for the plain endpoint `/update/{kind}/{name}/{value}`.
    pub fn plain(&self, sample: &MetricSample) -> Upload {
        Upload {
            segments: vec![
                "update".to_owned(),
                sample.kind().to_string(),
                sample.name().to_owned(),
                sample.value().to_string(),
            ],
            content_type: "text/plain",
            body: Bytes::new(),
            compressed: false,
            ciphered: false,
            signature: None,
        }
    }

    /// Encodes a sample as a compressed JSON document for [`UPDATE_PATH`].
    pub fn single(&self, sample: &MetricSample) -> Result<Upload, PayloadError> {
        let json = serde_json::to_vec(sample)?;
        Ok(self.finish(UPDATE_PATH, gzip(&json)?, false))
    }

    /// Encodes samples as a compressed JSON array for [`BATCH_UPDATE_PATH`].
    pub fn batch(&self, samples: &[MetricSample]) -> Result<Upload, PayloadError> {
        let mut payload = serde_json::to_vec(samples)?;

        let ciphered = match self.encryption_key {
            Some(ref key) => {
                payload = key.encrypt(&payload)?;
                true
            }
            None => false,
        };

        Ok(self.finish(BATCH_UPDATE_PATH, gzip(&payload)?, ciphered))
    }

    fn finish(&self, path: [&str; 2], body: Vec<u8>, ciphered: bool) -> Upload {
        let signature = self.signing_key.as_ref().map(|key| key.sign(&body));

        Upload {
            segments: path.iter().map(|s| (*s).to_owned()).collect(),
            content_type: "application/json",
            body: Bytes::from(body),
            compressed: true,
            ciphered,
            signature,
        }
    }
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
