//! RSA-PSS request signing.
//!
//! The exchange authenticates requests with an RSA-PSS (SHA-256) signature
//! over `timestamp + METHOD + path`, sent alongside the access key and the
//! millisecond timestamp as headers.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::BlindedSigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use std::time::{SystemTime, UNIX_EPOCH};

/// Headers for an authenticated request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub access_key: String,
    /// Base64-encoded PSS signature.
    pub signature: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: String,
}

impl SignedHeaders {
    pub fn as_tuples(&self) -> [(&'static str, &str); 3] {
        [
            ("KALSHI-ACCESS-KEY", &self.access_key),
            ("KALSHI-ACCESS-SIGNATURE", &self.signature),
            ("KALSHI-ACCESS-TIMESTAMP", &self.timestamp),
        ]
    }
}

/// Holds the access key and parsed private key; never logs key material.
pub struct KalshiAuth {
    access_key: String,
    private_key: RsaPrivateKey,
}

impl std::fmt::Debug for KalshiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiAuth")
            .field("access_key", &self.access_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl KalshiAuth {
    /// Parse a PEM private key. Accepts PKCS#8 and PKCS#1 encodings, and
    /// tolerates `\n` escapes from env-var transport.
    pub fn new(access_key: impl Into<String>, private_key_pem: &str) -> Result<Self> {
        let pem = private_key_pem.replace("\\n", "\n");
        let pem = pem.trim();
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| Error::Signing {
                message: format!("failed to parse private key: {e}"),
            })?;

        Ok(Self {
            access_key: access_key.into(),
            private_key,
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Sign `method` + `path` at the current time. The path must be the
    /// full request path without query string.
    pub fn sign(&self, method: &str, path: &str) -> Result<SignedHeaders> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Signing {
                message: format!("system clock before epoch: {e}"),
            })?
            .as_millis() as u64;
        self.sign_at(method, path, timestamp_ms)
    }

    fn sign_at(&self, method: &str, path: &str, timestamp_ms: u64) -> Result<SignedHeaders> {
        let timestamp = timestamp_ms.to_string();
        let message = format!("{}{}{}", timestamp, method.to_uppercase(), path);

        let signing_key = BlindedSigningKey::<Sha256>::new(self.private_key.clone());
        let mut rng = rand::thread_rng();
        let signature = signing_key
            .try_sign_with_rng(&mut rng, message.as_bytes())
            .map_err(|e| Error::Signing {
                message: format!("signing failed: {e}"),
            })?;

        Ok(SignedHeaders {
            access_key: self.access_key.clone(),
            signature: BASE64.encode(signature.to_bytes()),
            timestamp,
        })
    }
}
