//! Short-lived write URLs for direct (non-chunked) uploads.
//!
//! A signed URL names one object path and an expiry timestamp. The
//! signature is the hex SHA-256 of `path \0 expires \0 secret`; the server
//! recomputes it on `PUT` and compares in constant time. A URL is
//! reusable until it expires.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use sha2::{Digest, Sha256};
use tracklift_protocol::constants::{PATH_DIRECT_UPLOAD, QUERY_EXPIRES, QUERY_SIGNATURE};

/// Secret length in bytes (produces 64 hex characters).
const SECRET_BYTES: usize = 32;

/// Characters left unescaped inside a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Reasons a direct-upload signature is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("upload URL expired")]
    Expired,

    #[error("invalid upload URL signature")]
    Invalid,
}

/// Generates a CSPRNG signing secret as a lowercase hex string.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Signs and verifies direct-upload URLs.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Creates a signer producing URLs under `base_url` (e.g. `http://host:8080`).
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Computes the signature for `object_path` valid until `expires_at` (unix seconds).
    pub fn signature(&self, object_path: &str, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(object_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(expires_at.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(&self.secret);
        hex::encode(hasher.finalize())
    }

    /// Builds a URL accepting `PUT`s of `object_path` for `ttl`.
    pub fn signed_url(&self, object_path: &str, ttl: Duration) -> String {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = chrono::Utc::now().timestamp().saturating_add(ttl_secs);
        self.signed_url_at(object_path, expires_at)
    }

    /// Builds a signed URL with an explicit expiry timestamp.
    pub fn signed_url_at(&self, object_path: &str, expires_at: i64) -> String {
        let encoded: Vec<String> = object_path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!(
            "{}{}/{}?{}={}&{}={}",
            self.base_url,
            PATH_DIRECT_UPLOAD,
            encoded.join("/"),
            QUERY_EXPIRES,
            expires_at,
            QUERY_SIGNATURE,
            self.signature(object_path, expires_at),
        )
    }

    /// Checks a presented signature against `object_path` and `expires_at` at time `now`.
    pub fn verify(
        &self,
        object_path: &str,
        expires_at: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), SignatureError> {
        if now > expires_at {
            return Err(SignatureError::Expired);
        }
        let expected = self.signature(object_path, expires_at);
        if constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(SignatureError::Invalid)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("s3cret", "http://localhost:8080/")
    }

    #[test]
    fn generated_secret_is_hex() {
        let secret = generate_secret();
        assert_eq!(secret.len(), SECRET_BYTES * 2);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn signed_url_shape() {
        let url = signer().signed_url_at("tracks/Bass take 1.wav", 1_700_000_000);
        assert!(url.starts_with("http://localhost:8080/api/direct-upload/tracks/Bass%20take%201.wav?"));
        assert!(url.contains("expires=1700000000"));
        assert!(url.contains("&signature="));
    }

    #[test]
    fn verify_accepts_own_signature() {
        let s = signer();
        let sig = s.signature("tracks/a.wav", 200);
        assert_eq!(s.verify("tracks/a.wav", 200, &sig, 100), Ok(()));
    }

    #[test]
    fn signature_stays_valid_until_expiry() {
        let s = signer();
        let sig = s.signature("tracks/a.wav", 200);
        for now in [100, 150, 200] {
            assert_eq!(s.verify("tracks/a.wav", 200, &sig, now), Ok(()));
        }
    }

    #[test]
    fn verify_rejects_other_path() {
        let s = signer();
        let sig = s.signature("tracks/a.wav", 200);
        assert_eq!(
            s.verify("tracks/b.wav", 200, &sig, 100),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn verify_rejects_tampered_expiry() {
        let s = signer();
        let sig = s.signature("tracks/a.wav", 200);
        assert_eq!(
            s.verify("tracks/a.wav", 900, &sig, 100),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn verify_rejects_expired() {
        let s = signer();
        let sig = s.signature("tracks/a.wav", 200);
        assert_eq!(
            s.verify("tracks/a.wav", 200, &sig, 201),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn different_secrets_disagree() {
        let a = UrlSigner::new("one", "http://x");
        let b = UrlSigner::new("two", "http://x");
        assert_ne!(a.signature("p.wav", 1), b.signature("p.wav", 1));
    }
}
