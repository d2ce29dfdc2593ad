//! Time-bounded retrieval URL signing.
//!
//! A signed URL carries the storage key, a unix expiry and an HMAC-SHA256
//! over both. Anyone holding the URL may fetch the blob until it expires;
//! altering the key or expiry invalidates the signature.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Route prefix the signed URLs point at.
pub const BLOB_ROUTE: &str = "/api/v1/blobs";

/// Signs and verifies blob retrieval URLs
#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Invalid signing key: {}", e)))?;
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Signature for `key` valid until the unix timestamp `expires`
    pub fn signature(&self, key: &str, expires: i64) -> Result<String> {
        let mac = self.mac(key, expires)?;
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Build a URL for `key` that stays valid for `ttl`
    pub fn sign_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.signature(key, expires)?;
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}{}/{}?expires={}&signature={}",
            self.base_url, BLOB_ROUTE, encoded_key, expires, signature
        ))
    }

    /// Check a presented signature; expired or tampered URLs are rejected
    pub fn verify(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(presented) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        match self.mac(key, expires) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }
}
