//! Abstract file storage interface plus the signed-URL and preview-token
//! *formats*; concrete drivers (S3/FS) live in the server crate.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub key: String,
    pub content_type: String,
    pub size: u64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<StoredFile>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedUrlPayload {
    key: String,
    expires: i64,
}

/// A URL-safe base64 encoding of `{ key, expires, sig }`, `sig =
/// HMAC-SHA256(secret, JSON({key,expires}))`.
pub fn sign_storage_url(secret: &[u8], key: &str, expires_unix: i64) -> Result<String> {
    let payload = SignedUrlPayload {
        key: key.to_string(),
        expires: expires_unix,
    };
    let json = serde_json::to_vec(&payload).map_err(|e| Error::Internal(e.to_string()))?;
    let sig = hmac_sign(secret, &json)?;

    #[derive(Serialize)]
    struct Signed {
        key: String,
        expires: i64,
        sig: String,
    }
    let signed = Signed {
        key: payload.key,
        expires: payload.expires,
        sig,
    };
    let bytes = serde_json::to_vec(&signed).map_err(|e| Error::Internal(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Verify and decode a signed storage URL token. Fails closed on expiry or
/// signature mismatch.
pub fn verify_storage_url(secret: &[u8], token: &str, now_unix: i64) -> Result<String> {
    #[derive(Deserialize)]
    struct Signed {
        key: String,
        expires: i64,
        sig: String,
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Error::BadRequest("malformed signed URL".to_string()))?;
    let signed: Signed =
        serde_json::from_slice(&bytes).map_err(|_| Error::BadRequest("malformed signed URL".to_string()))?;
    if signed.expires < now_unix {
        return Err(Error::Forbidden);
    }
    let payload = SignedUrlPayload {
        key: signed.key.clone(),
        expires: signed.expires,
    };
    let json = serde_json::to_vec(&payload).map_err(|e| Error::Internal(e.to_string()))?;
    let expected = hmac_sign(secret, &json)?;
    if !constant_time_eq(expected.as_bytes(), signed.sig.as_bytes()) {
        return Err(Error::Forbidden);
    }
    Ok(signed.key)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewTokenPayload {
    pub path: String,
    pub exp: i64,
}

/// A preview token is URL-safe base64 of `"{payload}.{sig}"`.
pub fn sign_preview_token(secret: &[u8], path: &str, exp_unix: i64) -> Result<String> {
    let payload = PreviewTokenPayload {
        path: path.to_string(),
        exp: exp_unix,
    };
    let payload_json = serde_json::to_vec(&payload).map_err(|e| Error::Internal(e.to_string()))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(&payload_json);
    let sig = hmac_sign(secret, payload_b64.as_bytes())?;
    Ok(format!("{payload_b64}.{sig}"))
}

pub fn verify_preview_token(secret: &[u8], token: &str, now_unix: i64) -> Result<PreviewTokenPayload> {
    let (payload_b64, sig) = token
        .split_once('.')
        .ok_or_else(|| Error::BadRequest("malformed preview token".to_string()))?;
    let expected = hmac_sign(secret, payload_b64.as_bytes())?;
    if !constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
        return Err(Error::Forbidden);
    }
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| Error::BadRequest("malformed preview token".to_string()))?;
    let payload: PreviewTokenPayload =
        serde_json::from_slice(&payload_json).map_err(|_| Error::BadRequest("malformed preview token".to_string()))?;
    if payload.exp < now_unix {
        return Err(Error::Forbidden);
    }
    Ok(payload)
}

fn hmac_sign(secret: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| Error::Internal(e.to_string()))?;
    mac.update(message);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn signed_url_round_trips_before_expiry() {
        let token = sign_storage_url(SECRET, "uploads/a.png", 1_000).unwrap();
        let key = verify_storage_url(SECRET, &token, 500).unwrap();
        assert_eq!(key, "uploads/a.png");
    }

    #[test]
    fn signed_url_fails_closed_after_expiry() {
        let token = sign_storage_url(SECRET, "uploads/a.png", 1_000).unwrap();
        assert!(verify_storage_url(SECRET, &token, 1_001).is_err());
    }

    #[test]
    fn signed_url_rejects_tampered_signature() {
        let mut token = sign_storage_url(SECRET, "uploads/a.png", 1_000).unwrap();
        token.push('x');
        assert!(verify_storage_url(SECRET, &token, 0).is_err());
    }

    #[test]
    fn preview_token_round_trips() {
        let token = sign_preview_token(SECRET, "/articles/1", 1_000).unwrap();
        let payload = verify_preview_token(SECRET, &token, 500).unwrap();
        assert_eq!(payload.path, "/articles/1");
    }
}
