//! Handshake credentials: bearer JWT and HMAC request signature.

use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AiBridgeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by the per-call bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub call_id: String,
    pub instance_id: String,
    pub iat: u64,
    pub exp: u64,
}

/// Build the bearer JWT for a call. `ttl_s` bounds the token lifetime.
pub fn build_token(
    jwt_secret: &str,
    call_id: &str,
    instance_id: &str,
    now_unix: u64,
    ttl_s: u64,
) -> Result<String> {
    let claims = AuthClaims {
        call_id: call_id.to_string(),
        instance_id: instance_id.to_string(),
        iat: now_unix,
        exp: now_unix + ttl_s,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AiBridgeError::Auth(e.to_string()))
}

/// Verify and decode a bearer token (used by tests and debugging tools).
pub fn verify_token(jwt_secret: &str, token: &str) -> Result<AuthClaims> {
    decode::<AuthClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AiBridgeError::Auth(e.to_string()))
}

/// HMAC-SHA256 over `"{call_id}:{timestamp}"`, hex-encoded.
pub fn sign_request(hmac_secret: &str, call_id: &str, timestamp: u64) -> String {
    let mut mac = HmacSha256::new_from_slice(hmac_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{call_id}:{timestamp}").as_bytes());
    let digest = mac.finalize().into_bytes();
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
