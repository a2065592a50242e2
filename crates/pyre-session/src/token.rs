//! Bearer token expiry decoding.
//!
//! Session tokens are JWT-shaped; only the payload's `exp` claim matters
//! here. No signature validation happens client-side -- the backend is the
//! verifier -- but a token whose expiry cannot be read is treated as
//! invalid, never as valid.

use crate::SessionError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenClaims {
	exp: Option<i64>,
}

/// Extracts the `exp` claim (Unix seconds) from a JWT-shaped token.
pub fn decode_expiry(token: &str) -> Result<i64, SessionError> {
	let parts: Vec<&str> = token.split('.').collect();
	if parts.len() != 3 {
		return Err(SessionError::InvalidToken(
			"expected three dot-separated segments".to_string(),
		));
	}

	let payload = URL_SAFE_NO_PAD
		.decode(parts[1])
		.map_err(|e| SessionError::InvalidToken(format!("payload is not base64url: {}", e)))?;

	let claims: TokenClaims = serde_json::from_slice(&payload)
		.map_err(|e| SessionError::InvalidToken(format!("payload is not claim JSON: {}", e)))?;

	claims
		.exp
		.ok_or_else(|| SessionError::InvalidToken("no expiry claim present".to_string()))
}
