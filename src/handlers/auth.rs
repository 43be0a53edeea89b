use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::FromRequest,
    http::Request,
};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::error::AppError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Ledger-Signature";

/// JSON body from a payment or payout-execution collaborator. When a
/// collaborator secret is configured the body must carry a hex HMAC-SHA256
/// signature in `X-Ledger-Signature`.
pub struct SignedJson<T>(pub T);

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    Missing,
    InvalidFormat,
    InvalidSecret,
    Mismatch,
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        tracing::warn!("Collaborator signature check failed: {:?}", err);
        match err {
            SignatureError::Missing => {
                AppError::Unauthorized(format!("missing {} header", SIGNATURE_HEADER))
            }
            SignatureError::InvalidFormat => {
                AppError::Unauthorized("invalid signature format".to_string())
            }
            SignatureError::InvalidSecret => {
                AppError::Internal("invalid collaborator secret configuration".to_string())
            }
            SignatureError::Mismatch => {
                AppError::Unauthorized("signature verification failed".to_string())
            }
        }
    }
}

/// Verify the signature using constant-time comparison
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    signature_header: &str,
) -> Result<(), SignatureError> {
    let expected_signature =
        hex::decode(signature_header.trim()).map_err(|_| SignatureError::InvalidFormat)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);

    mac.verify_slice(&expected_signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Hex signature for `body`. Collaborators and tests sign with this.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl<T> FromRequest<AppState, Body> for SignedJson<T>
where
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request<Body>, state: &AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(format!("failed to read request body: {}", e)))?;

        if let Some(secret) = state.config.collaborator_webhook_secret.as_deref() {
            let signature = signature.ok_or(SignatureError::Missing)?;
            verify_signature(secret, &body, &signature)?;
        }

        let value = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))?;
        Ok(SignedJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"gross_amount":1000}"#;
        let signature = sign("secret", body).unwrap();
        assert_eq!(verify_signature("secret", body, &signature), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign("secret", b"original").unwrap();
        assert_eq!(
            verify_signature("secret", b"tampered", &signature),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert_eq!(
            verify_signature("secret", b"body", "not-hex"),
            Err(SignatureError::InvalidFormat)
        );
    }
}
