//! HMAC-SHA256 webhook signatures in `sha256=<hex>` form.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::secrets::SecretValue;

type HmacSha256 = Hmac<Sha256>;

/// Prefix both supported providers put in front of the hex digest
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature verification failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Secret cannot be used as an HMAC key")]
    InvalidKey,

    #[error("Signature verification failed for event_signature='{provided}'")]
    Mismatch { provided: String },
}

/// Compute `sha256=<hex>` over the exact raw body bytes
pub fn compute_signature(secret: &SecretValue, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_bytes())
        .map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Compare a provided signature header with the recomputed one in constant time
///
/// An empty `provided` value never verifies.
pub fn verify_signature(
    secret: &SecretValue,
    body: &[u8],
    provided: &str,
) -> Result<(), SignatureError> {
    let calculated = compute_signature(secret, body)?;
    let matches: bool = calculated.as_bytes().ct_eq(provided.as_bytes()).into();
    if matches && !provided.is_empty() {
        Ok(())
    } else {
        Err(SignatureError::Mismatch {
            provided: provided.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
