//! Webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Verify a webhook signature using HMAC-SHA256.
///
/// The digest is computed over `body` exactly as received; callers must
/// never re-serialize the payload before verifying it.
///
/// # Arguments
/// * `secret` - Shared signing secret
/// * `body` - Raw webhook body bytes
/// * `signature` - Hex-encoded signature from the `X-Signature` header
///
/// # Returns
/// `true` if signature is valid, `false` otherwise (including an empty
/// secret or a missing signature)
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(signature) = signature else {
        return false;
    };

    // Decode the hex signature
    let Ok(signature_bytes) = hex::decode(signature.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Constant-time comparison to prevent timing attacks
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Compute the hex signature for a body. Used by senders and tests.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never bails.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
