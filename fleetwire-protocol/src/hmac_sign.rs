// Copyright (c) FleetWire contributors.
// Licensed under the MIT License.

//! HMAC-SHA256 signing for outbound webhook deliveries (`X-Signature-SHA256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Name of the header carrying the signature.
pub const SIGNATURE_HEADER: &str = "X-Signature-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 of `body` under `secret`, for the `X-Signature-SHA256`
/// webhook header.
///
/// # Panics
/// Never: [`Hmac::new_from_slice`] accepts keys of any length for SHA-256.
#[must_use]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify that `signature` (hex-encoded) matches the HMAC-SHA256 of `body` under `secret`.
///
/// Uses constant-time comparison via [`Mac::verify_slice`] to avoid timing side channels.
#[must_use]
pub fn verify(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = b"topsecret";
        let body = br#"{"alertId":"a1","status":"OPEN"}"#;
        let signature = sign(secret, body);
        assert!(verify(secret, body, &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = b"topsecret";
        let signature = sign(secret, b"original body");
        assert!(!verify(secret, b"tampered body", &signature));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let signature = sign(b"secret-a", b"body");
        assert!(!verify(b"secret-b", b"body", &signature));
    }

    #[test]
    fn verify_rejects_malformed_hex() {
        assert!(!verify(b"secret", b"body", "not-hex!!"));
    }
}
