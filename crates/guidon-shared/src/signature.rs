//! Discord request signature verification.
//!
//! Discord signs `timestamp || body` with the application's Ed25519 key and
//! sends the hex signature and timestamp as headers. Every failure mode,
//! malformed hex included, is a verification failure.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::constants::{HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::error::SignatureError;

/// Verify a signed request.
///
/// * `public_key` -- the application's 32-byte verification key.
/// * `signature_hex` / `timestamp` -- header values, `None` if absent.
pub fn verify_request(
    public_key: &[u8; 32],
    signature_hex: Option<&str>,
    timestamp: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let signature_hex = signature_hex.ok_or(SignatureError::MissingHeader(HEADER_SIGNATURE))?;
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader(HEADER_TIMESTAMP))?;

    let sig_bytes =
        hex::decode(signature_hex.trim()).map_err(|_| SignatureError::MalformedHex(HEADER_SIGNATURE))?;
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return Err(SignatureError::MalformedHex(HEADER_SIGNATURE));
    };

    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SignatureError::InvalidKey)?;

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    verifying_key
        .verify(&message, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn sign(key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(key.sign(&message).to_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let body = br#"{"type":1}"#;
        let sig = sign(&key, "1700000000", body);

        let public = key.verifying_key().to_bytes();
        assert!(verify_request(&public, Some(&sig), Some("1700000000"), body).is_ok());
    }

    #[test]
    fn test_tampered_body_or_timestamp() {
        let key = SigningKey::generate(&mut OsRng);
        let public = key.verifying_key().to_bytes();
        let sig = sign(&key, "1700000000", b"original");

        assert_eq!(
            verify_request(&public, Some(&sig), Some("1700000000"), b"tampered"),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_request(&public, Some(&sig), Some("1700000001"), b"original"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_key() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let sig = sign(&key, "1", b"body");
        assert!(verify_request(&other.verifying_key().to_bytes(), Some(&sig), Some("1"), b"body").is_err());
    }

    #[test]
    fn test_malformed_and_missing_headers() {
        let key = SigningKey::generate(&mut OsRng);
        let public = key.verifying_key().to_bytes();

        assert_eq!(
            verify_request(&public, Some("zz-not-hex"), Some("1"), b"body"),
            Err(SignatureError::MalformedHex(HEADER_SIGNATURE))
        );
        assert_eq!(
            verify_request(&public, Some("abcd"), Some("1"), b"body"),
            Err(SignatureError::MalformedHex(HEADER_SIGNATURE))
        );
        assert_eq!(
            verify_request(&public, None, Some("1"), b"body"),
            Err(SignatureError::MissingHeader(HEADER_SIGNATURE))
        );
        assert_eq!(
            verify_request(&public, Some("00"), None, b"body"),
            Err(SignatureError::MissingHeader(HEADER_TIMESTAMP))
        );
    }
}
