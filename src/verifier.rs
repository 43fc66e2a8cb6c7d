//! HMAC-SHA256 shared-secret signer.
//!
//! Boundary verifier for bootstrap payloads: signatures are base64 of the
//! HMAC over the raw message bytes. Anything heavier-weight than a shared
//! secret is out of scope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("signature verification failed")]
pub struct VerificationFailed;

/// Signs and verifies messages with a shared secret.
#[derive(Clone)]
pub struct HmacVerifier {
    secret: Vec<u8>,
}

impl HmacVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Base64 HMAC-SHA256 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC key should be valid");
        mac.update(message);
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Verifies `signature` against `message`.
    pub fn verify(&self, message: &[u8], signature: &str) -> Result<(), VerificationFailed> {
        if self.sign(message) == signature {
            Ok(())
        } else {
            Err(VerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let verifier = HmacVerifier::new("correct horse battery staple");
        let sig = verifier.sign(b"announce");
        assert!(verifier.verify(b"announce", &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let verifier = HmacVerifier::new("secret");
        let sig = verifier.sign(b"announce");
        assert_eq!(
            verifier.verify(b"announce!", &sig),
            Err(VerificationFailed)
        );
    }

    #[test]
    fn wrong_secret_fails() {
        let signer = HmacVerifier::new("secret-a");
        let verifier = HmacVerifier::new("secret-b");
        let sig = signer.sign(b"announce");
        assert!(verifier.verify(b"announce", &sig).is_err());
    }
}
