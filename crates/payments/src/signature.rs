//! HMAC-SHA256 webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's signature.
pub const SIGNATURE_HEADER: &str = "X-Asaas-Signature";

/// Error returned when the verifier cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Webhook signing secret must not be empty")]
pub struct EmptySecret;

/// Verifies that a webhook body was signed with the pre-shared secret.
///
/// The signature is the lower-case hex encoding of
/// `HMAC-SHA256(secret, raw_body)`, computed over the exact bytes received.
#[derive(Clone)]
pub struct SignatureVerifier {
    keyed: HmacSha256,
}

impl SignatureVerifier {
    /// Creates a verifier for `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, EmptySecret> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(EmptySecret);
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| EmptySecret)?;
        Ok(Self { keyed })
    }

    /// Computes the hex signature for `raw_body`.
    pub fn sign(&self, raw_body: &[u8]) -> String {
        let mut mac = self.keyed.clone();
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Returns true if `presented` is the signature of `raw_body`.
    ///
    /// Surrounding whitespace and hex case are ignored. The comparison is
    /// constant-time in the signature contents.
    pub fn verify(&self, raw_body: &[u8], presented: &str) -> bool {
        let presented = presented.trim().to_ascii_lowercase();
        let expected = self.sign(raw_body);
        expected.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}
