//! Signing and verification capabilities.
//!
//! Gossamer never signs or verifies anything itself; it calls through these
//! traits. Real deployments plug in their identity scheme (an Ed25519
//! keypair, a chain wallet, an HSM). [`DigestSigner`] is the bundled demo
//! capability: a keyed SHA-256 digest, good enough for tests and local
//! simulation, worthless as cryptography.

use crate::error::SignerError;
use crate::hash::Hasher;
use crate::message::Signature;

/// Capability to sign a message's unsigned encoding.
pub trait Signer: Send + Sync {
    /// The scheme identifier this signer produces (e.g. `"ed25519"`).
    fn scheme(&self) -> &str;

    /// The public key the produced signatures verify against.
    fn public_key(&self) -> &[u8];

    /// Sign the unsigned encoding of a message.
    fn sign(&self, unsigned: &[u8]) -> Result<Signature, SignerError>;
}

/// Capability to verify a signature over a message's unsigned encoding.
pub trait Verifier: Send + Sync {
    /// Whether `signature` is valid for `unsigned`. Schemes the verifier
    /// does not recognize must return `false`, not panic.
    fn verify(&self, signature: &Signature, unsigned: &[u8]) -> bool;
}

/// Scheme identifier of the demo digest signer.
pub const DIGEST_SCHEME: &str = "sha256-digest";

/// Demo signer: signature = SHA-256(key || message). Keyed, deterministic,
/// and trivially forgeable by anyone who knows the public key.
#[derive(Clone, Debug)]
pub struct DigestSigner {
    public_key: Vec<u8>,
}

impl DigestSigner {
    /// Create a digest signer identified by `name`.
    pub fn new(name: impl Into<String>) -> Self {
        DigestSigner {
            public_key: name.into().into_bytes(),
        }
    }

    fn digest(public_key: &[u8], unsigned: &[u8]) -> Vec<u8> {
        let mut hasher = Hasher::new();
        hasher.update_field(public_key);
        hasher.update_field(unsigned);
        hasher.finalize().as_bytes().to_vec()
    }
}

impl Signer for DigestSigner {
    fn scheme(&self) -> &str {
        DIGEST_SCHEME
    }

    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn sign(&self, unsigned: &[u8]) -> Result<Signature, SignerError> {
        Ok(Signature {
            public_key: self.public_key.clone(),
            scheme: DIGEST_SCHEME.to_string(),
            bytes: Self::digest(&self.public_key, unsigned),
        })
    }
}

/// Verifier for [`DigestSigner`] signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestVerifier;

impl Verifier for DigestVerifier {
    fn verify(&self, signature: &Signature, unsigned: &[u8]) -> bool {
        signature.scheme == DIGEST_SCHEME
            && signature.bytes == DigestSigner::digest(&signature.public_key, unsigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = DigestSigner::new("alice");
        let sig = signer.sign(b"bytes").unwrap();
        assert!(DigestVerifier.verify(&sig, b"bytes"));
        assert!(!DigestVerifier.verify(&sig, b"other"));
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let signer = DigestSigner::new("alice");
        let mut sig = signer.sign(b"bytes").unwrap();
        sig.scheme = "ed25519".to_string();
        assert!(!DigestVerifier.verify(&sig, b"bytes"));
    }

    #[test]
    fn test_rejects_key_swap() {
        let sig = DigestSigner::new("alice").sign(b"bytes").unwrap();
        let mut forged = sig.clone();
        forged.public_key = b"bob".to_vec();
        assert!(!DigestVerifier.verify(&forged, b"bytes"));
    }
}
