//! The host's Ed25519 signing identity and challenge-response
//! authentication of a renter's public key, used by the RecentRevision RPC.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use storage_host_chain::SiaPublicKey;
use storage_host_common::{HostErrorKind, Kinded};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("challenge signature did not verify against the renter's public key")]
    BadSignature,
    #[error("unexpected public key length: {0}")]
    BadKeyLength(usize),
}

impl Kinded for IdentityError {
    fn kind(&self) -> HostErrorKind {
        HostErrorKind::Communication
    }
}

/// The host's own keypair, used to co-sign contracts and revisions.
pub struct HostIdentity {
    signing_key: SigningKey,
}

impl HostIdentity {
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> SiaPublicKey {
        SiaPublicKey {
            algorithm: storage_host_chain::SignatureAlgorithm::Ed25519,
            key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifies that `signature` over `challenge` was produced by the private
/// key matching `renter_key` (the server verifies against
/// `unlock_conditions.public_keys[0]`).
pub fn verify_challenge_response(
    renter_key: &SiaPublicKey,
    challenge: &[u8; 32],
    signature: &[u8; 64],
) -> Result<(), IdentityError> {
    let verifying_key = VerifyingKey::from_bytes(&renter_key.key)
        .map_err(|_| IdentityError::BadKeyLength(renter_key.key.len()))?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(challenge, &signature)
        .map_err(|_| IdentityError::BadSignature)
}
