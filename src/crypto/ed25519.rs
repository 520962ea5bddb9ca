//! Ed25519 keys for delegates.
//!
//! Block digests and transaction sign-bytes are signed raw — the 32-byte
//! blake3 digest or the full content bytes, no inner prehash. A wallet
//! holds one keypair per registered address plus an optional dedicated
//! miner keypair; genesis and test tooling derive both from fixed seeds so
//! regtest delegate sets are reproducible.

use super::{CryptoError, PublicKeyBytes, SignatureBytes};
use crate::types::KeyId;
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use rand::rngs::OsRng;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// A delegate signing key with its cached verifying half. The verifying
/// bytes are what land in an account's `pub_key` / `miner_pub_key`.
#[derive(Clone)]
pub struct Ed25519Keypair {
    sk: SigningKey,
    vk: VerifyingKey,
}

impl Ed25519Keypair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed32: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed32))
    }

    /// Seed constructor with the low 8 bytes carrying `n`; regtest genesis
    /// numbers its delegate keys this way.
    pub fn from_seed_u64(n: u64) -> Self {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&n.to_le_bytes());
        Self::from_seed(seed)
    }

    fn from_signing_key(sk: SigningKey) -> Self {
        let vk = sk.verifying_key();
        Self { sk, vk }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.sk.to_bytes()
    }

    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.vk.to_bytes().to_vec())
    }

    /// The address this keypair signs for.
    pub fn key_id(&self) -> KeyId {
        crate::types::derive_key_id(&self.public_key())
    }

    pub fn sign(&self, msg: &[u8]) -> SignatureBytes {
        let sig: Signature = self.sk.sign(msg);
        SignatureBytes(sig.to_bytes().to_vec())
    }
}

/// Check `sig` over `msg` under a delegate key.
///
/// Keys arrive as raw account bytes; anything that is not a well-formed
/// 32-byte ed25519 key (an unregistered placeholder, a corrupt entry)
/// fails here rather than at load time.
pub fn verify_signature(
    pk: &PublicKeyBytes,
    msg: &[u8],
    sig: &SignatureBytes,
) -> Result<(), CryptoError> {
    if pk.0.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::Key(format!(
            "public key is {} bytes, want {PUBLIC_KEY_LEN}",
            pk.0.len()
        )));
    }
    if sig.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature);
    }

    let mut pk_bytes = [0u8; PUBLIC_KEY_LEN];
    pk_bytes.copy_from_slice(&pk.0);
    let vk = VerifyingKey::from_bytes(&pk_bytes).map_err(|e| CryptoError::Key(e.to_string()))?;

    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(&sig.0);
    vk.verify(msg, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CryptoError::InvalidSignature)
}
