//! Signature and peer-id primitives consumed by the handshake FSM.
//!
//! The FSM never touches `secp256k1` directly; it only calls through the [`Crypto`] trait,
//! so tests can swap in a fake that always verifies, or one that never does.
use bitcoin::secp256k1::{self, ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin_hashes::{hash160, sha256, Hash};

/// Length, in bytes, of a challenge nonce.
pub const CHALLENGE_NONCE_LEN: usize = 32;

/// Random bytes sent in a version message; proves freshness of the counter-party's verack
/// signature.
pub type ChallengeNonce = [u8; CHALLENGE_NONCE_LEN];

/// Deterministic short identifier derived from a public key (`hash160` of its SEC1 encoding,
/// mirroring how Bitcoin derives a P2PKH address from a public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// An ECDSA signature over a verack/version payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub ecdsa::Signature);

/// Secure random, signature creation/verification, and peer-id derivation, as consumed by
/// the handshake FSM. Kept as a trait so the FSM can be driven deterministically in tests.
pub trait Crypto: Send + Sync {
    /// Fill `buf` with cryptographically secure random bytes.
    fn fill_random(&self, buf: &mut [u8]);

    /// This node's public key.
    fn public_key(&self) -> PublicKey;

    /// Sign `payload` with this node's private key.
    fn sign(&self, payload: &[u8]) -> Signature;

    /// Verify `signature` over `payload` under `public_key`.
    fn verify(&self, public_key: &PublicKey, payload: &[u8], signature: &Signature) -> bool;

    /// Derive the peer id of a public key.
    fn derive_peer_id(&self, public_key: &PublicKey) -> PeerId {
        PeerId(hash160::Hash::hash(&public_key.serialize()).to_byte_array())
    }

    /// Generate a fresh challenge nonce.
    fn challenge_nonce(&self) -> ChallengeNonce {
        let mut nonce = [0u8; CHALLENGE_NONCE_LEN];
        self.fill_random(&mut nonce);
        nonce
    }

    /// Draw a random 32-bit ping nonce.
    fn ping_nonce(&self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_random(&mut buf);
        u32::from_le_bytes(buf)
    }
}

/// Local keypair backed by `secp256k1`, the same curve the rest of the node's wire types use.
pub struct LocalKeyPair {
    engine: Secp256k1<secp256k1::All>,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl LocalKeyPair {
    pub fn new(secret_key: SecretKey) -> Self {
        let engine = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&engine, &secret_key);

        Self {
            engine,
            secret_key,
            public_key,
        }
    }

    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        loop {
            fill_fastrand(&mut bytes);
            if let Ok(secret_key) = SecretKey::from_slice(&bytes) {
                return Self::new(secret_key);
            }
        }
    }
}

fn fill_fastrand(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        *byte = fastrand::u8(..);
    }
}

impl Crypto for LocalKeyPair {
    fn fill_random(&self, buf: &mut [u8]) {
        fill_fastrand(buf);
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn sign(&self, payload: &[u8]) -> Signature {
        let message = Message::from_hashed_data::<sha256::Hash>(payload);

        Signature(self.engine.sign_ecdsa(&message, &self.secret_key))
    }

    fn verify(&self, public_key: &PublicKey, payload: &[u8], signature: &Signature) -> bool {
        let message = Message::from_hashed_data::<sha256::Hash>(payload);

        self.engine
            .verify_ecdsa(&message, &signature.0, public_key)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_and_verifies_a_payload() {
        let keys = LocalKeyPair::generate();
        let payload = b"peer-id || challenge-nonce";

        let signature = keys.sign(payload);

        assert!(keys.verify(&keys.public_key(), payload, &signature));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let keys = LocalKeyPair::generate();
        let signature = keys.sign(b"original payload");

        assert!(!keys.verify(&keys.public_key(), b"tampered payload", &signature));
    }

    #[test]
    fn peer_id_is_deterministic() {
        let keys = LocalKeyPair::generate();

        assert_eq!(
            keys.derive_peer_id(&keys.public_key()),
            keys.derive_peer_id(&keys.public_key())
        );
    }
}
