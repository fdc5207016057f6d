//! Ed25519 signing keys and transaction signatures.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, Verifier};
use zeroize::Zeroize;

use crate::address::Pubkey;
use crate::error::SolError;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// A 64-byte Ed25519 signature. The first signature of a transaction is its id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_BYTES]);

impl Signature {
    pub const fn new_from_array(bytes: [u8; SIGNATURE_BYTES]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; SIGNATURE_BYTES] {
        self.0
    }

    /// Verify this signature over `message` for `pubkey`.
    pub fn verify(&self, pubkey: &Pubkey, message: &[u8]) -> bool {
        let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(pubkey.as_array()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&self.0);
        vk.verify(message, &sig).is_ok()
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_BYTES])
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = SolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| SolError::SerializationError(format!("base58 decode failed: {e}")))?;
        let arr: [u8; SIGNATURE_BYTES] = bytes.try_into().map_err(|v: Vec<u8>| {
            SolError::SerializationError(format!("expected 64 signature bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

/// A wallet keypair. The secret half is zeroized on drop by `ed25519-dalek`.
pub struct Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self { signing_key }
    }

    /// Build a keypair from a 32-byte Ed25519 secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut secret = *seed;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&secret);
        secret.zeroize();
        Self { signing_key }
    }

    /// Build a keypair from the 64-byte `secret || public` layout used by
    /// wallet key files. The public half must match the secret.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SolError> {
        if bytes.len() != 64 {
            return Err(SolError::InvalidPrivateKey(format!(
                "expected 64 keypair bytes, got {}",
                bytes.len()
            )));
        }

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&secret);
        secret.zeroize();

        if keypair.pubkey().as_ref() != &bytes[32..] {
            return Err(SolError::InvalidPublicKey(
                "public key half does not match the secret key".into(),
            ));
        }
        Ok(keypair)
    }

    /// Parse the JSON byte-array key file format (`[12, 255, ...]`).
    pub fn from_json(json: &str) -> Result<Self, SolError> {
        let mut raw: Vec<u8> = serde_json::from_str(json)
            .map_err(|e| SolError::InvalidPrivateKey(format!("key file is not a byte array: {e}")))?;
        let keypair = Self::from_bytes(&raw);
        raw.zeroize();
        keypair
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign_message(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_seed_is_deterministic() {
        let a = Keypair::from_seed(&[0x42u8; 32]);
        let b = Keypair::from_seed(&[0x42u8; 32]);
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn wallet_pubkey_is_on_curve() {
        let kp = Keypair::generate();
        assert!(kp.pubkey().is_on_curve());
    }

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::from_seed(&[0x55u8; 32]);
        let sig = kp.sign_message(b"stake 500");
        assert!(sig.verify(&kp.pubkey(), b"stake 500"));
        assert!(!sig.verify(&kp.pubkey(), b"stake 501"));
    }

    #[test]
    fn key_file_roundtrip() {
        let kp = Keypair::from_seed(&[0x07u8; 32]);
        let mut bytes = vec![0x07u8; 32];
        bytes.extend_from_slice(kp.pubkey().as_ref());
        let json = serde_json::to_string(&bytes).unwrap();

        let loaded = Keypair::from_json(&json).unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());
    }

    #[test]
    fn key_file_with_mismatched_public_half_fails() {
        let mut bytes = vec![0x07u8; 32];
        bytes.extend_from_slice(&[0u8; 32]);
        let err = Keypair::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SolError::InvalidPublicKey(_)));
    }

    #[test]
    fn key_file_wrong_length_fails() {
        assert!(Keypair::from_json("[1, 2, 3]").is_err());
        assert!(Keypair::from_json("{\"not\": \"an array\"}").is_err());
    }

    #[test]
    fn signature_text_roundtrip() {
        let sig = Keypair::from_seed(&[1u8; 32]).sign_message(b"m");
        let parsed: Signature = sig.to_string().parse().unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::from_seed(&[0x99u8; 32]);
        let debug = format!("{kp:?}");
        assert!(debug.contains("pubkey"));
        assert!(!debug.contains("signing_key"));
    }
}
