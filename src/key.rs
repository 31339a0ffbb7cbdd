//! Topic-key lifecycle: generation, display encoding, AEAD key derivation.
//!
//! The 32-byte topic key is the only secret the two peers share. It locates
//! the peer on the DHT (via a derived topic hash, see [`crate::rendezvous`])
//! and, through HKDF, yields the AES-256-GCM key for the transfer stream.
//! The topic key itself is never used directly as a cipher key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::KeyError;

/// Length of a topic key in bytes.
pub const TOPIC_KEY_LEN: usize = 32;

/// Length of the human-facing share key: base64url of 32 bytes, no padding.
pub const SHARE_KEY_LEN: usize = 43;

/// HKDF salt fixing the protocol domain.
const HKDF_SALT: &[u8] = b"hyperstream-v1";

/// HKDF info fixing the derived key's purpose.
const HKDF_INFO: &[u8] = b"aes-256-gcm";

/// The 32-byte shared secret exchanged out of band as the share key.
#[derive(Clone, PartialEq, Eq)]
pub struct TopicKey([u8; TOPIC_KEY_LEN]);

impl Drop for TopicKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl TopicKey {
    /// Generate a fresh random topic key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOPIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse the human-facing share key form.
    ///
    /// Accepts only base64url without padding decoding to exactly 32 bytes.
    pub fn parse(share_key: &str) -> Result<Self, KeyError> {
        let decoded = URL_SAFE_NO_PAD.decode(share_key.trim())?;
        if decoded.len() != TOPIC_KEY_LEN {
            return Err(KeyError::InvalidKeyLength {
                expected: TOPIC_KEY_LEN,
                actual: decoded.len(),
            });
        }
        let mut bytes = [0u8; TOPIC_KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// The human-facing share key: 43 characters of base64url, case-sensitive.
    pub fn display(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the secret.
        f.write_str("TopicKey(..)")
    }
}

/// The derived AES-256-GCM key. Valid for one transfer session.
pub struct AeadKey([u8; 32]);

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl AeadKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(..)")
    }
}

/// Derive the session AEAD key from a topic key.
///
/// HKDF-SHA256 with fixed salt and info constants; deterministic, so both
/// peers arrive at the same key from the shared topic.
pub fn derive_aead_key(topic: &TopicKey) -> AeadKey {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), topic.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    AeadKey(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        for _ in 0..8 {
            let key = TopicKey::generate();
            let display = key.display();
            assert_eq!(display.len(), SHARE_KEY_LEN);
            let parsed = TopicKey::parse(&display).unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn display_uses_base64url_alphabet() {
        let key = TopicKey::generate();
        let display = key.display();
        assert!(display
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!display.contains('='));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        // 24 bytes decodes fine but is not a topic key.
        let short = URL_SAFE_NO_PAD.encode([0u8; 24]);
        let err = TopicKey::parse(&short).unwrap_err();
        assert!(matches!(
            err,
            KeyError::InvalidKeyLength {
                expected: 32,
                actual: 24
            }
        ));
    }

    #[test]
    fn parse_rejects_invalid_encoding() {
        let err = TopicKey::parse("not!valid!base64url!!!").unwrap_err();
        assert!(matches!(err, KeyError::InvalidEncoding(_)));
    }

    #[test]
    fn derivation_is_deterministic() {
        let topic = TopicKey::generate();
        let a = derive_aead_key(&topic);
        let b = derive_aead_key(&topic);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derived_key_differs_from_topic() {
        let topic = TopicKey::generate();
        let derived = derive_aead_key(&topic);
        assert_ne!(derived.as_bytes(), topic.as_bytes());
    }

    #[test]
    fn different_topics_derive_different_keys() {
        let a = derive_aead_key(&TopicKey::generate());
        let b = derive_aead_key(&TopicKey::generate());
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
