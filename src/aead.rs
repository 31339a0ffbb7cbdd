//! Chunked authenticated encryption for the transfer stream.
//!
//! The payload is encrypted as a sequence of independently authenticated
//! AES-256-GCM chunks so the receiver can fail fast on tampering or a wrong
//! key without buffering whole files:
//!
//! ```text
//! stream := nonce_prefix(4) chunk* end_marker(4 zero bytes)
//! chunk  := length_be32 ciphertext(length) tag(16)
//! ```
//!
//! `length` is the plaintext length of the chunk. The GCM nonce is
//! `nonce_prefix || counter` with a big-endian 64-bit counter starting at 0;
//! the prefix is regenerated per stream so nonces never repeat under one key.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;
use crate::key::AeadKey;

/// Plaintext bytes per chunk. The encoder never exceeds this and the decoder
/// rejects any chunk claiming more, bounding memory per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Random per-stream nonce prefix length.
pub const PREFIX_LEN: usize = 4;

/// Length field size (also the size of the end marker).
const LEN_FIELD: usize = 4;

fn build_nonce(prefix: &[u8; PREFIX_LEN], counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..PREFIX_LEN].copy_from_slice(prefix);
    nonce[PREFIX_LEN..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Streaming encryptor: buffers plaintext into 64 KiB chunks, seals each with
/// its own tag, and emits the end marker on [`finish`](Self::finish).
pub struct AeadEncoder {
    cipher: Aes256Gcm,
    prefix: [u8; PREFIX_LEN],
    counter: u64,
    pending: BytesMut,
    prefix_sent: bool,
    finished: bool,
}

impl AeadEncoder {
    /// Create an encoder with a fresh random nonce prefix.
    pub fn new(key: &AeadKey) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length is 32");
        let mut prefix = [0u8; PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        Self {
            cipher,
            prefix,
            counter: 0,
            pending: BytesMut::with_capacity(CHUNK_SIZE),
            prefix_sent: false,
            finished: false,
        }
    }

    /// Feed plaintext. Every full 64 KiB accumulated is sealed into `out`.
    pub fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<(), CryptoError> {
        debug_assert!(!self.finished, "push after finish");
        self.emit_prefix(out);
        self.pending.extend_from_slice(input);
        while self.pending.len() >= CHUNK_SIZE {
            let chunk = self.pending.split_to(CHUNK_SIZE);
            self.seal_chunk(&chunk, out)?;
        }
        Ok(())
    }

    /// Seal any residual plaintext as a final short chunk and emit the end
    /// marker. A zero-byte stream emits the nonce prefix and the marker only.
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<(), CryptoError> {
        debug_assert!(!self.finished, "finish called twice");
        self.emit_prefix(out);
        if !self.pending.is_empty() {
            let chunk = self.pending.split();
            self.seal_chunk(&chunk, out)?;
        }
        out.put_u32(0);
        self.finished = true;
        Ok(())
    }

    fn emit_prefix(&mut self, out: &mut BytesMut) {
        if !self.prefix_sent {
            out.extend_from_slice(&self.prefix);
            self.prefix_sent = true;
        }
    }

    fn seal_chunk(&mut self, plaintext: &[u8], out: &mut BytesMut) -> Result<(), CryptoError> {
        // Reserve the next counter value before sealing so an exhausted
        // counter fails here rather than reusing a nonce.
        let seq = self.counter;
        self.counter = seq.checked_add(1).ok_or(CryptoError::NonceOverflow)?;

        let nonce = build_nonce(&self.prefix, seq);
        let sealed = self
            .cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        out.put_u32(plaintext.len() as u32);
        out.extend_from_slice(&sealed);
        Ok(())
    }
}

enum DecodeState {
    Prefix,
    Len,
    Body { len: usize },
    Halt,
}

/// Incremental decryptor.
///
/// Feed socket bytes into [`decode`](Self::decode) as they arrive; each call
/// yields at most one verified plaintext chunk, or `None` when more input is
/// needed. Plaintext is released only after its tag verifies. After the end
/// marker the decoder halts and any further byte is an error; the caller must
/// check [`is_finished`](Self::is_finished) at EOF to detect truncation.
pub struct AeadDecoder {
    cipher: Aes256Gcm,
    prefix: [u8; PREFIX_LEN],
    counter: u64,
    state: DecodeState,
}

impl AeadDecoder {
    pub fn new(key: &AeadKey) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("key length is 32");
        Self {
            cipher,
            prefix: [0u8; PREFIX_LEN],
            counter: 0,
            state: DecodeState::Prefix,
        }
    }

    /// True once the end marker has been consumed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, DecodeState::Halt)
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, CryptoError> {
        loop {
            match self.state {
                DecodeState::Prefix => {
                    if src.len() < PREFIX_LEN {
                        return Ok(None);
                    }
                    let prefix = src.split_to(PREFIX_LEN);
                    self.prefix.copy_from_slice(&prefix);
                    self.state = DecodeState::Len;
                }
                DecodeState::Len => {
                    if src.len() < LEN_FIELD {
                        return Ok(None);
                    }
                    let len = src.get_u32();
                    if len == 0 {
                        self.state = DecodeState::Halt;
                        continue;
                    }
                    if len as usize > CHUNK_SIZE {
                        return Err(CryptoError::ChunkTooLarge {
                            size: len,
                            max: CHUNK_SIZE as u32,
                        });
                    }
                    self.state = DecodeState::Body { len: len as usize };
                }
                DecodeState::Body { len } => {
                    if src.len() < len + TAG_LEN {
                        // Reserve so the next read has room for the full chunk.
                        src.reserve(len + TAG_LEN - src.len());
                        return Ok(None);
                    }
                    let sealed = src.split_to(len + TAG_LEN);

                    let seq = self.counter;
                    self.counter = seq.checked_add(1).ok_or(CryptoError::NonceOverflow)?;

                    let nonce = build_nonce(&self.prefix, seq);
                    let plaintext = self
                        .cipher
                        .decrypt(GenericArray::from_slice(&nonce), sealed.as_ref())
                        .map_err(|_| CryptoError::AuthFailed)?;

                    self.state = DecodeState::Len;
                    return Ok(Some(Bytes::from(plaintext)));
                }
                DecodeState::Halt => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Err(CryptoError::TrailingData);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{derive_aead_key, TopicKey};

    fn test_key() -> AeadKey {
        derive_aead_key(&TopicKey::generate())
    }

    fn encode_all(key: &AeadKey, plaintext: &[u8]) -> BytesMut {
        let mut enc = AeadEncoder::new(key);
        let mut out = BytesMut::new();
        enc.push(plaintext, &mut out).unwrap();
        enc.finish(&mut out).unwrap();
        out
    }

    fn decode_all(key: &AeadKey, wire: &mut BytesMut) -> Result<Vec<u8>, CryptoError> {
        let mut dec = AeadDecoder::new(key);
        let mut plain = Vec::new();
        while let Some(chunk) = dec.decode(wire)? {
            plain.extend_from_slice(&chunk);
        }
        if !dec.is_finished() {
            return Err(CryptoError::Truncated);
        }
        Ok(plain)
    }

    #[test]
    fn roundtrip_small() {
        let key = test_key();
        let mut wire = encode_all(&key, b"Hello, HyperStream!");
        let plain = decode_all(&key, &mut wire).unwrap();
        assert_eq!(plain, b"Hello, HyperStream!");
    }

    #[test]
    fn roundtrip_empty_stream() {
        let key = test_key();
        let mut wire = encode_all(&key, b"");
        // Prefix + end marker only.
        assert_eq!(wire.len(), PREFIX_LEN + LEN_FIELD);
        let plain = decode_all(&key, &mut wire).unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn roundtrip_multi_chunk() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..200 * 1024).map(|i| (i % 256) as u8).collect();
        let wire = encode_all(&key, &plaintext);

        // 200 KiB at 64 KiB per chunk: three full chunks and one short one.
        let per_full = LEN_FIELD + CHUNK_SIZE + TAG_LEN;
        let short = 200 * 1024 - 3 * CHUNK_SIZE;
        let expected =
            PREFIX_LEN + 3 * per_full + LEN_FIELD + short + TAG_LEN + LEN_FIELD;
        assert_eq!(wire.len(), expected);

        let mut wire = wire;
        assert_eq!(decode_all(&key, &mut wire).unwrap(), plaintext);
    }

    #[test]
    fn decode_handles_arbitrary_split_points() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..70_000).map(|i| (i * 7 % 251) as u8).collect();
        let wire = encode_all(&key, &plaintext);

        // Feed one byte at a time.
        let mut dec = AeadDecoder::new(&key);
        let mut buf = BytesMut::new();
        let mut plain = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            while let Some(chunk) = dec.decode(&mut buf).unwrap() {
                plain.extend_from_slice(&chunk);
            }
        }
        assert!(dec.is_finished());
        assert_eq!(plain, plaintext);
    }

    #[test]
    fn wrong_key_fails_on_first_chunk() {
        let k1 = test_key();
        let k2 = test_key();
        let mut wire = encode_all(&k1, b"secret payload");
        let err = decode_all(&k2, &mut wire).unwrap_err();
        assert!(matches!(err, CryptoError::AuthFailed));
    }

    #[test]
    fn bit_flip_anywhere_is_detected() {
        let key = test_key();
        let plaintext = vec![0x5Au8; 1000];
        let reference = encode_all(&key, &plaintext);

        // Flip one bit in a spread of positions covering prefix, length,
        // ciphertext and tag (not the end marker, which carries no payload).
        let end_marker_start = reference.len() - LEN_FIELD;
        for pos in (0..end_marker_start).step_by(97) {
            let mut tampered = BytesMut::from(&reference[..]);
            tampered[pos] ^= 0x01;
            assert!(
                decode_all(&key, &mut tampered).is_err(),
                "bit flip at {pos} went undetected"
            );
        }
    }

    #[test]
    fn truncation_is_detected() {
        let key = test_key();
        let wire = encode_all(&key, b"some data worth finishing");
        for cut in [wire.len() - 1, wire.len() - LEN_FIELD, 5, 2] {
            let mut truncated = BytesMut::from(&wire[..cut]);
            let err = decode_all(&key, &mut truncated).unwrap_err();
            assert!(
                matches!(err, CryptoError::Truncated | CryptoError::AuthFailed),
                "cut at {cut}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn trailing_bytes_after_end_marker_rejected() {
        let key = test_key();
        let mut wire = encode_all(&key, b"payload");
        wire.extend_from_slice(b"junk");

        let mut dec = AeadDecoder::new(&key);
        let result = loop {
            match dec.decode(&mut wire) {
                Ok(Some(_)) => continue,
                other => break other,
            }
        };
        assert!(matches!(result, Err(CryptoError::TrailingData)));
    }

    #[test]
    fn oversized_length_rejected() {
        let key = test_key();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&[0u8; PREFIX_LEN]);
        wire.put_u32(CHUNK_SIZE as u32 + 1);
        wire.extend_from_slice(&[0u8; 32]);

        let mut dec = AeadDecoder::new(&key);
        let err = dec.decode(&mut wire).unwrap_err();
        assert!(matches!(err, CryptoError::ChunkTooLarge { .. }));
    }

    #[test]
    fn nonce_prefixes_differ_per_stream() {
        let key = test_key();
        let a = encode_all(&key, b"same plaintext");
        let b = encode_all(&key, b"same plaintext");
        // With a 4-byte random prefix two streams colliding is ~2^-32.
        assert_ne!(a[..PREFIX_LEN], b[..PREFIX_LEN]);
        assert_ne!(a, b);
    }
}
