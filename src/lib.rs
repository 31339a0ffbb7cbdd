//! Peer-to-peer encrypted file transfer over the mainline DHT.
//!
//! Two peers who share only a 32-byte topic key find each other through the
//! DHT and stream a file or directory tree over a single socket. The payload
//! is composed as `preamble-line || aead( compression-frame( archive ) )`:
//! a tar-like archive, optionally zstd-compressed behind a self-describing
//! flag byte, encrypted as a sequence of independently authenticated
//! AES-256-GCM chunks so tampering and truncation fail fast.

/// Chunked authenticated encryption for the payload stream.
pub mod aead;
/// Streaming tar-compatible packing and extraction.
pub mod archive;
/// Command-line definitions for the binary.
pub mod cli;
/// Self-describing optional zstd compression.
pub mod compress;
/// Error types for every layer of the stack.
pub mod error;
/// Topic keys, share-key encoding, AEAD key derivation.
pub mod key;
/// DHT rendezvous: topic in, connected socket out.
pub mod rendezvous;
/// Transfer sessions and pipeline composition.
pub mod transfer;

// Re-export key types at crate root for convenience.
pub use error::{Error, Result};
pub use key::{derive_aead_key, AeadKey, TopicKey};
pub use rendezvous::{Discovery, Rendezvous};
pub use transfer::{Progress, ReceiveSession, SendSession, TransferMetadata};
