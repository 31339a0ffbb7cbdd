use std::io;

/// Errors from share-key parsing and derivation.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid share key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid share key encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
}

/// Errors from DHT rendezvous.
#[derive(Debug, thiserror::Error)]
pub enum RendezvousError {
    #[error("no peer connected within {0} seconds")]
    Timeout(u64),

    #[error("DHT failure: {0}")]
    Dht(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the chunked AEAD stream.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    SealFailed,

    #[error("chunk authentication failed: ciphertext is invalid or the key is wrong")]
    AuthFailed,

    #[error("stream ended before the AEAD end marker")]
    Truncated,

    #[error("unexpected bytes after the AEAD end marker")]
    TrailingData,

    #[error("chunk too large: {size} bytes (max {max})")]
    ChunkTooLarge { size: u32, max: u32 },

    #[error("nonce overflow: maximum chunk counter reached")]
    NonceOverflow,
}

/// Errors from the framed compression layer.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("invalid compression flag: 0x{0:02X}")]
    InvalidFlag(u8),

    #[error("compressed stream ended mid-frame")]
    Truncated,

    #[error("zstd: {0}")]
    Zstd(io::Error),
}

/// Errors from archive packing and extraction.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive entry escapes the destination: {name:?}")]
    UnsafePath { name: String },

    #[error("malformed archive: {0}")]
    Format(&'static str),

    #[error("archive header checksum mismatch: expected {expected}, got {actual}")]
    BadChecksum { expected: u32, actual: u32 },

    #[error("archive entry name too long: {len} bytes")]
    NameTooLong { len: usize },

    #[error("archive stream ended before the terminator")]
    Truncated,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("invalid preamble: {0}")]
    Preamble(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
