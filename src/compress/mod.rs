//! Framed, optional streaming compression.
//!
//! The compressed payload is self-describing: a single flag byte (`0x00` raw
//! passthrough, `0x01` zstd) precedes the body, so the decoder never needs
//! out-of-band mode information. The sender decides the mode from the
//! top-level source path's extension; already-compressed formats are passed
//! through untouched.

use std::path::Path;

use bytes::{BufMut, BytesMut};
use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

use crate::error::CompressError;

/// Raw passthrough: the rest of the stream is the plaintext archive.
pub const FLAG_RAW: u8 = 0x00;

/// Compressed: the rest of the stream is one Zstandard frame.
pub const FLAG_ZSTD: u8 = 0x01;

/// Fixed zstd level: good ratio without starving the socket.
pub const ZSTD_LEVEL: i32 = 3;

/// Scratch buffer for draining the zstd contexts.
const SCRATCH_LEN: usize = 16 * 1024;

/// Extensions that are already entropy-coded; compressing them wastes CPU.
const SKIP_EXTENSIONS: &[&str] = &[
    // archives
    "zip", "gz", "tgz", "bz2", "tbz2", "xz", "txz", "zst", "lz4", "7z", "rar", "jar",
    // images
    "jpg", "jpeg", "png", "gif", "webp", "heic", "avif",
    // audio
    "mp3", "aac", "ogg", "opus", "flac", "m4a",
    // video
    "mp4", "mkv", "avi", "mov", "webm", "wmv",
    // documents (zip containers) and misc
    "docx", "xlsx", "pptx", "odt", "ods", "odp", "pdf", "epub", "apk", "dmg",
];

/// Decide compression from the top-level source path.
///
/// Directories and unknown extensions compress; the skip set disables it.
/// The comparison is case-insensitive.
pub fn should_compress(source: &Path, is_directory: bool) -> bool {
    if is_directory {
        return true;
    }
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            let ext = ext.to_ascii_lowercase();
            !SKIP_EXTENSIONS.contains(&ext.as_str())
        }
        None => true,
    }
}

/// Push-based encoder. Emits the flag byte exactly once, before any payload
/// bytes, even for empty input.
pub struct Compressor {
    encoder: Option<zstd::stream::raw::Encoder<'static>>,
    flag_sent: bool,
}

impl Compressor {
    pub fn new(enabled: bool) -> Result<Self, CompressError> {
        let encoder = if enabled {
            Some(zstd::stream::raw::Encoder::new(ZSTD_LEVEL).map_err(CompressError::Zstd)?)
        } else {
            None
        };
        Ok(Self {
            encoder,
            flag_sent: false,
        })
    }

    pub fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<(), CompressError> {
        self.emit_flag(out);
        match self.encoder.as_mut() {
            None => {
                out.extend_from_slice(input);
                Ok(())
            }
            Some(encoder) => {
                let mut scratch = [0u8; SCRATCH_LEN];
                let mut in_buf = InBuffer::around(input);
                while in_buf.pos < input.len() {
                    let mut out_buf = OutBuffer::around(&mut scratch[..]);
                    encoder
                        .run(&mut in_buf, &mut out_buf)
                        .map_err(CompressError::Zstd)?;
                    let written = out_buf.pos();
                    out.extend_from_slice(&scratch[..written]);
                }
                Ok(())
            }
        }
    }

    /// Flush and terminate the zstd frame (no-op payload-wise in raw mode).
    pub fn finish(&mut self, out: &mut BytesMut) -> Result<(), CompressError> {
        self.emit_flag(out);
        if let Some(encoder) = self.encoder.as_mut() {
            let mut scratch = [0u8; SCRATCH_LEN];
            loop {
                let mut out_buf = OutBuffer::around(&mut scratch[..]);
                let remaining = encoder
                    .finish(&mut out_buf, true)
                    .map_err(CompressError::Zstd)?;
                let written = out_buf.pos();
                out.extend_from_slice(&scratch[..written]);
                if remaining == 0 {
                    break;
                }
            }
        }
        Ok(())
    }

    fn emit_flag(&mut self, out: &mut BytesMut) {
        if !self.flag_sent {
            out.put_u8(if self.encoder.is_some() {
                FLAG_ZSTD
            } else {
                FLAG_RAW
            });
            self.flag_sent = true;
        }
    }
}

enum DecompressMode {
    Raw,
    Zstd(zstd::stream::raw::Decoder<'static>),
}

/// Push-based decoder. Reads exactly one flag byte before anything else; in
/// zstd mode a stream that ends mid-frame fails instead of silently
/// succeeding.
pub struct Decompressor {
    mode: Option<DecompressMode>,
    frame_done: bool,
}

impl Decompressor {
    pub fn new() -> Self {
        Self {
            mode: None,
            frame_done: false,
        }
    }

    pub fn push(&mut self, mut input: &[u8], out: &mut BytesMut) -> Result<(), CompressError> {
        if self.mode.is_none() {
            let Some((&flag, rest)) = input.split_first() else {
                return Ok(());
            };
            input = rest;
            self.mode = Some(match flag {
                FLAG_RAW => DecompressMode::Raw,
                FLAG_ZSTD => DecompressMode::Zstd(
                    zstd::stream::raw::Decoder::new().map_err(CompressError::Zstd)?,
                ),
                other => return Err(CompressError::InvalidFlag(other)),
            });
        }

        match self.mode.as_mut().expect("mode set above") {
            DecompressMode::Raw => {
                out.extend_from_slice(input);
                Ok(())
            }
            DecompressMode::Zstd(decoder) => {
                let mut scratch = [0u8; SCRATCH_LEN];
                let mut in_buf = InBuffer::around(input);
                while in_buf.pos < input.len() {
                    let mut out_buf = OutBuffer::around(&mut scratch[..]);
                    let hint = decoder
                        .run(&mut in_buf, &mut out_buf)
                        .map_err(CompressError::Zstd)?;
                    // A zero hint from the decoder marks a completed frame.
                    self.frame_done = hint == 0;
                    let written = out_buf.pos();
                    out.extend_from_slice(&scratch[..written]);
                }
                Ok(())
            }
        }
    }

    /// Verify the stream ended cleanly. Must be called at end of input.
    pub fn finish(&mut self, _out: &mut BytesMut) -> Result<(), CompressError> {
        match &self.mode {
            // The upstream ended before a flag byte ever arrived.
            None => Err(CompressError::Truncated),
            Some(DecompressMode::Raw) => Ok(()),
            Some(DecompressMode::Zstd(_)) => {
                if self.frame_done {
                    Ok(())
                } else {
                    Err(CompressError::Truncated)
                }
            }
        }
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}
