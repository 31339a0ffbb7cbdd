//! Streaming archive codec.
//!
//! Files and directory trees travel as a POSIX-USTAR-compatible tape archive:
//! 512-byte headers with octal fields, file bodies padded to the block size,
//! and a two-block zero terminator. Entry names are always forward-slash
//! relative paths; platform separators exist only at the filesystem boundary.
//!
//! [`pack::Packer`] produces the stream lazily (no whole-file buffering) and
//! [`extract::Extractor`] consumes it incrementally, sanitizing every entry
//! path before anything touches the destination.

pub mod extract;
pub mod header;
pub mod pack;

pub use extract::Extractor;
pub use header::{EntryHeader, EntryKind, BLOCK_SIZE};
pub use pack::{probe, Packer, SourceSummary};
