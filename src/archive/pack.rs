//! Archive packing: deterministic tree walk and lazy stream production.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use super::header::{EntryHeader, EntryKind, BLOCK_SIZE};
use crate::error::ArchiveError;

/// Read granularity for file bodies; matches the AEAD chunk size so one
/// packer chunk becomes roughly one sealed chunk downstream.
const READ_CHUNK: usize = 64 * 1024;

/// What the metadata probe reports about a source path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSummary {
    /// Plaintext bytes across all regular files.
    pub total_size: u64,
    /// Number of regular files (directories are not counted).
    pub file_count: u32,
    pub is_directory: bool,
}

struct PendingEntry {
    path: PathBuf,
    header: EntryHeader,
}

/// Walk the source and compute the preamble numbers without reading any file
/// contents. Agrees with what [`Packer`] emits because both share one walk.
pub async fn probe(source: &Path) -> Result<SourceSummary, ArchiveError> {
    let source = source.to_path_buf();
    let (entries, is_directory) =
        tokio::task::spawn_blocking(move || collect_entries(&source))
            .await
            .map_err(|e| ArchiveError::Io(io::Error::other(e)))??;

    let mut total_size = 0u64;
    let mut file_count = 0u32;
    for entry in &entries {
        if entry.header.kind == EntryKind::File {
            total_size += entry.header.size;
            file_count += 1;
        }
    }
    Ok(SourceSummary {
        total_size,
        file_count,
        is_directory,
    })
}

/// Streams a file or directory tree as an archive, one bounded chunk at a
/// time. File bodies are read incrementally; nothing is buffered whole.
pub struct Packer {
    entries: VecDeque<PendingEntry>,
    current: Option<OpenFile>,
    terminated: bool,
}

struct OpenFile {
    file: tokio::fs::File,
    remaining: u64,
    padding: usize,
}

impl Packer {
    pub async fn new(source: &Path) -> Result<Self, ArchiveError> {
        let source = source.to_path_buf();
        let (entries, _) = tokio::task::spawn_blocking(move || collect_entries(&source))
            .await
            .map_err(|e| ArchiveError::Io(io::Error::other(e)))??;
        Ok(Self {
            entries: entries.into(),
            current: None,
            terminated: false,
        })
    }

    /// Next chunk of archive bytes, or `None` once the terminator has been
    /// emitted.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ArchiveError> {
        if let Some(open) = self.current.as_mut() {
            if open.remaining > 0 {
                let want = open.remaining.min(READ_CHUNK as u64) as usize;
                let mut buf = BytesMut::with_capacity(want);
                let n = open.file.read_buf(&mut buf).await?;
                if n == 0 {
                    // The file shrank between the walk and now; the header
                    // already promised more bytes than exist.
                    return Err(ArchiveError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file truncated while packing",
                    )));
                }
                open.remaining -= n as u64;
                return Ok(Some(buf.freeze()));
            }

            let padding = open.padding;
            self.current = None;
            if padding > 0 {
                return Ok(Some(Bytes::from(vec![0u8; padding])));
            }
        }

        match self.entries.pop_front() {
            Some(entry) => {
                let block = entry.header.encode()?;
                if entry.header.kind == EntryKind::File && entry.header.size > 0 {
                    let file = tokio::fs::File::open(&entry.path).await?;
                    self.current = Some(OpenFile {
                        file,
                        remaining: entry.header.size,
                        padding: entry.header.padding(),
                    });
                }
                Ok(Some(Bytes::copy_from_slice(&block)))
            }
            None => {
                if self.terminated {
                    return Ok(None);
                }
                self.terminated = true;
                Ok(Some(Bytes::from(vec![0u8; 2 * BLOCK_SIZE])))
            }
        }
    }
}

/// Walk the source into an ordered entry list.
///
/// Single file: one entry named after the file. Directory: the directory
/// itself plus everything under it, names relative to the directory's
/// parent, in a deterministic (sorted) order. Symlinks and other non-regular
/// entries are skipped.
fn collect_entries(source: &Path) -> Result<(Vec<PendingEntry>, bool), ArchiveError> {
    let metadata = std::fs::metadata(source)?;

    let canonical;
    let top_name = match source.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => {
            // Paths like `.` carry no usable name; resolve one.
            canonical = std::fs::canonicalize(source)?;
            canonical
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(ArchiveError::Format("source has no usable name"))?
                .to_string()
        }
    };

    if metadata.is_file() {
        let header = EntryHeader {
            name: top_name,
            kind: EntryKind::File,
            mode: mode_bits(&metadata, 0o644),
            size: metadata.len(),
            mtime: mtime_secs(&metadata),
        };
        return Ok((
            vec![PendingEntry {
                path: source.to_path_buf(),
                header,
            }],
            false,
        ));
    }

    if !metadata.is_dir() {
        return Err(ArchiveError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "source is not a regular file or directory",
        )));
    }

    let mut entries = Vec::new();
    let walk = WalkDir::new(source).follow_links(false).sort_by_file_name();
    for item in walk {
        let item = item.map_err(|e| {
            ArchiveError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("walk failed")),
            )
        })?;

        let file_type = item.file_type();
        if !(file_type.is_file() || file_type.is_dir()) {
            tracing::debug!(path = %item.path().display(), "skipping non-regular entry");
            continue;
        }

        let rel = item
            .path()
            .strip_prefix(source)
            .expect("walk entries live under the source");
        let mut name = top_name.clone();
        for comp in rel.components() {
            let part = comp
                .as_os_str()
                .to_str()
                .ok_or(ArchiveError::Format("non-UTF-8 entry name"))?;
            name.push('/');
            name.push_str(part);
        }

        let metadata = item.metadata().map_err(|e| {
            ArchiveError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::other("metadata failed")),
            )
        })?;

        let header = if file_type.is_dir() {
            name.push('/');
            EntryHeader {
                name,
                kind: EntryKind::Directory,
                mode: mode_bits(&metadata, 0o755),
                size: 0,
                mtime: mtime_secs(&metadata),
            }
        } else {
            EntryHeader {
                name,
                kind: EntryKind::File,
                mode: mode_bits(&metadata, 0o644),
                size: metadata.len(),
                mtime: mtime_secs(&metadata),
            }
        };

        entries.push(PendingEntry {
            path: item.path().to_path_buf(),
            header,
        });
    }

    Ok((entries, true))
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_metadata: &std::fs::Metadata, default: u32) -> u32 {
    default
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
