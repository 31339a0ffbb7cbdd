//! Archive extraction: incremental consumption with path sanitization.

use std::path::{Path, PathBuf};

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWriteExt;

use super::header::{is_zero_block, EntryHeader, EntryKind, BLOCK_SIZE};
use crate::error::ArchiveError;

enum State {
    /// Waiting for the next 512-byte header block.
    Header,
    /// Streaming a file body into an open handle, then skipping its padding.
    FileBody {
        file: tokio::fs::File,
        remaining: u64,
        padding: usize,
    },
    /// Discarding the body of an entry we do not materialize.
    SkipBody { remaining: u64 },
}

/// Push-based extractor: feed it archive bytes as they arrive and it
/// materializes files under the destination directory.
///
/// Every entry name is sanitized before any filesystem write; a hostile name
/// aborts with [`ArchiveError::UnsafePath`] and nothing is touched for that
/// entry. Call [`finish`](Self::finish) at end of input to verify the
/// two-block terminator arrived.
pub struct Extractor {
    dest: PathBuf,
    buf: BytesMut,
    state: State,
    zero_blocks: u8,
    done: bool,
}

impl Extractor {
    pub fn new(dest: &Path) -> Self {
        Self {
            dest: dest.to_path_buf(),
            buf: BytesMut::with_capacity(2 * BLOCK_SIZE),
            state: State::Header,
            zero_blocks: 0,
            done: false,
        }
    }

    pub async fn push(&mut self, input: &[u8]) -> Result<(), ArchiveError> {
        if self.done {
            // Everything after the terminator is blocking-factor padding;
            // tar readers ignore it.
            return Ok(());
        }
        self.buf.extend_from_slice(input);
        self.process().await
    }

    /// Verify the archive terminated cleanly.
    pub async fn finish(&mut self) -> Result<(), ArchiveError> {
        if let State::FileBody { file, .. } = &mut self.state {
            file.flush().await?;
        }
        if self.done {
            Ok(())
        } else {
            Err(ArchiveError::Truncated)
        }
    }

    async fn process(&mut self) -> Result<(), ArchiveError> {
        loop {
            match &mut self.state {
                State::Header => {
                    if self.buf.len() < BLOCK_SIZE {
                        return Ok(());
                    }
                    let taken = self.buf.split_to(BLOCK_SIZE);
                    let mut block = [0u8; BLOCK_SIZE];
                    block.copy_from_slice(&taken);

                    if is_zero_block(&block) {
                        self.zero_blocks += 1;
                        if self.zero_blocks == 2 {
                            self.done = true;
                            self.buf.clear();
                            return Ok(());
                        }
                        continue;
                    }
                    if self.zero_blocks > 0 {
                        return Err(ArchiveError::Format("entry after lone zero block"));
                    }

                    let header = EntryHeader::decode(&block)?;
                    self.start_entry(header).await?;
                }
                State::FileBody {
                    file,
                    remaining,
                    padding,
                } => {
                    if *remaining > 0 {
                        if self.buf.is_empty() {
                            return Ok(());
                        }
                        let take = (*remaining).min(self.buf.len() as u64) as usize;
                        let body = self.buf.split_to(take);
                        file.write_all(&body).await?;
                        *remaining -= take as u64;
                        continue;
                    }
                    if self.buf.len() < *padding {
                        return Ok(());
                    }
                    let padding = *padding;
                    file.flush().await?;
                    self.buf.advance(padding);
                    self.state = State::Header;
                }
                State::SkipBody { remaining } => {
                    if *remaining == 0 {
                        self.state = State::Header;
                        continue;
                    }
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let take = (*remaining).min(self.buf.len() as u64) as usize;
                    self.buf.advance(take);
                    *remaining -= take as u64;
                }
            }
        }
    }

    async fn start_entry(&mut self, header: EntryHeader) -> Result<(), ArchiveError> {
        match header.kind {
            EntryKind::Directory => {
                if header.size != 0 {
                    return Err(ArchiveError::Format("directory entry with a body"));
                }
                let path = sanitized_path(&self.dest, &header.name)?;
                tokio::fs::create_dir_all(&path).await?;
                apply_dir_mode(&path, header.mode).await?;
                self.state = State::Header;
            }
            EntryKind::File => {
                let path = sanitized_path(&self.dest, &header.name)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let file = open_for_write(&path, header.mode).await?;
                tracing::debug!(name = %header.name, size = header.size, "extracting");
                self.state = State::FileBody {
                    file,
                    remaining: header.size,
                    padding: header.padding(),
                };
            }
            EntryKind::Unknown(flag) => {
                tracing::debug!(name = %header.name, flag, "skipping unknown entry type");
                self.state = State::SkipBody {
                    remaining: header.size + header.padding() as u64,
                };
            }
        }
        Ok(())
    }
}

/// Resolve an entry name under the destination, rejecting anything that
/// could escape it: absolute names, `..` components, backslashes, drive
/// separators, or a name with no real components at all.
pub fn sanitized_path(dest: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    let unsafe_name = || ArchiveError::UnsafePath {
        name: name.to_string(),
    };

    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return Err(unsafe_name());
    }

    let mut path = dest.to_path_buf();
    for component in name.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(unsafe_name()),
            part if part.contains(':') => return Err(unsafe_name()),
            part => path.push(part),
        }
    }

    if path == dest {
        return Err(unsafe_name());
    }
    Ok(path)
}

#[cfg(unix)]
async fn open_for_write(path: &Path, mode: u32) -> std::io::Result<tokio::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .await?;
    // The open mode is filtered by the umask; restate the archive bits.
    file.set_permissions(std::fs::Permissions::from_mode(mode))
        .await?;
    Ok(file)
}

#[cfg(not(unix))]
async fn open_for_write(path: &Path, _mode: u32) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
}

#[cfg(unix)]
async fn apply_dir_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // Keep owner rwx so extraction can continue into the directory.
    let permissions = std::fs::Permissions::from_mode(mode | 0o700);
    tokio::fs::set_permissions(path, permissions).await
}

#[cfg(not(unix))]
async fn apply_dir_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::pack::Packer;

    async fn transfer(src: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let mut packer = Packer::new(src).await?;
        let mut extractor = Extractor::new(dest);
        while let Some(chunk) = packer.next_chunk().await? {
            // Deliberately odd-sized pushes to exercise partial-block paths.
            for piece in chunk.chunks(333) {
                extractor.push(piece).await?;
            }
        }
        extractor.finish().await
    }

    #[tokio::test]
    async fn tree_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();
        std::fs::write(src.join("a.txt"), "A").unwrap();
        std::fs::write(src.join("b.txt"), "BB").unwrap();
        std::fs::write(src.join("sub/c.txt"), "CCC").unwrap();

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        transfer(&src, &dest).await.unwrap();

        assert_eq!(std::fs::read(dest.join("tree/a.txt")).unwrap(), b"A");
        assert_eq!(std::fs::read(dest.join("tree/b.txt")).unwrap(), b"BB");
        assert_eq!(std::fs::read(dest.join("tree/sub/c.txt")).unwrap(), b"CCC");
        assert!(dest.join("tree/empty").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn permission_bits_survive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(&src).unwrap();
        let script = src.join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        transfer(&src, &dest).await.unwrap();

        let mode = std::fs::metadata(dest.join("tree/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn hostile_name_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let header = EntryHeader {
            name: "../etc/evil".to_string(),
            kind: EntryKind::File,
            mode: 0o644,
            size: 4,
            mtime: 0,
        };
        let mut stream = Vec::new();
        stream.extend_from_slice(&header.encode().unwrap());
        stream.extend_from_slice(b"evil");
        stream.extend_from_slice(&[0u8; 508]);
        stream.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);

        let mut extractor = Extractor::new(&dest);
        let err = extractor.push(&stream).await.unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafePath { .. }));
        // Destination untouched.
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn truncated_archive_detected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("file.bin");
        std::fs::write(&src, vec![7u8; 600]).unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let mut packer = Packer::new(&src).await.unwrap();
        let mut stream = Vec::new();
        while let Some(chunk) = packer.next_chunk().await.unwrap() {
            stream.extend_from_slice(&chunk);
        }

        let mut extractor = Extractor::new(&dest);
        extractor.push(&stream[..stream.len() - 1300]).await.unwrap();
        assert!(matches!(
            extractor.finish().await,
            Err(ArchiveError::Truncated)
        ));
    }

    #[tokio::test]
    async fn unknown_entry_types_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let odd = EntryHeader {
            name: "weird".to_string(),
            kind: EntryKind::Unknown(b'7'),
            mode: 0o644,
            size: 3,
            mtime: 0,
        };
        let real = EntryHeader {
            name: "kept.txt".to_string(),
            kind: EntryKind::File,
            mode: 0o644,
            size: 2,
            mtime: 0,
        };

        let mut stream = Vec::new();
        stream.extend_from_slice(&odd.encode().unwrap());
        stream.extend_from_slice(b"xyz");
        stream.extend_from_slice(&[0u8; 509]);
        stream.extend_from_slice(&real.encode().unwrap());
        stream.extend_from_slice(b"ok");
        stream.extend_from_slice(&[0u8; 510]);
        stream.extend_from_slice(&[0u8; 2 * BLOCK_SIZE]);

        let mut extractor = Extractor::new(&dest);
        extractor.push(&stream).await.unwrap();
        extractor.finish().await.unwrap();

        assert_eq!(std::fs::read(dest.join("kept.txt")).unwrap(), b"ok");
        assert!(!dest.join("weird").exists());
    }

    #[test]
    fn sanitizer_cases() {
        let dest = Path::new("/safe/dest");
        assert!(sanitized_path(dest, "ok/name.txt").is_ok());
        assert!(sanitized_path(dest, "../etc/evil").is_err());
        assert!(sanitized_path(dest, "a/../../b").is_err());
        assert!(sanitized_path(dest, "/etc/passwd").is_err());
        assert!(sanitized_path(dest, "a\\b").is_err());
        assert!(sanitized_path(dest, "C:whatever").is_err());
        assert!(sanitized_path(dest, "").is_err());
        assert!(sanitized_path(dest, "./.").is_err());
        assert_eq!(
            sanitized_path(dest, "a/./b//c.txt").unwrap(),
            Path::new("/safe/dest/a/b/c.txt")
        );
    }
}
