//! The composed transfer pipeline.
//!
//! Sender: `pack → compress → seal → socket`, one bounded chunk at a time.
//! Receiver: `socket → open → decompress → extract`, fed incrementally from
//! a single read buffer. Backpressure on both sides is the awaits at the
//! socket and filesystem boundaries; no stage buffers more than roughly one
//! chunk plus codec internals.

use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::aead::{AeadDecoder, AeadEncoder};
use crate::archive::{self, Extractor, Packer};
use crate::compress::{should_compress, Compressor, Decompressor};
use crate::error::{CryptoError, Error, Result};
use crate::key::AeadKey;
use crate::transfer::preamble::{self, TransferMetadata};
use crate::transfer::progress::Progress;

/// Socket read size on the receiving side.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Drive one send over an established socket.
///
/// Probes the source, flushes the cleartext preamble, then streams the
/// archive through compression and encryption. Returns the metadata that was
/// announced.
pub async fn run_sender<W>(
    socket: &mut W,
    source: &Path,
    key: &AeadKey,
    progress: &Progress,
) -> Result<TransferMetadata>
where
    W: AsyncWrite + Unpin,
{
    let summary = archive::probe(source).await?;
    let compressed = should_compress(source, summary.is_directory);
    let metadata = TransferMetadata {
        total_size: summary.total_size,
        file_count: summary.file_count,
        is_directory: summary.is_directory,
        compressed,
    };
    tracing::info!(
        total_size = metadata.total_size,
        file_count = metadata.file_count,
        is_directory = metadata.is_directory,
        compressed,
        "starting send"
    );

    // The preamble must be on the wire before the payload starts.
    socket.write_all(&metadata.encode()).await?;
    socket.flush().await?;

    let mut packer = Packer::new(source).await?;
    let mut compressor = Compressor::new(compressed)?;
    let mut encoder = AeadEncoder::new(key);

    let mut staged = BytesMut::new();
    let mut wire = BytesMut::new();

    while let Some(chunk) = packer.next_chunk().await? {
        staged.clear();
        compressor.push(&chunk, &mut staged)?;
        wire.clear();
        encoder.push(&staged, &mut wire)?;
        if !wire.is_empty() {
            socket.write_all(&wire).await?;
            progress.add(wire.len() as u64);
        }
    }

    // Flush the stages in order: compressor tail, then the final short chunk
    // and the AEAD end marker.
    staged.clear();
    compressor.finish(&mut staged)?;
    wire.clear();
    encoder.push(&staged, &mut wire)?;
    encoder.finish(&mut wire)?;
    socket.write_all(&wire).await?;
    socket.flush().await?;
    progress.add(wire.len() as u64);

    tracing::info!(bytes = progress.bytes(), "send complete");
    Ok(metadata)
}

/// Drive one receive over an established socket.
///
/// Reads the preamble line, then feeds everything after it through the AEAD
/// decoder, the decompressor, and the extractor. Verifies the AEAD end
/// marker arrived and that nothing trails it.
pub async fn run_receiver<R>(
    socket: &mut R,
    dest: &Path,
    key: &AeadKey,
    progress: &Progress,
) -> Result<TransferMetadata>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);

    let metadata = loop {
        if let Some(metadata) = preamble::split_line(&mut buf)? {
            break metadata;
        }
        let n = socket.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Preamble("connection closed before preamble".into()));
        }
    };
    tracing::info!(
        total_size = metadata.total_size,
        file_count = metadata.file_count,
        is_directory = metadata.is_directory,
        compressed = metadata.compressed,
        "receiving"
    );

    // Bytes already read past the newline are ciphertext.
    progress.add(buf.len() as u64);

    let mut decoder = AeadDecoder::new(key);
    let mut decompressor = Decompressor::new();
    let mut extractor = Extractor::new(dest);
    let mut plain = BytesMut::new();

    loop {
        while let Some(chunk) = decoder.decode(&mut buf)? {
            plain.clear();
            decompressor.push(&chunk, &mut plain)?;
            extractor.push(&plain).await?;
        }
        if decoder.is_finished() {
            break;
        }
        let n = socket.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(CryptoError::Truncated.into());
        }
        progress.add(n as u64);
    }

    // The sender closes its write half right after the end marker; anything
    // else arriving now is not ours.
    loop {
        let n = socket.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        progress.add(n as u64);
        return Err(CryptoError::TrailingData.into());
    }

    plain.clear();
    decompressor.finish(&mut plain)?;
    extractor.push(&plain).await?;
    extractor.finish().await?;

    tracing::info!(bytes = progress.bytes(), "receive complete");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{derive_aead_key, TopicKey};

    /// Full sender/receiver composition over an in-memory duplex socket.
    async fn roundtrip(src: &Path, dest: &Path) -> (TransferMetadata, TransferMetadata) {
        let topic = TopicKey::generate();
        let send_key = derive_aead_key(&topic);
        let recv_key = derive_aead_key(&topic);

        let (mut tx, mut rx) = tokio::io::duplex(8 * 1024);
        let src = src.to_path_buf();
        let sender = tokio::spawn(async move {
            let progress = Progress::new();
            let meta = run_sender(&mut tx, &src, &send_key, &progress)
                .await
                .unwrap();
            tx.shutdown().await.unwrap();
            meta
        });

        let progress = Progress::new();
        let received = run_receiver(&mut rx, dest, &recv_key, &progress)
            .await
            .unwrap();
        let sent = sender.await.unwrap();
        (sent, received)
    }

    #[tokio::test]
    async fn single_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hello.txt");
        std::fs::write(&src, "Hello, HyperStream!").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let (sent, received) = roundtrip(&src, &dest).await;
        assert_eq!(sent, received);
        assert_eq!(sent.total_size, 19);
        assert_eq!(sent.file_count, 1);
        assert!(!sent.is_directory);
        assert!(sent.compressed);
        assert_eq!(
            std::fs::read(dest.join("hello.txt")).unwrap(),
            b"Hello, HyperStream!"
        );
    }

    #[tokio::test]
    async fn wrong_key_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("secret.txt");
        std::fs::write(&src, "do not leak").unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();

        let send_key = derive_aead_key(&TopicKey::generate());
        let recv_key = derive_aead_key(&TopicKey::generate());

        let (mut tx, mut rx) = tokio::io::duplex(8 * 1024);
        let src_path = src.clone();
        let sender = tokio::spawn(async move {
            let progress = Progress::new();
            let _ = run_sender(&mut tx, &src_path, &send_key, &progress).await;
            let _ = tx.shutdown().await;
        });

        let progress = Progress::new();
        let err = run_receiver(&mut rx, &dest, &recv_key, &progress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::AuthFailed)));
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 0);
        sender.await.unwrap();
    }
}
