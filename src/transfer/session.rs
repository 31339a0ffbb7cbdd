//! Per-transfer sessions.
//!
//! A session exclusively owns its topic key, derived AEAD key, rendezvous
//! handle and socket; whatever happens — success, failure, cancellation —
//! the DHT handle is destroyed and the socket dropped before the session
//! returns. Two sessions share nothing.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::key::{derive_aead_key, AeadKey, TopicKey};
use crate::rendezvous::{Discovery, Rendezvous};
use crate::transfer::pipeline;
use crate::transfer::preamble::TransferMetadata;
use crate::transfer::progress::Progress;

/// Sender side of one transfer.
pub struct SendSession<D: Discovery> {
    topic: TopicKey,
    key: AeadKey,
    rendezvous: Rendezvous<D>,
    progress: Progress,
    cancel: CancellationToken,
}

impl<D: Discovery> SendSession<D> {
    /// Create a session with a fresh topic key.
    pub fn new(discovery: D) -> Self {
        let topic = TopicKey::generate();
        let key = derive_aead_key(&topic);
        Self {
            topic,
            key,
            rendezvous: Rendezvous::new(discovery),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The share key to hand to the receiver out of band.
    pub fn share_key(&self) -> String {
        self.topic.display()
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for a peer and stream the source to it.
    pub async fn run(mut self, source: &Path) -> Result<TransferMetadata> {
        let result = self.drive(source).await;
        self.rendezvous.destroy();
        if result.is_err() {
            tracing::warn!(error = %result.as_ref().unwrap_err(), "send failed");
        }
        result
    }

    async fn drive(&mut self, source: &Path) -> Result<TransferMetadata> {
        let mut socket = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            connected = self.rendezvous.connect(&self.topic) => connected?,
        };

        let metadata = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            sent = pipeline::run_sender(&mut socket, source, &self.key, &self.progress) => sent?,
        };

        // Half-close so the receiver sees a clean end of stream after the
        // AEAD end marker.
        socket.shutdown().await?;
        Ok(metadata)
    }
}

/// Receiver side of one transfer.
pub struct ReceiveSession<D: Discovery> {
    topic: TopicKey,
    key: AeadKey,
    rendezvous: Rendezvous<D>,
    progress: Progress,
    cancel: CancellationToken,
}

impl<D: Discovery> ReceiveSession<D> {
    /// Create a session from the share key the sender printed.
    pub fn new(discovery: D, share_key: &str) -> Result<Self> {
        let topic = TopicKey::parse(share_key)?;
        let key = derive_aead_key(&topic);
        Ok(Self {
            topic,
            key,
            rendezvous: Rendezvous::new(discovery),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the sender and extract into the destination directory.
    ///
    /// Partial files from a failed or cancelled transfer are left in place;
    /// whether to remove them is the caller's decision.
    pub async fn run(mut self, dest: &Path) -> Result<TransferMetadata> {
        let result = self.drive(dest).await;
        self.rendezvous.destroy();
        if result.is_err() {
            tracing::warn!(error = %result.as_ref().unwrap_err(), "receive failed");
        }
        result
    }

    async fn drive(&mut self, dest: &Path) -> Result<TransferMetadata> {
        let mut socket = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            connected = self.rendezvous.connect(&self.topic) => connected?,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            received = pipeline::run_receiver(&mut socket, dest, &self.key, &self.progress) => received,
        }
    }
}
