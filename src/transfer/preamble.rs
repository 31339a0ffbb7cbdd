//! The cleartext metadata preamble.
//!
//! One JSON object and a newline, sent before the encrypted payload. It is
//! not covered by the AEAD stream, so its values are advisory — progress
//! display only — and must never gate a security decision.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Upper bound on the preamble line; anything longer is not our peer.
pub const MAX_PREAMBLE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    /// Plaintext bytes across all files.
    pub total_size: u64,
    /// Number of regular files.
    pub file_count: u32,
    pub is_directory: bool,
    /// Whether the sender enabled compression for this transfer.
    pub compressed: bool,
}

impl TransferMetadata {
    /// Serialize as the wire line: JSON object plus `\n`.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).expect("preamble struct always serializes");
        line.push(b'\n');
        line
    }
}

/// Try to split a preamble line off the front of `buf`.
///
/// Returns `None` while no newline has arrived yet. On success the line
/// (including the newline) has been consumed and whatever followed it stays
/// in `buf` — those are the first ciphertext bytes.
pub fn split_line(buf: &mut BytesMut) -> Result<Option<TransferMetadata>, Error> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let line = buf.split_to(pos + 1);
            let metadata = serde_json::from_slice(&line[..pos])
                .map_err(|e| Error::Preamble(e.to_string()))?;
            Ok(Some(metadata))
        }
        None if buf.len() > MAX_PREAMBLE_LEN => {
            Err(Error::Preamble("no newline within bound".into()))
        }
        None => Ok(None),
    }
}
