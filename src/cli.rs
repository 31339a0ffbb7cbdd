//! Command-line definitions for the `hyperstream` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "hyperstream", version, about = "Peer-to-peer encrypted file transfer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a file or directory to a peer.
    Send {
        /// File or directory to send.
        path: PathBuf,
    },
    /// Receive a transfer using the sender's share key.
    Receive {
        /// The 43-character share key printed by the sender.
        key: String,
        /// Directory to extract into.
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}
