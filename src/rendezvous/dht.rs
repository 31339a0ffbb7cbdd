//! Mainline-DHT discovery backend.
//!
//! Announces the topic hash as a BitTorrent info-hash with our listener port
//! and keeps polling `get_peers` for other announcers. The `mainline` client
//! is a blocking handle over its own actor thread, so all DHT calls run on
//! the blocking pool and results flow back over the discovery channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mainline::{Dht, Id};
use tokio::sync::mpsc;

use super::{Discovery, DiscoveryEvent, TOPIC_HASH_LEN};
use crate::error::RendezvousError;

/// Delay between lookup rounds once a round has drained.
const LOOKUP_INTERVAL: Duration = Duration::from_secs(2);

pub struct DhtDiscovery {
    dht: Option<Dht>,
    stopped: Arc<AtomicBool>,
}

impl DhtDiscovery {
    /// Create a DHT client and start bootstrapping into the routing table.
    pub fn new() -> Result<Self, RendezvousError> {
        let dht = Dht::client().map_err(|e| RendezvousError::Dht(e.to_string()))?;
        Ok(Self {
            dht: Some(dht),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Discovery for DhtDiscovery {
    fn start(&mut self, topic: [u8; TOPIC_HASH_LEN], port: u16) -> mpsc::Receiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::channel(64);
        let Some(dht) = self.dht.clone() else {
            // Already shut down; hand back a closed channel.
            return rx;
        };
        let stopped = Arc::clone(&self.stopped);

        tokio::task::spawn_blocking(move || {
            let info_hash = Id::from_bytes(topic).expect("topic hash is 20 bytes");

            // The announce is the flush point: once it returns, our
            // (address, port) is stored on the topic's closest nodes and the
            // already-armed listener can be reached.
            if let Err(e) = dht.announce_peer(info_hash, Some(port)) {
                let _ = tx.blocking_send(DiscoveryEvent::Failed(RendezvousError::Dht(
                    e.to_string(),
                )));
                return;
            }
            tracing::debug!(port, "topic announced to the DHT");

            while !stopped.load(Ordering::SeqCst) && !tx.is_closed() {
                for peers in dht.get_peers(info_hash) {
                    for peer in peers {
                        let addr = SocketAddr::from(peer);
                        if tx.blocking_send(DiscoveryEvent::Peer(addr)).is_err() {
                            return;
                        }
                    }
                }
                std::thread::sleep(LOOKUP_INTERVAL);
            }
        });

        rx
    }

    fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Dropping the last handle stops the client's actor thread.
        self.dht.take();
        tracing::debug!("DHT discovery shut down");
    }
}
