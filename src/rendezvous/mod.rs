//! DHT rendezvous: turn a shared 32-byte topic into one connected socket.
//!
//! The DHT itself is a black box behind the [`Discovery`] trait: announce a
//! topic with a port, get back a stream of candidate peer addresses. The
//! driver here owns the part with teeth — the TCP listener MUST be armed
//! before the announce goes out, because a fast peer can dial back between
//! the announce reaching the network and a later `listen` call, and that
//! connection would be lost. Both roles are always enabled: each peer
//! listens (server) and dials discovered peers (client) simultaneously, and
//! the first established stream wins.

pub mod dht;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::RendezvousError;
use crate::key::TopicKey;

/// Ceiling on waiting for a peer, measured from listener arm.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of the DHT topic identifier.
pub const TOPIC_HASH_LEN: usize = 20;

/// Map the secret topic key to the public DHT topic identifier.
///
/// SHA-256 truncated to the DHT's 160-bit id space; one-way, so announcing
/// the topic does not leak the key.
pub fn topic_hash(topic: &TopicKey) -> [u8; TOPIC_HASH_LEN] {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(topic.as_bytes());
    let mut hash = [0u8; TOPIC_HASH_LEN];
    hash.copy_from_slice(&digest[..TOPIC_HASH_LEN]);
    hash
}

/// Events produced by a [`Discovery`] backend.
#[derive(Debug)]
pub enum DiscoveryEvent {
    /// A candidate peer that announced the same topic.
    Peer(SocketAddr),
    /// The backend failed; rendezvous cannot proceed.
    Failed(RendezvousError),
}

/// The DHT black box: join a topic in both roles and report candidate peers.
///
/// Implementations must announce `port` under `topic` (server role) and keep
/// looking up other announcers (client role), delivering candidates on the
/// returned channel until it is dropped. `shutdown` must be idempotent.
pub trait Discovery: Send + 'static {
    fn start(&mut self, topic: [u8; TOPIC_HASH_LEN], port: u16) -> mpsc::Receiver<DiscoveryEvent>;

    fn shutdown(&mut self);
}

/// Drives one rendezvous to a single connected, full-duplex socket.
pub struct Rendezvous<D: Discovery> {
    discovery: D,
    destroyed: bool,
}

impl<D: Discovery> Rendezvous<D> {
    pub fn new(discovery: D) -> Self {
        Self {
            discovery,
            destroyed: false,
        }
    }

    /// Join the topic and wait for the first peer connection.
    ///
    /// Sequencing: listener first, then announce/lookup, then race inbound
    /// accepts against outbound dials under the 30-second deadline.
    pub async fn connect(&mut self, topic: &TopicKey) -> Result<TcpStream, RendezvousError> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        let deadline = Instant::now() + RENDEZVOUS_TIMEOUT;
        tracing::debug!(port, "rendezvous listener armed");

        let mut events = self.discovery.start(topic_hash(topic), port);

        let mut dials: JoinSet<std::io::Result<TcpStream>> = JoinSet::new();
        let mut attempted: HashSet<SocketAddr> = HashSet::new();
        let mut events_done = false;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::info!(%peer, "peer connected inbound");
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                event = events.recv(), if !events_done => match event {
                    Some(DiscoveryEvent::Peer(addr)) => {
                        // Skip our own announcement echoed back by the DHT.
                        if addr.port() == port && is_plausibly_self(&addr) {
                            continue;
                        }
                        if attempted.insert(addr) {
                            tracing::debug!(%addr, "dialing discovered peer");
                            dials.spawn(dial(addr));
                        }
                    }
                    Some(DiscoveryEvent::Failed(err)) => return Err(err),
                    None => {
                        // Discovery ended; inbound connections can still land
                        // until the deadline.
                        events_done = true;
                    }
                },
                Some(dialed) = dials.join_next() => {
                    match dialed {
                        Ok(Ok(stream)) => {
                            let peer = stream.peer_addr()?;
                            tracing::info!(%peer, "peer connected outbound");
                            return Ok(stream);
                        }
                        Ok(Err(err)) => tracing::debug!(error = %err, "dial failed"),
                        Err(err) => tracing::debug!(error = %err, "dial task failed"),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RendezvousError::Timeout(RENDEZVOUS_TIMEOUT.as_secs()));
                }
            }
        }
    }

    /// Tear down discovery. Idempotent; called on every session exit path.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.discovery.shutdown();
        }
    }
}

impl<D: Discovery> Drop for Rendezvous<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn dial(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Heuristic for our own announcement: same port plus a loopback or
/// unspecified address. A real peer on a distinct host that happens to share
/// the ephemeral port still reaches us inbound.
fn is_plausibly_self(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback() || addr.ip().is_unspecified()
}
