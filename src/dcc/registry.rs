//! Live DCC peers and the pending IP -> nickname table.
//!
//! Both tables sit behind one coarse lock each. Locks are never held across
//! an `.await`; connection counts are in the tens.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type ConnId = u64;

/// Lifecycle of a peer as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// IP registered, no socket yet.
    Pending,
    Connected,
    /// Terminal. Also reported for nicknames the registry never saw.
    Closed,
}

/// Registry-side handle to one connected peer.
///
/// The read half of the socket lives in the I/O loop; the write half lives in
/// a writer task fed by `outbound`. Cancelling `cancel` stops both.
#[derive(Debug)]
pub struct PeerHandle {
    pub id: ConnId,
    pub nick: String,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Local>,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl PeerHandle {
    pub fn new(
        id: ConnId,
        nick: String,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            nick,
            addr,
            connected_at: Local::now(),
            outbound,
            cancel,
        }
    }

    /// Queue one line. Returns false once the writer has gone away.
    pub fn send_line(&self, line: String) -> bool {
        self.outbound.send(line).is_ok()
    }

    /// Stop the peer's reader and writer; the socket closes when both drop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
pub struct Registry {
    peers: Mutex<HashMap<String, PeerHandle>>,
    pending: Mutex<HashMap<IpAddr, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `nick` to connect from `ip`. A later registration for the same
    /// IP replaces the earlier one; different IPs never interfere.
    pub fn register_pending(&self, nick: &str, ip: IpAddr) {
        if let Some(previous) = self.pending.lock().insert(ip, nick.to_string()) {
            if previous != nick {
                info!(%ip, %previous, %nick, "pending DCC registration replaced");
            }
        }
    }

    /// Consume the registration for `ip`. Registrations are one-shot.
    pub fn claim_pending(&self, ip: IpAddr) -> Option<String> {
        self.pending.lock().remove(&ip)
    }

    pub fn pending_nick(&self, ip: IpAddr) -> Option<String> {
        self.pending.lock().get(&ip).cloned()
    }

    /// Register a connected peer, returning the connection it replaces.
    pub fn insert(&self, handle: PeerHandle) -> Option<PeerHandle> {
        self.peers.lock().insert(handle.nick.clone(), handle)
    }

    /// Remove whatever connection `nick` currently has.
    pub fn remove(&self, nick: &str) -> Option<PeerHandle> {
        let handle = self.peers.lock().remove(nick)?;
        self.purge_pending(&handle);
        Some(handle)
    }

    /// Remove `nick` only if its current connection is `id`, so a stale
    /// close cannot evict a newer connection under the same nickname.
    pub fn remove_conn(&self, nick: &str, id: ConnId) -> Option<PeerHandle> {
        let handle = {
            let mut peers = self.peers.lock();
            if peers.get(nick).map(|h| h.id) != Some(id) {
                return None;
            }
            peers.remove(nick)?
        };
        self.purge_pending(&handle);
        Some(handle)
    }

    fn purge_pending(&self, handle: &PeerHandle) {
        let ip = handle.addr.ip().to_canonical();
        self.pending
            .lock()
            .retain(|pending_ip, nick| !(*pending_ip == ip && *nick == handle.nick));
    }

    /// Queue `line` for `nick`. Returns false if no live connection exists.
    pub fn send_line(&self, nick: &str, line: String) -> bool {
        self.peers
            .lock()
            .get(nick)
            .is_some_and(|handle| handle.send_line(line))
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.peers.lock().contains_key(nick)
    }

    pub fn state(&self, nick: &str) -> PeerState {
        if self.contains(nick) {
            PeerState::Connected
        } else if self.pending.lock().values().any(|n| n == nick) {
            PeerState::Pending
        } else {
            PeerState::Closed
        }
    }

    /// Connected nicknames, sorted.
    pub fn nicks(&self) -> Vec<String> {
        let mut nicks: Vec<String> = self.peers.lock().keys().cloned().collect();
        nicks.sort();
        nicks
    }

    /// Close and forget every connection.
    pub fn close_all(&self) -> usize {
        let drained: Vec<PeerHandle> = self.peers.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.close();
        }
        drained.len()
    }
}
