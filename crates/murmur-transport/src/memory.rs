//! In-memory datagram network
//!
//! A hub that behaves like a lossy switch: every bound endpoint gets an
//! inbox, sends are delivered instantly unless the link is down or the
//! inbox is full. Used by tests and the network simulator.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;

use murmur_core::{VoiceError, VoiceResult};

use crate::{Datagram, DatagramTransport, MAX_DATAGRAMS_PER_POLL};

/// Datagrams an inbox holds before new arrivals are dropped
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

#[derive(Default)]
struct Hub {
    inboxes: HashMap<SocketAddr, VecDeque<Datagram>>,
    /// Directed links that currently drop everything
    down: HashSet<(SocketAddr, SocketAddr)>,
    next_port: u16,
    delivered: u64,
    dropped: u64,
}

/// Shared in-memory network
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
    inbox_capacity: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(inbox_capacity: usize) -> Self {
        MemoryNetwork {
            hub: Arc::new(Mutex::new(Hub {
                next_port: 40_000,
                ..Default::default()
            })),
            inbox_capacity,
        }
    }

    /// Bind a specific address
    pub fn bind(&self, addr: SocketAddr, mtu: usize) -> VoiceResult<MemoryTransport> {
        let mut hub = self.hub.lock();
        if hub.inboxes.contains_key(&addr) {
            return Err(VoiceError::TransportError(format!("address {} in use", addr)));
        }
        hub.inboxes.insert(addr, VecDeque::new());
        Ok(MemoryTransport {
            network: self.clone(),
            local_addr: addr,
            mtu,
        })
    }

    /// Bind the next free loopback port
    pub fn bind_any(&self, mtu: usize) -> MemoryTransport {
        let mut hub = self.hub.lock();
        loop {
            let port = hub.next_port;
            hub.next_port = hub.next_port.wrapping_add(1).max(1);
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
            if let std::collections::hash_map::Entry::Vacant(slot) = hub.inboxes.entry(addr) {
                slot.insert(VecDeque::new());
                return MemoryTransport {
                    network: self.clone(),
                    local_addr: addr,
                    mtu,
                };
            }
        }
    }

    /// Take the directed link `from -> to` down or bring it back up
    pub fn set_link(&self, from: SocketAddr, to: SocketAddr, up: bool) {
        let mut hub = self.hub.lock();
        if up {
            hub.down.remove(&(from, to));
        } else {
            hub.down.insert((from, to));
        }
    }

    /// Cut both directions between two endpoints
    pub fn partition(&self, a: SocketAddr, b: SocketAddr) {
        self.set_link(a, b, false);
        self.set_link(b, a, false);
    }

    /// Restore both directions between two endpoints
    pub fn heal(&self, a: SocketAddr, b: SocketAddr) {
        self.set_link(a, b, true);
        self.set_link(b, a, true);
    }

    /// (delivered, dropped) datagram counts
    pub fn counters(&self) -> (u64, u64) {
        let hub = self.hub.lock();
        (hub.delivered, hub.dropped)
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
        let mut hub = self.hub.lock();
        if hub.down.contains(&(from, to)) {
            hub.dropped += 1;
            return;
        }
        let capacity = self.inbox_capacity;
        let accepted = match hub.inboxes.get_mut(&to) {
            Some(inbox) if inbox.len() < capacity => {
                inbox.push_back(Datagram {
                    peer: from,
                    bytes: bytes.to_vec(),
                });
                true
            }
            _ => false,
        };
        if accepted {
            hub.delivered += 1;
        } else {
            hub.dropped += 1;
        }
    }

    fn drain(&self, addr: SocketAddr) -> Vec<Datagram> {
        let mut hub = self.hub.lock();
        match hub.inboxes.get_mut(&addr) {
            Some(inbox) => {
                let n = inbox.len().min(MAX_DATAGRAMS_PER_POLL);
                inbox.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    fn unbind(&self, addr: SocketAddr) {
        self.hub.lock().inboxes.remove(&addr);
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint on a `MemoryNetwork`
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_addr: SocketAddr,
    mtu: usize,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl DatagramTransport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&self, dest: SocketAddr, bytes: &[u8]) -> VoiceResult<()> {
        if bytes.len() > self.mtu {
            return Err(VoiceError::PayloadTooLarge {
                size: bytes.len(),
                mtu: self.mtu,
            });
        }
        self.network.deliver(self.local_addr, dest, bytes);
        Ok(())
    }

    fn receive(&self) -> VoiceResult<Vec<Datagram>> {
        Ok(self.network.drain(self.local_addr))
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unbind(self.local_addr);
    }
}
