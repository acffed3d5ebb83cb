//! UDP transport implementation

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use murmur_core::{VoiceError, VoiceResult};

use crate::{Datagram, DatagramTransport, MAX_DATAGRAMS_PER_POLL};

/// UDP transport for Murmur
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    mtu: usize,
}

impl UdpTransport {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr, mtu: usize) -> VoiceResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| VoiceError::TransportError(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| VoiceError::TransportError(e.to_string()))?;

        tracing::debug!(%local_addr, mtu, "udp transport bound");

        Ok(UdpTransport {
            socket: Arc::new(socket),
            local_addr,
            mtu,
        })
    }

    /// Get a clone of the socket for concurrent operations
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

impl DatagramTransport for UdpTransport {
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

        match self.socket.try_send_to(bytes, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(%dest, len = bytes.len(), "send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(VoiceError::TransportError(e.to_string())),
        }
    }

    fn receive(&self) -> VoiceResult<Vec<Datagram>> {
        // One spare byte detects datagrams larger than the mtu
        let mut buf = vec![0u8; self.mtu + 1];
        let mut out = Vec::new();

        while out.len() < MAX_DATAGRAMS_PER_POLL {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, peer)) if len > self.mtu => {
                    tracing::debug!(%peer, "oversized datagram dropped");
                }
                Ok((len, peer)) => out.push(Datagram {
                    peer,
                    bytes: buf[..len].to_vec(),
                }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(VoiceError::TransportError(e.to_string())),
            }
        }

        Ok(out)
    }
}

/// Packet receiver channel
pub type PacketReceiver = mpsc::Receiver<Datagram>;

/// Start a background receive loop
///
/// For hosts that prefer push delivery over polling `receive`.
pub fn start_receive_loop(socket: Arc<UdpSocket>, mtu: usize, buffer_size: usize) -> PacketReceiver {
    let (tx, rx) = mpsc::channel(buffer_size);

    tokio::spawn(async move {
        let mut buf = vec![0u8; mtu + 1];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, _)) if len > mtu => continue,
                Ok((len, peer)) => {
                    let datagram = Datagram {
                        peer,
                        bytes: buf[..len].to_vec(),
                    };
                    if tx.send(datagram).await.is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
