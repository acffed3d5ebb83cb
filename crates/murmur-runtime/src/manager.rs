//! Connection manager
//!
//! Owns every `Connection` of this node, keyed by `ConnectionId`, with
//! secondary indexes by endpoint and by remote player. All I/O goes through
//! one shared `DatagramTransport`. Nothing here reads the clock; callers pass
//! `now` so the manager can be driven by tasks or by tests alike.
//!
//! Connections that time out or close are dropped from the arena. Their
//! secret stays registered for the endpoint, so a peer that comes back with
//! a fresh handshake gets a new responder connection.
//!
//! A Ping from a new handshake while a session with that endpoint is still
//! live (the peer restarted) gets a pending responder. The live session is
//! only replaced once the peer sends a packet under the new session keys;
//! a replayed Ping can therefore never tear down a working link.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use murmur_core::{ConnectionId, PlayerId, VoiceConfig, VoiceError, VoiceResult};
use murmur_crypto::{Role, SessionSecret};
use murmur_transport::DatagramTransport;
use murmur_wire::{split_handshake, HandshakeNonce, PacketType};

use crate::{
    Connection, ConnectionInfo, ConnectionState, ConnectionTimers, Inbound, Step, Transition,
};

/// Authenticated content from one peer
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub connection: ConnectionId,
    pub player: Option<PlayerId>,
    pub inbound: Inbound,
}

/// Everything one receive or timer pass produced
#[derive(Debug, Default)]
pub struct Pump {
    pub delivered: Vec<Delivery>,
    pub transitions: Vec<Transition>,
    /// Per-packet failures, already recovered by dropping the packet
    pub dropped: Vec<VoiceError>,
    pub packets_in: u64,
    pub packets_out: u64,
}

/// Arena of connections for one local player
pub struct ConnectionManager {
    local_player: PlayerId,
    config: VoiceConfig,
    timers: ConnectionTimers,
    transport: Arc<dyn DatagramTransport>,
    connections: HashMap<ConnectionId, Connection>,
    by_endpoint: HashMap<SocketAddr, ConnectionId>,
    by_player: HashMap<PlayerId, ConnectionId>,
    /// Secrets of endpoints whose connection ended
    dormant: HashMap<SocketAddr, SessionSecret>,
    /// New handshakes from endpoints that still have a live connection
    pending: HashMap<SocketAddr, Connection>,
    next_id: u64,
}

impl ConnectionManager {
    pub fn new(local_player: PlayerId, config: VoiceConfig, transport: Arc<dyn DatagramTransport>) -> Self {
        let timers = ConnectionTimers::from(&config);
        ConnectionManager {
            local_player,
            config,
            timers,
            transport,
            connections: HashMap::new(),
            by_endpoint: HashMap::new(),
            by_player: HashMap::new(),
            dormant: HashMap::new(),
            pending: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Start a handshake with `endpoint`; the first Ping goes out immediately
    pub fn connect(&mut self, endpoint: SocketAddr, secret: SessionSecret, now: Instant) -> VoiceResult<(ConnectionId, Pump)> {
        self.ensure_free(endpoint)?;
        let id = self.allocate_id();
        let mut connection = Connection::initiate(
            id,
            endpoint,
            secret,
            self.local_player,
            self.config.audio_params(),
            self.timers,
            now,
        )?;

        let mut pump = Pump::default();
        let step = connection.poll(now)?;
        self.insert(connection);
        self.apply(id, step, &mut pump);
        tracing::info!(conn = %id, %endpoint, "connecting");
        Ok((id, pump))
    }

    /// Register the secret for a peer that will connect to us
    pub fn accept(&mut self, endpoint: SocketAddr, secret: SessionSecret, now: Instant) -> VoiceResult<ConnectionId> {
        self.ensure_free(endpoint)?;
        self.dormant.insert(endpoint, secret.clone());
        self.open_responder(endpoint, secret, now)
    }

    /// Explicit close: the peer is told, the secret is forgotten
    pub fn disconnect(&mut self, id: ConnectionId) -> VoiceResult<Pump> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(VoiceError::ConnectionNotFound(id))?;
        let endpoint = connection.endpoint();
        let step = connection.close();

        let mut pump = Pump::default();
        self.pending.remove(&endpoint);
        self.apply(id, step, &mut pump);
        self.dormant.remove(&endpoint);
        Ok(pump)
    }

    /// Drain the transport and run every datagram through its connection
    pub fn receive(&mut self, now: Instant) -> VoiceResult<Pump> {
        let datagrams = self.transport.receive()?;
        let mut pump = Pump::default();
        for datagram in datagrams {
            pump.packets_in += 1;
            self.dispatch(datagram.peer, &datagram.bytes, now, &mut pump);
        }
        Ok(pump)
    }

    /// Run handshake retries, keepalives and timeouts
    pub fn poll_timers(&mut self, now: Instant) -> Pump {
        let mut pump = Pump::default();
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(connection) = self.connections.get_mut(&id) else {
                continue;
            };
            match connection.poll(now) {
                Ok(step) => self.apply(id, step, &mut pump),
                Err(e) => pump.dropped.push(e),
            }
        }
        self.pending.retain(|endpoint, connection| match connection.poll(now) {
            Ok(step) if step.transition.is_some() => {
                tracing::debug!(conn = %connection.id(), %endpoint, "unconfirmed handshake expired");
                false
            }
            Ok(_) => true,
            Err(e) => {
                pump.dropped.push(e);
                true
            }
        });
        pump
    }

    /// Seal and send to the connected peer serving `player`
    pub fn send_to_player(&mut self, player: PlayerId, packet_type: PacketType, body: &[u8]) -> VoiceResult<()> {
        let id = *self
            .by_player
            .get(&player)
            .ok_or_else(|| VoiceError::TransportError(format!("no connection to player {}", player)))?;
        self.send_to(id, packet_type, body)
    }

    /// Seal and send on one connection; it must be `Connected`
    pub fn send_to(&mut self, id: ConnectionId, packet_type: PacketType, body: &[u8]) -> VoiceResult<()> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(VoiceError::ConnectionNotFound(id))?;
        if connection.state() != ConnectionState::Connected {
            return Err(VoiceError::ConnectionClosed(id));
        }
        let datagram = connection.seal(packet_type, body)?;
        self.transport.send(connection.endpoint(), &datagram)
    }

    /// Send to every connected peer. Returns the number reached and the
    /// failures.
    pub fn broadcast(&mut self, packet_type: PacketType, body: &[u8]) -> (usize, Vec<VoiceError>) {
        let mut sent = 0;
        let mut errors = Vec::new();
        let ids: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.state() == ConnectionState::Connected)
            .map(Connection::id)
            .collect();
        for id in ids {
            match self.send_to(id, packet_type, body) {
                Ok(()) => sent += 1,
                Err(e) => errors.push(e),
            }
        }
        (sent, errors)
    }

    pub fn connection_info(&self, id: ConnectionId, now: Instant) -> VoiceResult<ConnectionInfo> {
        self.connections
            .get(&id)
            .map(|c| c.info(now))
            .ok_or(VoiceError::ConnectionNotFound(id))
    }

    pub fn connections(&self, now: Instant) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self.connections.values().map(|c| c.info(now)).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn connection_for_player(&self, player: PlayerId) -> Option<ConnectionId> {
        self.by_player.get(&player).copied()
    }

    /// Remote players whose connection is `Connected`
    pub fn connected_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.by_player.keys().copied().collect();
        players.sort();
        players
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn dispatch(&mut self, peer: SocketAddr, bytes: &[u8], now: Instant, pump: &mut Pump) {
        let ping = ping_nonce(bytes);
        let id = match self.by_endpoint.get(&peer).copied() {
            Some(id) => id,
            None => match self.dormant.get(&peer).cloned() {
                // Only a Ping can start a new session
                Some(secret) if ping.is_some() => match self.open_responder(peer, secret, now) {
                    Ok(id) => id,
                    Err(e) => {
                        pump.dropped.push(e);
                        return;
                    }
                },
                _ => {
                    tracing::debug!(%peer, "datagram from unknown endpoint dropped");
                    pump.dropped.push(VoiceError::AuthError);
                    return;
                }
            },
        };

        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        if let Some(nonce) = ping {
            let other_handshake = connection.role() == Role::Responder
                && matches!(connection.peer_nonce(), Some(current) if current != nonce);
            if other_handshake {
                self.stage_restart(id, peer, nonce, bytes, now, pump);
                return;
            }
        }

        match connection.open(bytes, now) {
            Ok(step) => self.apply(id, step, pump),
            Err(VoiceError::AuthError) if self.pending.contains_key(&peer) => {
                if !self.confirm_restart(id, peer, bytes, now, pump) {
                    pump.dropped.push(VoiceError::AuthError);
                }
            }
            Err(e) => {
                if matches!(e, VoiceError::InvalidConfig(_)) {
                    tracing::warn!(conn = %id, %peer, error = %e, "handshake rejected");
                } else {
                    tracing::debug!(conn = %id, %peer, error = %e, "datagram dropped");
                }
                pump.dropped.push(e);
            }
        }
    }

    /// Answer a Ping from a new handshake on the side, leaving the live
    /// connection `live` alone
    fn stage_restart(
        &mut self,
        live: ConnectionId,
        peer: SocketAddr,
        nonce: HandshakeNonce,
        bytes: &[u8],
        now: Instant,
        pump: &mut Pump,
    ) {
        if let Some(pending) = self.pending.get_mut(&peer) {
            if pending.peer_nonce() == Some(nonce) {
                match pending.open(bytes, now) {
                    Ok(step) => self.transmit(peer, step.outgoing, pump),
                    Err(e) => pump.dropped.push(e),
                }
                return;
            }
        }

        let Some(secret) = self.connections.get(&live).map(|c| c.secret().clone()) else {
            return;
        };
        let id = self.allocate_id();
        let opened = Connection::respond(
            id,
            peer,
            secret,
            self.local_player,
            self.config.audio_params(),
            self.timers,
            now,
        )
        .and_then(|mut fresh| fresh.open(bytes, now).map(|step| (fresh, step)));
        match opened {
            Ok((fresh, step)) => {
                tracing::info!(conn = %live, pending = %id, %peer, "peer started a new handshake");
                self.transmit(peer, step.outgoing, pump);
                self.pending.insert(peer, fresh);
            }
            Err(e) => {
                tracing::debug!(conn = %live, %peer, error = %e, "new handshake rejected");
                pump.dropped.push(e);
            }
        }
    }

    /// Try a datagram the live connection refused on the pending responder.
    /// Once it opens there, the pending connection replaces `live`.
    fn confirm_restart(&mut self, live: ConnectionId, peer: SocketAddr, bytes: &[u8], now: Instant, pump: &mut Pump) -> bool {
        let Some(pending) = self.pending.get_mut(&peer) else {
            return false;
        };
        let step = match pending.open(bytes, now) {
            Ok(step) => step,
            Err(_) => return false,
        };
        if pending.state() != ConnectionState::Connected {
            return true;
        }
        let Some(fresh) = self.pending.remove(&peer) else {
            return false;
        };

        tracing::info!(old = %live, new = %fresh.id(), %peer, "peer restarted its session");
        if let Some(mut stale) = self.remove(live) {
            // The Disconnect it would send is sealed for the old session
            if let Some(transition) = stale.close().transition {
                pump.transitions.push(transition);
            }
        }
        let id = fresh.id();
        self.insert(fresh);
        self.apply(id, step, pump);
        true
    }

    fn open_responder(&mut self, endpoint: SocketAddr, secret: SessionSecret, now: Instant) -> VoiceResult<ConnectionId> {
        let id = self.allocate_id();
        let connection = Connection::respond(
            id,
            endpoint,
            secret,
            self.local_player,
            self.config.audio_params(),
            self.timers,
            now,
        )?;
        self.insert(connection);
        tracing::debug!(conn = %id, %endpoint, "waiting for handshake");
        Ok(id)
    }

    /// Send what a step produced and keep the indexes in line with its
    /// transition
    fn apply(&mut self, id: ConnectionId, step: Step, pump: &mut Pump) {
        let Step {
            outgoing,
            inbound,
            transition,
        } = step;

        if let Some(endpoint) = self.connections.get(&id).map(Connection::endpoint) {
            self.transmit(endpoint, outgoing, pump);
        }

        if let Some(inbound) = inbound {
            pump.delivered.push(Delivery {
                connection: id,
                player: self.connections.get(&id).and_then(Connection::remote_player),
                inbound,
            });
        }

        if let Some(transition) = transition {
            match transition.to {
                ConnectionState::Connected => {
                    if let Some(player) = transition.remote_player {
                        if let Some(previous) = self.by_player.insert(player, id) {
                            if previous != id {
                                tracing::warn!(%player, old = %previous, new = %id, "player reachable over a second connection");
                            }
                        }
                    }
                }
                ConnectionState::TimedOut | ConnectionState::Closed => {
                    if let Some(connection) = self.remove(id) {
                        let endpoint = connection.endpoint();
                        self.dormant
                            .entry(endpoint)
                            .or_insert_with(|| connection.secret().clone());
                        // A new handshake already under way takes over the endpoint
                        if let Some(pending) = self.pending.remove(&endpoint) {
                            self.insert(pending);
                        }
                    }
                }
                ConnectionState::Handshaking => {}
            }
            pump.transitions.push(transition);
        }
    }

    fn transmit(&self, endpoint: SocketAddr, datagram: Option<Vec<u8>>, pump: &mut Pump) {
        let Some(datagram) = datagram else {
            return;
        };
        match self.transport.send(endpoint, &datagram) {
            Ok(()) => pump.packets_out += 1,
            Err(e) => {
                tracing::warn!(%endpoint, error = %e, "send failed");
                pump.dropped.push(e);
            }
        }
    }

    fn insert(&mut self, connection: Connection) {
        let id = connection.id();
        self.by_endpoint.insert(connection.endpoint(), id);
        self.connections.insert(id, connection);
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        if self.by_endpoint.get(&connection.endpoint()) == Some(&id) {
            self.by_endpoint.remove(&connection.endpoint());
        }
        if let Some(player) = connection.remote_player() {
            if self.by_player.get(&player) == Some(&id) {
                self.by_player.remove(&player);
            }
        }
        Some(connection)
    }

    fn ensure_free(&self, endpoint: SocketAddr) -> VoiceResult<()> {
        match self.by_endpoint.get(&endpoint) {
            Some(existing) => Err(VoiceError::InvalidConfig(format!(
                "endpoint {} already has connection {}",
                endpoint, existing
            ))),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("local_player", &self.local_player)
            .field("local_addr", &self.transport.local_addr())
            .field("connections", &self.connections.len())
            .finish()
    }
}

fn ping_nonce(bytes: &[u8]) -> Option<HandshakeNonce> {
    match split_handshake(bytes) {
        Ok((header, nonce, _)) if header.packet_type == PacketType::Ping => Some(nonce),
        _ => None,
    }
}
