//! Connection state machine
//!
//! `Handshaking -> Connected -> (TimedOut | Closed)`
//!
//! - Handshaking: the initiator sends a sealed Ping every retry interval
//!   until the responder's Pong echoes its challenge. Opening the Ping at
//!   all proves the peer holds the session secret. Ping and Pong each carry
//!   a fresh random nonce; both feed the keys of this session, so nothing
//!   sealed for an earlier session with the same secret opens here.
//!   The initiator is Connected on the Pong and confirms at once with a
//!   KeepAlive under the session keys. The responder is Connected on the
//!   first packet that opens under those keys. Past the handshake timeout
//!   the attempt is over (`HandshakeTimeout`).
//! - Connected: keepalives go out every interval; every authenticated
//!   packet refreshes last activity. Silence for `liveness_timeout` moves
//!   the link to TimedOut.
//! - TimedOut / Closed: nothing more is sent or accepted.
//!
//! Time is passed in by the caller, never read here.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use murmur_core::{AudioParams, ConnectionId, PlayerId, VoiceConfig, VoiceError, VoiceResult};
use murmur_crypto::{handshake_nonce, CryptoSession, ReplayWindow, Role, SessionSecret};
use murmur_wire::{split_datagram, split_handshake, AudioPacket, GroupControl, HandshakeNonce, PacketType, Ping, Pong};

/// Connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Handshaking,
    Connected,
    TimedOut,
    Closed,
}

impl ConnectionState {
    /// Handshaking or Connected
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Handshaking | ConnectionState::Connected)
    }
}

/// Handshake and liveness timing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionTimers {
    pub handshake_timeout: Duration,
    pub retry_interval: Duration,
    pub keepalive_interval: Duration,
    pub liveness_timeout: Duration,
}

impl From<&VoiceConfig> for ConnectionTimers {
    fn from(config: &VoiceConfig) -> Self {
        ConnectionTimers {
            handshake_timeout: config.handshake_timeout,
            retry_interval: config.handshake_retry_interval,
            keepalive_interval: config.keepalive_interval,
            liveness_timeout: config.liveness_timeout(),
        }
    }
}

/// State change of one connection
#[derive(Debug)]
pub struct Transition {
    pub id: ConnectionId,
    pub endpoint: SocketAddr,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub remote_player: Option<PlayerId>,
    /// Lifecycle error behind the change, if any
    pub cause: Option<VoiceError>,
}

/// Authenticated content delivered to the layer above
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Audio(AudioPacket),
    Group(GroupControl),
}

/// Everything one event produced
#[derive(Debug, Default)]
pub struct Step {
    /// Datagram to send to the peer
    pub outgoing: Option<Vec<u8>>,
    pub inbound: Option<Inbound>,
    pub transition: Option<Transition>,
}

/// Snapshot for diagnostics
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub endpoint: SocketAddr,
    pub role: Role,
    pub state: ConnectionState,
    pub remote_player: Option<PlayerId>,
    pub params: AudioParams,
    pub authenticated: bool,
    pub idle_for: Duration,
}

/// One remote peer
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: SocketAddr,
    state: ConnectionState,
    role: Role,
    secret: SessionSecret,
    /// Our handshake nonce
    local_nonce: HandshakeNonce,
    /// The peer's handshake nonce, once its Ping or Pong opened
    peer_nonce: Option<HandshakeNonce>,
    /// Keys of this session, derived from both nonces
    session: Option<CryptoSession>,
    replay: ReplayWindow,
    /// Next outbound header sequence
    send_seq: u32,
    challenge: u64,
    local_player: PlayerId,
    remote_player: Option<PlayerId>,
    params: AudioParams,
    timers: ConnectionTimers,
    handshake_started: Instant,
    last_activity: Instant,
    last_ping: Option<Instant>,
    last_keepalive: Instant,
    authenticated: bool,
}

impl Connection {
    /// Outgoing attempt; the first `poll` sends a Ping
    pub fn initiate(
        id: ConnectionId,
        endpoint: SocketAddr,
        secret: SessionSecret,
        local_player: PlayerId,
        params: AudioParams,
        timers: ConnectionTimers,
        now: Instant,
    ) -> VoiceResult<Self> {
        let challenge = rand::random();
        Self::build(id, endpoint, secret, Role::Initiator, challenge, local_player, params, timers, now)
    }

    /// Wait for a peer's Ping at `endpoint`
    pub fn respond(
        id: ConnectionId,
        endpoint: SocketAddr,
        secret: SessionSecret,
        local_player: PlayerId,
        params: AudioParams,
        timers: ConnectionTimers,
        now: Instant,
    ) -> VoiceResult<Self> {
        Self::build(id, endpoint, secret, Role::Responder, 0, local_player, params, timers, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: ConnectionId,
        endpoint: SocketAddr,
        secret: SessionSecret,
        role: Role,
        challenge: u64,
        local_player: PlayerId,
        params: AudioParams,
        timers: ConnectionTimers,
        now: Instant,
    ) -> VoiceResult<Self> {
        Ok(Connection {
            id,
            endpoint,
            state: ConnectionState::Handshaking,
            role,
            secret,
            local_nonce: handshake_nonce(),
            peer_nonce: None,
            session: None,
            replay: ReplayWindow::default(),
            send_seq: 0,
            challenge,
            local_player,
            remote_player: None,
            params,
            timers,
            handshake_started: now,
            last_activity: now,
            last_ping: None,
            last_keepalive: now,
            authenticated: false,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remote_player(&self) -> Option<PlayerId> {
        self.remote_player
    }

    pub fn params(&self) -> AudioParams {
        self.params
    }

    pub fn secret(&self) -> &SessionSecret {
        &self.secret
    }

    /// Handshake challenge (ours as initiator, the peer's as responder)
    pub fn challenge(&self) -> u64 {
        self.challenge
    }

    /// Nonce the peer opened this session with
    pub fn peer_nonce(&self) -> Option<HandshakeNonce> {
        self.peer_nonce
    }

    pub fn info(&self, now: Instant) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            endpoint: self.endpoint,
            role: self.role(),
            state: self.state,
            remote_player: self.remote_player,
            params: self.params,
            authenticated: self.authenticated,
            idle_for: now.saturating_duration_since(self.last_activity),
        }
    }

    /// Seal a body under the session keys, consuming one sequence number on
    /// success
    pub fn seal(&mut self, packet_type: PacketType, body: &[u8]) -> VoiceResult<Vec<u8>> {
        let sequence = self.next_sequence()?;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| VoiceError::InvalidConfig(format!("connection {} has no session keys yet", self.id)))?;
        let datagram = session.seal_datagram(packet_type, sequence, body, self.params.mtu as usize)?;
        self.send_seq += 1;
        Ok(datagram)
    }

    fn seal_handshake(&mut self, keys: &CryptoSession, packet_type: PacketType, body: &[u8]) -> VoiceResult<Vec<u8>> {
        let sequence = self.next_sequence()?;
        let datagram = keys.seal_handshake(packet_type, sequence, &self.local_nonce, body, self.params.mtu as usize)?;
        self.send_seq += 1;
        Ok(datagram)
    }

    fn next_sequence(&self) -> VoiceResult<u32> {
        if !self.state.is_live() {
            return Err(VoiceError::ConnectionClosed(self.id));
        }
        // Never wrap: a repeated sequence would repeat a nonce
        match self.send_seq.checked_add(1) {
            Some(_) => Ok(self.send_seq),
            None => Err(VoiceError::ConnectionClosed(self.id)),
        }
    }

    /// Authenticate and dispatch one datagram from the peer
    pub fn open(&mut self, datagram: &[u8], now: Instant) -> VoiceResult<Step> {
        if !self.state.is_live() {
            return Err(VoiceError::ConnectionClosed(self.id));
        }
        let (header, _) = split_datagram(datagram).map_err(|_| VoiceError::AuthError)?;
        match header.packet_type {
            PacketType::Ping => self.on_ping(datagram, now),
            PacketType::Pong => self.on_pong(datagram, now),
            _ => self.on_session_packet(datagram, now),
        }
    }

    fn on_ping(&mut self, datagram: &[u8], now: Instant) -> VoiceResult<Step> {
        if self.role != Role::Responder {
            return Err(VoiceError::InvalidWireFormat("ping sent to initiator".into()));
        }
        let (_, initiator, _) = split_handshake(datagram).map_err(|_| VoiceError::AuthError)?;
        if matches!(self.peer_nonce, Some(nonce) if nonce != initiator) {
            // Another handshake; this connection cannot take it
            return Err(VoiceError::AuthError);
        }

        let keys = CryptoSession::for_ping(&self.secret, Role::Responder, &initiator)?;
        let (header, _, body) = keys.open_handshake(datagram)?;
        self.replay.accept(header.sequence)?;
        self.last_activity = now;

        let ping = Ping::decode(&body)?;
        if ping.params != self.params {
            return Err(VoiceError::InvalidConfig(format!(
                "peer offered {:?}, expected {:?}",
                ping.params, self.params
            )));
        }
        if matches!(self.remote_player, Some(player) if player != ping.player) {
            return Err(VoiceError::InvalidWireFormat("peer changed player id".into()));
        }

        if self.peer_nonce.is_none() {
            self.session = Some(CryptoSession::established(
                &self.secret,
                Role::Responder,
                &initiator,
                &self.local_nonce,
            )?);
            self.peer_nonce = Some(initiator);
            self.handshake_started = now;
        }
        self.remote_player = Some(ping.player);
        self.challenge = ping.challenge;
        self.authenticated = true;

        // Retries still get an answer: our Pong may have been lost
        let pong = Pong {
            player: self.local_player,
            challenge: ping.challenge,
        };
        let keys = CryptoSession::for_pong(&self.secret, Role::Responder, &initiator, &self.local_nonce)?;
        let outgoing = Some(self.seal_handshake(&keys, PacketType::Pong, &pong.encode())?);
        Ok(Step {
            outgoing,
            ..Default::default()
        })
    }

    fn on_pong(&mut self, datagram: &[u8], now: Instant) -> VoiceResult<Step> {
        if self.role != Role::Initiator {
            return Err(VoiceError::InvalidWireFormat("pong sent to responder".into()));
        }
        let (_, responder, _) = split_handshake(datagram).map_err(|_| VoiceError::AuthError)?;
        let keys = CryptoSession::for_pong(&self.secret, Role::Initiator, &self.local_nonce, &responder)?;
        let (header, _, body) = keys.open_handshake(datagram)?;
        self.replay.accept(header.sequence)?;
        self.last_activity = now;

        let pong = Pong::decode(&body)?;
        if self.state != ConnectionState::Handshaking {
            return Ok(Step::default());
        }
        if pong.challenge != self.challenge {
            return Err(VoiceError::AuthError);
        }

        self.session = Some(CryptoSession::established(
            &self.secret,
            Role::Initiator,
            &self.local_nonce,
            &responder,
        )?);
        self.peer_nonce = Some(responder);
        self.remote_player = Some(pong.player);
        self.authenticated = true;
        self.last_keepalive = now;

        let transition = Some(self.transition(ConnectionState::Connected, None));
        // The responder waits for proof that we hold the session keys
        let outgoing = Some(self.seal(PacketType::KeepAlive, &[])?);
        Ok(Step {
            outgoing,
            inbound: None,
            transition,
        })
    }

    fn on_session_packet(&mut self, datagram: &[u8], now: Instant) -> VoiceResult<Step> {
        let Some(session) = &self.session else {
            tracing::debug!(conn = %self.id, "packet before handshake completed, ignored");
            return Ok(Step::default());
        };
        let (header, body) = session.open_datagram(datagram)?;
        self.replay.accept(header.sequence)?;
        self.last_activity = now;

        let inbound = match header.packet_type {
            PacketType::Ping | PacketType::Pong | PacketType::KeepAlive => None,
            PacketType::Audio => {
                let packet = AudioPacket::decode(&body)?;
                if Some(packet.source()) != self.remote_player {
                    return Err(VoiceError::InvalidWireFormat(format!(
                        "audio source {} does not match peer",
                        packet.source()
                    )));
                }
                Some(Inbound::Audio(packet))
            }
            PacketType::GroupControl => Some(Inbound::Group(GroupControl::decode(&body)?)),
            PacketType::Disconnect => {
                return Ok(Step {
                    transition: Some(self.transition(ConnectionState::Closed, None)),
                    ..Default::default()
                });
            }
        };

        let transition = if self.state == ConnectionState::Handshaking {
            self.last_keepalive = now;
            Some(self.transition(ConnectionState::Connected, None))
        } else {
            None
        };
        Ok(Step {
            outgoing: None,
            inbound,
            transition,
        })
    }

    /// Drive timers: handshake retries, keepalives and timeouts
    pub fn poll(&mut self, now: Instant) -> VoiceResult<Step> {
        let mut step = Step::default();
        match self.state {
            ConnectionState::Handshaking => {
                if now.saturating_duration_since(self.handshake_started) >= self.timers.handshake_timeout {
                    let cause = VoiceError::HandshakeTimeout(self.id);
                    step.transition = Some(self.transition(ConnectionState::TimedOut, Some(cause)));
                    return Ok(step);
                }
                let retry_due = self
                    .last_ping
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.timers.retry_interval);
                if self.role == Role::Initiator && retry_due {
                    self.last_ping = Some(now);
                    let ping = Ping {
                        player: self.local_player,
                        challenge: self.challenge,
                        params: self.params,
                    };
                    let keys = CryptoSession::for_ping(&self.secret, Role::Initiator, &self.local_nonce)?;
                    step.outgoing = Some(self.seal_handshake(&keys, PacketType::Ping, &ping.encode())?);
                }
            }
            ConnectionState::Connected => {
                if now.saturating_duration_since(self.last_activity) >= self.timers.liveness_timeout {
                    step.transition = Some(self.transition(ConnectionState::TimedOut, None));
                    return Ok(step);
                }
                if now.saturating_duration_since(self.last_keepalive) >= self.timers.keepalive_interval {
                    self.last_keepalive = now;
                    step.outgoing = Some(self.seal(PacketType::KeepAlive, &[])?);
                }
            }
            ConnectionState::TimedOut | ConnectionState::Closed => {}
        }
        Ok(step)
    }

    /// Explicit close; a connected peer is told with a Disconnect packet
    pub fn close(&mut self) -> Step {
        if !self.state.is_live() {
            return Step::default();
        }
        let outgoing = if self.state == ConnectionState::Connected {
            self.seal(PacketType::Disconnect, &[]).ok()
        } else {
            None
        };
        Step {
            outgoing,
            inbound: None,
            transition: Some(self.transition(ConnectionState::Closed, None)),
        }
    }

    fn transition(&mut self, to: ConnectionState, cause: Option<VoiceError>) -> Transition {
        let from = self.state;
        self.state = to;
        tracing::info!(conn = %self.id, endpoint = %self.endpoint, ?from, ?to, "connection state changed");
        Transition {
            id: self.id,
            endpoint: self.endpoint,
            from,
            to,
            remote_player: self.remote_player,
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{CodecKind, Destination};
    use murmur_wire::HEADER_SIZE;

    const ALICE: PlayerId = PlayerId(1);
    const BOB: PlayerId = PlayerId(2);

    fn params() -> AudioParams {
        VoiceConfig::default().audio_params()
    }

    fn timers() -> ConnectionTimers {
        ConnectionTimers {
            handshake_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(500),
            keepalive_interval: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(10),
        }
    }

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn pair(secret_a: [u8; 32], secret_b: [u8; 32], now: Instant) -> (Connection, Connection) {
        let a = Connection::initiate(
            ConnectionId(1),
            endpoint(2000),
            SessionSecret::from_bytes(secret_a),
            ALICE,
            params(),
            timers(),
            now,
        )
        .unwrap();
        let b = Connection::respond(
            ConnectionId(7),
            endpoint(1000),
            SessionSecret::from_bytes(secret_b),
            BOB,
            params(),
            timers(),
            now,
        )
        .unwrap();
        (a, b)
    }

    fn handshake(a: &mut Connection, b: &mut Connection, now: Instant) {
        let ping = a.poll(now).unwrap().outgoing.unwrap();
        let step = b.open(&ping, now).unwrap();
        assert!(step.transition.is_none());
        let step = a.open(&step.outgoing.unwrap(), now).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Connected);
        let step = b.open(&step.outgoing.unwrap(), now).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Connected);
    }

    #[test]
    fn test_handshake_with_correct_secret() {
        let now = Instant::now();
        let (mut a, mut b) = pair([4; 32], [4; 32], now);
        handshake(&mut a, &mut b, now);

        assert_eq!(a.state(), ConnectionState::Connected);
        assert_eq!(b.state(), ConnectionState::Connected);
        assert_eq!(a.remote_player(), Some(BOB));
        assert_eq!(b.remote_player(), Some(ALICE));
        assert!(a.info(now).authenticated);
    }

    #[test]
    fn test_responder_connects_on_first_session_packet() {
        let now = Instant::now();
        let (mut a, mut b) = pair([4; 32], [4; 32], now);
        let ping = a.poll(now).unwrap().outgoing.unwrap();
        let pong = b.open(&ping, now).unwrap().outgoing.unwrap();
        let step = a.open(&pong, now).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Connected);
        // The confirming keepalive is lost
        assert_eq!(b.state(), ConnectionState::Handshaking);

        let audio = AudioPacket::new(0, 0, ALICE, Destination::Proximity, vec![4, 4]);
        let datagram = a.seal(PacketType::Audio, &audio.encode().unwrap()).unwrap();
        let step = b.open(&datagram, now).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Connected);
        assert_eq!(step.inbound, Some(Inbound::Audio(audio)));
    }

    #[test]
    fn test_unconfirmed_responder_times_out() {
        let start = Instant::now();
        let (mut a, mut b) = pair([4; 32], [4; 32], start);
        let later = start + Duration::from_secs(3);
        let ping = a.poll(later).unwrap().outgoing.unwrap();
        b.open(&ping, later).unwrap();

        // The timeout runs from the first Ping, not from when we started waiting
        assert!(b.poll(start + Duration::from_secs(6)).unwrap().transition.is_none());
        let step = b.poll(later + timers().handshake_timeout).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::TimedOut);
    }

    #[test]
    fn test_reconnect_with_same_secret_uses_fresh_keys() {
        let now = Instant::now();
        let audio = AudioPacket::new(0, 0, ALICE, Destination::Proximity, vec![7; 32]);
        let body = audio.encode().unwrap();

        let (mut a1, mut b1) = pair([9; 32], [9; 32], now);
        handshake(&mut a1, &mut b1, now);
        let old = a1.seal(PacketType::Audio, &body).unwrap();

        let (mut a2, mut b2) = pair([9; 32], [9; 32], now);
        handshake(&mut a2, &mut b2, now);
        let new = a2.seal(PacketType::Audio, &body).unwrap();

        // Same header and plaintext; a shared keystream would give equal bytes
        assert_eq!(old[..HEADER_SIZE], new[..HEADER_SIZE]);
        assert_ne!(old[HEADER_SIZE..], new[HEADER_SIZE..]);

        // Old traffic does not open in the new session
        assert!(matches!(b2.open(&old, now), Err(VoiceError::AuthError)));
        assert_eq!(b2.open(&new, now).unwrap().inbound, Some(Inbound::Audio(audio)));
    }

    #[test]
    fn test_handshake_replayed_across_sessions_rejected() {
        let now = Instant::now();
        let (mut a1, mut b1) = pair([9; 32], [9; 32], now);
        let old_ping = a1.poll(now).unwrap().outgoing.unwrap();
        let old_pong = b1.open(&old_ping, now).unwrap().outgoing.unwrap();

        let (mut a2, mut b2) = pair([9; 32], [9; 32], now);
        handshake(&mut a2, &mut b2, now);

        // A connected responder does not take a Ping from another handshake
        assert!(matches!(b2.open(&old_ping, now), Err(VoiceError::AuthError)));
        assert_eq!(b2.state(), ConnectionState::Connected);

        // A Pong is bound to the initiator nonce it answers
        let (mut a3, _) = pair([9; 32], [9; 32], now);
        a3.poll(now).unwrap();
        assert!(matches!(a3.open(&old_pong, now), Err(VoiceError::AuthError)));
        assert_eq!(a3.state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_wrong_secret_times_out() {
        let start = Instant::now();
        let (mut a, mut b) = pair([4; 32], [5; 32], start);

        let mut now = start;
        let mut pings = 0;
        loop {
            let step = a.poll(now).unwrap();
            if let Some(t) = step.transition {
                assert_eq!(t.to, ConnectionState::TimedOut);
                assert!(matches!(t.cause, Some(VoiceError::HandshakeTimeout(_))));
                break;
            }
            if let Some(ping) = step.outgoing {
                pings += 1;
                assert!(matches!(b.open(&ping, now), Err(VoiceError::AuthError)));
            }
            assert_eq!(a.state(), ConnectionState::Handshaking);
            now += Duration::from_millis(100);
        }
        assert!(now.duration_since(start) >= timers().handshake_timeout);
        assert_eq!(pings, 10);
        assert_eq!(b.state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_ping_retried_until_pong() {
        let now = Instant::now();
        let (mut a, _) = pair([1; 32], [1; 32], now);
        assert!(a.poll(now).unwrap().outgoing.is_some());
        assert!(a.poll(now + Duration::from_millis(100)).unwrap().outgoing.is_none());
        assert!(a.poll(now + Duration::from_millis(500)).unwrap().outgoing.is_some());
    }

    #[test]
    fn test_lost_pong_is_answered_again() {
        let now = Instant::now();
        let (mut a, mut b) = pair([1; 32], [1; 32], now);
        let first = a.poll(now).unwrap().outgoing.unwrap();
        b.open(&first, now).unwrap(); // Pong lost

        let later = now + Duration::from_millis(500);
        let retry = a.poll(later).unwrap().outgoing.unwrap();
        let step = b.open(&retry, later).unwrap();
        assert!(step.transition.is_none());
        let step = a.open(&step.outgoing.unwrap(), later).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Connected);
    }

    #[test]
    fn test_mismatched_params_rejected() {
        let now = Instant::now();
        let (mut a, _) = pair([1; 32], [1; 32], now);
        let mut b = Connection::respond(
            ConnectionId(7),
            endpoint(1000),
            SessionSecret::from_bytes([1; 32]),
            BOB,
            AudioParams {
                codec: CodecKind::MuLaw,
                ..params()
            },
            timers(),
            now,
        )
        .unwrap();

        let ping = a.poll(now).unwrap().outgoing.unwrap();
        assert!(matches!(b.open(&ping, now), Err(VoiceError::InvalidConfig(_))));
        assert_eq!(b.state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_keepalive_and_liveness_timeout() {
        let start = Instant::now();
        let (mut a, mut b) = pair([2; 32], [2; 32], start);
        handshake(&mut a, &mut b, start);

        let t1 = start + Duration::from_secs(1);
        let keepalive = a.poll(t1).unwrap().outgoing.unwrap();
        b.open(&keepalive, t1).unwrap();
        assert!(a.poll(t1 + Duration::from_millis(10)).unwrap().outgoing.is_none());

        // B heard from A at t1; nothing after that
        let step = b.poll(t1 + Duration::from_secs(9)).unwrap();
        assert!(step.transition.is_none());
        let step = b.poll(t1 + Duration::from_secs(10)).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::TimedOut);
        assert!(b.seal(PacketType::KeepAlive, &[]).is_err());
    }

    #[test]
    fn test_replayed_datagram_rejected() {
        let now = Instant::now();
        let (mut a, mut b) = pair([3; 32], [3; 32], now);
        handshake(&mut a, &mut b, now);

        let audio = AudioPacket::new(0, 0, ALICE, Destination::Proximity, vec![1, 2, 3]);
        let datagram = a.seal(PacketType::Audio, &audio.encode().unwrap()).unwrap();
        let step = b.open(&datagram, now).unwrap();
        assert_eq!(step.inbound, Some(Inbound::Audio(audio)));
        assert!(matches!(b.open(&datagram, now), Err(VoiceError::ReplayDetected(_))));
    }

    #[test]
    fn test_spoofed_audio_source_rejected() {
        let now = Instant::now();
        let (mut a, mut b) = pair([3; 32], [3; 32], now);
        handshake(&mut a, &mut b, now);

        let spoofed = AudioPacket::new(0, 0, PlayerId(99), Destination::Proximity, vec![]);
        let datagram = a.seal(PacketType::Audio, &spoofed.encode().unwrap()).unwrap();
        assert!(b.open(&datagram, now).is_err());
    }

    #[test]
    fn test_explicit_close_notifies_peer() {
        let now = Instant::now();
        let (mut a, mut b) = pair([6; 32], [6; 32], now);
        handshake(&mut a, &mut b, now);

        let step = a.close();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Closed);
        let step = b.open(&step.outgoing.unwrap(), now).unwrap();
        assert_eq!(step.transition.unwrap().to, ConnectionState::Closed);
        assert!(matches!(b.open(&[0u8; 40], now), Err(VoiceError::ConnectionClosed(_))));
    }

    #[test]
    fn test_audio_before_connected_ignored() {
        let now = Instant::now();
        let (mut a, mut b) = pair([8; 32], [8; 32], now);
        // Responder connects, initiator has not seen the Pong yet
        let ping = a.poll(now).unwrap().outgoing.unwrap();
        b.open(&ping, now).unwrap();

        let audio = AudioPacket::new(0, 0, BOB, Destination::Proximity, vec![]);
        let datagram = b.seal(PacketType::Audio, &audio.encode().unwrap()).unwrap();
        let step = a.open(&datagram, now).unwrap();
        assert!(step.inbound.is_none());
        assert_eq!(a.state(), ConnectionState::Handshaking);
    }
}
