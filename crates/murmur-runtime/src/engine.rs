//! Voice engine facade
//!
//! `VoiceEngine` is a cheap handle around shared, id-keyed state:
//!
//! ```text
//! capture ──encode──route──seal──▶ transport ──open──buffer──▶ playout
//!                                                                 │
//!                           playback ◀──mix per listener◀── mix tick
//! ```
//!
//! Every operation can be driven directly (tests, simulations) or by the
//! tasks `start` spawns.
//!
//! Group control rides the same lossy channel as audio. Besides the
//! immediate broadcast on each change, every keepalive interval this node
//! re-sends an idempotent snapshot of its group state (groups it created or
//! belongs to, its membership or its last leave), so peers converge after
//! loss or reordering. Lock order: `manager` and `playout` are never held
//! together with each other; `groups` may be taken while `playout` is held,
//! never the reverse.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use murmur_audio::{Attenuation, MixInput, Placement, SourceFrame, SourceStream, SpatialMixer};
use murmur_codec::CodecAdapter;
use murmur_core::{
    AudioParams, ConnectionId, Destination, GroupId, GroupType, PcmFrame, PlayerId, Position,
    PositionLookup, VoiceConfig, VoiceError, VoiceResult,
};
use murmur_crypto::SessionSecret;
use murmur_transport::DatagramTransport;
use murmur_wire::{AudioPacket, GroupControl, PacketType};

use crate::{
    AudioStateStore, ChannelRouter, ConnectionInfo, ConnectionManager, ConnectionState,
    EngineStats, GroupInfo, GroupRegistry, Inbound, Pump, StatsSnapshot, Transition,
};

/// Lifecycle notifications for the collaborator layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        connection: ConnectionId,
        endpoint: SocketAddr,
        player: PlayerId,
    },
    /// The handshake never completed
    HandshakeTimedOut {
        connection: ConnectionId,
        endpoint: SocketAddr,
    },
    /// Voice chat disconnected: the peer went silent
    TimedOut {
        connection: ConnectionId,
        endpoint: SocketAddr,
        player: Option<PlayerId>,
    },
    Closed {
        connection: ConnectionId,
        endpoint: SocketAddr,
        player: Option<PlayerId>,
    },
}

impl ConnectionEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Connected { connection, .. }
            | ConnectionEvent::HandshakeTimedOut { connection, .. }
            | ConnectionEvent::TimedOut { connection, .. }
            | ConnectionEvent::Closed { connection, .. } => *connection,
        }
    }
}

/// One captured frame for the capture task
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedFrame {
    pub frame: PcmFrame,
    pub destination: Destination,
}

/// Sender-side codec state for one source
#[derive(Debug)]
struct Outbound {
    encoder: CodecAdapter,
    sequence: u32,
}

/// Receive-side streams plus the frames of the latest tick
///
/// One lock: a source removed on disconnect is either in a tick's snapshot
/// or not, never half torn down.
#[derive(Debug, Default)]
struct Playout {
    streams: HashMap<PlayerId, SourceStream>,
    frames: Vec<SourceFrame>,
    ticks: u64,
}

/// Group state this node announces to its peers
#[derive(Debug, Default)]
struct GroupSync {
    /// Groups created here, with the password they were created with
    created: HashMap<GroupId, Option<String>>,
    /// Local membership and the password it was accepted with
    joined: Option<(GroupId, Option<String>)>,
    /// Group left most recently, while not in any group
    left: Option<GroupId>,
    last_snapshot: Option<Instant>,
}

struct EngineInner {
    local_player: PlayerId,
    config: VoiceConfig,
    params: AudioParams,
    manager: Mutex<ConnectionManager>,
    groups: RwLock<GroupRegistry>,
    sync: Mutex<GroupSync>,
    state: AudioStateStore,
    router: ChannelRouter,
    outbound: Mutex<HashMap<PlayerId, Outbound>>,
    playout: Mutex<Playout>,
    mixer: SpatialMixer,
    positions: Arc<dyn PositionLookup>,
    stats: EngineStats,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Peer node serving one local player
#[derive(Clone)]
pub struct VoiceEngine {
    inner: Arc<EngineInner>,
}

impl VoiceEngine {
    /// Build an engine on `transport`. Lifecycle events arrive on the
    /// returned receiver.
    pub fn new(
        local_player: PlayerId,
        config: VoiceConfig,
        transport: Arc<dyn DatagramTransport>,
        positions: Arc<dyn PositionLookup>,
    ) -> VoiceResult<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        config.validate()?;
        if transport.mtu() < config.mtu as usize {
            return Err(VoiceError::InvalidConfig(format!(
                "transport mtu {} is below the configured {}",
                transport.mtu(),
                config.mtu
            )));
        }

        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = EngineInner {
            local_player,
            params: config.audio_params(),
            manager: Mutex::new(ConnectionManager::new(local_player, config.clone(), transport)),
            groups: RwLock::new(GroupRegistry::new(config.groups_enabled, config.keep_empty_groups)),
            sync: Mutex::new(GroupSync::default()),
            state: AudioStateStore::new(),
            router: ChannelRouter::new(config.max_whisper_targets),
            outbound: Mutex::new(HashMap::new()),
            playout: Mutex::new(Playout::default()),
            mixer: SpatialMixer::new(Attenuation::from_config(&config), config.frame_size as usize),
            positions,
            stats: EngineStats::new(),
            events,
            config,
        };
        Ok((
            VoiceEngine {
                inner: Arc::new(inner),
            },
            events_rx,
        ))
    }

    pub fn local_player(&self) -> PlayerId {
        self.inner.local_player
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.manager.lock().local_addr()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.inner.config
    }

    // --- Connections ---

    /// Start a handshake with a peer that registered the same secret
    pub fn connect(&self, endpoint: SocketAddr, secret: SessionSecret) -> VoiceResult<ConnectionId> {
        let (id, pump) = self.inner.manager.lock().connect(endpoint, secret, Instant::now())?;
        self.handle_pump(pump, Instant::now());
        Ok(id)
    }

    /// Expect a handshake from `endpoint` using `secret`
    pub fn accept(&self, endpoint: SocketAddr, secret: SessionSecret) -> VoiceResult<ConnectionId> {
        self.inner.manager.lock().accept(endpoint, secret, Instant::now())
    }

    pub fn disconnect(&self, connection: ConnectionId) -> VoiceResult<()> {
        let pump = self.inner.manager.lock().disconnect(connection)?;
        self.handle_pump(pump, Instant::now());
        Ok(())
    }

    pub fn connection_info(&self, connection: ConnectionId) -> VoiceResult<ConnectionInfo> {
        self.inner.manager.lock().connection_info(connection, Instant::now())
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.inner.manager.lock().connections(Instant::now())
    }

    /// Remote players with an active (connected) stream
    pub fn active_players(&self) -> Vec<PlayerId> {
        self.inner.router.active()
    }

    // --- Pipelines ---

    /// Capture path: encode one frame, route it, seal and send it.
    /// Returns the number of peers it was sent to.
    pub fn send_audio(&self, source: PlayerId, frame: &PcmFrame, destination: Destination) -> VoiceResult<usize> {
        let inner = &self.inner;
        if source != inner.local_player {
            return Err(VoiceError::InvalidConfig(format!(
                "this node sends audio for {} only",
                inner.local_player
            )));
        }
        if inner.state.is_muted(source) || inner.state.is_disabled(source) {
            return Ok(0);
        }

        let targets = inner
            .router
            .outbound_targets(source, &destination, &inner.groups.read())?;
        if targets.is_empty() {
            return Ok(0);
        }

        let (sequence, payload) = {
            let mut outbound = inner.outbound.lock();
            let entry = outbound.entry(source).or_insert_with(|| Outbound {
                encoder: CodecAdapter::new(inner.params.codec, inner.params.frame_size as usize),
                sequence: 0,
            });
            let payload = entry.encoder.encode(frame)?;
            let sequence = entry.sequence;
            entry.sequence = entry.sequence.wrapping_add(1);
            (sequence, payload)
        };

        let body = AudioPacket::new(sequence, unix_millis(), source, destination, payload).encode()?;

        let mut sent = 0;
        let mut manager = inner.manager.lock();
        for target in targets {
            match manager.send_to_player(target, PacketType::Audio, &body) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(%target, error = %e, "audio send failed");
                    inner.stats.dropped(&e);
                }
            }
        }
        drop(manager);

        inner.stats.packets_out(sent as u64);
        inner.stats.frame_sent();
        Ok(sent)
    }

    /// Receive path: drain the transport, authenticate and buffer
    pub fn process_incoming(&self, now: Instant) -> VoiceResult<()> {
        let result = self.inner.manager.lock().receive(now);
        match result {
            Ok(pump) => {
                self.handle_pump(pump, now);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport receive failed");
                self.inner.stats.dropped(&e);
                Err(e)
            }
        }
    }

    /// Handshake retries, keepalives, timeouts and the periodic group
    /// snapshot
    pub fn maintain(&self, now: Instant) {
        let pump = self.inner.manager.lock().poll_timers(now);
        self.handle_pump(pump, now);

        let due = {
            let mut sync = self.inner.sync.lock();
            let due = sync.last_snapshot.map_or(true, |at| {
                now.saturating_duration_since(at) >= self.inner.config.keepalive_interval
            });
            if due {
                sync.last_snapshot = Some(now);
            }
            due
        };
        if due {
            for control in self.group_snapshot() {
                self.broadcast_control(&control);
            }
        }
    }

    /// Read every source once for this tick. Returns the number of sources
    /// that produced a frame.
    pub fn mix_tick(&self) -> usize {
        let mut playout = self.inner.playout.lock();
        let mut frames = Vec::with_capacity(playout.streams.len());
        for stream in playout.streams.values_mut() {
            if let Some(frame) = stream.tick() {
                self.inner.stats.played(frame.origin);
                frames.push(frame);
            }
        }
        frames.sort_by_key(|f| f.source);
        playout.frames = frames;
        playout.ticks += 1;
        playout.frames.len()
    }

    /// Mix the latest tick for one listener
    ///
    /// Sources are filtered per listener (mute, disable, volume, groups,
    /// whisper targets) before any mixing. Proximity sources without a
    /// known position, or heard by a listener without one, are skipped.
    pub fn poll_mixed_output(&self, listener: PlayerId) -> PcmFrame {
        let inner = &self.inner;
        let listener_at = inner.positions.position(listener);

        let playout = inner.playout.lock();
        let groups = inner.groups.read();
        let mut inputs = Vec::with_capacity(playout.frames.len());
        for frame in &playout.frames {
            let Some(admission) =
                inner
                    .router
                    .admit(listener, frame.source, &frame.destination, &groups, &inner.state)
            else {
                continue;
            };
            let placement = if admission.direct {
                Placement::Direct
            } else {
                match (listener_at, inner.positions.position(frame.source)) {
                    (Some(_), Some(at)) => Placement::At(at),
                    _ => continue,
                }
            };
            inputs.push(MixInput {
                frame: &frame.frame,
                placement,
                volume: admission.volume,
            });
        }

        let mixed = inner.mixer.mix(listener_at.unwrap_or(Position::ORIGIN), &inputs);
        drop(groups);
        drop(playout);
        inner.stats.frame_mixed();
        mixed.frame
    }

    // --- Groups ---

    /// Create a group and join it
    pub fn create_group(&self, name: &str, password: Option<&str>, kind: GroupType) -> VoiceResult<GroupId> {
        let inner = &self.inner;
        let group = GroupId(rand::random());
        let name = {
            let mut groups = inner.groups.write();
            groups.create(group, name, password, kind)?;
            let name = groups.get(group).map(|g| g.name().to_string()).unwrap_or_default();
            if let Err(e) = groups.join(inner.local_player, group, password) {
                groups.remove(group);
                return Err(e);
            }
            name
        };
        {
            let mut sync = inner.sync.lock();
            sync.created.insert(group, password.map(str::to_string));
            sync.joined = Some((group, password.map(str::to_string)));
            sync.left = None;
        }

        tracing::info!(%group, %name, ?kind, "group created");
        self.broadcast_control(&GroupControl::Create {
            group,
            name,
            password: password.map(str::to_string),
            kind,
        });
        self.broadcast_control(&GroupControl::Join {
            group,
            password: password.map(str::to_string),
        });
        Ok(group)
    }

    /// Join a group, leaving the current one
    pub fn join_group(&self, group: GroupId, password: Option<&str>) -> VoiceResult<()> {
        let inner = &self.inner;
        let outcome = inner.groups.write().join(inner.local_player, group, password)?;
        {
            let mut sync = inner.sync.lock();
            sync.joined = Some((group, password.map(str::to_string)));
            sync.left = None;
        }
        tracing::info!(%group, left = ?outcome.left, "joined group");
        self.broadcast_control(&GroupControl::Join {
            group,
            password: password.map(str::to_string),
        });
        Ok(())
    }

    /// Leave the current group. Returns the group left, if any.
    pub fn leave_group(&self) -> VoiceResult<Option<GroupId>> {
        let inner = &self.inner;
        let mut groups = inner.groups.write();
        if !groups.is_enabled() {
            return Err(VoiceError::GroupsDisabled);
        }
        let left = groups.leave(inner.local_player);
        drop(groups);

        {
            let mut sync = inner.sync.lock();
            sync.joined = None;
            if left.is_some() {
                sync.left = left;
            }
        }
        if let Some(group) = left {
            tracing::info!(%group, "left group");
            self.broadcast_control(&GroupControl::Leave { group });
        }
        Ok(left)
    }

    pub fn groups(&self) -> Vec<GroupInfo> {
        self.inner.groups.read().list()
    }

    pub fn group_of(&self, player: PlayerId) -> Option<GroupId> {
        self.inner.groups.read().group_of(player)
    }

    // --- Player settings ---

    pub fn set_muted(&self, player: PlayerId, muted: bool) {
        self.inner.state.set_muted(player, muted);
    }

    pub fn set_disabled(&self, player: PlayerId, disabled: bool) {
        self.inner.state.set_disabled(player, disabled);
    }

    /// Per-listener volume of `target`; returns the clamped value stored
    pub fn set_volume(&self, listener: PlayerId, target: PlayerId, volume: f32) -> f32 {
        self.inner.state.set_volume(listener, target, volume)
    }

    pub fn audio_state(&self) -> &AudioStateStore {
        &self.inner.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    // --- Tasks ---

    /// Spawn the capture, receive, mix and maintenance tasks on the current
    /// tokio runtime. Mixed frames for the local player go to `playback`;
    /// a full playback queue drops the frame.
    pub fn start(
        &self,
        mut capture: mpsc::Receiver<CapturedFrame>,
        playback: mpsc::Sender<PcmFrame>,
    ) -> EngineTasks {
        let config = &self.inner.config;
        let mut handles = Vec::with_capacity(4);

        let engine = self.clone();
        handles.push(tokio::spawn(async move {
            while let Some(captured) = capture.recv().await {
                let local = engine.local_player();
                if let Err(e) = engine.send_audio(local, &captured.frame, captured.destination) {
                    tracing::debug!(error = %e, "captured frame not sent");
                }
            }
            tracing::debug!("capture queue closed");
        }));

        let engine = self.clone();
        let poll_every = config.receive_poll_interval.max(Duration::from_millis(1));
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let _ = engine.process_incoming(Instant::now());
            }
        }));

        let engine = self.clone();
        let frame_every = config.frame_duration();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(frame_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.mix_tick();
                let frame = engine.poll_mixed_output(engine.local_player());
                match playback.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("playback queue full, frame dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }));

        let engine = self.clone();
        let maintain_every = maintenance_interval(config);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(maintain_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.maintain(Instant::now());
            }
        }));

        tracing::info!(player = %self.inner.local_player, "voice engine started");
        EngineTasks { handles }
    }

    // --- Internals ---

    fn handle_pump(&self, pump: Pump, now: Instant) {
        let inner = &self.inner;
        inner.stats.packets_in(pump.packets_in);
        inner.stats.packets_out(pump.packets_out);
        for error in &pump.dropped {
            inner.stats.dropped(error);
        }
        for transition in pump.transitions {
            self.handle_transition(transition);
        }
        for delivery in pump.delivered {
            let Some(player) = delivery.player else {
                continue;
            };
            match delivery.inbound {
                Inbound::Audio(packet) => self.buffer_audio(packet, now),
                Inbound::Group(control) => self.apply_remote_control(player, control),
            }
        }
    }

    fn buffer_audio(&self, packet: AudioPacket, now: Instant) {
        let inner = &self.inner;
        let source = packet.source();
        if !inner.router.is_active(source) {
            return;
        }
        // Listener-independent filters: no point decoding these
        let flags = inner.state.flags(source);
        if flags.muted || flags.disabled {
            return;
        }

        let mut playout = inner.playout.lock();
        let stream = playout
            .streams
            .entry(source)
            .or_insert_with(|| SourceStream::new(source, inner.params, &inner.config));
        let outcome = stream.push(packet, now);
        inner.stats.pushed(outcome);
    }

    fn handle_transition(&self, transition: Transition) {
        let inner = &self.inner;
        let Transition {
            id,
            endpoint,
            from,
            to,
            remote_player,
            cause,
        } = transition;

        let event = match (from, to) {
            (_, ConnectionState::Connected) => {
                let Some(player) = remote_player else {
                    return;
                };
                inner.router.activate(player);
                // A new session restarts the peer's audio sequence
                if let Some(mut stream) = inner.playout.lock().streams.remove(&player) {
                    stream.flush();
                }
                self.announce_groups(player);
                ConnectionEvent::Connected {
                    connection: id,
                    endpoint,
                    player,
                }
            }
            (ConnectionState::Handshaking, ConnectionState::TimedOut) => {
                if let Some(cause) = &cause {
                    tracing::warn!(conn = %id, %endpoint, error = %cause, "handshake failed");
                }
                ConnectionEvent::HandshakeTimedOut {
                    connection: id,
                    endpoint,
                }
            }
            (_, ConnectionState::TimedOut) => {
                self.release_player(remote_player);
                ConnectionEvent::TimedOut {
                    connection: id,
                    endpoint,
                    player: remote_player,
                }
            }
            (_, ConnectionState::Closed) => {
                if from == ConnectionState::Connected {
                    self.release_player(remote_player);
                }
                ConnectionEvent::Closed {
                    connection: id,
                    endpoint,
                    player: remote_player,
                }
            }
            (_, ConnectionState::Handshaking) => return,
        };
        // A dropped receiver only means nobody is listening
        let _ = inner.events.send(event);
    }

    /// Tear down everything kept for a player whose connection ended
    fn release_player(&self, player: Option<PlayerId>) {
        let Some(player) = player else {
            return;
        };
        let inner = &self.inner;
        if inner.manager.lock().connection_for_player(player).is_some() {
            // Still reachable over a newer connection
            return;
        }
        inner.router.deactivate(player);
        if let Some(mut stream) = inner.playout.lock().streams.remove(&player) {
            stream.flush();
        }
        // Mute and disable flags are the local user's choice and outlive the link
        inner.groups.write().leave(player);
        tracing::debug!(%player, "player released");
    }

    fn apply_remote_control(&self, player: PlayerId, control: GroupControl) {
        let mut groups = self.inner.groups.write();
        let result = match control {
            GroupControl::Create {
                group,
                name,
                password,
                kind,
            } => groups.create(group, &name, password.as_deref(), kind),
            GroupControl::Join { group, password } => {
                groups.join(player, group, password.as_deref()).map(|_| ())
            }
            GroupControl::Leave { group } => {
                if groups.is_member(player, group) {
                    groups.leave(player);
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::warn!(%player, error = %e, "group control from peer rejected");
        }
    }

    /// Bring a newly connected peer up to date with what this node knows
    fn announce_groups(&self, player: PlayerId) {
        let messages = self.group_snapshot();
        let mut manager = self.inner.manager.lock();
        for control in messages {
            let result = control
                .encode()
                .and_then(|body| manager.send_to_player(player, PacketType::GroupControl, &body));
            if let Err(e) = result {
                tracing::debug!(%player, error = %e, "group announcement not sent");
            }
        }
    }

    /// Local group state as idempotent control messages, Create before Join
    fn group_snapshot(&self) -> Vec<GroupControl> {
        let inner = &self.inner;
        let groups = inner.groups.read();
        if !groups.is_enabled() {
            return Vec::new();
        }
        let sync = inner.sync.lock();
        let mut messages = Vec::new();
        let mut announce = |group: GroupId, password: &Option<String>| {
            if let Some(g) = groups.get(group) {
                messages.push(GroupControl::Create {
                    group,
                    name: g.name().to_string(),
                    password: password.clone(),
                    kind: g.kind(),
                });
            }
        };
        for (group, password) in &sync.created {
            announce(*group, password);
        }
        if let Some((group, password)) = &sync.joined {
            if !sync.created.contains_key(group) {
                announce(*group, password);
            }
        }
        match (&sync.joined, sync.left) {
            (Some((group, password)), _) if groups.is_member(inner.local_player, *group) => {
                messages.push(GroupControl::Join {
                    group: *group,
                    password: password.clone(),
                });
            }
            (None, Some(group)) => messages.push(GroupControl::Leave { group }),
            _ => {}
        }
        messages
    }

    fn broadcast_control(&self, control: &GroupControl) {
        let body = match control.encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "group control not encodable");
                return;
            }
        };
        let (sent, errors) = self.inner.manager.lock().broadcast(PacketType::GroupControl, &body);
        self.inner.stats.packets_out(sent as u64);
        for e in &errors {
            self.inner.stats.dropped(e);
        }
    }
}

impl std::fmt::Debug for VoiceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceEngine")
            .field("local_player", &self.inner.local_player)
            .field("params", &self.inner.params)
            .finish_non_exhaustive()
    }
}

/// Handles of the pipeline tasks; aborted on drop
#[derive(Debug)]
pub struct EngineTasks {
    handles: Vec<JoinHandle<()>>,
}

impl EngineTasks {
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for EngineTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn maintenance_interval(config: &VoiceConfig) -> Duration {
    let base = config.handshake_retry_interval.min(config.keepalive_interval) / 2;
    base.max(Duration::from_millis(1))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
