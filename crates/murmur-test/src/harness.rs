//! Multi-node harness for end-to-end scenarios
//!
//! Every node is a full `VoiceEngine` on an in-memory network, optionally
//! behind a `NetworkSimulator`. Nodes are driven by hand (no tasks) so
//! scenarios are deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use murmur_core::{PcmFrame, PlayerId, Position, PositionLookup, VoiceConfig, VoiceResult};
use murmur_crypto::SessionSecret;
use murmur_runtime::{ConnectionEvent, VoiceEngine};
use murmur_transport::{DatagramTransport, MemoryNetwork};

use crate::NetworkSimulator;

/// World positions that scenarios can move around
#[derive(Debug, Default)]
pub struct PositionBoard {
    positions: RwLock<HashMap<PlayerId, Position>>,
}

impl PositionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, player: PlayerId, at: Position) {
        self.positions.write().insert(player, at);
    }

    pub fn remove(&self, player: PlayerId) {
        self.positions.write().remove(&player);
    }
}

impl PositionLookup for PositionBoard {
    fn position(&self, player: PlayerId) -> Option<Position> {
        self.positions.read().get(&player).copied()
    }
}

/// One engine and its event stream
pub struct TestNode {
    pub engine: VoiceEngine,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl TestNode {
    pub fn player(&self) -> PlayerId {
        self.engine.local_player()
    }

    /// Every event received so far
    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A set of engines sharing one network and one world
pub struct Cluster {
    network: MemoryNetwork,
    simulator: Option<NetworkSimulator>,
    config: VoiceConfig,
    board: Arc<PositionBoard>,
    nodes: Vec<TestNode>,
}

impl Cluster {
    pub fn new(config: VoiceConfig) -> Self {
        Cluster {
            network: MemoryNetwork::new(),
            simulator: None,
            config,
            board: Arc::new(PositionBoard::new()),
            nodes: Vec::new(),
        }
    }

    /// Put every node added from now on behind `simulator`
    pub fn with_simulator(mut self, simulator: NetworkSimulator) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    pub fn board(&self) -> &PositionBoard {
        &self.board
    }

    /// Add a node for `player` standing at `at`. Returns its index.
    pub fn add(&mut self, player: PlayerId, at: Position) -> VoiceResult<usize> {
        let endpoint = self.network.bind_any(self.config.mtu as usize);
        let transport: Arc<dyn DatagramTransport> = match &self.simulator {
            Some(sim) => Arc::new(sim.wrap(endpoint)),
            None => Arc::new(endpoint),
        };
        let positions: Arc<dyn PositionLookup> = self.board.clone();
        let (engine, events) = VoiceEngine::new(player, self.config.clone(), transport, positions)?;
        self.board.place(player, at);
        self.nodes.push(TestNode { engine, events });
        Ok(self.nodes.len() - 1)
    }

    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut TestNode {
        &mut self.nodes[index]
    }

    pub fn engine(&self, index: usize) -> &VoiceEngine {
        &self.nodes[index].engine
    }

    /// Register a fresh shared secret on both nodes and start the handshake
    /// from `initiator`
    pub fn link_with(&self, initiator: usize, responder: usize, secret: SessionSecret) -> VoiceResult<()> {
        let (a, b) = (&self.nodes[initiator].engine, &self.nodes[responder].engine);
        b.accept(a.local_addr(), secret.clone())?;
        a.connect(b.local_addr(), secret)?;
        Ok(())
    }

    /// Link two nodes and run the handshake to completion
    pub fn link(&self, initiator: usize, responder: usize) -> VoiceResult<()> {
        self.link_with(initiator, responder, SessionSecret::generate())?;
        self.settle(6);
        Ok(())
    }

    /// Link every pair of nodes
    pub fn mesh(&self) -> VoiceResult<()> {
        for i in 0..self.nodes.len() {
            for j in i + 1..self.nodes.len() {
                self.link(i, j)?;
            }
        }
        Ok(())
    }

    /// Run receive and timer passes on every node, `rounds` times
    pub fn settle(&self, rounds: usize) {
        for _ in 0..rounds {
            let now = Instant::now();
            for node in &self.nodes {
                // Transport failures are counted in stats; scenarios check those
                let _ = node.engine.process_incoming(now);
                node.engine.maintain(now);
            }
        }
    }

    /// `settle` on a simulated clock: one round every `step` from `start`
    /// until `duration` has passed. Returns the time reached.
    pub fn run_for(&self, start: Instant, duration: Duration, step: Duration) -> Instant {
        let mut now = start;
        while now.saturating_duration_since(start) < duration {
            now += step;
            for node in &self.nodes {
                let _ = node.engine.process_incoming(now);
                node.engine.maintain(now);
            }
        }
        now
    }

    /// One mix tick on `index`, mixed for its own player
    pub fn mix(&self, index: usize) -> PcmFrame {
        let engine = &self.nodes[index].engine;
        engine.mix_tick();
        engine.poll_mixed_output(engine.local_player())
    }
}

/// Constant-amplitude frame
pub fn flat_frame(frame_size: usize, amplitude: i16) -> PcmFrame {
    PcmFrame::new(vec![amplitude; frame_size])
}

/// Frame whose samples all carry `marker`, so a received frame identifies
/// the sent one
pub fn marked_frame(frame_size: usize, marker: u16) -> PcmFrame {
    flat_frame(frame_size, (marker % 30_000) as i16 + 1)
}
