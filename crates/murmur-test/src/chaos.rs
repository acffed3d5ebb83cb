//! Network simulation for voice tests
//!
//! Wraps any `DatagramTransport` and degrades it:
//! - Packet loss (random and bursty)
//! - Reordering (datagrams held back for a few receive polls)
//! - Duplication
//!
//! All randomness comes from one seeded `StdRng`, so a failing run can be
//! replayed exactly.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use murmur_core::VoiceResult;
use murmur_transport::{Datagram, DatagramTransport};

/// Network degradation profile
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Packet loss rate (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability that a send starts a loss burst
    pub burst_loss_prob: f64,
    /// Burst length range (packets)
    pub burst_length: (u32, u32),
    /// Probability that a datagram is held back
    pub reorder_prob: f64,
    /// Most receive polls a datagram can be held back
    pub reorder_depth: u32,
    pub duplicate_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.01,
            burst_loss_prob: 0.0,
            burst_length: (2, 5),
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.01,
        }
    }
}

impl ChaosConfig {
    /// Nothing degraded
    pub fn perfect() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
        }
    }

    /// Heavy reordering and duplication, no loss
    pub fn shuffled() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            burst_loss_prob: 0.0,
            burst_length: (0, 0),
            reorder_prob: 0.4,
            reorder_depth: 3,
            duplicate_prob: 0.1,
        }
    }

    /// Poor wireless link
    pub fn poor() -> Self {
        ChaosConfig {
            loss_rate: 0.05,
            burst_loss_prob: 0.02,
            burst_length: (2, 6),
            reorder_prob: 0.1,
            reorder_depth: 4,
            duplicate_prob: 0.02,
        }
    }
}

/// What the simulator did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub packets_reordered: u64,
    pub packets_duplicated: u64,
}

impl ChaosStats {
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f64 / self.packets_sent as f64
        }
    }
}

struct ChaosState {
    config: ChaosConfig,
    rng: StdRng,
    burst_remaining: u32,
    stats: ChaosStats,
}

impl ChaosState {
    fn should_drop(&mut self) -> bool {
        if self.burst_remaining > 0 {
            self.burst_remaining -= 1;
            return true;
        }
        if self.config.burst_loss_prob > 0.0 && self.rng.gen::<f64>() < self.config.burst_loss_prob {
            let (min, max) = self.config.burst_length;
            self.burst_remaining = self.rng.gen_range(min..=max.max(min));
            return true;
        }
        self.config.loss_rate > 0.0 && self.rng.gen::<f64>() < self.config.loss_rate
    }

    /// Polls to hold a datagram back; 0 delivers it now
    fn hold_for(&mut self) -> u32 {
        if self.config.reorder_depth == 0 || self.rng.gen::<f64>() >= self.config.reorder_prob {
            return 0;
        }
        self.stats.packets_reordered += 1;
        self.rng.gen_range(1..=self.config.reorder_depth)
    }

    fn duplicate(&mut self) -> bool {
        let dup = self.config.duplicate_prob > 0.0 && self.rng.gen::<f64>() < self.config.duplicate_prob;
        if dup {
            self.stats.packets_duplicated += 1;
        }
        dup
    }
}

/// Seeded chaos shared by every endpoint it wraps
#[derive(Clone)]
pub struct NetworkSimulator {
    state: Arc<Mutex<ChaosState>>,
}

impl NetworkSimulator {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        NetworkSimulator {
            state: Arc::new(Mutex::new(ChaosState {
                config,
                rng: StdRng::seed_from_u64(seed),
                burst_remaining: 0,
                stats: ChaosStats::default(),
            })),
        }
    }

    /// Degrade `inner` according to this simulator's profile
    pub fn wrap<T: DatagramTransport>(&self, inner: T) -> SimulatedTransport<T> {
        SimulatedTransport {
            inner,
            state: Arc::clone(&self.state),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Change the profile mid-run
    pub fn set_config(&self, config: ChaosConfig) {
        self.state.lock().config = config;
    }

    pub fn stats(&self) -> ChaosStats {
        self.state.lock().stats.clone()
    }
}

impl std::fmt::Debug for NetworkSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NetworkSimulator")
            .field("config", &state.config)
            .field("stats", &state.stats)
            .finish()
    }
}

/// A transport behind a `NetworkSimulator`
pub struct SimulatedTransport<T> {
    inner: T,
    state: Arc<Mutex<ChaosState>>,
    /// Datagrams held back, with the polls left before delivery
    held: Mutex<Vec<(u32, Datagram)>>,
}

impl<T: DatagramTransport> SimulatedTransport<T> {
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: DatagramTransport> DatagramTransport for SimulatedTransport<T> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }

    fn send(&self, dest: SocketAddr, bytes: &[u8]) -> VoiceResult<()> {
        let (lost, dup) = {
            let mut state = self.state.lock();
            state.stats.packets_sent += 1;
            if state.should_drop() {
                state.stats.packets_lost += 1;
                (true, false)
            } else {
                (false, state.duplicate())
            }
        };
        if lost {
            return Ok(());
        }
        self.inner.send(dest, bytes)?;
        if dup {
            self.inner.send(dest, bytes)?;
        }
        Ok(())
    }

    fn receive(&self) -> VoiceResult<Vec<Datagram>> {
        let arrived = self.inner.receive()?;
        let mut held = self.held.lock();

        // Release what has waited long enough, ahead of anything newer
        let mut ready = Vec::new();
        let mut still_held = Vec::with_capacity(held.len());
        for (polls, datagram) in held.drain(..) {
            if polls <= 1 {
                ready.push(datagram);
            } else {
                still_held.push((polls - 1, datagram));
            }
        }
        *held = still_held;

        let mut state = self.state.lock();
        for datagram in arrived {
            match state.hold_for() {
                0 => ready.push(datagram),
                polls => held.push((polls, datagram)),
            }
        }
        Ok(ready)
    }
}
