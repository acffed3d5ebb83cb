//! Engine configuration
//!
//! Loaded and owned by the host application; read-only to the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AudioParams, CodecKind, VoiceError, VoiceResult};

/// Bytes an audio datagram carries on top of the codec payload when routed
/// to proximity or a group: packet header (5), audio fields (31), AEAD tag (16)
pub const AUDIO_FRAMING_OVERHEAD: usize = 52;

/// Upper bound for per-listener volume multipliers (+300%)
pub const MAX_VOLUME: f32 = 4.0;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 512;

/// Maximum group password length in characters
pub const MAX_GROUP_PASSWORD_LEN: usize = 512;

/// Voice engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Samples per second
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: u16,
    /// Codec
    pub codec: CodecKind,
    /// Maximum datagram size in bytes
    pub mtu: u16,
    /// Interval between keepalives on a connected link
    pub keepalive_interval: Duration,
    /// Keepalive intervals without any packet before a link is timed out
    pub timeout_multiplier: u32,
    /// Time allowed for the handshake to complete
    pub handshake_timeout: Duration,
    /// Interval between handshake pings
    pub handshake_retry_interval: Duration,
    /// Distance up to which proximity audio plays at full volume
    pub full_volume_radius: f64,
    /// Distance at which proximity audio reaches zero
    pub fade_distance: f64,
    /// Whether group audio and group control are available
    pub groups_enabled: bool,
    /// Keep groups resident after the last member leaves
    pub keep_empty_groups: bool,
    /// Jitter buffer slots per source
    pub jitter_window: u16,
    /// Frames of playout delay before the first frame of a talk spurt
    pub jitter_playout_delay: u16,
    /// Consecutive empty reads after which an idle source stops concealing
    pub jitter_idle_after: u16,
    /// Conceal the first lost frame by fading out the previous one
    pub conceal_with_fade: bool,
    /// Maximum recipients of one whisper
    pub max_whisper_targets: usize,
    /// Capacity of the capture and playback queues (frames)
    pub queue_capacity: usize,
    /// Interval at which the receive path polls the transport
    pub receive_poll_interval: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        VoiceConfig {
            sample_rate: 48_000,
            frame_size: 960,
            codec: CodecKind::Adpcm,
            mtu: 1024,
            keepalive_interval: Duration::from_secs(1),
            timeout_multiplier: 10,
            handshake_timeout: Duration::from_secs(10),
            handshake_retry_interval: Duration::from_millis(500),
            full_volume_radius: 5.0,
            fade_distance: 48.0,
            groups_enabled: true,
            keep_empty_groups: false,
            jitter_window: 16,
            jitter_playout_delay: 3,
            jitter_idle_after: 16,
            conceal_with_fade: true,
            max_whisper_targets: 8,
            queue_capacity: 32,
            receive_poll_interval: Duration::from_millis(2),
        }
    }
}

impl VoiceConfig {
    /// Short frames and a shallow jitter buffer for LAN-class links
    pub fn low_latency() -> Self {
        VoiceConfig {
            frame_size: 480,
            jitter_window: 12,
            jitter_playout_delay: 2,
            jitter_idle_after: 12,
            ..Default::default()
        }
    }

    /// Deeper buffering and a longer liveness timeout for lossy links
    pub fn lossy_network() -> Self {
        VoiceConfig {
            jitter_window: 32,
            jitter_playout_delay: 6,
            jitter_idle_after: 32,
            timeout_multiplier: 20,
            handshake_timeout: Duration::from_secs(20),
            ..Default::default()
        }
    }

    /// Audio parameters offered during the handshake
    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            mtu: self.mtu,
            codec: self.codec,
        }
    }

    /// Wall-clock duration of one frame
    pub fn frame_duration(&self) -> Duration {
        self.audio_params().frame_duration()
    }

    /// Time without packets after which a connected link is timed out
    pub fn liveness_timeout(&self) -> Duration {
        self.keepalive_interval * self.timeout_multiplier
    }

    /// Check that the configuration is internally consistent
    pub fn validate(&self) -> VoiceResult<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive"));
        }
        if self.frame_size == 0 {
            return Err(invalid("frame_size must be positive"));
        }
        let worst_case = self.codec.max_encoded_len(self.frame_size as usize) + AUDIO_FRAMING_OVERHEAD;
        if worst_case > self.mtu as usize {
            return Err(invalid(&format!(
                "encoded frame needs {} bytes but mtu is {}",
                worst_case, self.mtu
            )));
        }
        if self.keepalive_interval.is_zero() || self.timeout_multiplier == 0 {
            return Err(invalid("keepalive interval and timeout multiplier must be positive"));
        }
        if self.handshake_retry_interval.is_zero()
            || self.handshake_retry_interval > self.handshake_timeout
        {
            return Err(invalid("handshake retry interval must be within the handshake timeout"));
        }
        if !(self.full_volume_radius >= 0.0 && self.fade_distance > self.full_volume_radius) {
            return Err(invalid("fade_distance must exceed full_volume_radius"));
        }
        if self.jitter_window < 2 {
            return Err(invalid("jitter_window must hold at least two frames"));
        }
        if self.jitter_playout_delay >= self.jitter_window {
            return Err(invalid("jitter_playout_delay must be smaller than jitter_window"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> VoiceError {
    VoiceError::InvalidConfig(msg.to_string())
}
