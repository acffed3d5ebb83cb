//! Engine diagnostics
//!
//! Counters are bumped from every pipeline task, so they are plain atomics
//! with relaxed ordering; a snapshot is only approximately consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use murmur_audio::{FrameOrigin, PushOutcome};
use murmur_core::VoiceError;

#[derive(Debug, Default)]
pub struct EngineStats {
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    frames_sent: AtomicU64,
    frames_mixed: AtomicU64,
    auth_failures: AtomicU64,
    replays: AtomicU64,
    malformed: AtomicU64,
    decode_failures: AtomicU64,
    frames_concealed: AtomicU64,
    late_drops: AtomicU64,
    duplicates: AtomicU64,
    resyncs: AtomicU64,
    transport_errors: AtomicU64,
    handshakes_rejected: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub packets_in: u64,
    pub packets_out: u64,
    pub frames_sent: u64,
    pub frames_mixed: u64,
    pub auth_failures: u64,
    pub replays: u64,
    pub malformed: u64,
    pub decode_failures: u64,
    pub frames_concealed: u64,
    pub late_drops: u64,
    pub duplicates: u64,
    pub resyncs: u64,
    pub transport_errors: u64,
    pub handshakes_rejected: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_in(&self, n: u64) {
        bump(&self.packets_in, n);
    }

    pub fn packets_out(&self, n: u64) {
        bump(&self.packets_out, n);
    }

    pub fn frame_sent(&self) {
        bump(&self.frames_sent, 1);
    }

    pub fn frame_mixed(&self) {
        bump(&self.frames_mixed, 1);
    }

    /// Count a packet that was dropped because of `error`
    pub fn dropped(&self, error: &VoiceError) {
        let counter = match error {
            VoiceError::AuthError => &self.auth_failures,
            VoiceError::ReplayDetected(_) => &self.replays,
            VoiceError::DecodeError(_) => &self.decode_failures,
            VoiceError::TransportError(_) | VoiceError::PayloadTooLarge { .. } => &self.transport_errors,
            VoiceError::InvalidConfig(_) => &self.handshakes_rejected,
            _ => &self.malformed,
        };
        bump(counter, 1);
    }

    pub fn pushed(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Stored => {}
            PushOutcome::Duplicate => bump(&self.duplicates, 1),
            PushOutcome::TooLate => bump(&self.late_drops, 1),
            PushOutcome::Resynced { .. } => bump(&self.resyncs, 1),
        }
    }

    pub fn played(&self, origin: FrameOrigin) {
        match origin {
            FrameOrigin::Decoded => {}
            FrameOrigin::DecodeFailed => bump(&self.decode_failures, 1),
            FrameOrigin::FadeOut | FrameOrigin::Silence => bump(&self.frames_concealed, 1),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            packets_in: get(&self.packets_in),
            packets_out: get(&self.packets_out),
            frames_sent: get(&self.frames_sent),
            frames_mixed: get(&self.frames_mixed),
            auth_failures: get(&self.auth_failures),
            replays: get(&self.replays),
            malformed: get(&self.malformed),
            decode_failures: get(&self.decode_failures),
            frames_concealed: get(&self.frames_concealed),
            late_drops: get(&self.late_drops),
            duplicates: get(&self.duplicates),
            resyncs: get(&self.resyncs),
            transport_errors: get(&self.transport_errors),
            handshakes_rejected: get(&self.handshakes_rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_classification() {
        let stats = EngineStats::new();
        stats.dropped(&VoiceError::AuthError);
        stats.dropped(&VoiceError::AuthError);
        stats.dropped(&VoiceError::ReplayDetected(4));
        stats.dropped(&VoiceError::InvalidConfig("codec".into()));
        stats.dropped(&VoiceError::BufferTooShort { expected: 4, actual: 1 });

        let snap = stats.snapshot();
        assert_eq!(snap.auth_failures, 2);
        assert_eq!(snap.replays, 1);
        assert_eq!(snap.handshakes_rejected, 1);
        assert_eq!(snap.malformed, 1);
    }

    #[test]
    fn test_jitter_and_playout_counters() {
        let stats = EngineStats::new();
        stats.pushed(PushOutcome::Stored);
        stats.pushed(PushOutcome::Duplicate);
        stats.pushed(PushOutcome::TooLate);
        stats.pushed(PushOutcome::Resynced { dropped: 3, ahead: 40 });
        stats.played(FrameOrigin::Decoded);
        stats.played(FrameOrigin::FadeOut);
        stats.played(FrameOrigin::Silence);

        let snap = stats.snapshot();
        assert_eq!((snap.duplicates, snap.late_drops, snap.resyncs), (1, 1, 1));
        assert_eq!(snap.frames_concealed, 2);
        assert_eq!(snap.decode_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = EngineStats::new();
        stats.packets_in(3);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["packets_in"], 3);
    }
}
