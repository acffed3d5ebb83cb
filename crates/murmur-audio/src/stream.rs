//! Per-source playout stream
//!
//! Owns everything receive-side for one remote source: its jitter buffer,
//! its decoder (codec state is per source and per direction) and the last
//! played frame for fade-out concealment. Exactly one pipeline stage touches
//! a stream at a time.

use std::time::Instant;

use murmur_codec::CodecAdapter;
use murmur_core::{AudioParams, Destination, PcmFrame, PlayerId, VoiceConfig, VoiceError};
use murmur_wire::AudioPacket;

use crate::{JitterBuffer, JitterConfig, JitterRead, PushOutcome};

/// Buffered payload plus the routing it arrived with
#[derive(Clone, Debug)]
struct Routed {
    destination: Destination,
    payload: Vec<u8>,
}

/// How a played frame was produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Decoded from a received packet
    Decoded,
    /// Payload failed to decode; silence substituted
    DecodeFailed,
    /// Previous frame faded out in place of a missing one
    FadeOut,
    /// Silence in place of a missing frame
    Silence,
}

impl FrameOrigin {
    pub fn is_concealment(self) -> bool {
        matches!(self, FrameOrigin::FadeOut | FrameOrigin::Silence)
    }
}

/// One frame of one source, ready for routing and mixing
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFrame {
    pub source: PlayerId,
    pub destination: Destination,
    pub frame: PcmFrame,
    pub origin: FrameOrigin,
}

/// Receive-side state for one remote source
pub struct SourceStream {
    source: PlayerId,
    jitter: JitterBuffer<Routed>,
    decoder: CodecAdapter,
    frame_size: usize,
    conceal_with_fade: bool,
    last_frame: Option<PcmFrame>,
    last_destination: Destination,
    last_arrival: Option<Instant>,
}

impl SourceStream {
    pub fn new(source: PlayerId, params: AudioParams, config: &VoiceConfig) -> Self {
        let jitter = JitterBuffer::new(JitterConfig {
            capacity: config.jitter_window as usize,
            playout_delay: config.jitter_playout_delay as u32,
            idle_after: config.jitter_idle_after as u32,
        });
        SourceStream {
            source,
            jitter,
            decoder: CodecAdapter::new(params.codec, params.frame_size as usize),
            frame_size: params.frame_size as usize,
            conceal_with_fade: config.conceal_with_fade,
            last_frame: None,
            last_destination: Destination::Proximity,
            last_arrival: None,
        }
    }

    pub fn source(&self) -> PlayerId {
        self.source
    }

    pub fn is_idle(&self) -> bool {
        self.jitter.is_idle()
    }

    pub fn pending(&self) -> usize {
        self.jitter.pending()
    }

    /// Time of the most recent arrival
    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    /// Buffer an arriving packet
    pub fn push(&mut self, packet: AudioPacket, now: Instant) -> PushOutcome {
        let sequence = packet.sequence();
        let (destination, payload) = packet.into_parts();
        self.last_arrival = Some(now);

        let outcome = self.jitter.push(
            sequence,
            now,
            Routed {
                destination,
                payload,
            },
        );

        if let PushOutcome::Resynced { dropped, ahead } = outcome {
            tracing::debug!(
                source = %self.source,
                dropped,
                error = %VoiceError::BufferOverrun { seq: sequence, ahead },
                "jitter window exceeded, resynchronized"
            );
        }
        outcome
    }

    /// Produce this source's frame for the current mix tick
    ///
    /// Returns `None` while the source is idle.
    pub fn tick(&mut self) -> Option<SourceFrame> {
        match self.jitter.read() {
            JitterRead::Frame(entry) => {
                let Routed {
                    destination,
                    payload,
                } = entry.payload;
                let (frame, error) = self.decoder.decode_or_silence(&payload);
                let origin = match error {
                    None => FrameOrigin::Decoded,
                    Some(_) => FrameOrigin::DecodeFailed,
                };
                self.last_frame = (origin == FrameOrigin::Decoded).then(|| frame.clone());
                self.last_destination = destination.clone();
                Some(SourceFrame {
                    source: self.source,
                    destination,
                    frame,
                    origin,
                })
            }
            JitterRead::Missing { consecutive, .. } => {
                // Fade the previous frame once; silence after that
                let (frame, origin) = match self.last_frame.take() {
                    Some(last) if self.conceal_with_fade && consecutive == 1 => {
                        (last.faded(1.0, 0.0), FrameOrigin::FadeOut)
                    }
                    _ => (PcmFrame::silence(self.frame_size), FrameOrigin::Silence),
                };
                Some(SourceFrame {
                    source: self.source,
                    destination: self.last_destination.clone(),
                    frame,
                    origin,
                })
            }
            JitterRead::Idle => {
                self.last_frame = None;
                None
            }
        }
    }

    /// Drop all buffered state
    pub fn flush(&mut self) -> usize {
        self.last_frame = None;
        self.jitter.flush()
    }
}

impl std::fmt::Debug for SourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStream")
            .field("source", &self.source)
            .field("pending", &self.jitter.pending())
            .field("idle", &self.jitter.is_idle())
            .finish()
    }
}
