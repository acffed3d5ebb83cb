//! Spatial mixer
//!
//! Linear summation of attenuated sources followed by clipping to the i16
//! range. There is no normalization: a single loud speaker keeps its level
//! no matter how many silent sources are mixed alongside.

use murmur_core::{PcmFrame, Position};

use crate::Attenuation;

/// How a source is placed relative to the listener
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Placement {
    /// Proximity audio from a position in the world
    At(Position),
    /// Group or whisper audio; no distance attenuation
    Direct,
}

/// One source as seen by one listener
#[derive(Clone, Copy, Debug)]
pub struct MixInput<'a> {
    pub frame: &'a PcmFrame,
    pub placement: Placement,
    /// Listener's volume multiplier for this source
    pub volume: f32,
}

/// Mixes decoded sources into one frame per listener
#[derive(Clone, Debug)]
pub struct SpatialMixer {
    attenuation: Attenuation,
    frame_size: usize,
}

impl SpatialMixer {
    pub fn new(attenuation: Attenuation, frame_size: usize) -> Self {
        SpatialMixer {
            attenuation,
            frame_size,
        }
    }

    pub fn attenuation(&self) -> &Attenuation {
        &self.attenuation
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Combined gain of a source for a listener at `listener`
    pub fn gain(&self, listener: Position, input: &MixInput<'_>) -> f32 {
        let distance_gain = match input.placement {
            Placement::At(source) => self.attenuation.gain_between(listener, source),
            Placement::Direct => 1.0,
        };
        distance_gain * input.volume.max(0.0)
    }

    /// Mix every audible input. Inputs with zero gain are skipped entirely.
    pub fn mix(&self, listener: Position, inputs: &[MixInput<'_>]) -> MixResult {
        let mut acc = vec![0.0f32; self.frame_size];
        let mut mixed = 0;

        for input in inputs {
            let gain = self.gain(listener, input);
            if gain <= 0.0 {
                continue;
            }
            mixed += 1;
            for (out, &sample) in acc.iter_mut().zip(input.frame.samples()) {
                *out += sample as f32 * gain;
            }
        }

        let samples = acc
            .into_iter()
            .map(|s| s.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        MixResult {
            frame: PcmFrame::new(samples),
            mixed,
        }
    }
}

/// Output of one mix
#[derive(Clone, Debug, PartialEq)]
pub struct MixResult {
    pub frame: PcmFrame,
    /// Sources that contributed
    pub mixed: usize,
}
