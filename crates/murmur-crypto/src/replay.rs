//! Replay window for authenticated datagrams

use murmur_core::{VoiceError, VoiceResult};

/// Sliding replay window over 32-bit sequence numbers
///
/// Tracks the highest sequence seen and a bitmap of the `size` sequences
/// at or below it. Anything older than the window, or already marked, is a
/// replay. Gaps are normal and never rejected.
#[derive(Clone, Debug)]
pub struct ReplayWindow {
    /// Highest accepted sequence, if any
    highest: Option<u32>,
    /// Bit i set = (highest - i) received
    bitmap: u64,
    /// Window size (at most 64)
    size: u32,
}

impl ReplayWindow {
    /// Create a new replay window
    pub fn new(size: u32) -> Self {
        ReplayWindow {
            highest: None,
            bitmap: 0,
            size: size.clamp(1, 64),
        }
    }

    /// Check if a sequence number is acceptable (not a replay)
    pub fn check(&self, seq: u32) -> bool {
        let Some(highest) = self.highest else {
            return true;
        };

        if seq > highest {
            return true;
        }

        let behind = highest - seq;
        if behind >= self.size {
            return false;
        }
        self.bitmap & (1u64 << behind) == 0
    }

    /// Mark a sequence number as received
    pub fn accept(&mut self, seq: u32) -> VoiceResult<()> {
        if !self.check(seq) {
            return Err(VoiceError::ReplayDetected(seq));
        }

        match self.highest {
            Some(highest) if seq <= highest => {
                self.bitmap |= 1u64 << (highest - seq);
            }
            Some(highest) => {
                let advance = seq - highest;
                self.bitmap = if advance >= 64 { 0 } else { self.bitmap << advance };
                self.bitmap |= 1;
                self.highest = Some(seq);
            }
            None => {
                self.bitmap = 1;
                self.highest = Some(seq);
            }
        }

        Ok(())
    }

    /// Highest accepted sequence
    pub fn highest(&self) -> Option<u32> {
        self.highest
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        ReplayWindow::new(64)
    }
}
