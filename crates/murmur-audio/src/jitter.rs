//! Jitter buffer
//!
//! A fixed ring of `capacity` slots indexed by `sequence % capacity`. The
//! read pointer advances exactly one sequence number per read, whether or
//! not that slot was filled, so output cadence never depends on arrivals.
//!
//! Arrival handling relative to the read pointer `next`:
//! - behind `next`: too late, discarded
//! - within `[next, next + capacity)`: stored (or recognized as duplicate)
//! - further ahead: window exceeded, pending entries are discarded and the
//!   read pointer jumps to `playout_delay` frames behind the new packet
//!
//! A source with nothing pending that misses `idle_after` reads in a row goes
//! idle; the next arrival primes it again with a fresh playout delay.

use std::time::Instant;

/// Jitter buffer sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JitterConfig {
    /// Ring slots (frames)
    pub capacity: usize,
    /// Reads of cushion in front of the first frame of a talk spurt
    pub playout_delay: u32,
    /// Consecutive empty reads before an empty buffer goes idle
    pub idle_after: u32,
}

impl Default for JitterConfig {
    fn default() -> Self {
        JitterConfig {
            capacity: 16,
            playout_delay: 3,
            idle_after: 16,
        }
    }
}

/// One buffered packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JitterEntry<T> {
    pub sequence: u32,
    pub arrived_at: Instant,
    pub payload: T,
}

/// Result of offering a packet to the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Same sequence already buffered
    Duplicate,
    /// Its slot was already played out
    TooLate,
    /// Window exceeded; `dropped` pending entries were discarded
    Resynced { dropped: usize, ahead: u32 },
}

/// Result of one read tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JitterRead<T> {
    /// The expected frame
    Frame(JitterEntry<T>),
    /// Expected frame is lost or late; `consecutive` counts misses in a row
    Missing { sequence: u32, consecutive: u32 },
    /// Nothing to play for this source
    Idle,
}

/// Per-source reordering buffer with bounded memory
#[derive(Debug)]
pub struct JitterBuffer<T> {
    config: JitterConfig,
    slots: Vec<Option<JitterEntry<T>>>,
    /// Sequence the next read plays; None while idle
    next: Option<u32>,
    pending: usize,
    misses: u32,
}

impl<T> JitterBuffer<T> {
    pub fn new(config: JitterConfig) -> Self {
        let capacity = config.capacity.max(1);
        let config = JitterConfig {
            capacity,
            playout_delay: config.playout_delay.min(capacity as u32 - 1),
            ..config
        };
        JitterBuffer {
            config,
            slots: (0..capacity).map(|_| None).collect(),
            next: None,
            pending: 0,
            misses: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Entries waiting to be read
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.next.is_none()
    }

    /// Sequence number the next read will play
    pub fn next_sequence(&self) -> Option<u32> {
        self.next
    }

    /// Offer an arriving packet. Never blocks, never grows the buffer.
    pub fn push(&mut self, sequence: u32, arrived_at: Instant, payload: T) -> PushOutcome {
        let mut outcome = PushOutcome::Stored;

        let next = match self.next {
            Some(next) => next,
            None => self.prime(sequence),
        };

        // Signed distance from the read pointer, wrapping-safe
        let offset = sequence.wrapping_sub(next) as i32;
        if offset < 0 {
            return PushOutcome::TooLate;
        }
        if offset as usize >= self.config.capacity {
            let dropped = self.clear();
            self.prime(sequence);
            outcome = PushOutcome::Resynced {
                dropped,
                ahead: offset as u32,
            };
        }

        let index = self.index(sequence);
        let slot = &mut self.slots[index];
        if matches!(slot, Some(entry) if entry.sequence == sequence) {
            return PushOutcome::Duplicate;
        }
        if slot.is_none() {
            self.pending += 1;
        }
        *slot = Some(JitterEntry {
            sequence,
            arrived_at,
            payload,
        });
        outcome
    }

    /// Advance the read pointer by one frame
    pub fn read(&mut self) -> JitterRead<T> {
        let Some(sequence) = self.next else {
            return JitterRead::Idle;
        };
        self.next = Some(sequence.wrapping_add(1));

        let index = self.index(sequence);
        match self.slots[index].take() {
            Some(entry) if entry.sequence == sequence => {
                self.pending -= 1;
                self.misses = 0;
                JitterRead::Frame(entry)
            }
            other => {
                // Not ours; leave it in place
                self.slots[index] = other;
                self.misses += 1;
                if self.pending == 0 && self.misses >= self.config.idle_after {
                    self.next = None;
                    self.misses = 0;
                    return JitterRead::Idle;
                }
                JitterRead::Missing {
                    sequence,
                    consecutive: self.misses,
                }
            }
        }
    }

    /// Drop everything and go idle
    pub fn flush(&mut self) -> usize {
        let dropped = self.clear();
        self.next = None;
        self.misses = 0;
        dropped
    }

    fn prime(&mut self, sequence: u32) -> u32 {
        let next = sequence.wrapping_sub(self.config.playout_delay);
        self.next = Some(next);
        self.misses = 0;
        next
    }

    fn clear(&mut self) -> usize {
        let dropped = self.pending;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.pending = 0;
        dropped
    }

    #[inline]
    fn index(&self, sequence: u32) -> usize {
        sequence as usize % self.config.capacity
    }
}
