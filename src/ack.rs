//! Acknowledgment bookkeeping for service-mode verifies.
//!
//! [`AckTracker`] holds which verifications are still pending and which
//! sequence id each one waits for. It does no I/O: the track controller
//! samples the transmitter and the current sensor once per tick, packs
//! that into an [`AckSample`] and acts on what the tracker reports.
//!
//! A pending verification resolves in one of two ways:
//!
//! - **Ack**: the watched id is on the rails and the current rose above the
//!   threshold. The controller then fast-forwards the queue past the rest
//!   of that group.
//! - **Timeout**: the transmitter has moved on to a later id, or has gone
//!   back to idle, without an ack. For a CV read that means the bit is 0.

use crate::packet::SequenceId;

/// One tick's view of the transmitter and the current sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckSample {
    /// Sequence id of the packet on the rails.
    pub transmit_id: SequenceId,
    /// The transmitter ran dry, or the operation was abandoned.
    pub back_to_idle: bool,
    /// Current rose above the ack threshold.
    pub acked: bool,
}

impl AckSample {
    fn resolves(&self, watched: SequenceId) -> Option<bool> {
        if self.transmit_id == watched {
            self.acked.then_some(true)
        } else if self.transmit_id.is_after(watched) || self.back_to_idle {
            Some(false)
        } else {
            None
        }
    }
}

/// What happened to the per-bit verifies during one poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitPoll {
    /// Group to fast-forward past because its bit was acked.
    pub skip: Option<SequenceId>,
    /// Set once every bit has resolved, carrying the assembled byte.
    pub complete: Option<u8>,
}

/// Outcome of polling the final verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalPoll {
    /// Still waiting.
    Pending,
    /// The decoder acknowledged; fast-forward past the group.
    Acked(SequenceId),
    /// The transmitter moved past the watched group without an ack.
    TimedOut,
}

/// Pending verifications for the one service-mode operation in flight.
#[derive(Clone, Debug, Default)]
pub struct AckTracker {
    needed: u8,
    buffer: u8,
    expected: [SequenceId; 8],
    verify_in_progress: bool,
}

impl AckTracker {
    /// Creates an idle tracker.
    pub const fn new() -> Self {
        Self {
            needed: 0,
            buffer: 0,
            expected: [SequenceId::new(0); 8],
            verify_in_progress: false,
        }
    }

    /// Returns true when nothing is pending.
    pub fn is_idle(&self) -> bool {
        self.needed == 0 && !self.verify_in_progress
    }

    /// Bitmask of unresolved bit verifies.
    pub fn pending_bits(&self) -> u8 {
        self.needed
    }

    /// Returns true while the final verify is pending.
    pub fn in_final_verify(&self) -> bool {
        self.verify_in_progress
    }

    /// Bits acknowledged so far.
    pub fn buffer(&self) -> u8 {
        self.buffer
    }

    /// Starts watching eight bit verifies, bit `i` on `expected[i]`.
    pub fn begin_bits(&mut self, expected: [SequenceId; 8]) {
        self.expected = expected;
        self.needed = 0xFF;
        self.buffer = 0;
        self.verify_in_progress = false;
    }

    /// Starts watching the single final verify on `expected`.
    pub fn begin_final(&mut self, expected: SequenceId) {
        self.expected[0] = expected;
        self.needed = 0;
        self.verify_in_progress = true;
    }

    /// Resolves whichever pending bits the sample settles.
    pub fn poll_bits(&mut self, sample: AckSample) -> BitPoll {
        let mut poll = BitPoll::default();
        if self.needed == 0 {
            return poll;
        }

        for bit in 0..8 {
            let mask = 1u8 << bit;
            if self.needed & mask == 0 {
                continue;
            }

            match sample.resolves(self.expected[bit]) {
                Some(true) => {
                    self.buffer |= mask;
                    self.needed &= !mask;
                    poll.skip = Some(self.expected[bit]);
                    tracing::debug!(bit, "bit verify acknowledged");
                }
                Some(false) => {
                    self.buffer &= !mask;
                    self.needed &= !mask;
                    tracing::debug!(bit, "bit verify timed out");
                }
                None => {}
            }
        }

        if self.needed == 0 {
            poll.complete = Some(self.buffer);
        }
        poll
    }

    /// Resolves the final verify if the sample settles it.
    pub fn poll_final(&mut self, sample: AckSample) -> FinalPoll {
        if !self.verify_in_progress {
            return FinalPoll::Pending;
        }

        match sample.resolves(self.expected[0]) {
            Some(true) => {
                self.verify_in_progress = false;
                FinalPoll::Acked(self.expected[0])
            }
            Some(false) => {
                self.verify_in_progress = false;
                FinalPoll::TimedOut
            }
            None => FinalPoll::Pending,
        }
    }
}
