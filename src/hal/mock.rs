//! Mock implementations for testing without hardware.
//!
//! These stand in for the command-station board so the whole packet engine
//! can run on the desktop.
//!
//! # Available Mocks
//!
//! | Mock | Stands in for | Purpose |
//! |------|---------------|---------|
//! | [`MockTrackHardware`] | [`TrackHardware`] | Settable current reading, stored POM callback |
//! | [`MockTransmitter`] | Waveform interrupt | Drains the queue one send at a time and records it |
//! | [`MockDecoder`] | Decoder on the programming track | CV memory that acks matching verifies |
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::{PacketQueue, TrackConfig, TrackController};
//! use rs_dcc::hal::{MockDecoder, MockTrackHardware, MockTransmitter};
//! use rs_dcc::service_mode::ResponseSlot;
//!
//! let queue: PacketQueue<64> = PacketQueue::new();
//! let mut track = TrackController::new(&queue, MockTrackHardware::new(), TrackConfig::programming());
//! let mut tx = MockTransmitter::new(&queue);
//! let mut decoder = MockDecoder::new().with_cv(29, 6);
//!
//! let slot = ResponseSlot::new();
//! track.read_cv(29, 0, 0, slot.completion()).unwrap();
//!
//! while !slot.is_ready() {
//!     let sent = tx.step();
//!     track.hardware_mut().current_ma = decoder.current_for(sent.as_ref());
//!     track.tick();
//! }
//! assert_eq!(slot.take().unwrap().value, Some(6));
//! ```
//!
//! [`TrackHardware`]: crate::traits::TrackHardware

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::encoder;
use crate::packet::Packet;
use crate::queue::PacketQueue;
use crate::traits::{CurrentSense, PomCallback, PomResponse, RailcomResponder};

// ============================================================================
// Track hardware
// ============================================================================

/// Mock current sensor and RailCom hook.
///
/// Set [`current_ma`](Self::current_ma) directly to simulate a decoder
/// drawing current.
///
/// # Example
///
/// ```rust
/// use rs_dcc::hal::MockTrackHardware;
/// use rs_dcc::traits::{CurrentSense, PomResponse, RailcomResponder};
///
/// let mut hw = MockTrackHardware::new().with_current(15);
/// hw.set_base_current();
/// hw.current_ma = 90;
/// assert_eq!(hw.current_rise_ma(), 75);
///
/// hw.set_pom_callback(Box::new(|r| assert_eq!(r.data, 6)));
/// assert!(hw.deliver_pom(PomResponse { transaction_id: 1, data: 6 }));
/// ```
#[derive(Default)]
pub struct MockTrackHardware {
    /// Present track current in milliamps.
    pub current_ma: u32,
    /// Latched baseline.
    pub base_ma: u32,
    /// Number of times the baseline was latched.
    pub base_calls: usize,
    pom_callback: Option<PomCallback>,
}

impl MockTrackHardware {
    /// Creates mock hardware drawing no current.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates mock hardware with the specified current reading.
    pub fn with_current(mut self, current_ma: u32) -> Self {
        self.current_ma = current_ma;
        self
    }

    /// Returns true once a POM callback has been registered.
    pub fn has_pom_callback(&self) -> bool {
        self.pom_callback.is_some()
    }

    /// Hands a RailCom answer to the registered callback.
    ///
    /// Returns false if nothing is registered.
    pub fn deliver_pom(&mut self, response: PomResponse) -> bool {
        match self.pom_callback.as_mut() {
            Some(callback) => {
                callback(response);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for MockTrackHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTrackHardware")
            .field("current_ma", &self.current_ma)
            .field("base_ma", &self.base_ma)
            .field("base_calls", &self.base_calls)
            .field("pom_callback", &self.pom_callback.is_some())
            .finish()
    }
}

impl CurrentSense for MockTrackHardware {
    fn read_current_ma(&mut self) -> u32 {
        self.current_ma
    }

    fn set_base_current(&mut self) {
        self.base_ma = self.current_ma;
        self.base_calls += 1;
    }

    fn base_current_ma(&self) -> u32 {
        self.base_ma
    }
}

impl RailcomResponder for MockTrackHardware {
    fn set_pom_callback(&mut self, callback: PomCallback) {
        self.pom_callback = Some(callback);
    }
}

// ============================================================================
// Transmitter
// ============================================================================

/// Stand-in for the waveform interrupt.
///
/// Each [`step`](Self::step) is one packet on the rails. Everything sent,
/// repeats included, is recorded in [`sent`](Self::sent); idle packets are
/// counted instead.
#[derive(Debug)]
pub struct MockTransmitter<'q, const N: usize> {
    queue: &'q PacketQueue<N>,
    /// Every packet sent, in order.
    pub sent: Vec<Packet>,
    /// Number of idle packets sent because the queue was empty.
    pub idles: usize,
}

impl<'q, const N: usize> MockTransmitter<'q, N> {
    /// Creates a transmitter draining `queue`.
    pub fn new(queue: &'q PacketQueue<N>) -> Self {
        Self {
            queue,
            sent: Vec::new(),
            idles: 0,
        }
    }

    /// Sends one packet. `None` means an idle packet went out.
    pub fn step(&mut self) -> Option<Packet> {
        match self.queue.next_for_transmit() {
            Some(packet) => {
                self.sent.push(packet.clone());
                Some(packet)
            }
            None => {
                self.idles += 1;
                None
            }
        }
    }

    /// Sends until the queue is empty and the in-flight packet is done.
    /// Returns the number of packets sent.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.step().is_some() {
            count += 1;
        }
        count
    }

    /// Instruction bytes (no checksum) of every packet sent.
    pub fn instructions(&self) -> Vec<Vec<u8>> {
        self.sent.iter().map(|p| p.instruction().to_vec()).collect()
    }

    /// Forgets what was sent.
    pub fn clear(&mut self) {
        self.sent.clear();
        self.idles = 0;
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Simulated decoder on the programming track.
///
/// Holds 1024 CVs and answers service-mode direct-mode instructions the way
/// a real decoder does: writes are applied, and a verify that matches the
/// stored value is acknowledged with a current pulse.
///
/// ```rust
/// use rs_dcc::hal::MockDecoder;
/// use rs_dcc::encoder;
///
/// let mut decoder = MockDecoder::new().with_cv(1, 0b101);
/// assert!(decoder.respond(&encoder::service_verify_bit(1, 0, 1)));
/// assert!(!decoder.respond(&encoder::service_verify_bit(1, 1, 1)));
///
/// decoder.respond(&encoder::service_write_byte(29, 6));
/// assert_eq!(decoder.cv(29), 6);
/// ```
#[derive(Clone, Debug)]
pub struct MockDecoder {
    cvs: Vec<u8>,
    /// Idle draw in milliamps.
    pub idle_ma: u32,
    /// Extra draw while acknowledging.
    pub ack_ma: u32,
    /// When false the decoder never acknowledges (missing or dead decoder).
    pub acks_enabled: bool,
    /// Number of acknowledgments given.
    pub acks: usize,
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self {
            cvs: vec![0; 1024],
            idle_ma: 10,
            ack_ma: 80,
            acks_enabled: true,
            acks: 0,
        }
    }
}

impl MockDecoder {
    /// Creates a decoder with every CV zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Presets a CV.
    pub fn with_cv(mut self, cv: u16, value: u8) -> Self {
        self.set_cv(cv, value);
        self
    }

    /// Creates a decoder that never acknowledges.
    pub fn silent() -> Self {
        Self {
            acks_enabled: false,
            ..Self::default()
        }
    }

    /// Stored CV value.
    pub fn cv(&self, cv: u16) -> u8 {
        self.cvs[usize::from(encoder::cv_index(cv))]
    }

    /// Overwrites a CV.
    pub fn set_cv(&mut self, cv: u16, value: u8) {
        self.cvs[usize::from(encoder::cv_index(cv))] = value;
    }

    /// Applies one service-mode instruction. Returns true if the decoder
    /// acknowledges it.
    ///
    /// Anything that is not a three-byte direct-mode instruction (resets,
    /// idles) is ignored.
    pub fn respond(&mut self, instruction: &[u8]) -> bool {
        let &[op, lo, data] = instruction else {
            return false;
        };
        if op & 0xF0 != 0x70 {
            return false;
        }

        let index = usize::from(u16::from(op & 0x03) << 8 | u16::from(lo));
        let acked = match op & 0x0C {
            // Byte verify
            0x04 => self.cvs[index] == data,
            // Byte write, acknowledged once stored
            0x0C => {
                self.cvs[index] = data;
                true
            }
            // Bit manipulation 111KDBBB
            0x08 => {
                let mask = 1u8 << (data & 0x07);
                let bit_set = data & 0x08 != 0;
                if data & 0x10 != 0 {
                    if bit_set {
                        self.cvs[index] |= mask;
                    } else {
                        self.cvs[index] &= !mask;
                    }
                    true
                } else {
                    (self.cvs[index] & mask != 0) == bit_set
                }
            }
            _ => false,
        };

        let acked = acked && self.acks_enabled;
        if acked {
            self.acks += 1;
        }
        acked
    }

    /// Track current while `packet` is on the rails. `None` is an idle packet.
    pub fn current_for(&mut self, packet: Option<&Packet>) -> u32 {
        match packet {
            Some(packet) if self.respond(packet.instruction()) => self.idle_ma + self.ack_ma,
            _ => self.idle_ma,
        }
    }
}
