//! Service-mode (programming track) operations and their packet scripts.
//!
//! DCC has no byte-read instruction and a decoder on the programming track
//! can only answer "yes" by pulsing its current draw. Every CV operation is
//! therefore a scripted sequence of reset, write and verify packets in which
//! certain groups are watched for an acknowledgment.
//!
//! # Scripts
//!
//! Repeat counts follow NMRA S-9.2.3: three resets, five verifies and six
//! write/recovery packets. Each letter below is one sequence id:
//!
//! ```text
//! write:  A[reset x3, write x5, write x6]
//!         B[reset x3, verify x2]
//!         C[verify x3, verify x6]        <- ack watched here
//!         D[reset x1]
//!
//! read (per bit i = 0..8):
//!         X[reset x3, verify-bit-is-1 x2]
//!         Y[verify-bit-is-1 x3]          <- ack watched for bit i
//!         Z[reset x1]
//!
//! read (after all bits resolved):
//!         F[reset x3, verify-byte x5, reset x1]  <- ack watched here
//!         G[reset x1]
//! ```
//!
//! The write phase and the verify phase use different sequence ids so the
//! short powered ack window of the verify is not confused with write
//! settling. The trailing single reset with its own id lets the transmitter
//! move past the watched id, which is how a missing ack times out.
//!
//! # Completion
//!
//! The caller hands over a [`Completion`] that fires exactly once, from
//! inside [`TrackController::tick`](crate::TrackController::tick).
//! [`ResponseSlot`] is a ready-made one-shot channel for it:
//!
//! ```rust
//! use rs_dcc::service_mode::{ResponseSlot, ServiceModeResponse, ServiceOp};
//!
//! let slot = ResponseSlot::new();
//! let done = slot.completion();
//! done(ServiceModeResponse {
//!     op: ServiceOp::ReadCv,
//!     cv: 1,
//!     callback: 0,
//!     callback_sub: 0,
//!     value: Some(3),
//! });
//! assert_eq!(slot.take().unwrap().value, Some(3));
//! assert!(slot.take().is_none());
//! ```

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::Cell;

use critical_section::Mutex;
use heapless::Vec;

use crate::encoder;
use crate::packet::{Packet, PacketKind, SequenceId};

/// Longest script any service-mode operation enqueues in one go.
pub const MAX_SCRIPT: usize = 32;

/// Kind of CV operation in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServiceOp {
    /// Read a whole CV byte.
    ReadCv,
    /// Write a whole CV byte.
    WriteCvByte,
    /// Write a single CV bit.
    WriteCvBit {
        /// Bit index 0-7.
        bit: u8,
    },
}

/// Result of a service-mode operation.
///
/// `value` is `None` when the decoder never acknowledged the final verify:
/// the read could not be confirmed, or the decoder rejected the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceModeResponse {
    /// Operation that finished.
    pub op: ServiceOp,
    /// CV number (1-1024).
    pub cv: u16,
    /// Caller correlation token.
    pub callback: u16,
    /// Caller correlation sub-token.
    pub callback_sub: u16,
    /// Value read or written, `None` on failure.
    pub value: Option<u8>,
}

impl ServiceModeResponse {
    /// Returns true if the decoder confirmed the operation.
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// One-shot completion callback for a service-mode operation.
pub type Completion = Box<dyn FnOnce(ServiceModeResponse) + Send>;

/// One-shot channel that a [`Completion`] writes into.
///
/// Cloning shares the slot.
#[derive(Clone)]
pub struct ResponseSlot {
    inner: Arc<Mutex<Cell<Option<ServiceModeResponse>>>>,
}

impl ResponseSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cell::new(None))),
        }
    }

    /// A completion that stores its response in this slot.
    pub fn completion(&self) -> Completion {
        let inner = Arc::clone(&self.inner);
        Box::new(move |response| {
            critical_section::with(|cs| inner.borrow(cs).set(Some(response)));
        })
    }

    /// Removes the response if one has arrived.
    pub fn take(&self) -> Option<ServiceModeResponse> {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }

    /// Returns true if a response is waiting.
    pub fn is_ready(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let value = cell.take();
            let ready = value.is_some();
            cell.set(value);
            ready
        })
    }
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the service-mode state machine stands.
///
/// ```text
/// Idle -> AwaitingBitAcks (read) -> AwaitingFinalVerify -> Idle
/// Idle -> AwaitingFinalVerify (write)                   -> Idle
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServicePhase {
    /// Nothing in flight, requests are accepted.
    Idle,
    /// Reading: waiting on the per-bit verifies still set in `pending`.
    AwaitingBitAcks {
        /// Bitmask of unresolved bits.
        pending: u8,
    },
    /// Waiting on the single confirming verify.
    AwaitingFinalVerify,
}

/// The operation currently in flight.
pub(crate) struct ServiceSession {
    pub op: ServiceOp,
    pub cv: u16,
    pub value: u8,
    pub callback: u16,
    pub callback_sub: u16,
    completion: Option<Completion>,
}

impl ServiceSession {
    pub fn new(
        op: ServiceOp,
        cv: u16,
        value: u8,
        callback: u16,
        callback_sub: u16,
        completion: Completion,
    ) -> Self {
        Self {
            op,
            cv: encoder::cv_number(cv),
            value,
            callback,
            callback_sub,
            completion: Some(completion),
        }
    }

    /// Fires the completion. Later calls do nothing.
    pub fn finish(&mut self, value: Option<u8>) -> Option<ServiceModeResponse> {
        let completion = self.completion.take()?;
        let response = ServiceModeResponse {
            op: self.op,
            cv: self.cv,
            callback: self.callback,
            callback_sub: self.callback_sub,
            value,
        };
        completion(response);
        Some(response)
    }
}

/// Packets of one scripted operation, built before anything is enqueued.
pub(crate) struct Script {
    pub packets: Vec<Packet, MAX_SCRIPT>,
    /// Last sequence id used; becomes the controller's counter on commit.
    pub last_id: SequenceId,
}

impl Script {
    fn new(counter: SequenceId) -> Self {
        Self {
            packets: Vec::new(),
            last_id: counter,
        }
    }

    fn group(&mut self) -> SequenceId {
        self.last_id = self.last_id.next();
        self.last_id
    }

    fn reset(&mut self, repeats: u8) -> &mut Self {
        let _ = self.packets.push(Packet::reset(repeats, self.last_id));
        self
    }

    fn instruction(&mut self, bytes: &[u8; 3], repeats: u8, kind: PacketKind) -> &mut Self {
        // Three instruction bytes always fit a packet
        if let Ok(pkt) = Packet::new(bytes, repeats, self.last_id, kind, 0) {
            let _ = self.packets.push(pkt);
        }
        self
    }

    /// Write `value` then verify it. Returns the script and the watched id.
    pub fn write(
        counter: SequenceId,
        write: [u8; 3],
        verify: [u8; 3],
        kind: PacketKind,
    ) -> (Self, SequenceId) {
        let mut script = Self::new(counter);

        script.group();
        script
            .reset(2)
            .instruction(&write, 4, kind)
            .instruction(&write, 5, kind);

        script.group();
        script.reset(2).instruction(&verify, 1, kind);

        let watched = script.group();
        script
            .instruction(&verify, 2, kind)
            .instruction(&verify, 5, kind);

        script.group();
        script.reset(0);

        (script, watched)
    }

    /// Eight "is bit i set?" verifies. Returns the watched id per bit.
    pub fn read_bits(counter: SequenceId, cv: u16) -> (Self, [SequenceId; 8]) {
        let mut script = Self::new(counter);
        let mut watched = [SequenceId::default(); 8];

        for (bit, id) in watched.iter_mut().enumerate() {
            let verify = encoder::service_verify_bit(cv, bit as u8, 1);

            script.group();
            script
                .reset(2)
                .instruction(&verify, 1, PacketKind::ServiceRead);

            *id = script.group();
            script.instruction(&verify, 2, PacketKind::ServiceRead);

            script.group();
            script.reset(0);
        }

        (script, watched)
    }

    /// Verify the reconstructed byte. Returns the watched id.
    pub fn verify_byte(counter: SequenceId, cv: u16, value: u8) -> (Self, SequenceId) {
        let mut script = Self::new(counter);
        let verify = encoder::service_verify_byte(cv, value);

        let watched = script.group();
        script
            .reset(2)
            .instruction(&verify, 4, PacketKind::ServiceRead)
            .reset(0);

        // One more id so a missing ack times out instead of hanging
        script.group();
        script.reset(0);

        (script, watched)
    }
}
