//! Bounded packet FIFO shared with the waveform transmitter.
//!
//! The queue is the only structure touched from both the normal execution
//! context (command encoding, refresh, acknowledgment detection) and the
//! timer interrupt that bit-bangs packets onto the rails. Every access runs
//! inside a short [`critical_section`], so the queue can live in a `static`:
//!
//! ```rust
//! use rs_dcc::packet::{Packet, SequenceId};
//! use rs_dcc::queue::PacketQueue;
//!
//! static QUEUE: PacketQueue<16> = PacketQueue::new();
//!
//! // Producer side
//! assert!(QUEUE.push(Packet::reset(1, SequenceId::new(1))).is_ok());
//!
//! // Transmitter side: the packet goes out `repeats + 1` times
//! assert!(QUEUE.next_for_transmit().is_some());
//! assert!(QUEUE.next_for_transmit().is_some());
//! assert!(QUEUE.next_for_transmit().is_none()); // send idle
//! assert!(QUEUE.back_to_idle());
//! ```
//!
//! # Contract
//!
//! - Producers never block. A push into a full queue hands the packet back.
//! - The consumer replays the in-flight packet until its repeats are used
//!   up, then pops the next one. Packets leave in strict FIFO order.
//! - [`PacketQueue::skip_sequence`] cancels the remaining repeats of the
//!   in-flight packet and discards queued packets of the same group.

use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::Deque;

use crate::packet::{Packet, SequenceId};

struct QueueState<const N: usize> {
    packets: Deque<Packet, N>,
    in_flight: Option<Packet>,
    repeats_left: u8,
    transmit_id: SequenceId,
    back_to_idle: bool,
}

/// Interrupt-safe bounded FIFO of [`Packet`]s with capacity `N`.
pub struct PacketQueue<const N: usize> {
    state: Mutex<RefCell<QueueState<N>>>,
}

impl<const N: usize> PacketQueue<N> {
    /// Creates an empty queue. Usable in `static` initializers.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(QueueState {
                packets: Deque::new(),
                in_flight: None,
                repeats_left: 0,
                transmit_id: SequenceId::new(0),
                back_to_idle: false,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut QueueState<N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    // ------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------

    /// Appends a packet. Returns the packet back if the queue is full.
    pub fn push(&self, packet: Packet) -> Result<(), Packet> {
        self.with(|s| s.packets.push_back(packet))
    }

    /// Number of packets waiting (the in-flight packet is not counted).
    pub fn len(&self) -> usize {
        self.with(|s| s.packets.len())
    }

    /// Returns true if no packets are waiting.
    pub fn is_empty(&self) -> bool {
        self.with(|s| s.packets.is_empty())
    }

    /// Free slots.
    pub fn free(&self) -> usize {
        N - self.len()
    }

    /// Total capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Fast-forwards past the rest of group `id`.
    ///
    /// Zeroes the repeat counter of the in-flight packet and pops every
    /// packet at the front of the queue that belongs to `id`. Returns the
    /// number of packets discarded.
    pub fn skip_sequence(&self, id: SequenceId) -> usize {
        self.with(|s| {
            s.repeats_left = 0;
            let mut skipped = 0;
            while s.packets.front().is_some_and(|p| p.sequence_id == id) {
                s.packets.pop_front();
                skipped += 1;
            }
            skipped
        })
    }

    /// Returns true once the transmitter ran dry and fell back to idle
    /// packets, or after [`PacketQueue::raise_back_to_idle`].
    pub fn back_to_idle(&self) -> bool {
        self.with(|s| s.back_to_idle)
    }

    /// Signals that whatever is pending should be abandoned.
    pub fn raise_back_to_idle(&self) {
        self.with(|s| s.back_to_idle = true);
    }

    /// Clears the back-to-idle flag before a new scripted operation.
    pub fn clear_back_to_idle(&self) {
        self.with(|s| s.back_to_idle = false);
    }

    // ------------------------------------------------------------------
    // Consumer side (waveform transmitter)
    // ------------------------------------------------------------------

    /// Next packet to put on the rails, or `None` to send an idle packet.
    ///
    /// Replays the in-flight packet while it has repeats left, otherwise
    /// pops the next one and records its sequence id as the one being
    /// transmitted.
    pub fn next_for_transmit(&self) -> Option<Packet> {
        self.with(|s| {
            if s.repeats_left > 0 {
                if let Some(pkt) = &s.in_flight {
                    s.repeats_left -= 1;
                    return Some(pkt.clone());
                }
            }

            match s.packets.pop_front() {
                Some(pkt) => {
                    s.transmit_id = pkt.sequence_id;
                    s.repeats_left = pkt.repeats;
                    s.in_flight = Some(pkt.clone());
                    Some(pkt)
                }
                None => {
                    s.in_flight = None;
                    s.repeats_left = 0;
                    s.back_to_idle = true;
                    None
                }
            }
        })
    }

    /// Sequence id of the packet currently on the rails.
    pub fn transmit_id(&self) -> SequenceId {
        self.with(|s| s.transmit_id)
    }

    /// Repeats still owed for the in-flight packet.
    pub fn repeats_remaining(&self) -> u8 {
        self.with(|s| s.repeats_left)
    }
}

impl<const N: usize> fmt::Debug for PacketQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (len, transmit_id, back_to_idle) =
            self.with(|s| (s.packets.len(), s.transmit_id, s.back_to_idle));
        f.debug_struct("PacketQueue")
            .field("len", &len)
            .field("capacity", &N)
            .field("transmit_id", &transmit_id)
            .field("back_to_idle", &back_to_idle)
            .finish()
    }
}

impl<const N: usize> Default for PacketQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
