//! # rs-dcc
//!
//! The packet engine of an NMRA DCC command station: encoding, queueing,
//! speed refresh and service-mode acknowledgment detection, with no
//! dependency on a particular board.
//!
//! ## Features
//!
//! - **Packet encoding**: 128-step throttle, function groups F0-F28, basic
//!   accessories, programming on main, service-mode direct instructions
//! - **Interrupt-safe queue**: a `static` bounded FIFO the waveform timer
//!   drains while commands keep arriving
//! - **Speed refresh**: remembered speeds re-sent round-robin whenever the
//!   queue is idle
//! - **Service mode**: CV byte/bit write and byte read on the programming
//!   track, resolved from current-sense acknowledgments
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `packet` - Packet bytes, checksum and sequence ids
//! - `encoder` - Stateless instruction encoders
//! - `queue` - The packet FIFO shared with the transmitter
//! - `speed_table` - Last-commanded speeds and the refresh cursor
//! - `service_mode` - CV operation scripts and completion delivery
//! - `ack` - Pending-verify bookkeeping
//! - `track` - The controller that ties everything together
//! - `traits` - Hardware seams (current sense, RailCom)
//! - `hal` - Mock hardware, transmitter and decoder
//!
//! ## Example
//!
//! ```rust
//! use rs_dcc::{PacketQueue, TrackConfig, TrackController};
//! use rs_dcc::hal::MockTrackHardware;
//! use rs_dcc::traits::Direction;
//!
//! static MAIN: PacketQueue<64> = PacketQueue::new();
//!
//! let mut track = TrackController::new(&MAIN, MockTrackHardware::new(), TrackConfig::main());
//!
//! // Loco 1234 forward at speed 40, remembered in slot 1
//! track.set_throttle(1, 1234, 40, Direction::Forward).unwrap();
//!
//! // Headlight on
//! track.set_function(1234, 0x90, None).unwrap();
//!
//! // The waveform interrupt drains the queue...
//! while MAIN.next_for_transmit().is_some() {}
//!
//! // ...and the main loop ticks, refreshing the speed
//! track.tick();
//! assert_eq!(MAIN.len(), 1);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Acknowledgment bookkeeping for service-mode verifies.
pub mod ack;
/// Station and per-track configuration.
pub mod config;
/// NMRA instruction encoders.
pub mod encoder;
/// Error types.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Packets, checksums and sequence ids.
pub mod packet;
/// Interrupt-safe packet FIFO.
pub mod queue;
/// CV programming on the service track.
pub mod service_mode;
/// Speed table and refresh cursor.
pub mod speed_table;
/// Per-track packet engine.
pub mod track;
/// Core traits for hardware abstraction.
pub mod traits;

// Re-exports for convenience
pub use config::{StationConfig, TrackConfig};
pub use encoder::FunctionGroup;
pub use error::DccError;
pub use packet::{Packet, PacketKind, SequenceId};
pub use queue::PacketQueue;
pub use service_mode::{Completion, ResponseSlot, ServiceModeResponse, ServiceOp, ServicePhase};
pub use speed_table::{SpeedEntry, SpeedTable};
pub use track::{AccessoryAck, FunctionAck, PomAck, ThrottleAck, TrackController};
pub use traits::{CurrentSense, Direction, PomCallback, PomResponse, RailcomResponder, TrackHardware};
