//! Error types for command encoding and scheduling.

use thiserror::Error;

/// Why a command was not turned into packets.
///
/// None of these are fatal. `OutOfRange` means the caller has to pick other
/// arguments, `Busy` means the caller should retry on a later tick, and
/// `Dropped` means an instruction did not fit into a DCC packet.
///
/// A service-mode operation that ends without a decoder acknowledgment is
/// not an error; see [`ServiceModeResponse`](crate::ServiceModeResponse).
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DccError {
    /// An address, slot or speed argument is outside the legal protocol range.
    #[error("{what} {value} is out of range")]
    OutOfRange {
        /// Name of the offending argument.
        what: &'static str,
        /// The rejected value.
        value: i32,
    },

    /// The queue lacks headroom or a service-mode operation is in flight.
    #[error("track busy")]
    Busy,

    /// The encoded instruction would exceed the packet payload limit.
    #[error("packet of {len} bytes exceeds the {max}-byte payload limit")]
    Dropped {
        /// Instruction length including the checksum byte.
        len: usize,
        /// Maximum payload length including the checksum byte.
        max: usize,
    },
}

impl DccError {
    pub(crate) fn out_of_range(what: &'static str, value: impl Into<i32>) -> Self {
        Self::OutOfRange {
            what,
            value: value.into(),
        }
    }
}
