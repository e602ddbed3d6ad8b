//! DCC packets and the sequence identifiers that group them.
//!
//! A [`Packet`] is one encoded DCC packet (address, instruction bytes and
//! the trailing XOR checksum) plus the metadata the transmitter and the
//! acknowledgment detector need: how many extra times to send it, which
//! logical operation it belongs to, and which decoder it addresses.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::packet::{Packet, PacketKind, SequenceId};
//!
//! let pkt = Packet::new(&[0x03, 0x3F, 0x8A], 0, SequenceId::new(1), PacketKind::Throttle, 3).unwrap();
//! assert_eq!(pkt.payload(), &[0x03, 0x3F, 0x8A, 0xB6]);
//! assert!(pkt.verify_checksum());
//! ```

use heapless::Vec;

use crate::error::DccError;

/// Maximum payload length, checksum byte included.
pub const MAX_PAYLOAD: usize = 6;

/// Instruction bytes for the NMRA reset packet.
pub const RESET_BYTES: [u8; 2] = [0x00, 0x00];

/// Instruction bytes for the NMRA idle packet.
pub const IDLE_BYTES: [u8; 2] = [0xFF, 0x00];

/// Logical type of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PacketKind {
    /// Decoder reset (all zero).
    Reset,
    /// Idle packet, sent when the queue is empty.
    Idle,
    /// 128-step speed and direction.
    Throttle,
    /// Function group F0-F28.
    Function,
    /// Basic accessory decoder.
    Accessory,
    /// Service-mode direct byte write or verify.
    ServiceByteWrite,
    /// Service-mode direct bit write or verify.
    ServiceBitWrite,
    /// Service-mode bit verify used while reading a CV.
    ServiceRead,
    /// Programming-on-main byte write.
    PomByteWrite,
    /// Programming-on-main bit write.
    PomBitWrite,
    /// Programming-on-main byte read (answered over RailCom).
    PomRead,
}

/// Identifier shared by all packets of one scripted group.
///
/// Identifiers increase by one per group and wrap at `u16::MAX`. Ordering is
/// serial-number arithmetic: `a` is after `b` when the forward distance from
/// `b` to `a` is between 1 and 32767. That keeps the timeout comparison in
/// the acknowledgment detector correct across the wrap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceId(pub u16);

impl SequenceId {
    /// Wraps a raw identifier.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// The identifier that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Returns true if `self` was issued after `other`.
    ///
    /// ```rust
    /// use rs_dcc::packet::SequenceId;
    ///
    /// assert!(SequenceId::new(5).is_after(SequenceId::new(4)));
    /// assert!(!SequenceId::new(4).is_after(SequenceId::new(4)));
    /// // Survives the wrap
    /// assert!(SequenceId::new(2).is_after(SequenceId::new(u16::MAX)));
    /// ```
    pub const fn is_after(self, other: Self) -> bool {
        let distance = self.0.wrapping_sub(other.0);
        distance != 0 && distance < 0x8000
    }
}

/// One encoded DCC packet plus transmission metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8, MAX_PAYLOAD>,
    /// Extra transmissions after the first one.
    pub repeats: u8,
    /// Group this packet belongs to.
    pub sequence_id: SequenceId,
    /// Logical type.
    pub kind: PacketKind,
    /// Decoder address tag used to match RailCom and ack responses.
    pub decoder_tag: u16,
}

impl Packet {
    /// Builds a packet from instruction bytes, appending the XOR checksum.
    ///
    /// Returns [`DccError::Dropped`] if the bytes plus checksum would not fit.
    pub fn new(
        bytes: &[u8],
        repeats: u8,
        sequence_id: SequenceId,
        kind: PacketKind,
        decoder_tag: u16,
    ) -> Result<Self, DccError> {
        if bytes.len() >= MAX_PAYLOAD {
            return Err(DccError::Dropped {
                len: bytes.len() + 1,
                max: MAX_PAYLOAD,
            });
        }

        let mut payload = Vec::new();
        // Capacity checked above, these pushes cannot fail
        let _ = payload.extend_from_slice(bytes);
        let _ = payload.push(checksum(bytes));

        Ok(Self {
            payload,
            repeats,
            sequence_id,
            kind,
            decoder_tag,
        })
    }

    /// A reset packet in the given group.
    pub fn reset(repeats: u8, sequence_id: SequenceId) -> Self {
        Self::fixed(&RESET_BYTES, repeats, sequence_id, PacketKind::Reset)
    }

    /// An idle packet. The transmitter sends these when the queue is empty.
    pub fn idle() -> Self {
        Self::fixed(&IDLE_BYTES, 0, SequenceId::default(), PacketKind::Idle)
    }

    fn fixed(bytes: &[u8; 2], repeats: u8, sequence_id: SequenceId, kind: PacketKind) -> Self {
        let mut payload = Vec::new();
        let _ = payload.extend_from_slice(bytes);
        let _ = payload.push(checksum(bytes));
        Self {
            payload,
            repeats,
            sequence_id,
            kind,
            decoder_tag: 0,
        }
    }

    /// Payload bytes, checksum last.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload bytes without the checksum.
    pub fn instruction(&self) -> &[u8] {
        &self.payload[..self.payload.len() - 1]
    }

    /// Number of valid payload bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Always false; every packet carries at least a checksum.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total number of times the transmitter sends this packet.
    pub fn sends(&self) -> u16 {
        u16::from(self.repeats) + 1
    }

    /// Returns true if the last byte is the XOR of the preceding bytes.
    pub fn verify_checksum(&self) -> bool {
        match self.payload.split_last() {
            Some((&check, bytes)) => checksum(bytes) == check,
            None => false,
        }
    }
}

/// XOR of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_last_byte() {
        let pkt = Packet::new(
            &[0xC4, 0xD2, 0x3F, 0x80],
            0,
            SequenceId::new(1),
            PacketKind::Throttle,
            0xC4D2,
        )
        .unwrap();
        assert_eq!(pkt.len(), 5);
        assert_eq!(pkt.payload()[4], 0xC4 ^ 0xD2 ^ 0x3F ^ 0x80);
        assert!(pkt.verify_checksum());
        assert_eq!(pkt.instruction(), &[0xC4, 0xD2, 0x3F, 0x80]);
    }

    #[test]
    fn five_instruction_bytes_fit() {
        let pkt = Packet::new(
            &[0xC4, 0xD2, 0xEC, 0x1C, 0x06],
            3,
            SequenceId::new(9),
            PacketKind::PomByteWrite,
            0,
        )
        .unwrap();
        assert_eq!(pkt.len(), MAX_PAYLOAD);
        assert_eq!(pkt.sends(), 4);
    }

    #[test]
    fn oversize_instruction_is_dropped() {
        let err = Packet::new(
            &[1, 2, 3, 4, 5, 6],
            0,
            SequenceId::new(1),
            PacketKind::Function,
            0,
        )
        .unwrap_err();
        assert_eq!(err, DccError::Dropped { len: 7, max: 6 });
    }

    #[test]
    fn corrupted_checksum_fails_verification() {
        let mut pkt = Packet::reset(2, SequenceId::new(1));
        assert!(pkt.verify_checksum());
        pkt.payload[0] = 0x01;
        assert!(!pkt.verify_checksum());
    }

    #[test]
    fn reset_and_idle_layout() {
        assert_eq!(Packet::reset(0, SequenceId::new(3)).payload(), &[0x00, 0x00, 0x00]);
        assert_eq!(Packet::idle().payload(), &[0xFF, 0x00, 0xFF]);
        assert_eq!(Packet::idle().kind, PacketKind::Idle);
    }

    #[test]
    fn sequence_ordering_across_wrap() {
        let last = SequenceId::new(u16::MAX);
        let first = last.next();
        assert_eq!(first, SequenceId::new(0));
        assert!(first.is_after(last));
        assert!(!last.is_after(first));
        assert!(SequenceId::new(100).is_after(SequenceId::new(0xFFF0)));
    }

    #[test]
    fn sequence_is_not_after_itself_or_earlier() {
        let id = SequenceId::new(40);
        assert!(!id.is_after(id));
        assert!(!id.is_after(SequenceId::new(41)));
        assert!(id.is_after(SequenceId::new(39)));
    }
}
