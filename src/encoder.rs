//! Stateless NMRA instruction encoders.
//!
//! Each function turns a logical command into the instruction bytes of one
//! DCC packet (address and instruction, without the checksum, which
//! [`Packet::new`](crate::packet::Packet::new) appends) plus the decoder
//! tag used to correlate responses.
//!
//! | Command | Layout |
//! |---|---|
//! | Throttle (128 step) | `[addr] 0x3F SDDDDDDD` |
//! | Function F0-F12 | `[addr] 10XXXXXX` |
//! | Function F13-F28 | `[addr] 1101111X DDDDDDDD` |
//! | Accessory | `10AAAAAA 1AAACDDD` |
//! | POM byte write | `[addr] 111011VV VVVVVVVV DDDDDDDD` |
//! | POM bit write | `[addr] 111010VV VVVVVVVV 1111DBBB` |
//! | Service byte write/verify | `0111CCVV VVVVVVVV DDDDDDDD` |
//! | Service bit write/verify | `011110VV VVVVVVVV 111KDBBB` |
//!
//! `[addr]` is one byte for addresses up to 127 and two bytes, the first
//! carrying the `0xC0` prefix, above that.
//!
//! ```rust
//! use rs_dcc::encoder;
//! use rs_dcc::traits::Direction;
//!
//! let short = encoder::throttle(3, 10, Direction::Forward).unwrap();
//! assert_eq!(short.bytes.as_slice(), &[0x03, 0x3F, 0x8B]);
//!
//! let long = encoder::throttle(1234, 10, Direction::Forward).unwrap();
//! assert_eq!(long.bytes.as_slice(), &[0xC4, 0xD2, 0x3F, 0x8B]);
//! assert_eq!(long.tag, 0xC4D2);
//! ```

use heapless::Vec;

use crate::error::DccError;
use crate::packet::MAX_PAYLOAD;
use crate::traits::Direction;

/// Highest short (one byte) locomotive address.
pub const MAX_SHORT_ADDRESS: u16 = 127;
/// Highest long locomotive address (NMRA S-9.2.1, 14 bit).
pub const MAX_LONG_ADDRESS: u16 = 10239;
/// Highest basic accessory decoder address (9 bit).
pub const MAX_ACCESSORY_ADDRESS: u16 = 511;
/// Highest accessory sub-address (output pair).
pub const MAX_ACCESSORY_NUMBER: u8 = 3;
/// Highest caller speed code.
pub const MAX_SPEED: i16 = 126;
/// Caller speed code for emergency stop.
pub const EMERGENCY_STOP: i16 = -1;

const SPEED_128_INSTRUCTION: u8 = 0x3F;
const POM_WRITE_BYTE: u8 = 0xEC;
const POM_WRITE_BIT: u8 = 0xE8;
const POM_VERIFY_BYTE: u8 = 0xE4;
const SERVICE_WRITE_BYTE: u8 = 0x7C;
const SERVICE_VERIFY_BYTE: u8 = 0x74;
const SERVICE_BIT: u8 = 0x78;
const BIT_WRITE: u8 = 0xF0;
const BIT_VERIFY: u8 = 0xE0;

/// Instruction bytes of a single packet, checksum excluded.
pub type Instruction = Vec<u8, MAX_PAYLOAD>;

/// An encoded instruction and the decoder tag it is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encoded {
    /// Address and instruction bytes.
    pub bytes: Instruction,
    /// Decoder address tag for RailCom / ack correlation.
    pub tag: u16,
}

impl Encoded {
    fn addressed(address: u16) -> Result<Self, DccError> {
        if address == 0 || address > MAX_LONG_ADDRESS {
            return Err(DccError::out_of_range("address", address));
        }

        let [hi, lo] = address.to_be_bytes();
        let mut enc = Self {
            bytes: Vec::new(),
            tag: 0,
        };
        if address > MAX_SHORT_ADDRESS {
            enc.push(hi | 0xC0)?;
            enc.tag = u16::from(hi | 0xC0) << 8;
        }
        enc.push(lo)?;
        enc.tag |= u16::from(lo);
        Ok(enc)
    }

    fn push(&mut self, byte: u8) -> Result<(), DccError> {
        self.bytes.push(byte).map_err(|_| DccError::Dropped {
            len: MAX_PAYLOAD + 1,
            max: MAX_PAYLOAD,
        })
    }

    fn with(mut self, tail: &[u8]) -> Result<Self, DccError> {
        for &byte in tail {
            self.push(byte)?;
        }
        Ok(self)
    }
}

/// Zero-based CV index. CV numbers are taken modulo 1024, so CV 1025 is
/// CV 1 and CV 0 is CV 1024.
pub const fn cv_index(cv: u16) -> u16 {
    cv.wrapping_sub(1) & 0x03FF
}

/// One-based CV number after the modulo reduction.
pub const fn cv_number(cv: u16) -> u16 {
    cv_index(cv) + 1
}

fn cv_bytes(base: u8, cv: u16) -> [u8; 2] {
    let [hi, lo] = cv_index(cv).to_be_bytes();
    [base | (hi & 0x03), lo]
}

/// Maps a caller speed code to the 128-step speed byte.
///
/// `-1` is emergency stop (code 1), `0` is stop (code 0) and `1..=126`
/// become `2..=127`. Bit 7 carries the direction.
pub fn speed_byte(speed: i16, direction: Direction) -> Result<u8, DccError> {
    let code = match speed {
        EMERGENCY_STOP => 1,
        0 => 0,
        1..=MAX_SPEED => speed as u8 + 1,
        _ => return Err(DccError::out_of_range("speed", speed)),
    };
    Ok(code | direction.bit())
}

/// 128-step speed packet.
pub fn throttle(address: u16, speed: i16, direction: Direction) -> Result<Encoded, DccError> {
    let speed = speed_byte(speed, direction)?;
    Encoded::addressed(address)?.with(&[SPEED_128_INSTRUCTION, speed])
}

/// Function group packet for F0-F12 (one instruction byte).
///
/// The byte is forced into the `10XXXXXX` range whatever the caller passes.
pub fn function(address: u16, byte1: u8) -> Result<Encoded, DccError> {
    Encoded::addressed(address)?.with(&[(byte1 | 0x80) & 0xBF])
}

/// Feature expansion packet for F13-F28 (two instruction bytes).
///
/// The first byte is forced to `0xDE` (F13-F20) or `0xDF` (F21-F28).
pub fn function_expanded(address: u16, byte1: u8, byte2: u8) -> Result<Encoded, DccError> {
    Encoded::addressed(address)?.with(&[(byte1 | 0xDE) & 0xDF, byte2])
}

/// Basic accessory packet.
pub fn accessory(address: u16, number: u8, activate: bool) -> Result<Encoded, DccError> {
    if address > MAX_ACCESSORY_ADDRESS {
        return Err(DccError::out_of_range("accessory address", address));
    }
    if number > MAX_ACCESSORY_NUMBER {
        return Err(DccError::out_of_range("accessory number", number));
    }

    // 10AAAAAA: low six address bits
    let b0 = (address % 64) as u8 | 0x80;
    // 1AAACDDD: high three address bits inverted, C=1, DD output, D activate
    let b1 = ((((address / 64) % 8) as u8) << 4 | number << 1 | u8::from(activate)) ^ 0xF8;

    let mut bytes = Vec::new();
    let _ = bytes.extend_from_slice(&[b0, b1]);
    Ok(Encoded {
        bytes,
        tag: u16::from_be_bytes([b0, b1]),
    })
}

/// Programming-on-main byte write.
pub fn pom_write_byte(address: u16, cv: u16, value: u8) -> Result<Encoded, DccError> {
    let [op, lo] = cv_bytes(POM_WRITE_BYTE, cv);
    Encoded::addressed(address)?.with(&[op, lo, value])
}

/// Programming-on-main bit write. `bit` is taken modulo 8, `value` modulo 2.
pub fn pom_write_bit(address: u16, cv: u16, bit: u8, value: u8) -> Result<Encoded, DccError> {
    let [op, lo] = cv_bytes(POM_WRITE_BIT, cv);
    Encoded::addressed(address)?.with(&[op, lo, bit_instruction(BIT_WRITE, bit, value)])
}

/// Programming-on-main byte read. The decoder answers over RailCom.
pub fn pom_read_byte(address: u16, cv: u16) -> Result<Encoded, DccError> {
    let [op, lo] = cv_bytes(POM_VERIFY_BYTE, cv);
    Encoded::addressed(address)?.with(&[op, lo, 0x00])
}

fn bit_instruction(base: u8, bit: u8, value: u8) -> u8 {
    base | (value % 2) << 3 | bit % 8
}

/// Service-mode direct byte write.
pub fn service_write_byte(cv: u16, value: u8) -> [u8; 3] {
    let [op, lo] = cv_bytes(SERVICE_WRITE_BYTE, cv);
    [op, lo, value]
}

/// Service-mode direct byte verify.
pub fn service_verify_byte(cv: u16, value: u8) -> [u8; 3] {
    let [op, lo] = cv_bytes(SERVICE_VERIFY_BYTE, cv);
    [op, lo, value]
}

/// Service-mode bit write. `bit` is taken modulo 8, `value` modulo 2.
pub fn service_write_bit(cv: u16, bit: u8, value: u8) -> [u8; 3] {
    let [op, lo] = cv_bytes(SERVICE_BIT, cv);
    [op, lo, bit_instruction(BIT_WRITE, bit, value)]
}

/// Service-mode bit verify ("is bit `bit` equal to `value`?").
pub fn service_verify_bit(cv: u16, bit: u8, value: u8) -> [u8; 3] {
    let [op, lo] = cv_bytes(SERVICE_BIT, cv);
    [op, lo, bit_instruction(BIT_VERIFY, bit, value)]
}

/// Function groups addressable by [`FunctionGroup::instruction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FunctionGroup {
    /// F0 (headlight) and F1-F4.
    F0F4,
    /// F5-F8.
    F5F8,
    /// F9-F12.
    F9F12,
    /// F13-F20 (feature expansion).
    F13F20,
    /// F21-F28 (feature expansion).
    F21F28,
}

impl FunctionGroup {
    /// Instruction byte(s) for this group from a function mask.
    ///
    /// Bit `n` of `mask` is the `n`-th function of the group, counted from
    /// the group's lowest function (F0 for [`FunctionGroup::F0F4`]).
    ///
    /// ```rust
    /// use rs_dcc::encoder::FunctionGroup;
    ///
    /// // F0 and F2 on
    /// assert_eq!(FunctionGroup::F0F4.instruction(0b101), (0x92, None));
    /// // F13 on
    /// assert_eq!(FunctionGroup::F13F20.instruction(0b1), (0xDE, Some(0x01)));
    /// ```
    pub fn instruction(self, mask: u8) -> (u8, Option<u8>) {
        match self {
            // 100DDDDD with F0 in bit 4 and F1-F4 in bits 0-3
            Self::F0F4 => (0x80 | (mask & 0x01) << 4 | (mask >> 1) & 0x0F, None),
            Self::F5F8 => (0xB0 | mask & 0x0F, None),
            Self::F9F12 => (0xA0 | mask & 0x0F, None),
            Self::F13F20 => (0xDE, Some(mask)),
            Self::F21F28 => (0xDF, Some(mask)),
        }
    }
}
