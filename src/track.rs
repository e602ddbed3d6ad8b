//! Per-track packet engine.
//!
//! [`TrackController`] is the one value that owns everything the command
//! dispatcher talks to for a single track: the speed table, the sequence
//! counter, the service-mode session and the acknowledgment tracker. It
//! borrows the [`PacketQueue`] it feeds, which normally lives in a `static`
//! shared with the waveform interrupt.
//!
//! # Overview
//!
//! - Main-track commands (throttle, functions, accessories, programming on
//!   main) encode one packet, push it and return an ack record carrying the
//!   assigned sequence id
//! - Service-mode commands push a whole scripted group at once and finish
//!   later, from inside [`TrackController::tick`]
//! - [`TrackController::tick`] refreshes one locomotive speed when the queue
//!   is idle and samples the current sensor for pending acknowledgments
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::{TrackController, TrackConfig, PacketQueue};
//! use rs_dcc::hal::MockTrackHardware;
//! use rs_dcc::traits::Direction;
//!
//! static QUEUE: PacketQueue<64> = PacketQueue::new();
//!
//! let mut track = TrackController::new(&QUEUE, MockTrackHardware::new(), TrackConfig::main());
//! let ack = track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
//! assert_eq!(ack.device, 1);
//!
//! let pkt = QUEUE.next_for_transmit().unwrap();
//! assert_eq!(pkt.payload(), &[0x03, 0x3F, 0x8B, 0x03 ^ 0x3F ^ 0x8B]);
//!
//! // Queue drained: the next tick re-sends the speed of slot 1
//! track.tick();
//! assert_eq!(QUEUE.len(), 1);
//! ```

use tracing::{debug, info, trace, warn};

use crate::ack::{AckSample, AckTracker, FinalPoll};
use crate::config::TrackConfig;
use crate::encoder::{self, Encoded, FunctionGroup};
use crate::error::DccError;
use crate::packet::{Packet, PacketKind, SequenceId};
use crate::queue::PacketQueue;
use crate::service_mode::{
    Completion, Script, ServiceModeResponse, ServiceOp, ServicePhase, ServiceSession,
};
use crate::speed_table::{SpeedEntry, SpeedTable};
use crate::traits::{Direction, PomCallback, TrackHardware};

/// Extra sends for function packets, which are never refreshed.
pub const FUNCTION_REPEATS: u8 = 3;
/// Extra sends for accessory packets.
pub const ACCESSORY_REPEATS: u8 = 3;
/// Extra sends for a programming-on-main byte write.
pub const POM_BYTE_REPEATS: u8 = 3;
/// Extra sends for a programming-on-main bit write.
pub const POM_BIT_REPEATS: u8 = 4;
/// Extra sends for a programming-on-main read.
pub const POM_READ_REPEATS: u8 = 3;

/// Result of [`TrackController::set_throttle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleAck {
    /// Speed-table slot that was updated.
    pub device: u16,
    /// Locomotive address.
    pub address: u16,
    /// Caller speed code as requested (-1 to 126).
    pub speed: i16,
    /// Direction of travel.
    pub direction: Direction,
    /// Sequence id of the enqueued packet.
    pub transaction_id: SequenceId,
}

/// Result of [`TrackController::set_function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionAck {
    /// Locomotive address.
    pub address: u16,
    /// Sequence id of the enqueued packet.
    pub transaction_id: SequenceId,
}

/// Result of [`TrackController::set_accessory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessoryAck {
    /// Accessory decoder address.
    pub address: u16,
    /// Output pair on the decoder.
    pub number: u8,
    /// Whether the output was activated.
    pub activate: bool,
    /// Sequence id of the enqueued packet.
    pub transaction_id: SequenceId,
}

/// Result of a programming-on-main request.
///
/// The decoder's answer, if any, arrives later through the registered
/// [`PomCallback`] with the same `transaction_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PomAck {
    /// Locomotive address.
    pub address: u16,
    /// CV number after the modulo-1024 reduction.
    pub cv: u16,
    /// Sequence id of the enqueued packet.
    pub transaction_id: SequenceId,
}

/// Packet engine for one track.
///
/// # Type Parameters
///
/// - `H`: the board's current sensor and RailCom hook ([`TrackHardware`])
/// - `N`: capacity of the borrowed [`PacketQueue`]
///
/// # Thread Safety
///
/// Only the queue is shared with the waveform interrupt. The controller
/// itself is driven from one context; share it across tasks with a mutex.
pub struct TrackController<'q, H: TrackHardware, const N: usize> {
    queue: &'q PacketQueue<N>,
    hardware: H,
    config: TrackConfig,
    speeds: SpeedTable,
    counter: SequenceId,
    session: Option<ServiceSession>,
    acks: AckTracker,
    abandoned: bool,
}

impl<'q, H: TrackHardware, const N: usize> TrackController<'q, H, N> {
    /// Create a controller feeding `queue`.
    pub fn new(queue: &'q PacketQueue<N>, hardware: H, config: TrackConfig) -> Self {
        Self {
            queue,
            hardware,
            speeds: SpeedTable::new(config.num_devices),
            config,
            counter: SequenceId::default(),
            session: None,
            acks: AckTracker::new(),
            abandoned: false,
        }
    }

    // ------------------------------------------------------------------
    // Main track
    // ------------------------------------------------------------------

    /// Send a 128-step speed command and remember it in `slot`.
    ///
    /// The packet is sent once; the refresh scheduler keeps re-sending it.
    /// An emergency stop (`-1`) is remembered as a plain stop.
    pub fn set_throttle(
        &mut self,
        slot: u16,
        address: u16,
        speed: i16,
        direction: Direction,
    ) -> Result<ThrottleAck, DccError> {
        self.speeds.check_slot(slot)?;
        let encoded = encoder::throttle(address, speed, direction)?;
        let transaction_id = self.enqueue(encoded, 0, PacketKind::Throttle)?;

        let stored = u8::try_from(speed).unwrap_or(0);
        self.speeds
            .update(slot, SpeedEntry::new(address, stored, direction))?;

        Ok(ThrottleAck {
            device: slot,
            address,
            speed,
            direction,
            transaction_id,
        })
    }

    /// Send a raw function group instruction.
    ///
    /// With `byte2` absent this is an F0-F12 packet, otherwise an F13-F28
    /// feature expansion packet. Bytes are masked into the legal range.
    pub fn set_function(
        &mut self,
        address: u16,
        byte1: u8,
        byte2: Option<u8>,
    ) -> Result<FunctionAck, DccError> {
        let encoded = match byte2 {
            None => encoder::function(address, byte1)?,
            Some(byte2) => encoder::function_expanded(address, byte1, byte2)?,
        };
        let transaction_id = self.enqueue(encoded, FUNCTION_REPEATS, PacketKind::Function)?;
        Ok(FunctionAck {
            address,
            transaction_id,
        })
    }

    /// Send a function group from a per-group on/off mask.
    pub fn set_function_group(
        &mut self,
        address: u16,
        group: FunctionGroup,
        mask: u8,
    ) -> Result<FunctionAck, DccError> {
        let (byte1, byte2) = group.instruction(mask);
        self.set_function(address, byte1, byte2)
    }

    /// Switch a basic accessory output.
    pub fn set_accessory(
        &mut self,
        address: u16,
        number: u8,
        activate: bool,
    ) -> Result<AccessoryAck, DccError> {
        let encoded = encoder::accessory(address, number, activate)?;
        let transaction_id = self.enqueue(encoded, ACCESSORY_REPEATS, PacketKind::Accessory)?;
        Ok(AccessoryAck {
            address,
            number,
            activate,
            transaction_id,
        })
    }

    /// Write a CV byte on the main track.
    pub fn write_cv_byte_main(
        &mut self,
        address: u16,
        cv: u16,
        value: u8,
        callback: PomCallback,
    ) -> Result<PomAck, DccError> {
        let encoded = encoder::pom_write_byte(address, cv, value)?;
        self.pom(address, cv, encoded, POM_BYTE_REPEATS, PacketKind::PomByteWrite, callback)
    }

    /// Write one CV bit on the main track. `bit` is taken modulo 8.
    pub fn write_cv_bit_main(
        &mut self,
        address: u16,
        cv: u16,
        bit: u8,
        value: bool,
        callback: PomCallback,
    ) -> Result<PomAck, DccError> {
        let encoded = encoder::pom_write_bit(address, cv, bit, u8::from(value))?;
        self.pom(address, cv, encoded, POM_BIT_REPEATS, PacketKind::PomBitWrite, callback)
    }

    /// Ask a decoder on the main track for a CV byte over RailCom.
    pub fn read_cv_byte_main(
        &mut self,
        address: u16,
        cv: u16,
        callback: PomCallback,
    ) -> Result<PomAck, DccError> {
        let encoded = encoder::pom_read_byte(address, cv)?;
        self.pom(address, cv, encoded, POM_READ_REPEATS, PacketKind::PomRead, callback)
    }

    fn pom(
        &mut self,
        address: u16,
        cv: u16,
        encoded: Encoded,
        repeats: u8,
        kind: PacketKind,
        callback: PomCallback,
    ) -> Result<PomAck, DccError> {
        let packet = self.build(&encoded, repeats, kind)?;
        self.ensure_free(1)?;

        // Register before the packet can reach the rails
        self.hardware.set_pom_callback(callback);
        let transaction_id = self.push(packet)?;

        Ok(PomAck {
            address,
            cv: encoder::cv_number(cv),
            transaction_id,
        })
    }

    // ------------------------------------------------------------------
    // Service mode (programming track)
    // ------------------------------------------------------------------

    /// Write a CV byte on the programming track.
    ///
    /// Returns [`DccError::Busy`] without enqueuing anything if another
    /// operation is in flight or the queue lacks headroom; `completion` is
    /// then dropped unfired. Otherwise `completion` fires exactly once from
    /// a later [`tick`](Self::tick).
    pub fn write_cv_byte(
        &mut self,
        cv: u16,
        value: u8,
        callback: u16,
        callback_sub: u16,
        completion: Completion,
    ) -> Result<(), DccError> {
        let (script, watched) = Script::write(
            self.counter,
            encoder::service_write_byte(cv, value),
            encoder::service_verify_byte(cv, value),
            PacketKind::ServiceByteWrite,
        );
        let session =
            ServiceSession::new(ServiceOp::WriteCvByte, cv, value, callback, callback_sub, completion);
        self.start_service(session, script, self.config.write_headroom)?;
        self.acks.begin_final(watched);
        Ok(())
    }

    /// Write one CV bit on the programming track. `bit` is taken modulo 8.
    ///
    /// Completes with `value: Some(0 | 1)` on success.
    pub fn write_cv_bit(
        &mut self,
        cv: u16,
        bit: u8,
        value: bool,
        callback: u16,
        callback_sub: u16,
        completion: Completion,
    ) -> Result<(), DccError> {
        let bit = bit % 8;
        let value = u8::from(value);
        let (script, watched) = Script::write(
            self.counter,
            encoder::service_write_bit(cv, bit, value),
            encoder::service_verify_bit(cv, bit, value),
            PacketKind::ServiceBitWrite,
        );
        let session = ServiceSession::new(
            ServiceOp::WriteCvBit { bit },
            cv,
            value,
            callback,
            callback_sub,
            completion,
        );
        self.start_service(session, script, self.config.write_headroom)?;
        self.acks.begin_final(watched);
        Ok(())
    }

    /// Read a CV byte on the programming track, one bit verify at a time.
    pub fn read_cv(
        &mut self,
        cv: u16,
        callback: u16,
        callback_sub: u16,
        completion: Completion,
    ) -> Result<(), DccError> {
        let (script, watched) = Script::read_bits(self.counter, cv);
        let session = ServiceSession::new(ServiceOp::ReadCv, cv, 0, callback, callback_sub, completion);
        self.start_service(session, script, self.config.read_headroom)?;
        self.acks.begin_bits(watched);
        Ok(())
    }

    fn start_service(
        &mut self,
        session: ServiceSession,
        script: Script,
        headroom: usize,
    ) -> Result<(), DccError> {
        if self.session.is_some() || !self.acks.is_idle() {
            warn!(track = %self.config.name, "service-mode operation already in flight");
            return Err(DccError::Busy);
        }
        self.ensure_free(headroom.max(script.packets.len()))?;

        self.hardware.set_base_current();
        debug!(
            track = %self.config.name,
            op = ?session.op,
            cv = session.cv,
            base_ma = self.hardware.base_current_ma(),
            "starting service-mode operation"
        );
        self.push_script(script);
        self.session = Some(session);
        self.abandoned = false;
        Ok(())
    }

    fn push_script(&mut self, script: Script) {
        let first = self.counter.next();
        for packet in script.packets {
            if let Err(packet) = self.queue.push(packet) {
                warn!(track = %self.config.name, id = packet.sequence_id.get(), "script packet rejected");
            }
        }
        self.counter = script.last_id;
        // After the push, so a transmitter that just ran dry does not count
        self.queue.clear_back_to_idle();
        debug!(
            track = %self.config.name,
            first = first.get(),
            last = self.counter.get(),
            "scheduled service-mode groups"
        );
    }

    /// Give up on the service-mode operation in flight.
    ///
    /// Raises the back-to-idle signal; the next [`tick`](Self::tick)
    /// resolves every pending verify as "no ack" and the completion fires
    /// with `value: None`. Packets already queued still go out.
    pub fn abandon(&mut self) {
        self.queue.raise_back_to_idle();
        if self.session.is_some() {
            self.abandoned = true;
            debug!(track = %self.config.name, "abandoning service-mode operation");
        }
    }

    /// Where the service-mode state machine stands.
    pub fn service_phase(&self) -> ServicePhase {
        if self.session.is_none() {
            ServicePhase::Idle
        } else if self.acks.in_final_verify() {
            ServicePhase::AwaitingFinalVerify
        } else {
            match self.acks.pending_bits() {
                0 => ServicePhase::Idle,
                pending => ServicePhase::AwaitingBitAcks { pending },
            }
        }
    }

    /// Returns true while a service-mode operation is in flight.
    pub fn service_busy(&self) -> bool {
        self.session.is_some()
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one scheduler step: speed refresh, then acknowledgment detection.
    ///
    /// Call at a steady short interval, well under the duration of one
    /// packet group.
    pub fn tick(&mut self) {
        self.refresh_speeds();
        self.check_ack();
    }

    /// Re-send one remembered speed if the queue has nothing waiting.
    ///
    /// Returns the sequence id of the refresh packet, if one was sent.
    pub fn refresh_speeds(&mut self) -> Option<SequenceId> {
        if !self.queue.is_empty() {
            return None;
        }

        let (slot, entry) = self.speeds.next_refresh()?;
        let result = encoder::throttle(entry.cab, i16::from(entry.speed), entry.direction)
            .and_then(|encoded| self.enqueue(encoded, 0, PacketKind::Throttle));
        match result {
            Ok(id) => {
                debug!(track = %self.config.name, slot, cab = entry.cab, id = id.get(), "speed refresh");
                Some(id)
            }
            Err(e) => {
                warn!(track = %self.config.name, slot, error = %e, "speed refresh failed");
                None
            }
        }
    }

    /// Sample the transmitter and the current sensor once.
    pub fn check_ack(&mut self) {
        if self.acks.is_idle() {
            return;
        }

        let rise = self.hardware.current_rise_ma();
        let sample = AckSample {
            transmit_id: self.queue.transmit_id(),
            back_to_idle: self.queue.back_to_idle(),
            acked: rise > self.config.ack_threshold_ma,
        };
        trace!(
            track = %self.config.name,
            transmit_id = sample.transmit_id.get(),
            rise_ma = rise,
            back_to_idle = sample.back_to_idle,
            "ack sample"
        );

        if self.acks.in_final_verify() {
            match self.acks.poll_final(sample) {
                FinalPoll::Pending => {}
                FinalPoll::Acked(id) => {
                    self.queue.skip_sequence(id);
                    self.finish(true);
                }
                FinalPoll::TimedOut => self.finish(false),
            }
            return;
        }

        let poll = self.acks.poll_bits(sample);
        if let Some(id) = poll.skip {
            self.queue.skip_sequence(id);
        }
        if let Some(byte) = poll.complete {
            if self.abandoned {
                self.finish(false);
            } else {
                self.schedule_final_verify(byte);
            }
        }
    }

    fn schedule_final_verify(&mut self, byte: u8) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.value = byte;
        let (script, watched) = Script::verify_byte(self.counter, session.cv, byte);

        if self.queue.free() < script.packets.len() {
            warn!(track = %self.config.name, "no room for the final verify");
            self.finish(false);
            return;
        }
        debug!(track = %self.config.name, value = byte, "bits resolved, verifying byte");
        self.push_script(script);
        self.acks.begin_final(watched);
    }

    fn finish(&mut self, success: bool) {
        self.abandoned = false;
        let Some(mut session) = self.session.take() else {
            return;
        };
        let value = success.then_some(session.value);
        if let Some(ServiceModeResponse { op, cv, value, .. }) = session.finish(value) {
            info!(track = %self.config.name, ?op, cv, ?value, "service-mode operation complete");
        }
    }

    // ------------------------------------------------------------------
    // Queue helpers
    // ------------------------------------------------------------------

    fn build(&self, encoded: &Encoded, repeats: u8, kind: PacketKind) -> Result<Packet, DccError> {
        Packet::new(&encoded.bytes, repeats, self.counter.next(), kind, encoded.tag).inspect_err(
            |e| warn!(track = %self.config.name, ?kind, error = %e, "packet dropped"),
        )
    }

    fn ensure_free(&self, needed: usize) -> Result<(), DccError> {
        let free = self.queue.free();
        if free < needed {
            warn!(track = %self.config.name, free, needed, "queue busy");
            return Err(DccError::Busy);
        }
        Ok(())
    }

    fn push(&mut self, packet: Packet) -> Result<SequenceId, DccError> {
        let id = packet.sequence_id;
        let kind = packet.kind;
        if self.queue.push(packet).is_err() {
            warn!(track = %self.config.name, ?kind, "queue full");
            return Err(DccError::Busy);
        }
        self.counter = id;
        trace!(track = %self.config.name, ?kind, id = id.get(), "enqueued");
        Ok(id)
    }

    fn enqueue(
        &mut self,
        encoded: Encoded,
        repeats: u8,
        kind: PacketKind,
    ) -> Result<SequenceId, DccError> {
        let packet = self.build(&encoded, repeats, kind)?;
        self.push(packet)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The remembered speeds.
    pub fn speed_table(&self) -> &SpeedTable {
        &self.speeds
    }

    /// Track configuration.
    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Sequence id of the most recently enqueued group.
    pub fn last_sequence_id(&self) -> SequenceId {
        self.counter
    }

    /// The queue this controller feeds.
    pub fn queue(&self) -> &'q PacketQueue<N> {
        self.queue
    }

    /// Board hardware.
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Board hardware, mutably (tests drive the mock current through this).
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockTrackHardware;
    use crate::service_mode::ResponseSlot;

    fn controller(queue: &PacketQueue<64>) -> TrackController<'_, MockTrackHardware, 64> {
        TrackController::new(queue, MockTrackHardware::new(), TrackConfig::programming())
    }

    #[test]
    fn throttle_assigns_increasing_ids() {
        let queue: PacketQueue<64> = PacketQueue::new();
        let mut track =
            TrackController::new(&queue, MockTrackHardware::new(), TrackConfig::main());

        let a = track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
        let b = track.set_throttle(2, 4, 10, Direction::Forward).unwrap();
        assert_eq!(a.transaction_id, SequenceId::new(1));
        assert_eq!(b.transaction_id, SequenceId::new(2));
        assert_eq!(track.last_sequence_id(), SequenceId::new(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn rejected_throttle_leaves_table_and_counter_alone() {
        let queue: PacketQueue<64> = PacketQueue::new();
        let mut track =
            TrackController::new(&queue, MockTrackHardware::new(), TrackConfig::main());

        assert!(track.set_throttle(1, 0, 10, Direction::Forward).is_err());
        assert!(track.set_throttle(1, 3, 127, Direction::Forward).is_err());
        assert!(track.set_throttle(51, 3, 10, Direction::Forward).is_err());
        assert_eq!(track.speed_table().occupied().count(), 0);
        assert_eq!(track.last_sequence_id(), SequenceId::new(0));
        assert!(queue.is_empty());
    }

    #[test]
    fn emergency_stop_is_remembered_as_stop() {
        let queue: PacketQueue<64> = PacketQueue::new();
        let mut track =
            TrackController::new(&queue, MockTrackHardware::new(), TrackConfig::main());

        track.set_throttle(1, 3, -1, Direction::Reverse).unwrap();
        let entry = track.speed_table().get(1).unwrap();
        assert_eq!(entry.speed, 0);
        assert_eq!(entry.direction, Direction::Reverse);
    }

    #[test]
    fn phases_of_a_read() {
        let queue = PacketQueue::new();
        let mut track = controller(&queue);
        let slot = ResponseSlot::new();

        assert_eq!(track.service_phase(), ServicePhase::Idle);
        track.read_cv(1, 0, 0, slot.completion()).unwrap();
        assert_eq!(
            track.service_phase(),
            ServicePhase::AwaitingBitAcks { pending: 0xFF }
        );
        assert!(track.service_busy());
        assert_eq!(queue.len(), 32);
    }

    #[test]
    fn service_request_takes_baseline() {
        let queue = PacketQueue::new();
        let mut track = controller(&queue);
        track.hardware_mut().current_ma = 25;

        let slot = ResponseSlot::new();
        track.write_cv_byte(29, 6, 0, 0, slot.completion()).unwrap();
        assert_eq!(track.hardware().base_ma, 25);
        assert_eq!(track.service_phase(), ServicePhase::AwaitingFinalVerify);
    }

    #[test]
    fn abandon_without_session_only_raises_flag() {
        let queue = PacketQueue::new();
        let mut track = controller(&queue);
        track.abandon();
        assert!(queue.back_to_idle());
        assert!(!track.service_busy());
    }

    #[test]
    fn pom_registers_callback() {
        let queue: PacketQueue<64> = PacketQueue::new();
        let mut track =
            TrackController::new(&queue, MockTrackHardware::new(), TrackConfig::main());

        let ack = track
            .write_cv_byte_main(3, 1025, 9, alloc::boxed::Box::new(|_| {}))
            .unwrap();
        assert_eq!(ack.cv, 1);
        assert!(track.hardware().has_pom_callback());
        assert_eq!(queue.next_for_transmit().unwrap().sends(), 4);
    }
}
