//! Integration tests for main-track commands and the refresh scheduler

use std::sync::{Arc, Mutex};

use rs_dcc::hal::{MockTrackHardware, MockTransmitter};
use rs_dcc::{
    DccError, Direction, FunctionGroup, PacketKind, PacketQueue, PomResponse, SequenceId,
    TrackConfig, TrackController,
};

type MainTrack<'q, const N: usize> = TrackController<'q, MockTrackHardware, N>;

fn main_track<const N: usize>(queue: &PacketQueue<N>) -> MainTrack<'_, N> {
    TrackController::new(queue, MockTrackHardware::new(), TrackConfig::main())
}

// ============================================================================
// Throttle
// ============================================================================

#[test]
fn throttle_short_address_packet() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    let ack = track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
    assert_eq!(ack.device, 1);
    assert_eq!(ack.address, 3);
    assert_eq!(ack.speed, 10);
    assert_eq!(ack.transaction_id, SequenceId::new(1));

    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.payload(), &[0x03, 0x3F, 0x8B, 0x03 ^ 0x3F ^ 0x8B]);
    assert_eq!(pkt.kind, PacketKind::Throttle);
    assert_eq!(pkt.repeats, 0);
    assert_eq!(pkt.decoder_tag, 3);
}

#[test]
fn throttle_long_address_packet() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    track.set_throttle(2, 1234, 126, Direction::Reverse).unwrap();
    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.instruction(), &[0xC4, 0xD2, 0x3F, 0x7F]);
    assert!(pkt.verify_checksum());
    assert_eq!(pkt.decoder_tag, 0xC4D2);
}

#[test]
fn emergency_stop_then_refresh_sends_stop() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_throttle(1, 3, -1, Direction::Forward).unwrap();
    tx.drain();
    track.tick();
    tx.drain();

    let bytes = tx.instructions();
    assert_eq!(bytes, vec![vec![0x03, 0x3F, 0x81], vec![0x03, 0x3F, 0x80]]);
}

#[test]
fn stop_still_sends_a_packet() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    track.set_throttle(1, 3, 0, Direction::Reverse).unwrap();
    assert_eq!(queue.next_for_transmit().unwrap().instruction(), &[0x03, 0x3F, 0x00]);
}

#[test]
fn throttle_argument_bounds() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    assert!(matches!(
        track.set_throttle(0, 3, 10, Direction::Forward),
        Err(DccError::OutOfRange { what: "slot", .. })
    ));
    assert!(matches!(
        track.set_throttle(1, 10240, 10, Direction::Forward),
        Err(DccError::OutOfRange { what: "address", .. })
    ));
    assert!(matches!(
        track.set_throttle(1, 3, -2, Direction::Forward),
        Err(DccError::OutOfRange { what: "speed", .. })
    ));
    assert!(queue.is_empty());
}

// ============================================================================
// Refresh scheduler
// ============================================================================

#[test]
fn refresh_round_robin_one_slot_per_tick() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
    track.set_throttle(4, 7, 20, Direction::Reverse).unwrap();
    track.set_throttle(9, 12, 30, Direction::Forward).unwrap();
    tx.drain();
    tx.clear();

    for expected in [3, 7, 12, 3, 7, 12, 3] {
        track.tick();
        assert_eq!(queue.len(), 1);
        tx.drain();
        assert_eq!(tx.sent.len(), 1);
        assert_eq!(tx.sent[0].decoder_tag, expected);
        tx.clear();
    }
}

#[test]
fn refresh_resends_remembered_bytes() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_throttle(4, 7, 20, Direction::Reverse).unwrap();
    tx.drain();
    tx.clear();

    let id = track.refresh_speeds().unwrap();
    assert_eq!(id, SequenceId::new(2));
    tx.drain();
    assert_eq!(tx.instructions(), vec![vec![0x07, 0x3F, 21]]);
}

#[test]
fn refresh_waits_for_pending_work() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
    track.tick();
    track.tick();
    assert_eq!(queue.len(), 1);
}

#[test]
fn refresh_with_empty_table_sends_nothing() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    for _ in 0..10 {
        track.tick();
    }
    assert!(queue.is_empty());
    assert_eq!(track.last_sequence_id(), SequenceId::new(0));
}

#[test]
fn reassigned_slot_refreshes_new_address() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
    track.set_throttle(1, 44, 10, Direction::Forward).unwrap();
    tx.drain();
    tx.clear();

    for _ in 0..3 {
        track.tick();
        tx.drain();
    }
    assert!(tx.sent.iter().all(|p| p.decoder_tag == 44));
}

// ============================================================================
// Back-pressure
// ============================================================================

#[test]
fn full_queue_reports_busy() {
    let queue: PacketQueue<4> = PacketQueue::new();
    let mut track = main_track(&queue);

    for _ in 0..4 {
        track.set_function(3, 0x90, None).unwrap();
    }
    assert_eq!(track.set_function(3, 0x90, None), Err(DccError::Busy));
    assert_eq!(track.set_accessory(1, 0, true), Err(DccError::Busy));
    assert_eq!(
        track.set_throttle(1, 3, 10, Direction::Forward),
        Err(DccError::Busy)
    );

    // Nothing half-applied
    assert_eq!(queue.len(), 4);
    assert!(!track.speed_table().get(1).unwrap().is_occupied());
    assert_eq!(track.last_sequence_id(), SequenceId::new(4));
}

#[test]
fn packets_leave_in_order_with_their_repeats() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_throttle(1, 3, 10, Direction::Forward).unwrap();
    track.set_function(3, 0x90, None).unwrap();
    track.set_accessory(5, 1, true).unwrap();
    tx.drain();

    let ids: Vec<u16> = tx.sent.iter().map(|p| p.sequence_id.get()).collect();
    assert_eq!(ids, vec![1, 2, 2, 2, 2, 3, 3, 3, 3]);
}

// ============================================================================
// Functions and accessories
// ============================================================================

#[test]
fn function_packets() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    let ack = track.set_function(3, 0xFF, None).unwrap();
    assert_eq!(ack.address, 3);
    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.instruction(), &[0x03, 0xBF]);
    assert_eq!(pkt.sends(), 4);
    assert_eq!(pkt.kind, PacketKind::Function);

    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    track.set_function(200, 0x00, Some(0x81)).unwrap();
    assert_eq!(
        queue.next_for_transmit().unwrap().instruction(),
        &[0xC0, 0xC8, 0xDE, 0x81]
    );
}

#[test]
fn function_group_helper() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let mut tx = MockTransmitter::new(&queue);

    track.set_function_group(3, FunctionGroup::F0F4, 0b0_0011).unwrap();
    track.set_function_group(3, FunctionGroup::F21F28, 0x80).unwrap();
    tx.drain();

    let bytes = tx.instructions();
    assert_eq!(bytes[0], vec![0x03, 0x91]);
    assert_eq!(bytes[4], vec![0x03, 0xDF, 0x80]);
}

#[test]
fn accessory_packet() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    let ack = track.set_accessory(1, 0, true).unwrap();
    assert!(ack.activate);
    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.payload(), &[0x81, 0xF9, 0x81 ^ 0xF9]);
    assert_eq!(pkt.sends(), 4);
    assert_eq!(pkt.kind, PacketKind::Accessory);

    assert!(matches!(
        track.set_accessory(512, 0, true),
        Err(DccError::OutOfRange { .. })
    ));
}

// ============================================================================
// Programming on main
// ============================================================================

#[test]
fn pom_write_delivers_railcom_answer() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    let answers = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&answers);

    let ack = track
        .write_cv_byte_main(
            1234,
            29,
            6,
            Box::new(move |r| sink.lock().unwrap().push(r)),
        )
        .unwrap();
    assert_eq!(ack.cv, 29);

    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.instruction(), &[0xC4, 0xD2, 0xEC, 28, 6]);
    assert_eq!(pkt.sends(), 4);
    assert_eq!(pkt.kind, PacketKind::PomByteWrite);

    let answer = PomResponse {
        transaction_id: ack.transaction_id.get(),
        data: 6,
    };
    assert!(track.hardware_mut().deliver_pom(answer));
    assert_eq!(*answers.lock().unwrap(), vec![answer]);
}

#[test]
fn pom_bit_write_and_read() {
    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);

    track
        .write_cv_bit_main(3, 29, 5, true, Box::new(|_| {}))
        .unwrap();
    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.instruction(), &[0x03, 0xE8, 28, 0xFD]);
    assert_eq!(pkt.sends(), 5);

    let queue: PacketQueue<16> = PacketQueue::new();
    let mut track = main_track(&queue);
    track.read_cv_byte_main(3, 8, Box::new(|_| {})).unwrap();
    let pkt = queue.next_for_transmit().unwrap();
    assert_eq!(pkt.instruction(), &[0x03, 0xE4, 7, 0x00]);
    assert_eq!(pkt.kind, PacketKind::PomRead);
    assert_eq!(pkt.sends(), 4);
}

#[test]
fn pom_on_full_queue_keeps_old_callback() {
    let queue: PacketQueue<1> = PacketQueue::new();
    let mut track = main_track(&queue);

    track.set_function(3, 0x80, None).unwrap();
    assert_eq!(
        track.read_cv_byte_main(3, 1, Box::new(|_| {})),
        Err(DccError::Busy)
    );
    assert!(!track.hardware().has_pom_callback());
}
