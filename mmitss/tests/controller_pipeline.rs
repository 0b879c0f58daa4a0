//! Serial-to-SPaT pipeline: poll payloads fill the card, a pushed raw SPaT
//! drives the predictor, and the controller-status record turns into a
//! broadcastable SPaT payload.

use mmitss::ab3418::{FrameParser, SignalStatus, PATTERN_FREE, RAW_SPAT};
use mmitss::bytes::{append_fcs, byte_stuff, FLAG};
use mmitss::fanout::{
    controller_state_record, pack_controller_state, spat_from_controller_state,
    unpack_controller_state, unpack_header, HEADER_LEN,
};
use mmitss::predictor::{ControllerStatus, SpatOutcome};
use mmitss::timecard::{ControlMode, TimingCard};
use mmitss::j2735::{MovementPhaseState, Spat};

fn poll_fed_card() -> TimingCard {
    let mut card = TimingCard::default();
    // phase flags: all phases permitted
    let mut payload = vec![2u8, 1];
    payload.extend_from_slice(&[0xFF; 2]);
    payload.extend_from_slice(&[0u8; 19]);
    payload[3] = 0; // restricted
    card.update_from_poll("phase flags", &payload).unwrap();
    let mut payload = vec![2u8, 3];
    payload.push(0b0010_0010);
    card.update_from_poll("ped flags", &payload).unwrap();
    card.update_from_poll("red revert", &[0x72, 0x00, 1, 20]).unwrap();
    for phase in 1..=8u8 {
        let mut payload = vec![3u8, phase];
        payload.extend_from_slice(&[
            7, 11, 8, 0, 0, 25, 35, 45, 25, 20, 30, 0, 0, 0, 35, 15, 0, 0, 0, 0, 0,
        ]);
        card.update_from_poll(&format!("phase timing {phase}"), &payload)
            .unwrap();
    }
    // coord plan 3: 80 s cycle, sync phases 2 and 6
    let mut payload = vec![4u8, 3];
    payload.extend_from_slice(&[
        80, // cycle length
        8, 30, 10, 12, 8, 30, 10, 12, // green factors
        10, // cycle multiplier
        0, 27, 54, // offsets
        0,  // lag gap-out
        0b1000_1000, // lag phases
        0b0010_0010, // sync phases
        0, // hold
        0, // omit
        0, 0, 0, 0, // recalls
        0, // force-off flag
        0, 0, 0, // spare
    ]);
    card.update_from_poll("coord plan 3", &payload).unwrap();
    // free plan with no omits
    let mut payload = vec![4u8, 10];
    payload.extend_from_slice(&[0u8; 18]);
    card.update_from_poll("free plan", &payload).unwrap();
    card.set_free_plan_parameters();
    card.set_coord_plan_parameters().unwrap();
    card.set_initiated();
    card
}

fn raw_spat_frame(
    active_phase: u8,
    interval: [u8; 2],
    timer: [u8; 2],
    pattern: u8,
    clock: u8,
    force_off: [u8; 2],
) -> Vec<u8> {
    let mut frame = vec![FLAG, 0x05, 0x13, 0xC0, RAW_SPAT];
    frame.push(active_phase);
    frame.extend_from_slice(&interval);
    frame.extend_from_slice(&timer);
    frame.push(0); // next phase
    frame.push(0); // ped call
    frame.push(0); // veh call
    frame.push(pattern);
    frame.push(clock);
    frame.push(0); // master clock
    frame.push(0); // preempt
    frame.extend_from_slice(&[0; 8]);
    frame.extend_from_slice(&force_off);
    frame.extend_from_slice(&[0; 8]);
    append_fcs(&mut frame);
    let mut wire = byte_stuff(&frame);
    wire.push(FLAG);
    wire
}

#[test]
fn raw_spat_drives_the_status_record() {
    let card = poll_fed_card();
    // pattern 7 = plan 3; both sync phases green in min green, clock at 0
    let wire = raw_spat_frame(0x22, [2, 2], [60, 60], 7, 0, [40, 40]);
    let mut parser = FrameParser::new();
    let mut it = parser.consume(&wire);
    let frame = it.next().unwrap().unwrap();
    assert_eq!(frame.wire_len(), 38);
    frame.verify_fcs().unwrap();
    let signal = SignalStatus::parse(&frame).unwrap();
    assert_eq!(signal.plan_num, 3);

    let mut status = ControllerStatus::default();
    assert_eq!(
        status.initialize(&card, &signal, 0, 1_000_000),
        SpatOutcome::Updated
    );
    assert_eq!(status.on_new_spat(&card, &signal, 1_000_000), SpatOutcome::Updated);
    assert_eq!(status.mode, ControlMode::Coordination);
    assert_eq!(status.synch_phase, 2);
    assert_eq!(status.permitted_phases, 0xFF);
    assert_eq!(status.cycle_length, 800);

    // clock 0: sync force-off wraps through the cycle end (40 s away)
    let p2 = status.phase_status[1].time2next;
    assert_eq!(p2.bound_l, p2.bound_u);
    assert_eq!(p2.bound_l, 400);

    let record = controller_state_record(&status, 100_000, 30_000);
    assert_eq!(record.mode, ControlMode::Coordination);
    assert_eq!(record.synch_phase, 2);
    assert_eq!(record.permitted_phases, 0xFF);

    // wire trip of the interprocess record
    let mut buf = Vec::new();
    pack_controller_state(&mut buf, &record, 43_200_000, 1);
    let header = unpack_header(&buf).unwrap();
    let mut decoded = unpack_controller_state(&buf[HEADER_LEN..HEADER_LEN + usize::from(header.length)]).unwrap();
    decoded.msg_cnt = 0;
    assert_eq!(decoded, record);

    // SPaT projection broadcasts green on the sync phases
    let spat = spat_from_controller_state(&record, 1000, 4);
    assert_eq!(
        spat.phase_state[1].curr_state,
        MovementPhaseState::ProtectedMovementAllowed
    );
    assert_eq!(
        spat.phase_state[0].curr_state,
        MovementPhaseState::StopAndRemain
    );
    let mut payload = [0u8; 512];
    let used = spat.encode(&mut payload).unwrap();
    let rx = Spat::decode(&payload[..used]).unwrap();
    assert_eq!(rx.id, 1000);
    assert_eq!(rx.permitted_phases, 0xFF);
}

#[test]
fn forceoff_scenario_pins_sync_bounds() {
    let card = poll_fed_card();
    // local cycle clock 25 s, force-off 40 s: 150 ds on both sync phases
    let wire = raw_spat_frame(0x22, [2, 2], [60, 60], 7, 25, [40, 40]);
    let mut parser = FrameParser::new();
    let mut it = parser.consume(&wire);
    let signal = SignalStatus::parse(&it.next().unwrap().unwrap()).unwrap();
    let mut status = ControllerStatus::default();
    status.initialize(&card, &signal, 0, 2_000_000);
    status.on_new_spat(&card, &signal, 2_000_000);
    let p2 = status.phase_status[1].time2next;
    let p6 = status.phase_status[5].time2next;
    assert_eq!(p2.bound_l, 150);
    assert_eq!(p2.bound_u, 150);
    assert_eq!(p6.bound_l, 150);
    assert_eq!(p6.bound_u, 150);
    // bounds stay ordered and inside twice the cycle everywhere
    for i in 0..8 {
        let b = status.phase_status[i].time2next;
        assert!(b.bound_l <= b.bound_u);
        assert!(u32::from(b.bound_u) <= 2 * u32::from(status.cycle_length));
    }
}

#[test]
fn free_running_pattern_skips_cycle_logic() {
    let card = poll_fed_card();
    let wire = raw_spat_frame(0x22, [2, 2], [60, 60], PATTERN_FREE, 0, [0, 0]);
    let mut parser = FrameParser::new();
    let mut it = parser.consume(&wire);
    let signal = SignalStatus::parse(&it.next().unwrap().unwrap()).unwrap();
    let mut status = ControllerStatus::default();
    status.initialize(&card, &signal, 0, 3_000_000);
    status.on_new_spat(&card, &signal, 3_000_000);
    assert_eq!(status.mode, ControlMode::RunningFree);
    assert_eq!(status.cur_local_cycle_clock, 0);
    assert_eq!(status.cycle_length, 0);
    let p2 = status.phase_status[1].time2next;
    assert!(p2.bound_l <= p2.bound_u);
    assert!(p2.bound_u > 0);
}
