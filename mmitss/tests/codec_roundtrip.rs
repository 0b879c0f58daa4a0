//! DSRC payload round trips across the five message types, including the
//! randomized BSM sweep.

use mmitss::j2735::*;
use proptest::prelude::*;

fn sample_bsm() -> Bsm {
    Bsm {
        msg_cnt: 0,
        id: 0x0000_0042,
        sec_mark: 36_090,
        latitude: 377_900_000,
        longitude: -1_221_500_000,
        elevation: 1200,
        accuracy: PositionalAccuracy {
            semi_major: 31,
            semi_minor: 31,
            orientation: UNAVAILABLE_ORIENTATION,
        },
        transmission: TransmissionState::ForwardGears,
        speed: 500,
        heading: 7200,
        steering_angle: UNAVAILABLE_STEERING,
        accel_set: AccelerationSet4Way::default(),
        brakes: BrakeSystemStatus {
            wheel_brakes: BrakeApplied::UNAVAILABLE,
            ..BrakeSystemStatus::default()
        },
        size: VehicleSize {
            width: 190,
            length: 500,
        },
    }
}

#[test]
fn bsm_known_record_round_trips_bit_exactly() {
    let bsm = sample_bsm();
    let mut buf = [0u8; 64];
    let used = bsm.encode(&mut buf).unwrap();
    assert_eq!(used, 37);
    let decoded = Bsm::decode(&buf[..used]).unwrap();
    assert_eq!(decoded, bsm);
    // re-encoding the decoded record reproduces the bytes
    let mut buf2 = [0u8; 64];
    let used2 = decoded.encode(&mut buf2).unwrap();
    assert_eq!(&buf[..used], &buf2[..used2]);
}

proptest! {
    #[test]
    fn bsm_random_records_round_trip(
        msg_cnt in 0u8..=127,
        id in any::<u32>(),
        sec_mark in 0u16..=65535,
        latitude in -900_000_000i32..=900_000_001,
        longitude in -1_799_999_999i32..=1_800_000_001,
        elevation in -4096i32..=61439,
        speed in 0u16..=8191,
        heading in 0u16..=28800,
        angle in -126i8..=127,
        accel_lon in -2000i16..=2001,
        yaw in -32767i16..=32767,
        wheel_brakes in 0u8..=0x1F,
        width in 0u16..=1023,
        length in 0u16..=4095,
    ) {
        let bsm = Bsm {
            msg_cnt,
            id,
            sec_mark,
            latitude,
            longitude,
            elevation,
            speed,
            heading,
            steering_angle: angle,
            accel_set: AccelerationSet4Way {
                lon: accel_lon,
                yaw,
                ..AccelerationSet4Way::default()
            },
            brakes: BrakeSystemStatus {
                wheel_brakes: BrakeApplied::from_bits_truncate(wheel_brakes),
                ..BrakeSystemStatus::default()
            },
            size: VehicleSize { width, length },
            ..Bsm::default()
        };
        let mut buf = [0u8; 64];
        let used = bsm.encode(&mut buf).unwrap();
        prop_assert_eq!(used, 37);
        let decoded = Bsm::decode(&buf[..used]).unwrap();
        prop_assert_eq!(decoded, bsm);
    }
}

#[test]
fn spat_with_every_movement_round_trips() {
    let mut spat = Spat {
        id: 1000,
        msg_cnt: 99,
        status: IntersectionStatus::TRAFFIC_DEPENDENT_OPERATION,
        time_stamp_minute: 400_000,
        time_stamp_sec: 59_999,
        permitted_phases: 0xFF,
        permitted_ped_phases: 0b0010_0010,
        ..Spat::default()
    };
    for i in 0..8 {
        spat.phase_state[i] = PhaseStateElement {
            curr_state: if i % 2 == 0 {
                MovementPhaseState::StopAndRemain
            } else {
                MovementPhaseState::ProtectedMovementAllowed
            },
            start_time: (i as u16) * 100,
            min_end_time: 1000 + (i as u16) * 10,
            max_end_time: 2000 + (i as u16) * 10,
        };
    }
    spat.ped_phase_state[1].curr_state = MovementPhaseState::ProtectedClearance;
    spat.ped_phase_state[1].min_end_time = 500;
    spat.ped_phase_state[5].curr_state = MovementPhaseState::StopAndRemain;
    spat.ped_phase_state[5].min_end_time = 700;
    let mut buf = [0u8; 512];
    let used = spat.encode(&mut buf).unwrap();
    assert_eq!(Spat::decode(&buf[..used]).unwrap(), spat);
}

#[test]
fn srm_and_ssm_views_of_one_conversation_round_trip() {
    let srm = Srm {
        time_stamp_minute: 123_456,
        time_stamp_sec: 4_000,
        msg_cnt: 11,
        intersection_id: 1000,
        request_id: 7,
        request_type: PriorityRequestType::PriorityRequest,
        in_bound: IntersectionAccessPoint::Lane(3),
        out_bound: Some(IntersectionAccessPoint::Lane(103)),
        eta_minute: 123_456,
        eta_sec: 11_000,
        duration: 2_000,
        requestor: RequestorDescription {
            veh_id: 7,
            role: BasicVehicleRole::Transit,
            hpms_type: VehicleType::Bus,
            latitude: 377_890_000,
            longitude: -1_221_500_000,
            elevation: 1200,
            heading: 0,
            transmission: TransmissionState::ForwardGears,
            speed: 300,
        },
    };
    let mut buf = [0u8; 256];
    let used = srm.encode(&mut buf).unwrap();
    let decoded = Srm::decode(&buf[..used]).unwrap();
    assert_eq!(decoded, srm);

    let ssm = Ssm {
        time_stamp_minute: 123_456,
        time_stamp_sec: 4_500,
        msg_cnt: 12,
        update_cnt: 3,
        id: 1000,
        requests: vec![SignalStatusPackage {
            veh_id: srm.requestor.veh_id,
            request_id: srm.request_id,
            msg_cnt: srm.msg_cnt,
            role: srm.requestor.role,
            in_bound: srm.in_bound,
            out_bound: srm.out_bound,
            eta_minute: srm.eta_minute,
            eta_sec: srm.eta_sec,
            duration: 8_200,
            status: PrioritizationResponseStatus::Granted,
        }],
    };
    let mut buf = [0u8; 256];
    let used = ssm.encode(&mut buf).unwrap();
    assert_eq!(Ssm::decode(&buf[..used]).unwrap(), ssm);
}

#[test]
fn map_payload_for_a_four_leg_intersection_round_trips() {
    // 4 inbound approaches, 2 lanes each, 3 straight-line nodes 100 m apart
    let mut geometry = IntersectionGeometry {
        id: 1000,
        revision: 0,
        ref_point: Position3D {
            latitude: 377_900_000,
            longitude: -1_221_500_000,
            elevation: Some(1200),
        },
        lane_width: Some(366),
        speed_limit: Some(559),
        lanes: Vec::new(),
    };
    for approach in 1..=4u8 {
        for lane_seq in 0..2u8 {
            let lane_id = (approach - 1) * 2 + lane_seq + 1;
            geometry.lanes.push(GenericLane {
                lane_id,
                ingress_approach: Some(approach),
                egress_approach: None,
                attributes: LaneAttributes {
                    directional_use: 0b10,
                    shared_with: 0,
                    lane_type: LaneTypeAttributes::Vehicle(0),
                },
                maneuvers: Some(AllowedManeuvers::STRAIGHT),
                connects_to: vec![Connection {
                    lane: lane_id + 100,
                    maneuver: Some(AllowedManeuvers::STRAIGHT),
                    remote_intersection: None,
                    signal_group: Some(2),
                }],
                nodes: vec![
                    NodeXY {
                        dx: i32::from(lane_seq) * 366,
                        dy: -2500,
                        d_width: None,
                    },
                    NodeXY {
                        dx: 0,
                        dy: -10_000,
                        d_width: None,
                    },
                    NodeXY {
                        dx: 0,
                        dy: -10_000,
                        d_width: None,
                    },
                ],
            });
        }
    }
    let map = MapData {
        map_version: 2,
        geometries: vec![geometry],
    };
    let mut buf = [0u8; 2048];
    let used = map.encode(&mut buf).unwrap();
    let decoded = MapData::decode(&buf[..used]).unwrap();
    assert_eq!(decoded, map);
    // node geometry reconstructs exactly: offsets are integers in cm
    for (lane, lane_in) in decoded.geometries[0].lanes.iter().zip(&map.geometries[0].lanes) {
        assert_eq!(lane.nodes, lane_in.nodes);
    }
}

#[test]
fn truncated_payloads_error_and_do_not_panic() {
    let bsm = sample_bsm();
    let mut buf = [0u8; 64];
    let used = bsm.encode(&mut buf).unwrap();
    for cut in 0..used {
        assert!(Bsm::decode(&buf[..cut]).is_err());
    }
}
