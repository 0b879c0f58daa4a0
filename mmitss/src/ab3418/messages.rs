//! Decoded AB3418 push messages and the soft-call set frame.

use crate::ab3418::{pattern_to_plan, ring_phases, Frame, FLAG, IPI, SET_CONTROL, SET_SOFTCALL};
use crate::bytes::{append_fcs, byte_stuff};
use crate::error::FrameError;

/// 0xCE raw SPaT push: the controller's live signal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalStatus {
    pub controller_addr: u8,
    /// active phase mask and its per-ring split
    pub active_phase: u8,
    pub active_phases: [u8; 2],
    /// per-ring interval code (0x0 walk .. 0xF red clearance)
    pub active_interval: [u8; 2],
    /// per-ring countdown; seconds in walk/green intervals, deciseconds in
    /// the vehicular extension intervals
    pub interval_timer: [u8; 2],
    pub next_phase: u8,
    pub next_phases: [u8; 2],
    pub ped_call: u8,
    pub veh_call: u8,
    pub pattern_num: u8,
    pub plan_num: u8,
    pub offset_index: u8,
    /// seconds
    pub local_cycle_clock: u8,
    pub master_cycle_clock: u8,
    pub preempt: u8,
    /// seconds within the local cycle
    pub permissive: [u8; 8],
    /// per-ring force-off point of the active phases, seconds
    pub active_force_off: [u8; 2],
    pub ped_permissive: [u8; 8],
}

/// Payload length of the raw SPaT push (38-byte frame minus framing)
pub const SIGNAL_STATUS_PAYLOAD: usize = 30;
/// Payload length of the 0xC8 short status push
pub const STATUS8E_PAYLOAD: usize = 27;
/// Payload length of the 0xCD long status push
pub const LONG_STATUS8E_PAYLOAD: usize = 60;

impl SignalStatus {
    pub fn parse(frame: &Frame) -> Result<SignalStatus, FrameError> {
        let payload = frame.payload();
        if payload.len() != SIGNAL_STATUS_PAYLOAD {
            return Err(FrameError::InvalidFrameLen {
                mess_type: frame.mess_type(),
                expect: SIGNAL_STATUS_PAYLOAD,
                got: payload.len(),
            });
        }
        let (plan_num, offset_index) = pattern_to_plan(payload[8]);
        let mut status = SignalStatus {
            controller_addr: frame.address(),
            active_phase: payload[0],
            active_phases: ring_phases(payload[0]),
            active_interval: [payload[1], payload[2]],
            interval_timer: [payload[3], payload[4]],
            next_phase: payload[5],
            next_phases: ring_phases(payload[5]),
            ped_call: payload[6],
            veh_call: payload[7],
            pattern_num: payload[8],
            plan_num,
            offset_index,
            local_cycle_clock: payload[9],
            master_cycle_clock: payload[10],
            preempt: payload[11],
            active_force_off: [payload[20], payload[21]],
            ..SignalStatus::default()
        };
        status.permissive.copy_from_slice(&payload[12..20]);
        status.ped_permissive.copy_from_slice(&payload[22..30]);
        Ok(status)
    }
}

/// 0xC8 short status push: detector presence plus cabinet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status8e {
    pub controller_addr: u8,
    pub hour: u8,
    pub minute: u8,
    pub sec: u8,
    /// bit 0 focus mode, bit 2 advance input, bit 7 transit vehicle call
    pub flag: u8,
    /// bit 0 in-preempt, bit 1 cabinet flash, bit 7 critical alarm
    pub status: u8,
    pub pattern_num: u8,
    pub green_overlaps: u8,
    pub yellow_overlaps: u8,
    pub preempt: u8,
    pub veh_call: u8,
    pub ped_call: u8,
    pub active_phase: u8,
    /// ring A in the low nibble, ring B in the high nibble
    pub interval: u8,
    /// detectors 1..=40
    pub detector_presence: u64,
    pub master_cycle_clock: u8,
    pub local_cycle_clock: u8,
    pub prio_bus_id: u16,
    pub prio_bus_direction: u8,
    pub prio_type: u8,
}

impl Status8e {
    pub fn parse(frame: &Frame) -> Result<Status8e, FrameError> {
        let payload = frame.payload();
        if payload.len() < STATUS8E_PAYLOAD {
            return Err(FrameError::InvalidFrameLen {
                mess_type: frame.mess_type(),
                expect: STATUS8E_PAYLOAD,
                got: payload.len(),
            });
        }
        // presence bits arrive little-endian by byte group
        let mut presence: u64 = 0;
        for (i, &b) in payload[13..18].iter().enumerate() {
            presence |= u64::from(b) << (8 * i);
        }
        Ok(Status8e {
            controller_addr: frame.address(),
            hour: payload[0],
            minute: payload[1],
            sec: payload[2],
            flag: payload[3],
            status: payload[4],
            pattern_num: payload[5],
            green_overlaps: payload[6],
            yellow_overlaps: payload[7],
            preempt: payload[8],
            veh_call: payload[9],
            ped_call: payload[10],
            active_phase: payload[11],
            interval: payload[12],
            detector_presence: presence,
            master_cycle_clock: payload[18],
            local_cycle_clock: payload[19],
            prio_bus_id: u16::from(payload[20]) << 8 | u16::from(payload[21]),
            prio_bus_direction: payload[22],
            prio_type: payload[23],
        })
    }
}

/// 0xCD long status push: 16 system detector (volume, occupancy) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LongStatus8e {
    pub controller_addr: u8,
    pub hour: u8,
    pub minute: u8,
    pub sec: u8,
    pub flag: u8,
    pub status: u8,
    pub pattern_num: u8,
    pub master_cycle_clock: u8,
    pub local_cycle_clock: u8,
    pub seq_num: u8,
    pub volume: [u8; 16],
    /// percent scaled by 2, 210 = detector failed
    pub occupancy: [u8; 16],
}

impl Default for LongStatus8e {
    fn default() -> Self {
        LongStatus8e {
            controller_addr: 0,
            hour: 0,
            minute: 0,
            sec: 0,
            flag: 0,
            status: 0,
            pattern_num: 0,
            master_cycle_clock: 0,
            local_cycle_clock: 0,
            seq_num: 0,
            volume: [0; 16],
            occupancy: [0; 16],
        }
    }
}

impl LongStatus8e {
    pub fn parse(frame: &Frame) -> Result<LongStatus8e, FrameError> {
        let payload = frame.payload();
        if payload.len() < LONG_STATUS8E_PAYLOAD {
            return Err(FrameError::InvalidFrameLen {
                mess_type: frame.mess_type(),
                expect: LONG_STATUS8E_PAYLOAD,
                got: payload.len(),
            });
        }
        let mut status = LongStatus8e {
            controller_addr: frame.address(),
            hour: payload[0],
            minute: payload[1],
            sec: payload[2],
            flag: payload[3],
            status: payload[4],
            pattern_num: payload[5],
            master_cycle_clock: payload[18],
            local_cycle_clock: payload[19],
            seq_num: payload[20],
            ..LongStatus8e::default()
        };
        for i in 0..16 {
            status.volume[i] = payload[21 + 2 * i];
            status.occupancy[i] = payload[22 + 2 * i];
        }
        Ok(status)
    }
}

/// Builds the wire bytes of a 0x9A soft-call set frame: three 8-bit phase
/// masks plus five spare bytes, FCS'd and byte-stuffed.
pub fn pack_softcall_request(addr: u8, veh_call: u8, ped_call: u8, prio_call: u8) -> Vec<u8> {
    let mut frame = vec![
        FLAG,
        addr,
        SET_CONTROL,
        IPI,
        SET_SOFTCALL,
        veh_call,
        ped_call,
        prio_call,
        0,
        0,
        0,
        0,
        0,
    ];
    append_fcs(&mut frame);
    let mut wire = byte_stuff(&frame);
    wire.push(FLAG);
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ab3418::{FrameParser, RAW_SPAT};

    pub(crate) fn raw_spat_wire(
        addr: u8,
        active_phase: u8,
        interval: [u8; 2],
        timer: [u8; 2],
        pattern: u8,
        local_cycle_clock: u8,
        force_off: [u8; 2],
    ) -> Vec<u8> {
        let mut frame = vec![FLAG, addr, 0x13, IPI, RAW_SPAT];
        frame.push(active_phase);
        frame.extend_from_slice(&interval);
        frame.extend_from_slice(&timer);
        frame.push(0); // next_phase
        frame.push(0); // ped_call
        frame.push(0); // veh_call
        frame.push(pattern);
        frame.push(local_cycle_clock);
        frame.push(0); // master cycle clock
        frame.push(0); // preempt
        frame.extend_from_slice(&[0; 8]); // permissive
        frame.extend_from_slice(&force_off);
        frame.extend_from_slice(&[0; 8]); // ped permissive
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        wire
    }

    #[test]
    fn parses_raw_spat_push() {
        let wire = raw_spat_wire(5, 0x22, [2, 2], [60, 60], 7, 25, [40, 40]);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        frame.verify_fcs().unwrap();
        assert_eq!(frame.wire_len(), 38);
        let status = SignalStatus::parse(&frame).unwrap();
        assert_eq!(status.active_phases, [2, 6]);
        assert_eq!(status.active_interval, [2, 2]);
        assert_eq!(status.plan_num, 3);
        assert_eq!(status.offset_index, 0);
        assert_eq!(status.local_cycle_clock, 25);
        assert_eq!(status.active_force_off, [40, 40]);
    }

    #[test]
    fn rejects_undersized_spat() {
        let mut frame = vec![FLAG, 5, 0x13, IPI, RAW_SPAT, 0x22, 2, 2];
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert!(matches!(
            SignalStatus::parse(&frame),
            Err(FrameError::InvalidFrameLen { .. })
        ));
    }

    #[test]
    fn softcall_frame_shape() {
        let wire = pack_softcall_request(5, 0b0000_0010, 0, 0b0010_0000);
        // unstuffed layout: flag + 13 bytes + fcs(2) + flag = 17
        assert_eq!(wire.len(), 17);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        frame.verify_fcs().unwrap();
        assert_eq!(frame.mess_type(), SET_SOFTCALL);
        assert_eq!(frame.payload()[0], 0b0000_0010);
        assert_eq!(frame.payload()[2], 0b0010_0000);
    }
}
