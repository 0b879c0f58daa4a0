//! Interprocess UDP message framing between the controller interface, the
//! data manager and the awareness process, plus the pedestrian-cloud header.
//!
//! Every message rides behind a fixed 9-byte header:
//! `{magic(2), msgid(1), ms_since_midnight(4 BE), length(2 BE)}`.

use crate::bytes::{pack_u16, pack_u32, unpack_u16, unpack_u32};
use crate::error::CodecError;
use crate::predictor::ControllerStatus;
use crate::timecard::{ControlMode, PedState, PhaseCall, PhaseRecall, PhaseState};

pub const HEADER_LEN: usize = 9;
pub const MAGIC: [u8; 2] = [0xFF, 0xFF];

/// Local milliseconds since midnight, the header timestamp base.
pub fn ms_of_day() -> u32 {
    use chrono::Timelike;
    let now = chrono::Local::now();
    now.num_seconds_from_midnight() * 1000 + now.timestamp_subsec_millis()
}

/// UTC minute of the year for DSRC MinuteOfTheYear fields.
pub fn minute_of_year() -> u32 {
    use chrono::{Datelike, Timelike};
    let now = chrono::Utc::now();
    now.ordinal0() * 1440 + now.hour() * 60 + now.minute()
}

/// UTC milliseconds of the current minute for DSecond fields.
pub fn ms_of_minute() -> u16 {
    use chrono::Timelike;
    let now = chrono::Utc::now();
    (now.second() * 1000 + now.timestamp_subsec_millis()) as u16
}

pub const MSGID_BSM: u8 = 0x40;
pub const MSGID_SPAT: u8 = 0x41;
pub const MSGID_MAP: u8 = 0x42;
pub const MSGID_SRM: u8 = 0x43;
pub const MSGID_SSM: u8 = 0x44;
pub const MSGID_PSRM: u8 = 0x45;
pub const MSGID_CNTRLSTATUS: u8 = 0x50;
pub const MSGID_PERM: u8 = 0x51;
pub const MSGID_SOFTCALL: u8 = 0x60;
pub const MSGID_DET_CNT: u8 = 0x61;
pub const MSGID_DET_PRES: u8 = 0x62;
pub const MSGID_TRAJ: u8 = 0x70;

/// Parsed interprocess header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub msgid: u8,
    pub ms_since_midnight: u32,
    pub length: u16,
}

pub fn pack_header(buf: &mut Vec<u8>, msgid: u8, ms_since_midnight: u32, length: u16) {
    buf.extend_from_slice(&MAGIC);
    buf.push(msgid);
    pack_u32(buf, ms_since_midnight);
    pack_u16(buf, length);
}

pub fn unpack_header(buf: &[u8]) -> Result<MsgHeader, CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::DecodeMissingMandatory { field: "header" });
    }
    if buf[..2] != MAGIC {
        return Err(CodecError::DecodeUnexpectedValue { field: "magic" });
    }
    let mut offset = 3;
    let ms_since_midnight = unpack_u32(buf, &mut offset).expect("length checked");
    let length = unpack_u16(buf, &mut offset).expect("length checked");
    if buf.len() < HEADER_LEN + usize::from(length) {
        return Err(CodecError::DecodeMissingMandatory { field: "body" });
    }
    Ok(MsgHeader {
        msgid: buf[2],
        ms_since_midnight,
        length,
    })
}

/// The 13-byte header used with the pedestrian cloud peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavariHeader {
    pub msg_type: u8,
    pub intersection_id: u16,
    pub seconds: u32,
    pub msecs: u16,
    pub length: u32,
}

pub const SAVARI_HEADER_LEN: usize = 13;

pub fn pack_savari_header(buf: &mut Vec<u8>, header: &SavariHeader) {
    buf.push(header.msg_type);
    pack_u16(buf, header.intersection_id);
    pack_u32(buf, header.seconds);
    pack_u16(buf, header.msecs);
    pack_u32(buf, header.length);
}

pub fn unpack_savari_header(buf: &[u8]) -> Result<SavariHeader, CodecError> {
    if buf.len() < SAVARI_HEADER_LEN {
        return Err(CodecError::DecodeMissingMandatory { field: "savariHeader" });
    }
    let mut offset = 1;
    Ok(SavariHeader {
        msg_type: buf[0],
        intersection_id: unpack_u16(buf, &mut offset).expect("length checked"),
        seconds: unpack_u32(buf, &mut offset).expect("length checked"),
        msecs: unpack_u16(buf, &mut offset).expect("length checked"),
        length: unpack_u32(buf, &mut offset).expect("length checked"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoftCallObj {
    Ped = 1,
    Vehicle = 2,
    Priority = 3,
}

impl SoftCallObj {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(SoftCallObj::Ped),
            2 => Some(SoftCallObj::Vehicle),
            3 => Some(SoftCallObj::Priority),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoftCallType {
    Cancel = 0,
    Call = 1,
    Extension = 2,
}

impl SoftCallType {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SoftCallType::Cancel),
            1 => Some(SoftCallType::Call),
            2 => Some(SoftCallType::Extension),
            _ => None,
        }
    }
}

/// Body of a `msgid_softcall` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SoftcallRequest {
    pub phases: u8,
    pub obj: SoftCallObj,
    pub call_type: SoftCallType,
}

pub fn pack_softcall(buf: &mut Vec<u8>, request: &SoftcallRequest, ms_since_midnight: u32) {
    pack_header(buf, MSGID_SOFTCALL, ms_since_midnight, 3);
    buf.push(request.phases);
    buf.push(request.obj as u8);
    buf.push(request.call_type as u8);
}

pub fn unpack_softcall(body: &[u8]) -> Result<SoftcallRequest, CodecError> {
    if body.len() < 3 {
        return Err(CodecError::DecodeMissingMandatory { field: "softcall" });
    }
    Ok(SoftcallRequest {
        phases: body[0],
        obj: SoftCallObj::from_u8(body[1])
            .ok_or(CodecError::DecodeUnexpectedValue { field: "softcall.obj" })?,
        call_type: SoftCallType::from_u8(body[2]).ok_or(CodecError::DecodeUnexpectedValue {
            field: "softcall.type",
        })?,
    })
}

/// Per-phase timing view inside a controller-status record; TimeMark-style
/// deciseconds of the hour, zeroed on flashing phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTimeView {
    pub state: PhaseState,
    pub start_time: u16,
    pub min_end_time: u16,
    pub max_end_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PedTimeView {
    pub state: PedState,
    pub start_time: u16,
    pub min_end_time: u16,
    pub max_end_time: u16,
}

/// Decoded body of a `msgid_cntrlstatus` message: everything the awareness
/// process needs from the controller interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerStateRecord {
    pub msg_cnt: u8,
    pub minute_of_year: u32,
    pub ms_of_minute: u16,
    pub permitted_phases: u8,
    pub permitted_ped_phases: u8,
    pub intersection_status: u16,
    pub phase_state: [PhaseTimeView; 8],
    pub ped_phase_state: [PedTimeView; 8],
    pub mode: ControlMode,
    pub pattern_num: u8,
    pub synch_phase: u8,
    /// deciseconds
    pub cycle_length: u16,
    pub local_cycle_clock: u16,
    pub coordinated_phases: u8,
    pub preempt: u8,
    pub ped_call: u8,
    pub veh_call: u8,
    pub call_status: [PhaseCall; 8],
    pub recall_status: [PhaseRecall; 8],
}

impl Default for ControllerStateRecord {
    fn default() -> Self {
        ControllerStateRecord {
            msg_cnt: 0,
            minute_of_year: 0,
            ms_of_minute: 0,
            permitted_phases: 0,
            permitted_ped_phases: 0,
            intersection_status: 0,
            phase_state: [PhaseTimeView::default(); 8],
            ped_phase_state: [PedTimeView::default(); 8],
            mode: ControlMode::Unavailable,
            pattern_num: 0,
            synch_phase: 0,
            cycle_length: 0,
            local_cycle_clock: 0,
            coordinated_phases: 0,
            preempt: 0,
            ped_call: 0,
            veh_call: 0,
            call_status: [PhaseCall::None; 8],
            recall_status: [PhaseRecall::None; 8],
        }
    }
}

fn mark_of_msec(msec: u64) -> u16 {
    ((msec % 3_600_000) / 100) as u16
}

/// Builds the controller-status record out of the live tracker state. The
/// per-phase end times are absolute deciseconds of the hour so receivers can
/// reason about arrival times without sharing a clock epoch.
pub fn controller_state_record(
    status: &ControllerStatus,
    minute_of_year: u32,
    ms_of_minute: u16,
) -> ControllerStateRecord {
    let mut record = ControllerStateRecord {
        minute_of_year,
        ms_of_minute,
        permitted_phases: status.permitted_phases,
        permitted_ped_phases: status.permitted_ped_phases,
        mode: status.mode,
        pattern_num: status.signal_status.pattern_num,
        synch_phase: status.synch_phase,
        cycle_length: status.cycle_length,
        local_cycle_clock: status.cur_local_cycle_clock,
        coordinated_phases: status.coordinated_phases,
        preempt: status.signal_status.preempt,
        ped_call: status.signal_status.ped_call,
        veh_call: status.signal_status.veh_call,
        ..ControllerStateRecord::default()
    };
    // intersection status bits mirrored into the J2735 status object
    use crate::j2735::IntersectionStatus;
    if status.signal_status.active_interval[0] == 0x0A
        || status.signal_status.active_interval[1] == 0x0A
    {
        record.intersection_status |= IntersectionStatus::STOP_TIME_ACTIVATED.bits();
    }
    if status.mode == ControlMode::Flashing {
        record.intersection_status |= IntersectionStatus::FAILURE_FLASH.bits();
    }
    if status.mode == ControlMode::Preemption {
        record.intersection_status |= IntersectionStatus::PREEMPT_ACTIVE.bits();
    }
    if status.signal_status.preempt & 0x80 != 0 {
        record.intersection_status |= IntersectionStatus::PRIORITY_ACTIVE.bits();
    }
    record.intersection_status |= IntersectionStatus::TRAFFIC_DEPENDENT_OPERATION.bits();
    for i in 0..8 {
        let phase = &status.phase_status[i];
        record.call_status[i] = phase.call_status;
        record.recall_status[i] = phase.recall_status;
        // only permitted movements ride in the record, mirroring the wire
        if status.permitted_phases & (1 << i) == 0 {
            continue;
        }
        record.phase_state[i] = if phase.state == PhaseState::FlashingRed {
            PhaseTimeView {
                state: phase.state,
                ..PhaseTimeView::default()
            }
        } else {
            PhaseTimeView {
                state: phase.state,
                start_time: mark_of_msec(phase.state_start_time),
                min_end_time: mark_of_msec(
                    status.msec + u64::from(phase.time2next.bound_l) * 100,
                ),
                max_end_time: mark_of_msec(
                    status.msec + u64::from(phase.time2next.bound_u) * 100,
                ),
            }
        };
        if status.permitted_ped_phases & (1 << i) == 0 {
            continue;
        }
        record.ped_phase_state[i] = if phase.pedstate == PedState::FlashingRed {
            PedTimeView {
                state: phase.pedstate,
                ..PedTimeView::default()
            }
        } else {
            PedTimeView {
                state: phase.pedstate,
                start_time: mark_of_msec(phase.pedstate_start_time),
                min_end_time: mark_of_msec(
                    status.msec + u64::from(phase.pedtime2next.bound_l) * 100,
                ),
                max_end_time: mark_of_msec(
                    status.msec + u64::from(phase.pedtime2next.bound_u) * 100,
                ),
            }
        };
    }
    record
}

pub fn pack_controller_state(
    buf: &mut Vec<u8>,
    record: &ControllerStateRecord,
    ms_since_midnight: u32,
    msg_cnt: u8,
) {
    let mut body = Vec::with_capacity(128);
    body.push(msg_cnt);
    pack_u32(&mut body, record.minute_of_year);
    pack_u16(&mut body, record.ms_of_minute);
    body.push(record.permitted_phases);
    body.push(record.permitted_ped_phases);
    pack_u16(&mut body, record.intersection_status);
    for i in 0..8 {
        if record.permitted_phases & (1 << i) != 0 {
            let view = &record.phase_state[i];
            body.push(view.state as u8);
            pack_u16(&mut body, view.start_time);
            pack_u16(&mut body, view.min_end_time);
            pack_u16(&mut body, view.max_end_time);
        }
    }
    for i in 0..8 {
        if record.permitted_ped_phases & (1 << i) != 0 {
            let view = &record.ped_phase_state[i];
            body.push(view.state as u8);
            pack_u16(&mut body, view.start_time);
            pack_u16(&mut body, view.min_end_time);
            pack_u16(&mut body, view.max_end_time);
        }
    }
    body.push(record.mode as u8);
    body.push(record.pattern_num);
    body.push(record.synch_phase);
    pack_u16(&mut body, record.cycle_length);
    pack_u16(&mut body, record.local_cycle_clock);
    body.push(record.coordinated_phases);
    body.push(record.preempt);
    body.push(record.ped_call);
    body.push(record.veh_call);
    for i in 0..8 {
        body.push(record.call_status[i] as u8);
        body.push(record.recall_status[i] as u8);
    }
    pack_header(buf, MSGID_CNTRLSTATUS, ms_since_midnight, body.len() as u16);
    buf.extend_from_slice(&body);
}

pub fn unpack_controller_state(body: &[u8]) -> Result<ControllerStateRecord, CodecError> {
    let missing = CodecError::DecodeMissingMandatory {
        field: "cntrlstatus",
    };
    let mut record = ControllerStateRecord::default();
    let mut offset = 0usize;
    let mut take = |n: usize| -> Result<usize, CodecError> {
        if offset + n > body.len() {
            return Err(missing);
        }
        let at = offset;
        offset += n;
        Ok(at)
    };
    record.msg_cnt = body[take(1)?];
    let mut cursor = take(4)?;
    record.minute_of_year = unpack_u32(body, &mut cursor).ok_or(missing)?;
    let mut cursor = take(2)?;
    record.ms_of_minute = unpack_u16(body, &mut cursor).ok_or(missing)?;
    record.permitted_phases = body[take(1)?];
    record.permitted_ped_phases = body[take(1)?];
    let mut cursor = take(2)?;
    record.intersection_status = unpack_u16(body, &mut cursor).ok_or(missing)?;
    for i in 0..8 {
        if record.permitted_phases & (1 << i) != 0 {
            let state = PhaseState::from_u8(body[take(1)?]);
            let mut cursor = take(6)?;
            record.phase_state[i] = PhaseTimeView {
                state,
                start_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
                min_end_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
                max_end_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
            };
        }
    }
    for i in 0..8 {
        if record.permitted_ped_phases & (1 << i) != 0 {
            let state = PedState::from_u8(body[take(1)?]);
            let mut cursor = take(6)?;
            record.ped_phase_state[i] = PedTimeView {
                state,
                start_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
                min_end_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
                max_end_time: unpack_u16(body, &mut cursor).ok_or(missing)?,
            };
        }
    }
    record.mode = match body[take(1)?] {
        0 => ControlMode::RunningFree,
        1 => ControlMode::Coordination,
        2 => ControlMode::Flashing,
        3 => ControlMode::Preemption,
        _ => ControlMode::Unavailable,
    };
    record.pattern_num = body[take(1)?];
    record.synch_phase = body[take(1)?];
    let mut cursor = take(2)?;
    record.cycle_length = unpack_u16(body, &mut cursor).ok_or(missing)?;
    let mut cursor = take(2)?;
    record.local_cycle_clock = unpack_u16(body, &mut cursor).ok_or(missing)?;
    record.coordinated_phases = body[take(1)?];
    record.preempt = body[take(1)?];
    record.ped_call = body[take(1)?];
    record.veh_call = body[take(1)?];
    for i in 0..8 {
        record.call_status[i] = match body[take(1)?] {
            1 => PhaseCall::Vehicle,
            2 => PhaseCall::Ped,
            _ => PhaseCall::None,
        };
        record.recall_status[i] = match body[take(1)?] {
            1 => PhaseRecall::Minimum,
            2 => PhaseRecall::Maximum,
            3 => PhaseRecall::Ped,
            4 => PhaseRecall::Bike,
            _ => PhaseRecall::None,
        };
    }
    Ok(record)
}

/// Completed approach traversal emitted towards the performance observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehTrajectory {
    pub veh_id: u32,
    pub entry_lane_id: u8,
    pub entry_phase: u8,
    pub leave_lane_id: u8,
    pub leave_phase: u8,
    /// decimeters
    pub dist_traveled: u16,
    /// deciseconds
    pub time_traveled: u16,
    /// number of trail samples below the stop speed
    pub stopped_samples: u16,
    /// decimeters
    pub inbound_lane_length: u16,
}

pub fn pack_trajectory(buf: &mut Vec<u8>, traj: &VehTrajectory, ms_since_midnight: u32) {
    pack_header(buf, MSGID_TRAJ, ms_since_midnight, 16);
    pack_u32(buf, traj.veh_id);
    buf.push(traj.entry_lane_id);
    buf.push(traj.entry_phase);
    buf.push(traj.leave_lane_id);
    buf.push(traj.leave_phase);
    pack_u16(buf, traj.dist_traveled);
    pack_u16(buf, traj.time_traveled);
    pack_u16(buf, traj.stopped_samples);
    pack_u16(buf, traj.inbound_lane_length);
}

pub fn unpack_trajectory(body: &[u8]) -> Result<VehTrajectory, CodecError> {
    if body.len() < 16 {
        return Err(CodecError::DecodeMissingMandatory { field: "traj" });
    }
    let mut offset = 0;
    let veh_id = unpack_u32(body, &mut offset).expect("length checked");
    let traj = VehTrajectory {
        veh_id,
        entry_lane_id: body[offset],
        entry_phase: body[offset + 1],
        leave_lane_id: body[offset + 2],
        leave_phase: body[offset + 3],
        dist_traveled: u16::from_be_bytes([body[offset + 4], body[offset + 5]]),
        time_traveled: u16::from_be_bytes([body[offset + 6], body[offset + 7]]),
        stopped_samples: u16::from_be_bytes([body[offset + 8], body[offset + 9]]),
        inbound_lane_length: u16::from_be_bytes([body[offset + 10], body[offset + 11]]),
    };
    Ok(traj)
}

/// 16-lane volume/occupancy sample forwarded from the long status push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectorCounts {
    pub seq_num: u8,
    pub volume: [u8; 16],
    pub occupancy: [u8; 16],
}

pub fn pack_detector_counts(buf: &mut Vec<u8>, counts: &DetectorCounts, ms_since_midnight: u32) {
    pack_header(buf, MSGID_DET_CNT, ms_since_midnight, 33);
    buf.push(counts.seq_num);
    buf.extend_from_slice(&counts.volume);
    buf.extend_from_slice(&counts.occupancy);
}

pub fn unpack_detector_counts(body: &[u8]) -> Result<DetectorCounts, CodecError> {
    if body.len() < 33 {
        return Err(CodecError::DecodeMissingMandatory { field: "detCnt" });
    }
    let mut counts = DetectorCounts {
        seq_num: body[0],
        volume: [0; 16],
        occupancy: [0; 16],
    };
    counts.volume.copy_from_slice(&body[1..17]);
    counts.occupancy.copy_from_slice(&body[17..33]);
    Ok(counts)
}

/// 40-bit detector presence forwarded from the short status push.
pub fn pack_detector_presence(buf: &mut Vec<u8>, presence: u64, ms_since_midnight: u32) {
    pack_header(buf, MSGID_DET_PRES, ms_since_midnight, 5);
    for i in 0..5 {
        buf.push(((presence >> (8 * i)) & 0xFF) as u8);
    }
}

pub fn unpack_detector_presence(body: &[u8]) -> Result<u64, CodecError> {
    if body.len() < 5 {
        return Err(CodecError::DecodeMissingMandatory { field: "detPres" });
    }
    Ok(body[..5]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i))))
}

/// Wraps an encoded DSRC payload behind the interprocess header.
pub fn pack_payload(buf: &mut Vec<u8>, msgid: u8, payload: &[u8], ms_since_midnight: u32) {
    pack_header(buf, msgid, ms_since_midnight, payload.len() as u16);
    buf.extend_from_slice(payload);
}

/// Raw-SPaT view kept for SPaT broadcast by the data manager (intersection
/// status bits mapped from the controller record).
pub fn spat_from_controller_state(
    record: &ControllerStateRecord,
    intersection_id: u16,
    msg_cnt: u8,
) -> crate::j2735::Spat {
    use crate::j2735::{
        IntersectionStatus, MovementPhaseState, PhaseStateElement, Spat, UNKNOWN_TIME_MARK,
    };
    let mut spat = Spat {
        id: intersection_id,
        msg_cnt,
        status: IntersectionStatus::from_bits_truncate(record.intersection_status),
        permitted_phases: record.permitted_phases,
        permitted_ped_phases: record.permitted_ped_phases,
        ..Spat::default()
    };
    for i in 0..8 {
        if record.permitted_phases & (1 << i) != 0 {
            let view = &record.phase_state[i];
            let curr_state = match view.state {
                PhaseState::Dark => MovementPhaseState::Dark,
                PhaseState::FlashingRed => MovementPhaseState::StopThenProceed,
                PhaseState::ProtectedRed => MovementPhaseState::StopAndRemain,
                PhaseState::ProtectedGreen => MovementPhaseState::ProtectedMovementAllowed,
                PhaseState::PermissiveGreen => MovementPhaseState::PermissiveMovementAllowed,
                PhaseState::ProtectedYellow => MovementPhaseState::ProtectedClearance,
                PhaseState::PermissiveYellow => MovementPhaseState::PermissiveClearance,
            };
            spat.phase_state[i] = PhaseStateElement {
                curr_state,
                start_time: view.start_time,
                min_end_time: view.min_end_time,
                max_end_time: view.max_end_time,
            };
        }
        if record.permitted_ped_phases & (1 << i) != 0 {
            let view = &record.ped_phase_state[i];
            let curr_state = match view.state {
                PedState::Dark => MovementPhaseState::Dark,
                PedState::Walk => MovementPhaseState::ProtectedMovementAllowed,
                PedState::FlashDontWalk => MovementPhaseState::ProtectedClearance,
                PedState::DontWalk => MovementPhaseState::StopAndRemain,
                PedState::FlashingRed => MovementPhaseState::StopThenProceed,
            };
            spat.ped_phase_state[i] = PhaseStateElement {
                curr_state,
                start_time: if view.state == PedState::FlashingRed {
                    UNKNOWN_TIME_MARK
                } else {
                    view.start_time
                },
                min_end_time: view.min_end_time,
                max_end_time: view.max_end_time,
            };
        }
    }
    spat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        pack_header(&mut buf, MSGID_SPAT, 12_345_678, 42);
        buf.extend_from_slice(&[0u8; 42]);
        let header = unpack_header(&buf).unwrap();
        assert_eq!(header.msgid, MSGID_SPAT);
        assert_eq!(header.ms_since_midnight, 12_345_678);
        assert_eq!(header.length, 42);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut buf = Vec::new();
        pack_header(&mut buf, MSGID_SPAT, 0, 0);
        buf[0] = 0x00;
        assert!(unpack_header(&buf).is_err());
    }

    #[test]
    fn savari_header_roundtrip() {
        let header = SavariHeader {
            msg_type: 2,
            intersection_id: 1000,
            seconds: 1_700_000,
            msecs: 250,
            length: 64,
        };
        let mut buf = Vec::new();
        pack_savari_header(&mut buf, &header);
        assert_eq!(buf.len(), SAVARI_HEADER_LEN);
        assert_eq!(unpack_savari_header(&buf).unwrap(), header);
    }

    #[test]
    fn softcall_roundtrip() {
        let request = SoftcallRequest {
            phases: 0b0010_0010,
            obj: SoftCallObj::Priority,
            call_type: SoftCallType::Extension,
        };
        let mut buf = Vec::new();
        pack_softcall(&mut buf, &request, 1000);
        let header = unpack_header(&buf).unwrap();
        assert_eq!(header.msgid, MSGID_SOFTCALL);
        assert_eq!(unpack_softcall(&buf[HEADER_LEN..]).unwrap(), request);
    }

    #[test]
    fn controller_state_roundtrip() {
        let mut record = ControllerStateRecord {
            permitted_phases: 0b0110_0110,
            permitted_ped_phases: 0b0010_0010,
            mode: ControlMode::Coordination,
            pattern_num: 7,
            synch_phase: 2,
            cycle_length: 800,
            local_cycle_clock: 251,
            coordinated_phases: 0b0010_0010,
            veh_call: 0b0000_0100,
            ..ControllerStateRecord::default()
        };
        for i in [1usize, 2, 5, 6] {
            record.phase_state[i] = PhaseTimeView {
                state: if i % 4 == 1 {
                    PhaseState::ProtectedGreen
                } else {
                    PhaseState::ProtectedRed
                },
                start_time: 100,
                min_end_time: 250,
                max_end_time: 400,
            };
        }
        for i in [1usize, 5] {
            record.ped_phase_state[i] = PedTimeView {
                state: PedState::DontWalk,
                start_time: 80,
                min_end_time: 300,
                max_end_time: 500,
            };
        }
        record.call_status[2] = PhaseCall::Vehicle;
        record.recall_status[1] = PhaseRecall::Maximum;
        let mut buf = Vec::new();
        pack_controller_state(&mut buf, &record, 1000, 9);
        let header = unpack_header(&buf).unwrap();
        assert_eq!(header.msgid, MSGID_CNTRLSTATUS);
        let mut decoded = unpack_controller_state(&buf[HEADER_LEN..]).unwrap();
        // msg_cnt rides in the body
        assert_eq!(decoded.msg_cnt, 9);
        decoded.msg_cnt = record.msg_cnt;
        assert_eq!(decoded, record);
    }

    #[test]
    fn trajectory_roundtrip() {
        let traj = VehTrajectory {
            veh_id: 9,
            entry_lane_id: 1,
            entry_phase: 2,
            leave_lane_id: 101,
            leave_phase: 2,
            dist_traveled: 950,
            time_traveled: 110,
            stopped_samples: 3,
            inbound_lane_length: 2100,
        };
        let mut buf = Vec::new();
        pack_trajectory(&mut buf, &traj, 1000);
        assert_eq!(unpack_trajectory(&buf[HEADER_LEN..]).unwrap(), traj);
    }

    #[test]
    fn detector_presence_roundtrip() {
        let mut buf = Vec::new();
        pack_detector_presence(&mut buf, 0x12_3456_789A, 1000);
        assert_eq!(
            unpack_detector_presence(&buf[HEADER_LEN..]).unwrap(),
            0x12_3456_789A
        );
    }

    #[test]
    fn spat_projection_carries_movement_states() {
        let mut record = ControllerStateRecord {
            permitted_phases: 0b0000_0010,
            ..ControllerStateRecord::default()
        };
        record.phase_state[1] = PhaseTimeView {
            state: PhaseState::ProtectedGreen,
            start_time: 10,
            min_end_time: 150,
            max_end_time: 300,
        };
        let spat = spat_from_controller_state(&record, 1000, 5);
        assert_eq!(spat.id, 1000);
        assert_eq!(
            spat.phase_state[1].curr_state,
            crate::j2735::MovementPhaseState::ProtectedMovementAllowed
        );
        assert_eq!(spat.phase_state[1].min_end_time, 150);
    }
}
