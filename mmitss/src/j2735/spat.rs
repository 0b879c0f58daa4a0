//! Signal Phase and Timing: one IntersectionState per message, one
//! MovementState per permitted vehicular (signal group 1..8) or pedestrian
//! (signal group 9..16) phase.

use super::reader_done;
use super::types::*;
use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// Current state and countdown of one movement (a phase's vehicular or
/// pedestrian signal group). TimeMark fields are in deciseconds of the
/// hour; [`UNKNOWN_TIME_MARK`] means the detail is not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseStateElement {
    pub curr_state: MovementPhaseState,
    pub start_time: u16,
    pub min_end_time: u16,
    pub max_end_time: u16,
}

impl Default for PhaseStateElement {
    fn default() -> Self {
        PhaseStateElement {
            curr_state: MovementPhaseState::Unavailable,
            start_time: UNKNOWN_TIME_MARK,
            min_end_time: UNKNOWN_TIME_MARK,
            max_end_time: UNKNOWN_TIME_MARK,
        }
    }
}

/// MSG_SignalPhaseAndTiming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Spat {
    pub id: u16,
    pub msg_cnt: u8,
    pub status: IntersectionStatus,
    /// [`INVALID_MINUTE_OF_YEAR`] when not stamped
    pub time_stamp_minute: u32,
    /// [`UNAVAILABLE_DSECOND`] when not stamped
    pub time_stamp_sec: u16,
    /// bit i set: vehicular phase i+1 carries a movement state
    pub permitted_phases: u8,
    /// bit i set: pedestrian phase i+1 carries a movement state
    pub permitted_ped_phases: u8,
    pub phase_state: [PhaseStateElement; 8],
    pub ped_phase_state: [PhaseStateElement; 8],
}

impl Default for Spat {
    fn default() -> Self {
        Spat {
            id: 0,
            msg_cnt: 0,
            status: IntersectionStatus::empty(),
            time_stamp_minute: INVALID_MINUTE_OF_YEAR,
            time_stamp_sec: UNAVAILABLE_DSECOND,
            permitted_phases: 0,
            permitted_ped_phases: 0,
            phase_state: [PhaseStateElement::default(); 8],
            ped_phase_state: [PhaseStateElement::default(); 8],
        }
    }
}

fn encode_movement(
    w: &mut BitWriter<'_>,
    signal_group: u8,
    state: &PhaseStateElement,
) -> Result<(), CodecError> {
    w.put_bit(false)?; // MovementState extension
    w.put_bits(0, 3)?; // movementName/maneuverAssistList/regional absent
    w.put_constrained(i64::from(signal_group), 0, 255, "spat.signalGroup")?;
    w.put_length(1, 1, 16, "spat.movementEventList")?;
    w.put_bit(false)?; // MovementEvent extension
    let has_timing = state.min_end_time < UNKNOWN_TIME_MARK;
    w.put_bit(has_timing)?;
    w.put_bits(0, 2)?; // speeds/regional absent
    w.put_bits(state.curr_state as u64, 4)?;
    if has_timing {
        let has_start = state.start_time < UNKNOWN_TIME_MARK;
        let has_max = state.max_end_time < UNKNOWN_TIME_MARK;
        w.put_bit(has_start)?;
        w.put_bit(has_max)?;
        w.put_bits(0, 3)?; // likelyTime/confidence/nextTime absent
        if has_start {
            w.put_constrained(i64::from(state.start_time), 0, 36111, "spat.startTime")?;
        }
        w.put_constrained(i64::from(state.min_end_time), 0, 36111, "spat.minEndTime")?;
        if has_max {
            w.put_constrained(i64::from(state.max_end_time), 0, 36111, "spat.maxEndTime")?;
        }
    }
    Ok(())
}

fn decode_movement(r: &mut BitReader<'_>) -> Result<(u8, PhaseStateElement), CodecError> {
    let state_ext = r.get_bit()?;
    let has_name = r.get_bit()?;
    let has_assist = r.get_bit()?;
    let has_regional = r.get_bit()?;
    if has_name {
        let len = r.get_length(1, 63)?;
        r.skip_bits(len * 7)?; // IA5String, 7 bits per character
    }
    let signal_group = r.get_constrained(0, 255)? as u8;
    let mut state = PhaseStateElement::default();
    let events = r.get_length(1, 16)?;
    for i in 0..events {
        let event_ext = r.get_bit()?;
        let has_timing = r.get_bit()?;
        let has_speeds = r.get_bit()?;
        let event_regional = r.get_bit()?;
        let curr_state = MovementPhaseState::from_raw(r.get_bits(4)?);
        let mut element = PhaseStateElement {
            curr_state,
            ..PhaseStateElement::default()
        };
        if has_timing {
            let has_start = r.get_bit()?;
            let has_max = r.get_bit()?;
            let has_likely = r.get_bit()?;
            let has_confidence = r.get_bit()?;
            let has_next = r.get_bit()?;
            if has_start {
                element.start_time = r.get_constrained(0, 36111)? as u16;
            }
            element.min_end_time = r.get_constrained(0, 36111)? as u16;
            if has_max {
                element.max_end_time = r.get_constrained(0, 36111)? as u16;
            }
            if has_likely {
                r.skip_bits(16)?;
            }
            if has_confidence {
                r.skip_bits(4)?;
            }
            if has_next {
                r.skip_bits(16)?;
            }
        }
        if has_speeds {
            skip_advisory_speeds(r)?;
        }
        if event_regional {
            skip_regional(r, 1, 4)?;
        }
        if event_ext {
            r.skip_extension_additions()?;
        }
        // only the first MovementEvent is meaningful here
        if i == 0 {
            state = element;
        }
    }
    if has_assist {
        return Err(CodecError::DecodeUnexpectedValue {
            field: "spat.maneuverAssistList",
        });
    }
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if state_ext {
        r.skip_extension_additions()?;
    }
    Ok((signal_group, state))
}

fn skip_advisory_speeds(r: &mut BitReader<'_>) -> Result<(), CodecError> {
    let n = r.get_length(1, 16)?;
    for _ in 0..n {
        let ext = r.get_bit()?;
        let has_speed = r.get_bit()?;
        let has_confidence = r.get_bit()?;
        let has_distance = r.get_bit()?;
        let has_class = r.get_bit()?;
        let has_regional = r.get_bit()?;
        r.skip_bits(1)?; // AdvisorySpeedType ext bit
        r.skip_bits(2)?;
        if has_speed {
            r.skip_bits(13)?;
        }
        if has_confidence {
            r.skip_bits(3)?;
        }
        if has_distance {
            r.skip_bits(14)?;
        }
        if has_class {
            r.skip_bits(8)?;
        }
        if has_regional {
            skip_regional(r, 1, 4)?;
        }
        if ext {
            r.skip_extension_additions()?;
        }
    }
    Ok(())
}

impl Spat {
    /// Number of movement states this record will emit.
    pub fn movement_count(&self) -> usize {
        (self.permitted_phases.count_ones() + self.permitted_ped_phases.count_ones()) as usize
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if self.movement_count() == 0 {
            return Err(CodecError::EncodeInvariantViolation {
                field: "spat.movementList",
            });
        }
        let mut w = BitWriter::new(buf);
        w.put_bit(false)?; // SPAT extension
        w.put_bits(0, 3)?; // timeStamp/name/regional absent
        w.put_length(1, 1, 32, "spat.intersections")?;
        // IntersectionState preamble
        w.put_bit(false)?; // extension
        w.put_bit(false)?; // name
        let has_moy = self.time_stamp_minute < INVALID_MINUTE_OF_YEAR;
        let has_dsecond = self.time_stamp_sec < UNAVAILABLE_DSECOND;
        w.put_bit(has_moy)?;
        w.put_bit(has_dsecond)?;
        w.put_bits(0, 3)?; // enabledLanes/maneuverAssistList/regional absent
        encode_intersection_ref_id(&mut w, self.id)?;
        w.put_constrained(i64::from(self.msg_cnt), 0, 127, "spat.msgCnt")?;
        w.put_bits(u64::from(self.status.bits()), 16)?;
        if has_moy {
            w.put_constrained(i64::from(self.time_stamp_minute), 0, 527_040, "spat.moy")?;
        }
        if has_dsecond {
            w.put_constrained(i64::from(self.time_stamp_sec), 0, 65535, "spat.dsecond")?;
        }
        w.put_length(self.movement_count(), 1, 255, "spat.movementList")?;
        for i in 0..8u8 {
            if self.permitted_phases & (1 << i) != 0 {
                encode_movement(&mut w, i + 1, &self.phase_state[usize::from(i)])?;
            }
        }
        for i in 0..8u8 {
            if self.permitted_ped_phases & (1 << i) != 0 {
                encode_movement(&mut w, i + 9, &self.ped_phase_state[usize::from(i)])?;
            }
        }
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Spat, CodecError> {
        let mut r = BitReader::new(buf);
        let spat_ext = r.get_bit()?;
        let has_moy_outer = r.get_bit()?;
        let has_name_outer = r.get_bit()?;
        let has_regional_outer = r.get_bit()?;
        if has_moy_outer {
            r.skip_bits(20)?;
        }
        if has_name_outer {
            let len = r.get_length(1, 63)?;
            r.skip_bits(len * 7)?;
        }
        let intersections = r.get_length(1, 32)?;
        let mut spat = Spat::default();
        for idx in 0..intersections {
            let state_ext = r.get_bit()?;
            let has_name = r.get_bit()?;
            let has_moy = r.get_bit()?;
            let has_dsecond = r.get_bit()?;
            let has_enabled = r.get_bit()?;
            let has_assist = r.get_bit()?;
            let has_regional = r.get_bit()?;
            if has_name {
                let len = r.get_length(1, 63)?;
                r.skip_bits(len * 7)?;
            }
            let id = decode_intersection_ref_id(&mut r)?;
            let msg_cnt = r.get_constrained(0, 127)? as u8;
            let status = IntersectionStatus::from_bits_truncate(r.get_bits(16)? as u16);
            let mut moy = INVALID_MINUTE_OF_YEAR;
            let mut dsecond = UNAVAILABLE_DSECOND;
            if has_moy {
                moy = r.get_constrained(0, 527_040)? as u32;
            }
            if has_dsecond {
                dsecond = r.get_constrained(0, 65535)? as u16;
            }
            if has_enabled {
                let n = r.get_length(1, 16)?;
                r.skip_bits(n * 8)?;
            }
            let movements = r.get_length(1, 255)?;
            let mut record = Spat {
                id,
                msg_cnt,
                status,
                time_stamp_minute: moy,
                time_stamp_sec: dsecond,
                ..Spat::default()
            };
            for _ in 0..movements {
                let (signal_group, state) = decode_movement(&mut r)?;
                if signal_group == 0 || signal_group > 16 {
                    return Err(CodecError::DecodeUnexpectedValue {
                        field: "spat.signalGroup",
                    });
                }
                let slot = usize::from((signal_group - 1) % 8);
                if signal_group > 8 {
                    record.permitted_ped_phases |= 1 << slot;
                    record.ped_phase_state[slot] = state;
                } else {
                    record.permitted_phases |= 1 << slot;
                    record.phase_state[slot] = state;
                }
            }
            if has_assist {
                return Err(CodecError::DecodeUnexpectedValue {
                    field: "spat.maneuverAssistList",
                });
            }
            if has_regional {
                skip_regional(&mut r, 1, 4)?;
            }
            if state_ext {
                r.skip_extension_additions()?;
            }
            // only the first intersection is meaningful for this deployment
            if idx == 0 {
                spat = record;
            }
        }
        if has_regional_outer {
            skip_regional(&mut r, 1, 4)?;
        }
        if spat_ext {
            r.skip_extension_additions()?;
        }
        reader_done(&r, buf.len())?;
        Ok(spat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spat() -> Spat {
        let mut spat = Spat {
            id: 1003,
            msg_cnt: 12,
            status: IntersectionStatus::FIXED_TIME_OPERATION,
            time_stamp_minute: 123_456,
            time_stamp_sec: 30_500,
            permitted_phases: 0b0110_0110,
            permitted_ped_phases: 0b0010_0010,
            ..Spat::default()
        };
        for i in [1usize, 2, 5, 6] {
            spat.phase_state[i] = PhaseStateElement {
                curr_state: if i % 2 == 1 {
                    MovementPhaseState::ProtectedMovementAllowed
                } else {
                    MovementPhaseState::StopAndRemain
                },
                start_time: UNKNOWN_TIME_MARK,
                min_end_time: 150,
                max_end_time: 320,
            };
        }
        for i in [1usize, 5] {
            spat.ped_phase_state[i] = PhaseStateElement {
                curr_state: MovementPhaseState::StopAndRemain,
                start_time: UNKNOWN_TIME_MARK,
                min_end_time: 245,
                max_end_time: UNKNOWN_TIME_MARK,
            };
        }
        spat
    }

    #[test]
    fn roundtrip_preserves_movements() {
        let spat = test_spat();
        let mut buf = [0u8; 256];
        let n = spat.encode(&mut buf).unwrap();
        let decoded = Spat::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, spat);
    }

    #[test]
    fn empty_movement_list_is_an_encode_error() {
        let spat = Spat::default();
        let mut buf = [0u8; 256];
        assert_eq!(
            spat.encode(&mut buf),
            Err(CodecError::EncodeInvariantViolation {
                field: "spat.movementList"
            })
        );
    }

    #[test]
    fn omitted_timestamps_are_not_emitted() {
        let mut spat = test_spat();
        spat.time_stamp_minute = INVALID_MINUTE_OF_YEAR;
        spat.time_stamp_sec = UNAVAILABLE_DSECOND;
        let mut long_buf = [0u8; 256];
        let mut short_buf = [0u8; 256];
        let with = test_spat().encode(&mut long_buf).unwrap();
        let without = spat.encode(&mut short_buf).unwrap();
        // 20-bit minute + 16-bit dsecond saved
        assert!(without < with);
        assert_eq!(Spat::decode(&short_buf[..without]).unwrap(), spat);
    }

    #[test]
    fn ped_groups_map_to_nine_and_up() {
        let spat = test_spat();
        let mut buf = [0u8; 256];
        let n = spat.encode(&mut buf).unwrap();
        let decoded = Spat::decode(&buf[..n]).unwrap();
        assert_eq!(decoded.permitted_ped_phases, 0b0010_0010);
        assert_eq!(
            decoded.ped_phase_state[1].curr_state,
            MovementPhaseState::StopAndRemain
        );
    }
}
