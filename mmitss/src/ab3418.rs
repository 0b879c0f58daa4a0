//! AB3418 link layer towards the NEMA controller: frame reassembly over the
//! serial byte stream, push-message and poll-response parsing, and the
//! scheduled poll driver that fills the timing card.

mod frame;
mod messages;
mod polls;

pub use frame::*;
pub use messages::*;
pub use polls::*;

/// Frame boundary flag
pub const FLAG: u8 = crate::bytes::FLAG;
/// Information-protocol identifier, constant on this link
pub const IPI: u8 = 0xC0;
/// Control byte on outbound get-polls
pub const GET_CONTROL: u8 = 0x33;
/// Control byte on outbound sets and on controller responses
pub const SET_CONTROL: u8 = 0x13;

pub const GET_BLOCK_MSG: u8 = 0x87;
pub const GET_BLOCK_MSG_RES: u8 = 0xC7;
pub const GET_BLOCK_MSG_ERR: u8 = 0xE7;
pub const GET_TIMING_DATA: u8 = 0x89;
pub const GET_TIMING_DATA_RES: u8 = 0xC9;
pub const GET_TIMING_DATA_ERR: u8 = 0xE9;
pub const SET_BLOCK_MSG: u8 = 0x96;
pub const SET_BLOCK_MSG_RES: u8 = 0xD6;
pub const SET_BLOCK_MSG_ERR: u8 = 0xF6;
pub const SET_TIMING_DATA: u8 = 0x99;
pub const SET_TIMING_DATA_RES: u8 = 0xD9;
pub const SET_TIMING_DATA_ERR: u8 = 0xF9;
pub const SET_SOFTCALL: u8 = 0x9A;
pub const SET_SOFTCALL_RES: u8 = 0xDA;
pub const SET_SOFTCALL_ERR: u8 = 0xFA;
/// Pushed by the controller
pub const STATUS8E: u8 = 0xC8;
pub const LONG_STATUS8E: u8 = 0xCD;
pub const RAW_SPAT: u8 = 0xCE;

/// Pattern number of software-flash operation
pub const PATTERN_FLASHING: u8 = 254;
/// Pattern number of free operation
pub const PATTERN_FREE: u8 = 255;

/// Vendor error code carried by 0xE7/0xE9/0xF6/0xF9/0xFA frames.
pub fn error_code_name(err_num: u8) -> &'static str {
    match err_num {
        0 => "ERROR_NO_ERROR",
        1 => "ERROR_TOO_BIG",
        2 => "ERROR_NO_SUCH_NAME",
        3 => "ERROR_BAD_VALUE",
        4 => "ERROR_READ_ONLY",
        5 => "ERROR_GEN_ERR",
        6 => "ERROR_MESS_LEN",
        10 => "ERROR_INVALID_PLAN",
        11 => "ERROR_INVALID_PACKET_SIZE",
        12 => "ERROR_OUT_OF_RANGE",
        _ => "ERROR_UNKNOWN_MSG",
    }
}

/// Splits an 8-bit phase mask into the active phase per ring (1..=8, zero
/// when the ring is dark).
pub fn ring_phases(phase_mask: u8) -> [u8; 2] {
    let mut rings = [0u8; 2];
    for i in 0..8u8 {
        if phase_mask & (1 << i) != 0 {
            if i < 4 {
                rings[0] = i + 1;
            } else {
                rings[1] = i + 1;
                break;
            }
        }
    }
    rings
}

/// Barrier (0 or 1) that a phase mask sits on; phases 1-2 / 5-6 are barrier
/// zero, 3-4 / 7-8 barrier one.
pub fn barrier_of(phase_mask: u8) -> u8 {
    for i in 0..8u8 {
        if phase_mask & (1 << i) != 0 {
            return u8::from(matches!(i, 2 | 3 | 6 | 7));
        }
    }
    0
}

/// Ring (0 or 1) a phase number (1..=8) belongs to.
pub fn ring_of(phase: u8) -> usize {
    usize::from(phase > 4)
}

/// Decomposes a pattern number into `(plan_num, offset_index)`.
pub fn pattern_to_plan(pattern_num: u8) -> (u8, u8) {
    match pattern_num {
        0 | PATTERN_FLASHING | PATTERN_FREE => (pattern_num, 0),
        // plans 10 and 20 are skipped: patterns 1-27 map to plans 1-9,
        // 31-57 to 11-19, 61-87 to 21-29, three offsets per plan
        _ => ((pattern_num - 1) / 3 + 1, (pattern_num - 1) % 3),
    }
}

pub fn plan_to_pattern(plan_num: u8, offset_index: u8) -> u8 {
    match plan_num {
        0 | PATTERN_FLASHING | PATTERN_FREE => plan_num,
        _ => (plan_num - 1) * 3 + offset_index + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_split_of_phase_mask() {
        assert_eq!(ring_phases(0b0010_0010), [2, 6]);
        assert_eq!(ring_phases(0b0000_0100), [3, 0]);
        assert_eq!(ring_phases(0b1000_0000), [0, 8]);
        assert_eq!(ring_phases(0), [0, 0]);
    }

    #[test]
    fn barrier_classification() {
        assert_eq!(barrier_of(0b0010_0010), 0); // phases 2 & 6
        assert_eq!(barrier_of(0b1000_1000), 1); // phases 4 & 8
        assert_eq!(barrier_of(0b0000_0100), 1); // phase 3
    }

    #[test]
    fn pattern_plan_roundtrip() {
        assert_eq!(pattern_to_plan(7), (3, 0));
        assert_eq!(pattern_to_plan(8), (3, 1));
        assert_eq!(pattern_to_plan(31), (11, 0));
        assert_eq!(pattern_to_plan(PATTERN_FREE), (PATTERN_FREE, 0));
        for pattern in 1..=87u8 {
            let (plan, offset) = pattern_to_plan(pattern);
            if plan == 10 || plan == 20 {
                continue;
            }
            assert_eq!(plan_to_pattern(plan, offset), pattern);
        }
    }
}
