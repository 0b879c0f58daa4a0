//! Basic Safety Message: BSMcoreData only, Part II and regional extensions
//! are never emitted and are skipped on receive.

use super::types::*;
use super::reader_done;
use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// DF_PositionalAccuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionalAccuracy {
    pub semi_major: u8,
    pub semi_minor: u8,
    pub orientation: u16,
}

impl Default for PositionalAccuracy {
    fn default() -> Self {
        PositionalAccuracy {
            semi_major: UNAVAILABLE_SEMI_AXIS,
            semi_minor: UNAVAILABLE_SEMI_AXIS,
            orientation: UNAVAILABLE_ORIENTATION,
        }
    }
}

/// DF_AccelerationSet4Way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccelerationSet4Way {
    /// longitudinal, 0.01 m/s^2
    pub lon: i16,
    /// lateral, 0.01 m/s^2
    pub lat: i16,
    /// vertical, 0.02 G
    pub vert: i8,
    /// yaw rate, 0.01 degrees/second
    pub yaw: i16,
}

impl Default for AccelerationSet4Way {
    fn default() -> Self {
        AccelerationSet4Way {
            lon: UNAVAILABLE_ACCEL,
            lat: UNAVAILABLE_ACCEL,
            vert: UNAVAILABLE_VERT_ACCEL,
            yaw: 0,
        }
    }
}

/// DF_BrakeSystemStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BrakeSystemStatus {
    pub wheel_brakes: BrakeApplied,
    pub traction: EngageStatus,
    pub abs: EngageStatus,
    pub scs: EngageStatus,
    pub brake_boost: EngageStatus,
    pub aux_brakes: EngageStatus,
}

/// DF_VehicleSize, width and length in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleSize {
    pub width: u16,
    pub length: u16,
}

/// MSG_BasicSafetyMessage core data record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bsm {
    pub msg_cnt: u8,
    /// 4-byte TemporaryID, big-endian
    pub id: u32,
    /// DSecond, milliseconds within the current minute
    pub sec_mark: u16,
    /// 1/10th microdegree
    pub latitude: i32,
    /// 1/10th microdegree
    pub longitude: i32,
    /// decimeters above the reference ellipsoid
    pub elevation: i32,
    pub accuracy: PositionalAccuracy,
    pub transmission: TransmissionState,
    /// 0.02 m/s
    pub speed: u16,
    /// 0.0125 degree
    pub heading: u16,
    /// 1.5 degree
    pub steering_angle: i8,
    pub accel_set: AccelerationSet4Way,
    pub brakes: BrakeSystemStatus,
    pub size: VehicleSize,
}

impl Default for Bsm {
    fn default() -> Self {
        Bsm {
            msg_cnt: 0,
            id: 0,
            sec_mark: UNAVAILABLE_DSECOND,
            latitude: UNAVAILABLE_LATITUDE,
            longitude: UNAVAILABLE_LONGITUDE,
            elevation: UNAVAILABLE_ELEVATION,
            accuracy: PositionalAccuracy::default(),
            transmission: TransmissionState::Unavailable,
            speed: UNAVAILABLE_SPEED,
            heading: UNAVAILABLE_HEADING,
            steering_angle: UNAVAILABLE_STEERING,
            accel_set: AccelerationSet4Way::default(),
            brakes: BrakeSystemStatus::default(),
            size: VehicleSize::default(),
        }
    }
}

impl Bsm {
    /// Speed in m/s, `None` when the BSM carries the unavailable sentinel.
    pub fn speed_mps(&self) -> Option<f64> {
        (self.speed != UNAVAILABLE_SPEED).then(|| f64::from(self.speed) * 0.02)
    }

    /// Heading in degrees clockwise from true north.
    pub fn heading_deg(&self) -> Option<f64> {
        (self.heading != UNAVAILABLE_HEADING).then(|| f64::from(self.heading) * 0.0125)
    }

    pub fn has_position(&self) -> bool {
        self.latitude != UNAVAILABLE_LATITUDE && self.longitude != UNAVAILABLE_LONGITUDE
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = BitWriter::new(buf);
        // BasicSafetyMessage preamble: extension + partII/regional absent
        w.put_bit(false)?;
        w.put_bits(0, 2)?;
        w.put_constrained(i64::from(self.msg_cnt), 0, 127, "bsm.msgCnt")?;
        w.put_octets(&self.id.to_be_bytes())?;
        w.put_constrained(i64::from(self.sec_mark), 0, 65535, "bsm.secMark")?;
        w.put_constrained(
            i64::from(self.latitude),
            -900_000_000,
            900_000_001,
            "bsm.lat",
        )?;
        w.put_constrained(
            i64::from(self.longitude),
            -1_799_999_999,
            1_800_000_001,
            "bsm.long",
        )?;
        w.put_constrained(i64::from(self.elevation), -4096, 61439, "bsm.elev")?;
        w.put_constrained(i64::from(self.accuracy.semi_major), 0, 255, "bsm.semiMajor")?;
        w.put_constrained(i64::from(self.accuracy.semi_minor), 0, 255, "bsm.semiMinor")?;
        w.put_constrained(
            i64::from(self.accuracy.orientation),
            0,
            65535,
            "bsm.orientation",
        )?;
        w.put_bits(self.transmission as u64, 3)?;
        w.put_constrained(i64::from(self.speed), 0, 8191, "bsm.speed")?;
        w.put_constrained(i64::from(self.heading), 0, 28800, "bsm.heading")?;
        w.put_constrained(i64::from(self.steering_angle), -126, 127, "bsm.angle")?;
        w.put_constrained(i64::from(self.accel_set.lon), -2000, 2001, "bsm.accelLon")?;
        w.put_constrained(i64::from(self.accel_set.lat), -2000, 2001, "bsm.accelLat")?;
        w.put_constrained(i64::from(self.accel_set.vert), -127, 127, "bsm.accelVert")?;
        w.put_constrained(i64::from(self.accel_set.yaw), -32767, 32767, "bsm.yawRate")?;
        w.put_bits(u64::from(self.brakes.wheel_brakes.bits()), 5)?;
        w.put_bits(self.brakes.traction as u64, 2)?;
        w.put_bits(self.brakes.abs as u64, 2)?;
        w.put_bits(self.brakes.scs as u64, 2)?;
        w.put_bits(self.brakes.brake_boost as u64, 2)?;
        w.put_bits(self.brakes.aux_brakes as u64, 2)?;
        w.put_constrained(i64::from(self.size.width), 0, 1023, "bsm.vehWidth")?;
        w.put_constrained(i64::from(self.size.length), 0, 4095, "bsm.vehLen")?;
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Bsm, CodecError> {
        let mut r = BitReader::new(buf);
        let extended = r.get_bit()?;
        let has_part2 = r.get_bit()?;
        let has_regional = r.get_bit()?;
        let mut bsm = Bsm {
            msg_cnt: r.get_constrained(0, 127)? as u8,
            ..Bsm::default()
        };
        let mut raw_id = [0u8; 4];
        r.get_octets(&mut raw_id)?;
        bsm.id = u32::from_be_bytes(raw_id);
        bsm.sec_mark = r.get_constrained(0, 65535)? as u16;
        bsm.latitude = r.get_constrained(-900_000_000, 900_000_001)? as i32;
        bsm.longitude = r.get_constrained(-1_799_999_999, 1_800_000_001)? as i32;
        bsm.elevation = r.get_constrained(-4096, 61439)? as i32;
        bsm.accuracy.semi_major = r.get_constrained(0, 255)? as u8;
        bsm.accuracy.semi_minor = r.get_constrained(0, 255)? as u8;
        bsm.accuracy.orientation = r.get_constrained(0, 65535)? as u16;
        bsm.transmission = TransmissionState::from_raw(r.get_bits(3)?);
        bsm.speed = r.get_constrained(0, 8191)? as u16;
        bsm.heading = r.get_constrained(0, 28800)? as u16;
        bsm.steering_angle = r.get_constrained(-126, 127)? as i8;
        bsm.accel_set.lon = r.get_constrained(-2000, 2001)? as i16;
        bsm.accel_set.lat = r.get_constrained(-2000, 2001)? as i16;
        bsm.accel_set.vert = r.get_constrained(-127, 127)? as i8;
        bsm.accel_set.yaw = r.get_constrained(-32767, 32767)? as i16;
        bsm.brakes.wheel_brakes = BrakeApplied::from_bits_truncate(r.get_bits(5)? as u8);
        bsm.brakes.traction = EngageStatus::from_raw(r.get_bits(2)?);
        bsm.brakes.abs = EngageStatus::from_raw(r.get_bits(2)?);
        bsm.brakes.scs = EngageStatus::from_raw(r.get_bits(2)?);
        bsm.brakes.brake_boost = EngageStatus::from_raw(r.get_bits(2)?);
        bsm.brakes.aux_brakes = EngageStatus::from_raw(r.get_bits(2)?);
        bsm.size.width = r.get_constrained(0, 1023)? as u16;
        bsm.size.length = r.get_constrained(0, 4095)? as u16;
        // unknown Part II / regional content is length-delimited, skip it
        if has_part2 {
            let n = r.get_length(1, 8)?;
            for _ in 0..n {
                r.skip_bits(6)?; // PartII-Id
                let len = r.get_unconstrained_length()?;
                r.skip_bits(len * 8)?;
            }
        }
        if has_regional {
            skip_regional(&mut r, 1, 4)?;
        }
        if extended {
            r.skip_extension_additions()?;
        }
        reader_done(&r, buf.len())?;
        Ok(bsm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bsm() -> Bsm {
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
    fn encoded_length_is_fixed() {
        let mut buf = [0u8; 64];
        // 293 bits of core data round up to 37 bytes
        assert_eq!(test_bsm().encode(&mut buf).unwrap(), 37);
    }

    #[test]
    fn encoded_preamble_and_id() {
        let mut buf = [0u8; 64];
        let n = test_bsm().encode(&mut buf).unwrap();
        // ext + 2 optionals + msgCnt(0) leave the first 10 bits zero; the
        // TemporaryID 0x00000042 follows at bit 10
        assert_eq!(buf[0], 0x00);
        let mut id: u64 = 0;
        for bit in 10..42 {
            id = (id << 1) | u64::from(buf[bit / 8] >> (7 - bit % 8) & 1);
        }
        assert_eq!(id, 0x42);
        assert_eq!(n, 37);
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let bsm = test_bsm();
        let mut buf = [0u8; 64];
        let n = bsm.encode(&mut buf).unwrap();
        let decoded = Bsm::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, bsm);
    }

    #[test]
    fn roundtrip_of_unavailable_record() {
        let bsm = Bsm::default();
        let mut buf = [0u8; 64];
        let n = bsm.encode(&mut buf).unwrap();
        assert_eq!(Bsm::decode(&buf[..n]).unwrap(), bsm);
    }

    #[test]
    fn encode_rejects_out_of_range_speed() {
        let mut bsm = test_bsm();
        bsm.speed = 9000;
        let mut buf = [0u8; 64];
        assert_eq!(
            bsm.encode(&mut buf),
            Err(CodecError::EncodeInvariantViolation { field: "bsm.speed" })
        );
    }

    #[test]
    fn encode_rejects_small_buffer() {
        let mut buf = [0u8; 16];
        assert_eq!(
            test_bsm().encode(&mut buf),
            Err(CodecError::EncodeBufferTooSmall)
        );
    }

    #[test]
    fn decode_truncated_payload_fails() {
        let mut buf = [0u8; 64];
        let n = test_bsm().encode(&mut buf).unwrap();
        assert!(Bsm::decode(&buf[..n - 2]).is_err());
    }
}
