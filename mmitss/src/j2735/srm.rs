//! Signal Request Message: a vehicle's priority/preemption conversation
//! opener. One SignalRequestPackage per message.

use super::reader_done;
use super::types::*;
use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// DF_RequestorDescription subset: who is asking and where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestorDescription {
    /// TemporaryID
    pub veh_id: u32,
    pub role: BasicVehicleRole,
    /// HPMS vehicle classification
    pub hpms_type: VehicleType,
    /// 1/10th microdegree
    pub latitude: i32,
    /// 1/10th microdegree
    pub longitude: i32,
    /// decimeters, [`UNAVAILABLE_ELEVATION`] when absent
    pub elevation: i32,
    /// 0.0125 degree
    pub heading: u16,
    pub transmission: TransmissionState,
    /// 0.02 m/s
    pub speed: u16,
}

impl Default for RequestorDescription {
    fn default() -> Self {
        RequestorDescription {
            veh_id: 0,
            role: BasicVehicleRole::NoneUnknown,
            hpms_type: VehicleType::Unknown,
            latitude: UNAVAILABLE_LATITUDE,
            longitude: UNAVAILABLE_LONGITUDE,
            elevation: UNAVAILABLE_ELEVATION,
            heading: UNAVAILABLE_HEADING,
            transmission: TransmissionState::Unavailable,
            speed: UNAVAILABLE_SPEED,
        }
    }
}

/// MSG_SignalRequestMessage record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Srm {
    /// [`INVALID_MINUTE_OF_YEAR`] when not stamped
    pub time_stamp_minute: u32,
    /// DSecond, milliseconds of the minute
    pub time_stamp_sec: u16,
    /// [`UNAVAILABLE_MSG_CNT`] when not carried
    pub msg_cnt: u8,
    pub intersection_id: u16,
    pub request_id: u8,
    pub request_type: PriorityRequestType,
    pub in_bound: IntersectionAccessPoint,
    pub out_bound: Option<IntersectionAccessPoint>,
    /// ETA minute of the year, [`INVALID_MINUTE_OF_YEAR`] when absent
    pub eta_minute: u32,
    /// ETA milliseconds of the minute, [`UNAVAILABLE_DSECOND`] when absent
    pub eta_sec: u16,
    /// requested hold duration in milliseconds, [`UNAVAILABLE_DSECOND`] when absent
    pub duration: u16,
    pub requestor: RequestorDescription,
}

impl Default for Srm {
    fn default() -> Self {
        Srm {
            time_stamp_minute: INVALID_MINUTE_OF_YEAR,
            time_stamp_sec: 0,
            msg_cnt: UNAVAILABLE_MSG_CNT,
            intersection_id: 0,
            request_id: 0,
            request_type: PriorityRequestType::Reserved,
            in_bound: IntersectionAccessPoint::default(),
            out_bound: None,
            eta_minute: INVALID_MINUTE_OF_YEAR,
            eta_sec: UNAVAILABLE_DSECOND,
            duration: UNAVAILABLE_DSECOND,
            requestor: RequestorDescription::default(),
        }
    }
}

impl Srm {
    pub fn is_cancel(&self) -> bool {
        self.request_type == PriorityRequestType::PriorityCancellation
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = BitWriter::new(buf);
        w.put_bit(false)?; // SRM extension
        let has_moy = self.time_stamp_minute < INVALID_MINUTE_OF_YEAR;
        let has_msg_cnt = self.msg_cnt <= 127;
        w.put_bit(has_moy)?;
        w.put_bit(has_msg_cnt)?;
        w.put_bit(true)?; // requests
        w.put_bit(false)?; // regional
        if has_moy {
            w.put_constrained(i64::from(self.time_stamp_minute), 0, 527_040, "srm.moy")?;
        }
        w.put_constrained(i64::from(self.time_stamp_sec), 0, 65535, "srm.second")?;
        if has_msg_cnt {
            w.put_constrained(i64::from(self.msg_cnt), 0, 127, "srm.msgCnt")?;
        }
        // SignalRequestList with a single SignalRequestPackage
        w.put_length(1, 1, 32, "srm.requests")?;
        w.put_bit(false)?; // package extension
        let has_eta_minute = self.eta_minute < INVALID_MINUTE_OF_YEAR;
        let has_eta_sec = self.eta_sec < UNAVAILABLE_DSECOND;
        let has_duration = self.duration < UNAVAILABLE_DSECOND;
        w.put_bit(has_eta_minute)?;
        w.put_bit(has_eta_sec)?;
        w.put_bit(has_duration)?;
        w.put_bit(false)?; // regional
        // SignalRequest
        w.put_bit(false)?; // extension
        w.put_bit(self.out_bound.is_some())?;
        w.put_bit(false)?; // regional
        encode_intersection_ref_id(&mut w, self.intersection_id)?;
        w.put_constrained(i64::from(self.request_id), 0, 255, "srm.requestId")?;
        encode_ext_enum(&mut w, self.request_type as u64, 2)?;
        self.in_bound.encode(&mut w)?;
        if let Some(out_bound) = &self.out_bound {
            out_bound.encode(&mut w)?;
        }
        if has_eta_minute {
            w.put_constrained(i64::from(self.eta_minute), 0, 527_040, "srm.eta.minute")?;
        }
        if has_eta_sec {
            w.put_constrained(i64::from(self.eta_sec), 0, 65535, "srm.eta.second")?;
        }
        if has_duration {
            w.put_constrained(i64::from(self.duration), 0, 65535, "srm.duration")?;
        }
        self.encode_requestor(&mut w)?;
        Ok(w.finish())
    }

    fn encode_requestor(&self, w: &mut BitWriter<'_>) -> Result<(), CodecError> {
        let requestor = &self.requestor;
        w.put_bit(false)?; // RequestorDescription extension
        // type, position, name, routeName, transitStatus, transitOccupancy,
        // transitSchedule, regional
        w.put_bits(0b1100_0000, 8)?;
        encode_vehicle_id(w, requestor.veh_id)?;
        // RequestorType
        w.put_bit(false)?; // extension
        w.put_bits(0b00010, 5)?; // only hpmsType among the optionals
        encode_ext_enum(w, requestor.role as u64, 5)?;
        encode_ext_enum(w, requestor.hpms_type as u64, 4)?;
        // RequestorPositionVector
        w.put_bit(false)?; // extension
        w.put_bit(true)?; // heading
        w.put_bit(true)?; // speed
        // Position3D
        w.put_bit(false)?;
        let has_elevation = requestor.elevation != UNAVAILABLE_ELEVATION;
        w.put_bit(has_elevation)?;
        w.put_bit(false)?;
        w.put_constrained(
            i64::from(requestor.latitude),
            -900_000_000,
            900_000_001,
            "srm.requestor.lat",
        )?;
        w.put_constrained(
            i64::from(requestor.longitude),
            -1_799_999_999,
            1_800_000_001,
            "srm.requestor.long",
        )?;
        if has_elevation {
            w.put_constrained(
                i64::from(requestor.elevation),
                -4096,
                61439,
                "srm.requestor.elev",
            )?;
        }
        w.put_constrained(i64::from(requestor.heading), 0, 28800, "srm.requestor.heading")?;
        // TransmissionAndSpeed
        w.put_bits(requestor.transmission as u64, 3)?;
        w.put_constrained(i64::from(requestor.speed), 0, 8191, "srm.requestor.speed")?;
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Srm, CodecError> {
        let mut r = BitReader::new(buf);
        let srm_ext = r.get_bit()?;
        let has_moy = r.get_bit()?;
        let has_msg_cnt = r.get_bit()?;
        let has_requests = r.get_bit()?;
        let has_regional = r.get_bit()?;
        let mut srm = Srm::default();
        if has_moy {
            srm.time_stamp_minute = r.get_constrained(0, 527_040)? as u32;
        }
        srm.time_stamp_sec = r.get_constrained(0, 65535)? as u16;
        if has_msg_cnt {
            srm.msg_cnt = r.get_constrained(0, 127)? as u8;
        }
        if !has_requests {
            return Err(CodecError::DecodeMissingMandatory {
                field: "srm.requests",
            });
        }
        let packages = r.get_length(1, 32)?;
        for idx in 0..packages {
            let package = decode_package(&mut r)?;
            // a single request per SRM in this deployment
            if idx == 0 {
                srm.intersection_id = package.0;
                srm.request_id = package.1;
                srm.request_type = package.2;
                srm.in_bound = package.3;
                srm.out_bound = package.4;
                srm.eta_minute = package.5;
                srm.eta_sec = package.6;
                srm.duration = package.7;
            }
        }
        srm.requestor = decode_requestor(&mut r)?;
        if has_regional {
            skip_regional(&mut r, 1, 4)?;
        }
        if srm_ext {
            r.skip_extension_additions()?;
        }
        reader_done(&r, buf.len())?;
        Ok(srm)
    }
}

type Package = (
    u16,
    u8,
    PriorityRequestType,
    IntersectionAccessPoint,
    Option<IntersectionAccessPoint>,
    u32,
    u16,
    u16,
);

fn decode_package(r: &mut BitReader<'_>) -> Result<Package, CodecError> {
    let pkg_ext = r.get_bit()?;
    let has_eta_minute = r.get_bit()?;
    let has_eta_sec = r.get_bit()?;
    let has_duration = r.get_bit()?;
    let has_regional = r.get_bit()?;
    let req_ext = r.get_bit()?;
    let has_out_bound = r.get_bit()?;
    let req_regional = r.get_bit()?;
    let intersection_id = decode_intersection_ref_id(r)?;
    let request_id = r.get_constrained(0, 255)? as u8;
    let request_type = PriorityRequestType::from_raw(decode_ext_enum(r, 2)?);
    let in_bound = IntersectionAccessPoint::decode(r)?;
    let out_bound = if has_out_bound {
        Some(IntersectionAccessPoint::decode(r)?)
    } else {
        None
    };
    if req_regional {
        skip_regional(r, 1, 4)?;
    }
    if req_ext {
        r.skip_extension_additions()?;
    }
    let mut eta_minute = INVALID_MINUTE_OF_YEAR;
    let mut eta_sec = UNAVAILABLE_DSECOND;
    let mut duration = UNAVAILABLE_DSECOND;
    if has_eta_minute {
        eta_minute = r.get_constrained(0, 527_040)? as u32;
    }
    if has_eta_sec {
        eta_sec = r.get_constrained(0, 65535)? as u16;
    }
    if has_duration {
        duration = r.get_constrained(0, 65535)? as u16;
    }
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if pkg_ext {
        r.skip_extension_additions()?;
    }
    Ok((
        intersection_id,
        request_id,
        request_type,
        in_bound,
        out_bound,
        eta_minute,
        eta_sec,
        duration,
    ))
}

fn decode_requestor(r: &mut BitReader<'_>) -> Result<RequestorDescription, CodecError> {
    let desc_ext = r.get_bit()?;
    let has_type = r.get_bit()?;
    let has_position = r.get_bit()?;
    let has_name = r.get_bit()?;
    let has_route_name = r.get_bit()?;
    let has_transit_status = r.get_bit()?;
    let has_transit_occupancy = r.get_bit()?;
    let has_transit_schedule = r.get_bit()?;
    let has_regional = r.get_bit()?;
    let mut requestor = RequestorDescription {
        veh_id: decode_vehicle_id(r)?,
        ..RequestorDescription::default()
    };
    if has_type {
        let type_ext = r.get_bit()?;
        let has_subrole = r.get_bit()?;
        let has_request = r.get_bit()?;
        let has_iso = r.get_bit()?;
        let has_hpms = r.get_bit()?;
        let type_regional = r.get_bit()?;
        requestor.role = BasicVehicleRole::from_raw(decode_ext_enum(r, 5)?);
        if has_subrole {
            r.skip_bits(1 + 4)?;
        }
        if has_request {
            r.skip_bits(1 + 4)?;
        }
        if has_iso {
            r.skip_bits(8)?;
        }
        if has_hpms {
            requestor.hpms_type = VehicleType::from_raw(decode_ext_enum(r, 4)?);
        }
        if type_regional {
            skip_regional(r, 1, 4)?;
        }
        if type_ext {
            r.skip_extension_additions()?;
        }
    }
    if has_position {
        let pos_ext = r.get_bit()?;
        let has_heading = r.get_bit()?;
        let has_speed = r.get_bit()?;
        let p3d_ext = r.get_bit()?;
        let has_elevation = r.get_bit()?;
        let p3d_regional = r.get_bit()?;
        requestor.latitude = r.get_constrained(-900_000_000, 900_000_001)? as i32;
        requestor.longitude = r.get_constrained(-1_799_999_999, 1_800_000_001)? as i32;
        if has_elevation {
            requestor.elevation = r.get_constrained(-4096, 61439)? as i32;
        }
        if p3d_regional {
            skip_regional(r, 1, 4)?;
        }
        if p3d_ext {
            r.skip_extension_additions()?;
        }
        if has_heading {
            requestor.heading = r.get_constrained(0, 28800)? as u16;
        }
        if has_speed {
            requestor.transmission = TransmissionState::from_raw(r.get_bits(3)?);
            requestor.speed = r.get_constrained(0, 8191)? as u16;
        }
    }
    if has_name || has_route_name {
        let len = r.get_length(1, 63)?;
        r.skip_bits(len * 7)?;
        if has_name && has_route_name {
            let len = r.get_length(1, 63)?;
            r.skip_bits(len * 7)?;
        }
    }
    if has_transit_status {
        r.skip_bits(8)?;
    }
    if has_transit_occupancy {
        r.skip_bits(3)?;
    }
    if has_transit_schedule {
        r.skip_bits(8)?; // DeltaTime (-122..121)
    }
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if desc_ext {
        r.skip_extension_additions()?;
    }
    Ok(requestor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_srm() -> Srm {
        Srm {
            time_stamp_minute: 265_432,
            time_stamp_sec: 12_345,
            msg_cnt: 9,
            intersection_id: 1000,
            request_id: 7,
            request_type: PriorityRequestType::PriorityRequest,
            in_bound: IntersectionAccessPoint::Lane(3),
            out_bound: Some(IntersectionAccessPoint::Lane(103)),
            eta_minute: 265_432,
            eta_sec: 19_045,
            duration: 2000,
            requestor: RequestorDescription {
                veh_id: 0x0000_0007,
                role: BasicVehicleRole::Transit,
                hpms_type: VehicleType::Bus,
                latitude: 377_912_345,
                longitude: -1_221_498_765,
                elevation: 1180,
                heading: 14_400,
                transmission: TransmissionState::ForwardGears,
                speed: 750,
            },
        }
    }

    #[test]
    fn roundtrip_full_record() {
        let srm = test_srm();
        let mut buf = [0u8; 256];
        let n = srm.encode(&mut buf).unwrap();
        assert_eq!(Srm::decode(&buf[..n]).unwrap(), srm);
    }

    #[test]
    fn roundtrip_without_optionals() {
        let srm = Srm {
            time_stamp_minute: INVALID_MINUTE_OF_YEAR,
            msg_cnt: UNAVAILABLE_MSG_CNT,
            out_bound: None,
            eta_minute: INVALID_MINUTE_OF_YEAR,
            eta_sec: UNAVAILABLE_DSECOND,
            duration: UNAVAILABLE_DSECOND,
            request_type: PriorityRequestType::PriorityCancellation,
            ..test_srm()
        };
        let mut buf = [0u8; 256];
        let n = srm.encode(&mut buf).unwrap();
        let decoded = Srm::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, srm);
        assert!(decoded.is_cancel());
    }

    #[test]
    fn approach_choice_roundtrips() {
        let srm = Srm {
            in_bound: IntersectionAccessPoint::Approach(5),
            ..test_srm()
        };
        let mut buf = [0u8; 256];
        let n = srm.encode(&mut buf).unwrap();
        assert_eq!(
            Srm::decode(&buf[..n]).unwrap().in_bound,
            IntersectionAccessPoint::Approach(5)
        );
    }
}
