//! Signal Status Message: the intersection's reply to the outstanding
//! priority requests. One SignalStatus (this intersection) per message, one
//! SignalStatusPackage per tracked request.

use super::reader_done;
use super::types::*;
use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// One request entry within the SSM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalStatusPackage {
    /// TemporaryID of the requesting vehicle
    pub veh_id: u32,
    pub request_id: u8,
    /// msgCnt echoed from the vehicle's latest SRM
    pub msg_cnt: u8,
    pub role: BasicVehicleRole,
    pub in_bound: IntersectionAccessPoint,
    pub out_bound: Option<IntersectionAccessPoint>,
    /// [`INVALID_MINUTE_OF_YEAR`] when absent
    pub eta_minute: u32,
    /// [`UNAVAILABLE_DSECOND`] when absent
    pub eta_sec: u16,
    /// [`UNAVAILABLE_DSECOND`] when absent
    pub duration: u16,
    pub status: PrioritizationResponseStatus,
}

impl Default for SignalStatusPackage {
    fn default() -> Self {
        SignalStatusPackage {
            veh_id: 0,
            request_id: 0,
            msg_cnt: 0,
            role: BasicVehicleRole::NoneUnknown,
            in_bound: IntersectionAccessPoint::default(),
            out_bound: None,
            eta_minute: INVALID_MINUTE_OF_YEAR,
            eta_sec: UNAVAILABLE_DSECOND,
            duration: UNAVAILABLE_DSECOND,
            status: PrioritizationResponseStatus::Unknown,
        }
    }
}

/// MSG_SignalStatusMessage record
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ssm {
    /// [`INVALID_MINUTE_OF_YEAR`] when not stamped
    pub time_stamp_minute: u32,
    /// DSecond, milliseconds of the minute
    pub time_stamp_sec: u16,
    /// [`UNAVAILABLE_MSG_CNT`] when not carried
    pub msg_cnt: u8,
    /// SignalStatus.sequenceNumber, bumped on every content change
    pub update_cnt: u8,
    pub id: u16,
    /// 1..=32 entries
    pub requests: Vec<SignalStatusPackage>,
}

impl Default for Ssm {
    fn default() -> Self {
        Ssm {
            time_stamp_minute: INVALID_MINUTE_OF_YEAR,
            time_stamp_sec: 0,
            msg_cnt: UNAVAILABLE_MSG_CNT,
            update_cnt: 0,
            id: 0,
            requests: Vec::new(),
        }
    }
}

fn encode_package(w: &mut BitWriter<'_>, pkg: &SignalStatusPackage) -> Result<(), CodecError> {
    w.put_bit(false)?; // SignalStatusPackage extension
    w.put_bit(true)?; // requester info
    w.put_bit(pkg.out_bound.is_some())?;
    let has_eta_minute = pkg.eta_minute < INVALID_MINUTE_OF_YEAR;
    let has_eta_sec = pkg.eta_sec < UNAVAILABLE_DSECOND;
    let has_duration = pkg.duration < UNAVAILABLE_DSECOND;
    w.put_bit(has_eta_minute)?;
    w.put_bit(has_eta_sec)?;
    w.put_bit(has_duration)?;
    w.put_bit(false)?; // regional
    // SignalRequesterInfo: role present, typeData absent
    w.put_bit(true)?;
    w.put_bit(false)?;
    encode_vehicle_id(w, pkg.veh_id)?;
    w.put_constrained(i64::from(pkg.request_id), 0, 255, "ssm.requestId")?;
    w.put_constrained(i64::from(pkg.msg_cnt), 0, 127, "ssm.requesterMsgCnt")?;
    encode_ext_enum(w, pkg.role as u64, 5)?;
    pkg.in_bound.encode(w)?;
    if let Some(out_bound) = &pkg.out_bound {
        out_bound.encode(w)?;
    }
    if has_eta_minute {
        w.put_constrained(i64::from(pkg.eta_minute), 0, 527_040, "ssm.eta.minute")?;
    }
    if has_eta_sec {
        w.put_constrained(i64::from(pkg.eta_sec), 0, 65535, "ssm.eta.second")?;
    }
    if has_duration {
        w.put_constrained(i64::from(pkg.duration), 0, 65535, "ssm.duration")?;
    }
    encode_ext_enum(w, pkg.status as u64, 3)?;
    Ok(())
}

fn decode_package(r: &mut BitReader<'_>) -> Result<SignalStatusPackage, CodecError> {
    let pkg_ext = r.get_bit()?;
    let has_requester = r.get_bit()?;
    let has_out_bound = r.get_bit()?;
    let has_eta_minute = r.get_bit()?;
    let has_eta_sec = r.get_bit()?;
    let has_duration = r.get_bit()?;
    let has_regional = r.get_bit()?;
    let mut pkg = SignalStatusPackage::default();
    if has_requester {
        let has_role = r.get_bit()?;
        let has_type_data = r.get_bit()?;
        pkg.veh_id = decode_vehicle_id(r)?;
        pkg.request_id = r.get_constrained(0, 255)? as u8;
        pkg.msg_cnt = r.get_constrained(0, 127)? as u8;
        if has_role {
            pkg.role = BasicVehicleRole::from_raw(decode_ext_enum(r, 5)?);
        }
        if has_type_data {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "ssm.requester.typeData",
            });
        }
    }
    pkg.in_bound = IntersectionAccessPoint::decode(r)?;
    if has_out_bound {
        pkg.out_bound = Some(IntersectionAccessPoint::decode(r)?);
    }
    if has_eta_minute {
        pkg.eta_minute = r.get_constrained(0, 527_040)? as u32;
    }
    if has_eta_sec {
        pkg.eta_sec = r.get_constrained(0, 65535)? as u16;
    }
    if has_duration {
        pkg.duration = r.get_constrained(0, 65535)? as u16;
    }
    pkg.status = PrioritizationResponseStatus::from_raw(decode_ext_enum(r, 3)?);
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if pkg_ext {
        r.skip_extension_additions()?;
    }
    Ok(pkg)
}

impl Ssm {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if self.requests.is_empty() || self.requests.len() > 32 {
            return Err(CodecError::EncodeInvariantViolation {
                field: "ssm.sigStatus",
            });
        }
        let mut w = BitWriter::new(buf);
        w.put_bit(false)?; // SSM extension
        let has_moy = self.time_stamp_minute < INVALID_MINUTE_OF_YEAR;
        let has_msg_cnt = self.msg_cnt <= 127;
        w.put_bit(has_moy)?;
        w.put_bit(has_msg_cnt)?;
        w.put_bit(false)?; // regional
        if has_moy {
            w.put_constrained(i64::from(self.time_stamp_minute), 0, 527_040, "ssm.moy")?;
        }
        w.put_constrained(i64::from(self.time_stamp_sec), 0, 65535, "ssm.second")?;
        if has_msg_cnt {
            w.put_constrained(i64::from(self.msg_cnt), 0, 127, "ssm.msgCnt")?;
        }
        // SignalStatusList, one SignalStatus for this intersection
        w.put_length(1, 1, 32, "ssm.status")?;
        w.put_bit(false)?; // SignalStatus extension
        w.put_bit(false)?; // regional
        w.put_constrained(i64::from(self.update_cnt), 0, 127, "ssm.updateCnt")?;
        encode_intersection_ref_id(&mut w, self.id)?;
        w.put_length(self.requests.len(), 1, 32, "ssm.sigStatus")?;
        for pkg in &self.requests {
            encode_package(&mut w, pkg)?;
        }
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Ssm, CodecError> {
        let mut r = BitReader::new(buf);
        let ssm_ext = r.get_bit()?;
        let has_moy = r.get_bit()?;
        let has_msg_cnt = r.get_bit()?;
        let has_regional = r.get_bit()?;
        let mut ssm = Ssm::default();
        if has_moy {
            ssm.time_stamp_minute = r.get_constrained(0, 527_040)? as u32;
        }
        ssm.time_stamp_sec = r.get_constrained(0, 65535)? as u16;
        if has_msg_cnt {
            ssm.msg_cnt = r.get_constrained(0, 127)? as u8;
        }
        let states = r.get_length(1, 32)?;
        for idx in 0..states {
            let state_ext = r.get_bit()?;
            let state_regional = r.get_bit()?;
            let update_cnt = r.get_constrained(0, 127)? as u8;
            let id = decode_intersection_ref_id(&mut r)?;
            let packages = r.get_length(1, 32)?;
            let mut requests = Vec::with_capacity(packages);
            for _ in 0..packages {
                requests.push(decode_package(&mut r)?);
            }
            if state_regional {
                skip_regional(&mut r, 1, 4)?;
            }
            if state_ext {
                r.skip_extension_additions()?;
            }
            // one intersection per instance
            if idx == 0 {
                ssm.update_cnt = update_cnt;
                ssm.id = id;
                ssm.requests = requests;
            }
        }
        if has_regional {
            skip_regional(&mut r, 1, 4)?;
        }
        if ssm_ext {
            r.skip_extension_additions()?;
        }
        reader_done(&r, buf.len())?;
        Ok(ssm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ssm() -> Ssm {
        Ssm {
            time_stamp_minute: 265_432,
            time_stamp_sec: 45_000,
            msg_cnt: 88,
            update_cnt: 3,
            id: 1000,
            requests: vec![
                SignalStatusPackage {
                    veh_id: 7,
                    request_id: 7,
                    msg_cnt: 9,
                    role: BasicVehicleRole::Transit,
                    in_bound: IntersectionAccessPoint::Lane(3),
                    out_bound: Some(IntersectionAccessPoint::Lane(103)),
                    eta_minute: 265_432,
                    eta_sec: 52_000,
                    duration: 8200,
                    status: PrioritizationResponseStatus::Granted,
                },
                SignalStatusPackage {
                    veh_id: 42,
                    request_id: 12,
                    msg_cnt: 55,
                    role: BasicVehicleRole::Truck,
                    in_bound: IntersectionAccessPoint::Lane(12),
                    out_bound: None,
                    eta_minute: INVALID_MINUTE_OF_YEAR,
                    eta_sec: UNAVAILABLE_DSECOND,
                    duration: UNAVAILABLE_DSECOND,
                    status: PrioritizationResponseStatus::Rejected,
                },
            ],
        }
    }

    #[test]
    fn roundtrip_two_requests() {
        let ssm = test_ssm();
        let mut buf = [0u8; 512];
        let n = ssm.encode(&mut buf).unwrap();
        assert_eq!(Ssm::decode(&buf[..n]).unwrap(), ssm);
    }

    #[test]
    fn empty_request_table_is_an_encode_error() {
        let ssm = Ssm::default();
        let mut buf = [0u8; 512];
        assert_eq!(
            ssm.encode(&mut buf),
            Err(CodecError::EncodeInvariantViolation {
                field: "ssm.sigStatus"
            })
        );
    }

    #[test]
    fn status_enum_roundtrips_each_root_value() {
        for (i, status) in [
            PrioritizationResponseStatus::Requested,
            PrioritizationResponseStatus::Processing,
            PrioritizationResponseStatus::Granted,
            PrioritizationResponseStatus::Rejected,
        ]
        .into_iter()
        .enumerate()
        {
            let mut ssm = test_ssm();
            ssm.requests.truncate(1);
            ssm.requests[0].status = status;
            ssm.requests[0].request_id = i as u8;
            let mut buf = [0u8; 512];
            let n = ssm.encode(&mut buf).unwrap();
            assert_eq!(Ssm::decode(&buf[..n]).unwrap().requests[0].status, status);
        }
    }
}
