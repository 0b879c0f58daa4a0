//! Data elements shared across the J2735 message types.

use bitflags::bitflags;

use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// Latitude in 1/10th microdegree; this value marks "unavailable"
pub const UNAVAILABLE_LATITUDE: i32 = 900_000_001;
/// Longitude in 1/10th microdegree; this value marks "unavailable"
pub const UNAVAILABLE_LONGITUDE: i32 = 1_800_000_001;
/// Elevation in decimeters; this value marks "unavailable"
pub const UNAVAILABLE_ELEVATION: i32 = -4096;
/// DSecond (milliseconds of the minute); this value marks "unavailable"
pub const UNAVAILABLE_DSECOND: u16 = 65535;
/// Speed in 0.02 m/s units; this value marks "unavailable"
pub const UNAVAILABLE_SPEED: u16 = 8191;
/// Heading in 0.0125 degree units; this value marks "unavailable"
pub const UNAVAILABLE_HEADING: u16 = 28800;
/// Steering wheel angle in 1.5 degree units; this value marks "unavailable"
pub const UNAVAILABLE_STEERING: i8 = 127;
/// Acceleration in 0.01 m/s^2 units; this value marks "unavailable"
pub const UNAVAILABLE_ACCEL: i16 = 2001;
/// Vertical acceleration in 0.02 G units; this value marks "unavailable"
pub const UNAVAILABLE_VERT_ACCEL: i8 = -127;
/// Positional accuracy axis; this value marks "unavailable"
pub const UNAVAILABLE_SEMI_AXIS: u8 = 255;
/// Positional accuracy orientation; this value marks "unavailable"
pub const UNAVAILABLE_ORIENTATION: u16 = 65535;
/// MinuteOfTheYear; values at or above this mark "unavailable"
pub const INVALID_MINUTE_OF_YEAR: u32 = 527_040;
/// TimeMark in deciseconds; values at or above this mark "unavailable"
pub const UNKNOWN_TIME_MARK: u16 = 36001;
/// MsgCount sentinel for optional counters that are not present
pub const UNAVAILABLE_MSG_CNT: u8 = 255;
/// Vehicular speed limit sentinel (no posted limit on the lane group)
pub const UNKNOWN_SPEED_LIMIT: u16 = 8191;

/// DE_TransmissionState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransmissionState {
    Neutral = 0,
    Park = 1,
    ForwardGears = 2,
    ReverseGears = 3,
    Reserved1 = 4,
    Reserved2 = 5,
    Reserved3 = 6,
    #[default]
    Unavailable = 7,
}

impl TransmissionState {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            0 => TransmissionState::Neutral,
            1 => TransmissionState::Park,
            2 => TransmissionState::ForwardGears,
            3 => TransmissionState::ReverseGears,
            4 => TransmissionState::Reserved1,
            5 => TransmissionState::Reserved2,
            6 => TransmissionState::Reserved3,
            _ => TransmissionState::Unavailable,
        }
    }
}

/// Shared shape of the four brake-related 2-bit status elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EngageStatus {
    #[default]
    Unavailable = 0,
    Off = 1,
    On = 2,
    Engaged = 3,
}

impl EngageStatus {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            1 => EngageStatus::Off,
            2 => EngageStatus::On,
            3 => EngageStatus::Engaged,
            _ => EngageStatus::Unavailable,
        }
    }
}

/// DE_MovementPhaseState
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MovementPhaseState {
    #[default]
    Unavailable = 0,
    Dark = 1,
    StopThenProceed = 2,
    StopAndRemain = 3,
    PreMovement = 4,
    PermissiveMovementAllowed = 5,
    ProtectedMovementAllowed = 6,
    PermissiveClearance = 7,
    ProtectedClearance = 8,
    CautionConflictingTraffic = 9,
}

impl MovementPhaseState {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            1 => MovementPhaseState::Dark,
            2 => MovementPhaseState::StopThenProceed,
            3 => MovementPhaseState::StopAndRemain,
            4 => MovementPhaseState::PreMovement,
            5 => MovementPhaseState::PermissiveMovementAllowed,
            6 => MovementPhaseState::ProtectedMovementAllowed,
            7 => MovementPhaseState::PermissiveClearance,
            8 => MovementPhaseState::ProtectedClearance,
            9 => MovementPhaseState::CautionConflictingTraffic,
            _ => MovementPhaseState::Unavailable,
        }
    }
}

/// DE_PriorityRequestType (extensible, 4 root values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PriorityRequestType {
    #[default]
    Reserved = 0,
    PriorityRequest = 1,
    RequestUpdate = 2,
    PriorityCancellation = 3,
}

impl PriorityRequestType {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            1 => PriorityRequestType::PriorityRequest,
            2 => PriorityRequestType::RequestUpdate,
            3 => PriorityRequestType::PriorityCancellation,
            _ => PriorityRequestType::Reserved,
        }
    }
}

/// DE_PrioritizationResponseStatus (extensible, 8 root values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrioritizationResponseStatus {
    #[default]
    Unknown = 0,
    Requested = 1,
    Processing = 2,
    WatchOtherTraffic = 3,
    Granted = 4,
    Rejected = 5,
    MaxPresence = 6,
    ReserviceLocked = 7,
}

impl PrioritizationResponseStatus {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            1 => PrioritizationResponseStatus::Requested,
            2 => PrioritizationResponseStatus::Processing,
            3 => PrioritizationResponseStatus::WatchOtherTraffic,
            4 => PrioritizationResponseStatus::Granted,
            5 => PrioritizationResponseStatus::Rejected,
            6 => PrioritizationResponseStatus::MaxPresence,
            _ => PrioritizationResponseStatus::ReserviceLocked,
        }
    }
}

/// DE_BasicVehicleRole (extensible, 23 root values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BasicVehicleRole {
    BasicVehicle = 0,
    PublicTransport = 1,
    SpecialTransport = 2,
    DangerousGoods = 3,
    RoadWork = 4,
    RoadRescue = 5,
    Emergency = 6,
    SafetyCar = 7,
    #[default]
    NoneUnknown = 8,
    Truck = 9,
    Motorcycle = 10,
    RoadSideSource = 11,
    Police = 12,
    Fire = 13,
    Ambulance = 14,
    Dot = 15,
    Transit = 16,
    SlowMoving = 17,
    StopNgo = 18,
    Cyclist = 19,
    Pedestrian = 20,
    NonMotorized = 21,
    Military = 22,
}

impl BasicVehicleRole {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            0 => BasicVehicleRole::BasicVehicle,
            1 => BasicVehicleRole::PublicTransport,
            2 => BasicVehicleRole::SpecialTransport,
            3 => BasicVehicleRole::DangerousGoods,
            4 => BasicVehicleRole::RoadWork,
            5 => BasicVehicleRole::RoadRescue,
            6 => BasicVehicleRole::Emergency,
            7 => BasicVehicleRole::SafetyCar,
            9 => BasicVehicleRole::Truck,
            10 => BasicVehicleRole::Motorcycle,
            11 => BasicVehicleRole::RoadSideSource,
            12 => BasicVehicleRole::Police,
            13 => BasicVehicleRole::Fire,
            14 => BasicVehicleRole::Ambulance,
            15 => BasicVehicleRole::Dot,
            16 => BasicVehicleRole::Transit,
            17 => BasicVehicleRole::SlowMoving,
            18 => BasicVehicleRole::StopNgo,
            19 => BasicVehicleRole::Cyclist,
            20 => BasicVehicleRole::Pedestrian,
            21 => BasicVehicleRole::NonMotorized,
            22 => BasicVehicleRole::Military,
            _ => BasicVehicleRole::NoneUnknown,
        }
    }
}

/// DE_VehicleType (extensible, 16 root values); HPMS classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VehicleType {
    None = 0,
    #[default]
    Unknown = 1,
    Special = 2,
    Moto = 3,
    Car = 4,
    CarOther = 5,
    Bus = 6,
    AxleCnt2 = 7,
    AxleCnt3 = 8,
    AxleCnt4 = 9,
    AxleCnt4Trailer = 10,
    AxleCnt5Trailer = 11,
    AxleCnt6Trailer = 12,
    AxleCnt5MultiTrailer = 13,
    AxleCnt6MultiTrailer = 14,
    AxleCnt7MultiTrailer = 15,
}

impl VehicleType {
    pub(crate) fn from_raw(raw: u64) -> Self {
        match raw {
            0 => VehicleType::None,
            2 => VehicleType::Special,
            3 => VehicleType::Moto,
            4 => VehicleType::Car,
            5 => VehicleType::CarOther,
            6 => VehicleType::Bus,
            7 => VehicleType::AxleCnt2,
            8 => VehicleType::AxleCnt3,
            9 => VehicleType::AxleCnt4,
            10 => VehicleType::AxleCnt4Trailer,
            11 => VehicleType::AxleCnt5Trailer,
            12 => VehicleType::AxleCnt6Trailer,
            13 => VehicleType::AxleCnt5MultiTrailer,
            14 => VehicleType::AxleCnt6MultiTrailer,
            15 => VehicleType::AxleCnt7MultiTrailer,
            _ => VehicleType::Unknown,
        }
    }
}

bitflags! {
    /// DE_BrakeAppliedStatus, 5-bit BIT STRING
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BrakeApplied: u8 {
        const UNAVAILABLE = 0b10000;
        const LEFT_FRONT  = 0b01000;
        const LEFT_REAR   = 0b00100;
        const RIGHT_FRONT = 0b00010;
        const RIGHT_REAR  = 0b00001;
    }
}

bitflags! {
    /// DE_IntersectionStatusObject, 16-bit BIT STRING
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct IntersectionStatus: u16 {
        const MANUAL_CONTROL_ENABLED        = 1 << 15;
        const STOP_TIME_ACTIVATED           = 1 << 14;
        const FAILURE_FLASH                 = 1 << 13;
        const PREEMPT_ACTIVE                = 1 << 12;
        const PRIORITY_ACTIVE               = 1 << 11;
        const FIXED_TIME_OPERATION          = 1 << 10;
        const TRAFFIC_DEPENDENT_OPERATION   = 1 << 9;
        const STANDBY_OPERATION             = 1 << 8;
        const FAILURE_MODE                  = 1 << 7;
        const OFF                           = 1 << 6;
        const RECENT_MAP_MESSAGE_UPDATE     = 1 << 5;
        const RECENT_CHANGE_IN_MAP_ASSIGNED_LANE_IDS = 1 << 4;
        const NO_VALID_MAP_AVAILABLE        = 1 << 3;
        const NO_VALID_SPAT_AVAILABLE       = 1 << 2;
    }
}

bitflags! {
    /// DE_AllowedManeuvers, 12-bit BIT STRING
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AllowedManeuvers: u16 {
        const STRAIGHT              = 1 << 11;
        const LEFT_TURN             = 1 << 10;
        const RIGHT_TURN            = 1 << 9;
        const U_TURN                = 1 << 8;
        const LEFT_TURN_ON_RED      = 1 << 7;
        const RIGHT_TURN_ON_RED     = 1 << 6;
        const LANE_CHANGE           = 1 << 5;
        const NO_STOPPING           = 1 << 4;
        const YIELD_ALWAYS_REQUIRED = 1 << 3;
        const GO_WITH_HALT          = 1 << 2;
        const CAUTION               = 1 << 1;
        const RESERVED1             = 1 << 0;
    }
}

/// DF_IntersectionAccessPoint, a CHOICE between the approach- and
/// lane-oriented ways of naming an ingress/egress point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntersectionAccessPoint {
    Lane(u8),
    Approach(u8),
    Connection(u8),
}

impl Default for IntersectionAccessPoint {
    fn default() -> Self {
        IntersectionAccessPoint::Lane(0)
    }
}

impl IntersectionAccessPoint {
    pub fn lane_id(&self) -> Option<u8> {
        match self {
            IntersectionAccessPoint::Lane(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, w: &mut BitWriter<'_>) -> Result<(), CodecError> {
        w.put_bit(false)?; // extension
        match self {
            IntersectionAccessPoint::Lane(id) => {
                w.put_bits(0, 2)?;
                w.put_constrained(i64::from(*id), 0, 255, "accessPoint.lane")
            },
            IntersectionAccessPoint::Approach(id) => {
                w.put_bits(1, 2)?;
                w.put_constrained(i64::from(*id), 0, 15, "accessPoint.approach")
            },
            IntersectionAccessPoint::Connection(id) => {
                w.put_bits(2, 2)?;
                w.put_constrained(i64::from(*id), 0, 255, "accessPoint.connection")
            },
        }
    }

    pub(crate) fn decode(r: &mut BitReader<'_>) -> Result<Self, CodecError> {
        if r.get_bit()? {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "accessPoint.extension",
            });
        }
        match r.get_bits(2)? {
            0 => Ok(IntersectionAccessPoint::Lane(r.get_constrained(0, 255)? as u8)),
            1 => Ok(IntersectionAccessPoint::Approach(
                r.get_constrained(0, 15)? as u8
            )),
            2 => Ok(IntersectionAccessPoint::Connection(
                r.get_constrained(0, 255)? as u8,
            )),
            _ => Err(CodecError::DecodeUnexpectedValue {
                field: "accessPoint.choice",
            }),
        }
    }
}

/// DF_IntersectionReferenceID without the optional RoadRegulatorID region.
pub(crate) fn encode_intersection_ref_id(
    w: &mut BitWriter<'_>,
    id: u16,
) -> Result<(), CodecError> {
    w.put_bit(false)?; // region absent
    w.put_bits(u64::from(id), 16)
}

pub(crate) fn decode_intersection_ref_id(r: &mut BitReader<'_>) -> Result<u16, CodecError> {
    if r.get_bit()? {
        r.skip_bits(16)?; // region present, discarded
    }
    Ok(r.get_bits(16)? as u16)
}

/// DF_VehicleID: always the 4-byte TemporaryID alternative, carried
/// big-endian as a u32.
pub(crate) fn encode_vehicle_id(w: &mut BitWriter<'_>, id: u32) -> Result<(), CodecError> {
    w.put_bit(false)?; // CHOICE index: entityID
    w.put_octets(&id.to_be_bytes())
}

pub(crate) fn decode_vehicle_id(r: &mut BitReader<'_>) -> Result<u32, CodecError> {
    if r.get_bit()? {
        return Err(CodecError::DecodeUnexpectedValue {
            field: "vehicleId.stationId",
        });
    }
    let mut raw = [0u8; 4];
    r.get_octets(&mut raw)?;
    Ok(u32::from_be_bytes(raw))
}

/// Skips a `SEQUENCE (SIZE(lo..hi)) OF RegionalExtension`: each entry is an
/// 8-bit RegionId followed by a length-wrapped open type.
pub(crate) fn skip_regional(
    r: &mut BitReader<'_>,
    lo: usize,
    hi: usize,
) -> Result<(), CodecError> {
    let n = r.get_length(lo, hi)?;
    for _ in 0..n {
        r.skip_bits(8)?;
        let len = r.get_unconstrained_length()?;
        r.skip_bits(len * 8)?;
    }
    Ok(())
}

/// Extensible ENUMERATED: root alternatives fit in `nbits`. An extension
/// value decodes as a normally-small number and maps through `from_raw` with
/// an out-of-root argument.
pub(crate) fn decode_ext_enum(r: &mut BitReader<'_>, nbits: usize) -> Result<u64, CodecError> {
    if r.get_bit()? {
        let v = r.get_normally_small()?;
        return Ok(u64::MAX - v as u64); // out of root range, maps to default
    }
    r.get_bits(nbits)
}

pub(crate) fn encode_ext_enum(
    w: &mut BitWriter<'_>,
    value: u64,
    nbits: usize,
) -> Result<(), CodecError> {
    w.put_bit(false)?;
    w.put_bits(value, nbits)
}
