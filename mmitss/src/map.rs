//! Intersection map: the nmap-file model, lane-level vehicle locating and
//! the cached MapData payload.
//!
//! Entities form an index arena: intersections own approaches own lanes own
//! nodes, and every `(intersectionId, laneId)` pair resolves through
//! [`MapDb`] to a `(intersection, approach, lane)` index triple.

mod locate;
pub(crate) mod nmap;
mod payload;

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::MapError;
use crate::geo::{EnuCoord, GeoPoint, GeoRefPoint, Point2D, PolygonType, Projection};

/// Speed below which a BSM heading is considered unreliable, m/s
pub const LOW_SPEED_THRESHOLD: f64 = 0.2;
/// Heading tolerance against the lane direction at normal speed, degrees
pub const HEADING_ERROR_BOUND_NORMAL: f64 = 45.0;
/// Heading tolerance when crawling, degrees (effectively no constraint)
pub const HEADING_ERROR_BOUND_LOW_SPEED: f64 = 200.0;
/// Geofence half-width multiplier on the lane width
pub const LANE_WIDTH_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ApproachType {
    #[default]
    Inbound = 1,
    Outbound = 2,
    Crosswalk = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneType {
    #[default]
    Vehicle = 1,
    Crosswalk = 4,
}

/// Turning movement of a lane-to-lane connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Maneuver {
    #[default]
    Unknown = 0,
    UTurn = 1,
    LeftTurn = 2,
    RightTurn = 3,
    StraightAhead = 4,
    Straight = 5,
}

impl Maneuver {
    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Maneuver::Unknown),
            1 => Some(Maneuver::UTurn),
            2 => Some(Maneuver::LeftTurn),
            3 => Some(Maneuver::RightTurn),
            4 => Some(Maneuver::StraightAhead),
            5 => Some(Maneuver::Straight),
            _ => None,
        }
    }
}

bitflags! {
    /// nmap `Intersection_attributes`, an 8-bit binary string
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct IntersectionAttributes: u8 {
        const ELEVATION   = 1 << 0;
        const GEOMETRY    = 1 << 1;
        const SPEED_LIMIT = 1 << 2;
        const NAVIGATION  = 1 << 3;
    }
}

bitflags! {
    /// nmap `Lane_attributes`, a 20-bit binary string. Vehicular lanes use
    /// the revocable..caution bits; crosswalks reuse the low bits with the
    /// crosswalk meanings of J2735.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LaneAttributeSet: u32 {
        const REVOCABLE              = 1 << 0;
        const FLY_OVER               = 1 << 1;
        const HOV_ONLY               = 1 << 2;
        const BUS_ONLY               = 1 << 3;
        const TAXI_ONLY              = 1 << 4;
        const RESTRICTED_FROM_PUBLIC = 1 << 5;
        const IR_BEACON_COVERAGE     = 1 << 6;
        const PERMISSION_ON_REQUEST  = 1 << 7;
        const MANEUVER_STRAIGHT      = 1 << 8;
        const MANEUVER_LEFT          = 1 << 9;
        const MANEUVER_RIGHT         = 1 << 10;
        const MANEUVER_U_TURN        = 1 << 11;
        const MANEUVER_LEFT_ON_RED   = 1 << 12;
        const MANEUVER_RIGHT_ON_RED  = 1 << 13;
        const MANEUVER_LANE_CHANGE   = 1 << 14;
        const MANEUVER_NO_STOPPING   = 1 << 15;
        const YIELD_ALWAYS           = 1 << 16;
        const GO_WITH_HALT           = 1 << 17;
        const CAUTION                = 1 << 18;
        const RESERVED               = 1 << 19;
    }
}

/// Downstream link of a lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectTo {
    pub intersection_id: u16,
    pub lane_id: u8,
    pub maneuver: Maneuver,
}

/// Lane way-point. Inbound node sequences start at the stop-bar and walk
/// upstream; outbound start at the crosswalk and walk downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub geo: GeoRefPoint,
    /// cached ENU offset, centimeters
    pub pt: Point2D,
    /// cumulative distance to the first node of the lane, centimeters
    pub dist_to_first: u32,
    /// travel direction at this node, decidegrees
    pub heading: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lane {
    pub id: u8,
    pub lane_type: LaneType,
    pub attributes: LaneAttributeSet,
    /// centimeters
    pub width: u16,
    /// 1..=8, zero when the lane is uncontrolled (outbound)
    pub control_phase: u8,
    pub connect_to: Vec<ConnectTo>,
    pub nodes: Vec<Node>,
}

impl Lane {
    /// Lane length from the stop-bar (or crosswalk) to the last way-point,
    /// centimeters.
    pub fn length(&self) -> u32 {
        self.nodes.last().map_or(0, |n| n.dist_to_first)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Approach {
    pub id: u8,
    /// mph, 0xFF when no posted limit, 0 on crosswalks
    pub speed_limit: u8,
    pub approach_type: ApproachType,
    /// curb lane first
    pub lanes: Vec<Lane>,
    pub polygon: Vec<Point2D>,
    pub polygon_type: Option<PolygonType>,
    /// minimum stop-bar distance to the intersection central line, centimeters
    pub min_dist_to_central_line: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntersectionMap {
    pub name: String,
    pub rsu_id: String,
    pub map_version: u8,
    pub id: u16,
    pub attributes: IntersectionAttributes,
    pub geo_ref: GeoRefPoint,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub enu: EnuCoord,
    /// coverage radius, centimeters
    pub radius: u32,
    /// distinct speed limits across approaches, mph
    pub speeds: Vec<u8>,
    pub approaches: Vec<Approach>,
    pub polygon: Vec<Point2D>,
    pub polygon_type: Option<PolygonType>,
    /// UPER MapData payload, encoded once after load
    pub map_payload: Vec<u8>,
}

/// Vehicle location relative to the mapped intersections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MapLocType {
    #[default]
    Outside,
    InsideIntersectionBox,
    OnInbound,
    AtIntersectionBox,
    OnOutbound,
}

/// Vehicle location relative to one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneLocType {
    #[default]
    Outside,
    Approaching,
    Inside,
    Leaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneProjection {
    pub node_index: u8,
    pub proj: Projection,
}

/// `(intersection, approach, lane)` index triple plus the location class
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleTracking {
    pub status: MapLocType,
    pub intersection: usize,
    pub approach: usize,
    pub lane: usize,
    pub lane_proj: LaneProjection,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionState {
    /// m/s
    pub speed: f64,
    /// degrees, 0..360 clockwise from north
    pub heading: f64,
}

/// Lane-level awareness derived from a [`VehicleTracking`]
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationAware {
    pub intersection_id: u16,
    pub lane_id: u8,
    pub control_phase: u8,
    /// meters to the stop-bar; positive upstream, negative inside the box,
    /// distance downstream of the box when on an outbound lane
    pub dist_long: f64,
    /// meters from the lane center, positive right of travel
    pub dist_lat: f64,
    pub connections: Vec<ConnectTo>,
}

/// A connected vehicle's last-known geodetic fix and map-matching state
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectedVehicle {
    pub id: u32,
    /// milliseconds since the UNIX epoch
    pub msec: u64,
    pub geo_point: GeoPoint,
    pub motion: MotionState,
    pub is_in_map: bool,
    pub tracking: VehicleTracking,
    pub location: LocationAware,
}

/// All mapped intersections plus the `(intersectionId, laneId)` index.
#[derive(Debug, Clone, Default)]
pub struct MapDb {
    intersections: Vec<IntersectionMap>,
    index: HashMap<u32, (usize, usize, usize)>,
}

impl MapDb {
    /// Loads an nmap file, derives ENU offsets, headings and polygons, and
    /// caches each intersection's encoded MapData payload.
    pub fn load(path: &std::path::Path) -> Result<MapDb, MapError> {
        let text = std::fs::read_to_string(path).map_err(|e| MapError::Io(e.to_string()))?;
        let mut db = nmap::parse_nmap(&text)?;
        db.finish_load()?;
        Ok(db)
    }

    /// Builds a map database from already-parsed intersections (tests and
    /// the nmap reader use this).
    pub fn from_intersections(intersections: Vec<IntersectionMap>) -> Result<MapDb, MapError> {
        let mut db = MapDb {
            intersections,
            index: HashMap::new(),
        };
        db.rebuild_index()?;
        db.finish_load()?;
        Ok(db)
    }

    fn finish_load(&mut self) -> Result<(), MapError> {
        locate::set_local_offsets_and_headings(&mut self.intersections)?;
        locate::build_polygons(&mut self.intersections);
        for intersection in &mut self.intersections {
            let map_data = payload::build_map_data(intersection);
            let mut buf = vec![0u8; 2048];
            let used = map_data
                .encode(&mut buf)
                .map_err(|e| MapError::Geometry(format!("MAP encode failed: {e}")))?;
            buf.truncate(used);
            intersection.map_payload = buf;
        }
        Ok(())
    }

    pub(crate) fn rebuild_index(&mut self) -> Result<(), MapError> {
        self.index.clear();
        for (i, intersection) in self.intersections.iter().enumerate() {
            for (a, approach) in intersection.approaches.iter().enumerate() {
                for (l, lane) in approach.lanes.iter().enumerate() {
                    let key = (u32::from(intersection.id) << 8) | u32::from(lane.id);
                    if self.index.insert(key, (i, a, l)).is_some() {
                        return Err(MapError::Geometry(format!(
                            "duplicate lane {} at intersection {}",
                            lane.id, intersection.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn intersections(&self) -> &[IntersectionMap] {
        &self.intersections
    }

    #[cfg(test)]
    pub(crate) fn intersections_mut(&mut self) -> &mut [IntersectionMap] {
        &mut self.intersections
    }

    pub fn intersection_ids(&self) -> Vec<u16> {
        self.intersections.iter().map(|i| i.id).collect()
    }

    pub fn intersection_by_id(&self, id: u16) -> Option<&IntersectionMap> {
        self.intersections.iter().find(|i| i.id == id)
    }

    pub fn intersection_by_name(&self, name: &str) -> Option<&IntersectionMap> {
        self.intersections.iter().find(|i| i.name == name)
    }

    /// Resolves `(intersectionId, laneId)` to the index triple.
    pub fn indexes_by_ids(&self, intersection_id: u16, lane_id: u8) -> Option<(usize, usize, usize)> {
        self.index
            .get(&((u32::from(intersection_id) << 8) | u32::from(lane_id)))
            .copied()
    }

    pub fn lane(&self, triple: (usize, usize, usize)) -> &Lane {
        &self.intersections[triple.0].approaches[triple.1].lanes[triple.2]
    }

    pub fn control_phase_by_lane(&self, intersection_id: u16, lane_id: u8) -> Option<u8> {
        self.indexes_by_ids(intersection_id, lane_id)
            .map(|t| self.lane(t).control_phase)
    }

    pub fn control_phase_by_approach(&self, intersection_id: u16, approach_id: u8) -> Option<u8> {
        let intersection = self.intersection_by_id(intersection_id)?;
        intersection
            .approaches
            .iter()
            .find(|a| a.id == approach_id)
            .and_then(|a| a.lanes.first())
            .map(|l| l.control_phase)
    }

    pub fn lane_length(&self, intersection_id: u16, lane_id: u8) -> Option<u32> {
        self.indexes_by_ids(intersection_id, lane_id)
            .map(|t| self.lane(t).length())
    }

    pub fn map_payload(&self, intersection_id: u16) -> Option<&[u8]> {
        self.intersection_by_id(intersection_id)
            .map(|i| i.map_payload.as_slice())
    }
}
