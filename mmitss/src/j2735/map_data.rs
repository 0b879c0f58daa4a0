//! MapData: intersection geometry broadcast. One intersection per message;
//! lanes are grouped into one `IntersectionGeometry` per distinct posted
//! speed so the speed limit can ride in the geometry header.

use super::reader_done;
use super::types::*;
use crate::error::CodecError;
use crate::per::{BitReader, BitWriter};

/// DF_Position3D; elevation in decimeters, `None` when the source map
/// carries no elevation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position3D {
    pub latitude: i32,
    pub longitude: i32,
    pub elevation: Option<i32>,
}

/// DF_LaneTypeAttributes: only the vehicle and crosswalk alternatives are
/// used by intersection maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneTypeAttributes {
    Vehicle(u8),
    Crosswalk(u16),
}

impl Default for LaneTypeAttributes {
    fn default() -> Self {
        LaneTypeAttributes::Vehicle(0)
    }
}

/// DF_LaneAttributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneAttributes {
    /// 2-bit LaneDirection; bit 1 = ingress path, bit 0 = egress path
    pub directional_use: u8,
    /// 10-bit LaneSharing; zero means not shared and not overlapping
    pub shared_with: u16,
    pub lane_type: LaneTypeAttributes,
}

/// DF_Connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Connection {
    pub lane: u8,
    pub maneuver: Option<AllowedManeuvers>,
    /// downstream intersection when the connection leaves this one
    pub remote_intersection: Option<u16>,
    pub signal_group: Option<u8>,
}

/// DF_NodeXY: ENU offset from the previous node (or the reference point for
/// the first node) in centimeters, with the first node optionally adjusting
/// the lane width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeXY {
    pub dx: i32,
    pub dy: i32,
    pub d_width: Option<i16>,
}

/// DF_GenericLane
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GenericLane {
    pub lane_id: u8,
    pub ingress_approach: Option<u8>,
    pub egress_approach: Option<u8>,
    pub attributes: LaneAttributes,
    pub maneuvers: Option<AllowedManeuvers>,
    pub connects_to: Vec<Connection>,
    /// 2..=63 entries
    pub nodes: Vec<NodeXY>,
}

/// DF_IntersectionGeometry: one per distinct speed group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntersectionGeometry {
    pub id: u16,
    pub revision: u8,
    pub ref_point: Position3D,
    /// reference lane width in centimeters
    pub lane_width: Option<u16>,
    /// posted vehicleMaxSpeed in 0.02 m/s units; `None` on crosswalk groups
    /// or when no finite limit is set
    pub speed_limit: Option<u16>,
    pub lanes: Vec<GenericLane>,
}

/// MSG_MapData record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MapData {
    pub map_version: u8,
    pub geometries: Vec<IntersectionGeometry>,
}

fn select_node_offset_variant(dx: i32, dy: i32) -> usize {
    let dist = f64::from(dx).hypot(f64::from(dy));
    if dist <= 511.0 {
        0
    } else if dist <= 1023.0 {
        1
    } else if dist <= 2047.0 {
        2
    } else if dist <= 4096.0 {
        3
    } else if dist <= 8191.0 {
        4
    } else {
        5
    }
}

const NODE_XY_BOUNDS: [(i64, i64); 6] = [
    (-512, 511),
    (-1024, 1023),
    (-2048, 2047),
    (-4096, 4095),
    (-8192, 8191),
    (-32768, 32767),
];

fn encode_node(w: &mut BitWriter<'_>, node: &NodeXY) -> Result<(), CodecError> {
    w.put_bit(node.d_width.is_some())?;
    let variant = select_node_offset_variant(node.dx, node.dy);
    let (lo, hi) = NODE_XY_BOUNDS[variant];
    w.put_bits(variant as u64, 3)?;
    w.put_constrained(i64::from(node.dx), lo, hi, "map.node.x")?;
    w.put_constrained(i64::from(node.dy), lo, hi, "map.node.y")?;
    if let Some(d_width) = node.d_width {
        // NodeAttributeSetXY with only dWidth present
        w.put_bit(false)?;
        w.put_bits(0b0000100, 7)?;
        w.put_constrained(i64::from(d_width), -512, 511, "map.node.dWidth")?;
    }
    Ok(())
}

fn decode_node(r: &mut BitReader<'_>) -> Result<NodeXY, CodecError> {
    let has_attributes = r.get_bit()?;
    let variant = r.get_bits(3)? as usize;
    let mut node = NodeXY::default();
    match variant {
        0..=5 => {
            let (lo, hi) = NODE_XY_BOUNDS[variant];
            node.dx = r.get_constrained(lo, hi)? as i32;
            node.dy = r.get_constrained(lo, hi)? as i32;
        },
        _ => {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "map.node.offset",
            });
        },
    }
    if has_attributes {
        let ext = r.get_bit()?;
        let has_local = r.get_bit()?;
        let has_disabled = r.get_bit()?;
        let has_enabled = r.get_bit()?;
        let has_data = r.get_bit()?;
        let has_d_width = r.get_bit()?;
        let has_d_elev = r.get_bit()?;
        let has_regional = r.get_bit()?;
        if has_local || has_disabled || has_enabled || has_data {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "map.node.attributes",
            });
        }
        if has_d_width {
            node.d_width = Some(r.get_constrained(-512, 511)? as i16);
        }
        if has_d_elev {
            r.skip_bits(10)?;
        }
        if has_regional {
            skip_regional(r, 1, 4)?;
        }
        if ext {
            r.skip_extension_additions()?;
        }
    }
    Ok(node)
}

fn encode_connection(w: &mut BitWriter<'_>, conn: &Connection) -> Result<(), CodecError> {
    w.put_bit(conn.remote_intersection.is_some())?;
    w.put_bit(conn.signal_group.is_some())?;
    w.put_bit(false)?; // userClass
    w.put_bit(false)?; // connectionID
    // ConnectingLane
    w.put_bit(conn.maneuver.is_some())?;
    w.put_constrained(i64::from(conn.lane), 0, 255, "map.connection.lane")?;
    if let Some(maneuver) = conn.maneuver {
        w.put_bits(u64::from(maneuver.bits()), 12)?;
    }
    if let Some(remote) = conn.remote_intersection {
        encode_intersection_ref_id(w, remote)?;
    }
    if let Some(signal_group) = conn.signal_group {
        w.put_constrained(i64::from(signal_group), 0, 255, "map.connection.signalGroup")?;
    }
    Ok(())
}

fn decode_connection(r: &mut BitReader<'_>) -> Result<Connection, CodecError> {
    let has_remote = r.get_bit()?;
    let has_signal_group = r.get_bit()?;
    let has_user_class = r.get_bit()?;
    let has_connection_id = r.get_bit()?;
    let has_maneuver = r.get_bit()?;
    let mut conn = Connection {
        lane: r.get_constrained(0, 255)? as u8,
        ..Connection::default()
    };
    if has_maneuver {
        conn.maneuver = Some(AllowedManeuvers::from_bits_truncate(r.get_bits(12)? as u16));
    }
    if has_remote {
        conn.remote_intersection = Some(decode_intersection_ref_id(r)?);
    }
    if has_signal_group {
        conn.signal_group = Some(r.get_constrained(0, 255)? as u8);
    }
    if has_user_class {
        r.skip_bits(8)?;
    }
    if has_connection_id {
        r.skip_bits(8)?;
    }
    Ok(conn)
}

fn encode_lane(w: &mut BitWriter<'_>, lane: &GenericLane) -> Result<(), CodecError> {
    if lane.nodes.len() < 2 || lane.nodes.len() > 63 {
        return Err(CodecError::EncodeInvariantViolation {
            field: "map.lane.nodes",
        });
    }
    w.put_bit(false)?; // GenericLane extension
    w.put_bit(false)?; // name
    w.put_bit(lane.ingress_approach.is_some())?;
    w.put_bit(lane.egress_approach.is_some())?;
    w.put_bit(lane.maneuvers.is_some())?;
    w.put_bit(!lane.connects_to.is_empty())?;
    w.put_bit(false)?; // overlays
    w.put_bit(false)?; // regional
    w.put_constrained(i64::from(lane.lane_id), 0, 255, "map.laneId")?;
    if let Some(approach) = lane.ingress_approach {
        w.put_constrained(i64::from(approach), 0, 15, "map.ingressApproach")?;
    }
    if let Some(approach) = lane.egress_approach {
        w.put_constrained(i64::from(approach), 0, 15, "map.egressApproach")?;
    }
    // LaneAttributes
    w.put_bit(false)?; // regional absent
    w.put_bits(u64::from(lane.attributes.directional_use), 2)?;
    w.put_bits(u64::from(lane.attributes.shared_with), 10)?;
    match lane.attributes.lane_type {
        LaneTypeAttributes::Vehicle(bits) => {
            w.put_bits(0, 3)?;
            w.put_bit(false)?; // size within the 8-bit root
            w.put_bits(u64::from(bits), 8)?;
        },
        LaneTypeAttributes::Crosswalk(bits) => {
            w.put_bits(1, 3)?;
            w.put_bits(u64::from(bits), 16)?;
        },
    }
    if let Some(maneuvers) = lane.maneuvers {
        w.put_bits(u64::from(maneuvers.bits()), 12)?;
    }
    // NodeListXY, nodes alternative
    w.put_bit(false)?;
    w.put_bit(false)?;
    w.put_length(lane.nodes.len(), 2, 63, "map.nodeList")?;
    for node in &lane.nodes {
        encode_node(w, node)?;
    }
    if !lane.connects_to.is_empty() {
        w.put_length(lane.connects_to.len(), 1, 16, "map.connectsTo")?;
        for conn in &lane.connects_to {
            encode_connection(w, conn)?;
        }
    }
    Ok(())
}

fn decode_lane(r: &mut BitReader<'_>) -> Result<GenericLane, CodecError> {
    let lane_ext = r.get_bit()?;
    let has_name = r.get_bit()?;
    let has_ingress = r.get_bit()?;
    let has_egress = r.get_bit()?;
    let has_maneuvers = r.get_bit()?;
    let has_connects = r.get_bit()?;
    let has_overlays = r.get_bit()?;
    let has_regional = r.get_bit()?;
    let mut lane = GenericLane {
        lane_id: r.get_constrained(0, 255)? as u8,
        ..GenericLane::default()
    };
    if has_name {
        let len = r.get_length(1, 63)?;
        r.skip_bits(len * 7)?;
    }
    if has_ingress {
        lane.ingress_approach = Some(r.get_constrained(0, 15)? as u8);
    }
    if has_egress {
        lane.egress_approach = Some(r.get_constrained(0, 15)? as u8);
    }
    let attr_regional = r.get_bit()?;
    lane.attributes.directional_use = r.get_bits(2)? as u8;
    lane.attributes.shared_with = r.get_bits(10)? as u16;
    lane.attributes.lane_type = match r.get_bits(3)? {
        0 => {
            if r.get_bit()? {
                return Err(CodecError::DecodeUnexpectedValue {
                    field: "map.laneType.vehicle",
                });
            }
            LaneTypeAttributes::Vehicle(r.get_bits(8)? as u8)
        },
        1 => LaneTypeAttributes::Crosswalk(r.get_bits(16)? as u16),
        _ => {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "map.laneType",
            });
        },
    };
    if attr_regional {
        skip_regional(r, 1, 4)?;
    }
    if has_maneuvers {
        lane.maneuvers = Some(AllowedManeuvers::from_bits_truncate(r.get_bits(12)? as u16));
    }
    if r.get_bit()? {
        return Err(CodecError::DecodeUnexpectedValue {
            field: "map.nodeList.extension",
        });
    }
    if r.get_bit()? {
        return Err(CodecError::DecodeUnexpectedValue {
            field: "map.nodeList.computed",
        });
    }
    let node_count = r.get_length(2, 63)?;
    for _ in 0..node_count {
        lane.nodes.push(decode_node(r)?);
    }
    if has_connects {
        let conn_count = r.get_length(1, 16)?;
        for _ in 0..conn_count {
            lane.connects_to.push(decode_connection(r)?);
        }
    }
    if has_overlays {
        let n = r.get_length(1, 5)?;
        r.skip_bits(n * 8)?;
    }
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if lane_ext {
        r.skip_extension_additions()?;
    }
    Ok(lane)
}

fn encode_geometry(w: &mut BitWriter<'_>, geo: &IntersectionGeometry) -> Result<(), CodecError> {
    if geo.lanes.is_empty() || geo.lanes.len() > 255 {
        return Err(CodecError::EncodeInvariantViolation {
            field: "map.laneSet",
        });
    }
    w.put_bit(false)?; // IntersectionGeometry extension
    w.put_bit(false)?; // name
    w.put_bit(geo.lane_width.is_some())?;
    w.put_bit(geo.speed_limit.is_some())?;
    w.put_bit(false)?; // preemptPriorityData
    w.put_bit(false)?; // regional
    encode_intersection_ref_id(w, geo.id)?;
    w.put_constrained(i64::from(geo.revision), 0, 127, "map.revision")?;
    // Position3D
    w.put_bit(false)?;
    w.put_bit(geo.ref_point.elevation.is_some())?;
    w.put_bit(false)?;
    w.put_constrained(
        i64::from(geo.ref_point.latitude),
        -900_000_000,
        900_000_001,
        "map.refPoint.lat",
    )?;
    w.put_constrained(
        i64::from(geo.ref_point.longitude),
        -1_799_999_999,
        1_800_000_001,
        "map.refPoint.long",
    )?;
    if let Some(elevation) = geo.ref_point.elevation {
        w.put_constrained(i64::from(elevation), -4096, 61439, "map.refPoint.elev")?;
    }
    if let Some(lane_width) = geo.lane_width {
        w.put_constrained(i64::from(lane_width), 0, 32767, "map.laneWidth")?;
    }
    if let Some(speed) = geo.speed_limit {
        w.put_length(1, 1, 9, "map.speedLimits")?;
        // RegulatorySpeedLimit: vehicleMaxSpeed
        encode_ext_enum(w, 5, 4)?;
        w.put_constrained(i64::from(speed), 0, 8191, "map.speedLimit")?;
    }
    w.put_length(geo.lanes.len(), 1, 255, "map.laneSet")?;
    for lane in &geo.lanes {
        encode_lane(w, lane)?;
    }
    Ok(())
}

fn decode_geometry(r: &mut BitReader<'_>) -> Result<IntersectionGeometry, CodecError> {
    let geo_ext = r.get_bit()?;
    let has_name = r.get_bit()?;
    let has_lane_width = r.get_bit()?;
    let has_speed_limits = r.get_bit()?;
    let has_preempt = r.get_bit()?;
    let has_regional = r.get_bit()?;
    if has_name {
        let len = r.get_length(1, 63)?;
        r.skip_bits(len * 7)?;
    }
    let mut geo = IntersectionGeometry {
        id: decode_intersection_ref_id(r)?,
        revision: r.get_constrained(0, 127)? as u8,
        ..IntersectionGeometry::default()
    };
    let pos_ext = r.get_bit()?;
    let has_elevation = r.get_bit()?;
    let pos_regional = r.get_bit()?;
    geo.ref_point.latitude = r.get_constrained(-900_000_000, 900_000_001)? as i32;
    geo.ref_point.longitude = r.get_constrained(-1_799_999_999, 1_800_000_001)? as i32;
    if has_elevation {
        geo.ref_point.elevation = Some(r.get_constrained(-4096, 61439)? as i32);
    }
    if pos_regional {
        skip_regional(r, 1, 4)?;
    }
    if pos_ext {
        r.skip_extension_additions()?;
    }
    if has_lane_width {
        geo.lane_width = Some(r.get_constrained(0, 32767)? as u16);
    }
    if has_speed_limits {
        let n = r.get_length(1, 9)?;
        for i in 0..n {
            let kind = decode_ext_enum(r, 4)?;
            let speed = r.get_constrained(0, 8191)? as u16;
            // only the first vehicleMaxSpeed entry is retained
            if i == 0 && kind == 5 {
                geo.speed_limit = Some(speed);
            }
        }
    }
    let lanes = r.get_length(1, 255)?;
    for _ in 0..lanes {
        geo.lanes.push(decode_lane(r)?);
    }
    if has_preempt {
        return Err(CodecError::DecodeUnexpectedValue {
            field: "map.preemptPriorityData",
        });
    }
    if has_regional {
        skip_regional(r, 1, 4)?;
    }
    if geo_ext {
        r.skip_extension_additions()?;
    }
    Ok(geo)
}

impl MapData {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if self.geometries.is_empty() || self.geometries.len() > 32 {
            return Err(CodecError::EncodeInvariantViolation {
                field: "map.intersections",
            });
        }
        let mut w = BitWriter::new(buf);
        w.put_bit(false)?; // MapData extension
        // timeStamp, layerType, layerID, intersections, roadSegments,
        // dataParameters, restrictionList, regional
        w.put_bits(0b0101_0000, 8)?;
        w.put_constrained(i64::from(self.map_version), 0, 127, "map.msgIssueRevision")?;
        encode_ext_enum(&mut w, 3, 3)?; // LayerType intersectionData
        w.put_length(self.geometries.len(), 1, 32, "map.intersections")?;
        for geo in &self.geometries {
            encode_geometry(&mut w, geo)?;
        }
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<MapData, CodecError> {
        let mut r = BitReader::new(buf);
        let map_ext = r.get_bit()?;
        let has_time_stamp = r.get_bit()?;
        let has_layer_type = r.get_bit()?;
        let has_layer_id = r.get_bit()?;
        let has_intersections = r.get_bit()?;
        let has_road_segments = r.get_bit()?;
        let has_data_parameters = r.get_bit()?;
        let has_restrictions = r.get_bit()?;
        let has_regional = r.get_bit()?;
        if has_time_stamp {
            r.skip_bits(20)?;
        }
        let mut map = MapData {
            map_version: r.get_constrained(0, 127)? as u8,
            ..MapData::default()
        };
        if has_layer_type {
            decode_ext_enum(&mut r, 3)?;
        }
        if has_layer_id {
            r.skip_bits(7)?; // LayerID (0..100)
        }
        if has_intersections {
            let n = r.get_length(1, 32)?;
            for _ in 0..n {
                map.geometries.push(decode_geometry(&mut r)?);
            }
        }
        if has_road_segments || has_data_parameters || has_restrictions {
            return Err(CodecError::DecodeUnexpectedValue {
                field: "map.roadContent",
            });
        }
        if has_regional {
            skip_regional(&mut r, 1, 4)?;
        }
        if map_ext {
            r.skip_extension_additions()?;
        }
        reader_done(&r, buf.len())?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_lane(lane_id: u8, ingress: u8, signal_group: u8) -> GenericLane {
        GenericLane {
            lane_id,
            ingress_approach: Some(ingress),
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
                signal_group: Some(signal_group),
            }],
            nodes: vec![
                NodeXY {
                    dx: 300,
                    dy: -1500,
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
        }
    }

    fn test_map() -> MapData {
        MapData {
            map_version: 2,
            geometries: vec![IntersectionGeometry {
                id: 1000,
                revision: 2,
                ref_point: Position3D {
                    latitude: 377_900_000,
                    longitude: -1_221_500_000,
                    elevation: Some(1200),
                },
                lane_width: Some(366),
                speed_limit: Some(559), // 25 mph
                lanes: vec![
                    straight_lane(1, 1, 2),
                    straight_lane(2, 1, 2),
                    straight_lane(11, 3, 6),
                    straight_lane(12, 3, 6),
                ],
            }],
        }
    }

    #[test]
    fn roundtrip_preserves_geometry() {
        let map = test_map();
        let mut buf = [0u8; 1024];
        let n = map.encode(&mut buf).unwrap();
        let decoded = MapData::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn node_offset_variant_tracks_magnitude() {
        assert_eq!(select_node_offset_variant(300, 300), 0);
        assert_eq!(select_node_offset_variant(0, -700), 1);
        assert_eq!(select_node_offset_variant(1500, 0), 2);
        assert_eq!(select_node_offset_variant(0, 4000), 3);
        assert_eq!(select_node_offset_variant(8000, 0), 4);
        assert_eq!(select_node_offset_variant(20_000, 20_000), 5);
    }

    #[test]
    fn wide_offsets_roundtrip_through_xy6() {
        let mut map = test_map();
        map.geometries[0].lanes[0].nodes[1] = NodeXY {
            dx: -15_000,
            dy: 20_000,
            d_width: None,
        };
        let mut buf = [0u8; 1024];
        let n = map.encode(&mut buf).unwrap();
        assert_eq!(MapData::decode(&buf[..n]).unwrap(), map);
    }

    #[test]
    fn first_node_width_adjustment_roundtrips() {
        let mut map = test_map();
        map.geometries[0].lanes[1].nodes[0].d_width = Some(-66);
        let mut buf = [0u8; 1024];
        let n = map.encode(&mut buf).unwrap();
        assert_eq!(MapData::decode(&buf[..n]).unwrap(), map);
    }

    #[test]
    fn crosswalk_attributes_roundtrip() {
        let mut map = test_map();
        map.geometries[0].lanes[3] = GenericLane {
            lane_id: 21,
            ingress_approach: Some(9),
            attributes: LaneAttributes {
                directional_use: 0b11,
                shared_with: 0,
                lane_type: LaneTypeAttributes::Crosswalk(0b0000_0000_0010_0000),
            },
            maneuvers: None,
            connects_to: Vec::new(),
            nodes: vec![
                NodeXY {
                    dx: -900,
                    dy: 220,
                    d_width: None,
                },
                NodeXY {
                    dx: 1800,
                    dy: 0,
                    d_width: None,
                },
            ],
            ..GenericLane::default()
        };
        let mut buf = [0u8; 1024];
        let n = map.encode(&mut buf).unwrap();
        assert_eq!(MapData::decode(&buf[..n]).unwrap(), map);
    }

    #[test]
    fn lane_with_one_node_is_rejected() {
        let mut map = test_map();
        map.geometries[0].lanes[0].nodes.truncate(1);
        let mut buf = [0u8; 1024];
        assert_eq!(
            map.encode(&mut buf),
            Err(CodecError::EncodeInvariantViolation {
                field: "map.lane.nodes"
            })
        );
    }
}
