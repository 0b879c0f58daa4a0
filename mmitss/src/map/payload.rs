//! Builds the MapData record broadcast for an intersection: one
//! IntersectionGeometry per distinct posted speed, lanes grouped under it.

use crate::j2735::{
    AllowedManeuvers, Connection, GenericLane, IntersectionGeometry, LaneAttributes,
    LaneTypeAttributes, MapData, NodeXY, Position3D, UNKNOWN_SPEED_LIMIT,
};
use crate::map::{ApproachType, IntersectionAttributes, IntersectionMap, Maneuver};

/// miles per hour in meters per second
const MPH_TO_MPS: f64 = 0.44704;

fn speed_mph_to_units(speed_limit_mph: u8) -> u16 {
    match speed_limit_mph {
        0xFF => UNKNOWN_SPEED_LIMIT,
        0 => 0,
        mph => (f64::from(mph) * MPH_TO_MPS / 0.02).round() as u16,
    }
}

/// Moves nmap attribute bits (bit 0 first) into an MSB-first wire field.
fn msb_field(value: u32, width: u32) -> u32 {
    value.reverse_bits() >> (32 - width)
}

fn connection_maneuver(maneuver: Maneuver) -> Option<AllowedManeuvers> {
    match maneuver {
        Maneuver::Unknown => None,
        Maneuver::UTurn => Some(AllowedManeuvers::U_TURN),
        Maneuver::LeftTurn => Some(AllowedManeuvers::LEFT_TURN),
        Maneuver::RightTurn => Some(AllowedManeuvers::RIGHT_TURN),
        Maneuver::StraightAhead | Maneuver::Straight => Some(AllowedManeuvers::STRAIGHT),
    }
}

pub(crate) fn build_map_data(intersection: &IntersectionMap) -> MapData {
    let mut map = MapData {
        map_version: intersection.map_version,
        geometries: Vec::with_capacity(intersection.speeds.len()),
    };
    let has_elevation = intersection
        .attributes
        .contains(IntersectionAttributes::ELEVATION);
    for &speed_mph in &intersection.speeds {
        let group: Vec<usize> = intersection
            .approaches
            .iter()
            .enumerate()
            .filter(|(_, a)| a.speed_limit == speed_mph && !a.lanes.is_empty())
            .map(|(i, _)| i)
            .collect();
        let Some(&first_approach) = group.first() else {
            continue;
        };
        let ref_width = intersection.approaches[first_approach].lanes[0].width;
        let speed_units = speed_mph_to_units(speed_mph);
        let mut geometry = IntersectionGeometry {
            id: intersection.id,
            revision: map.geometries.len() as u8,
            ref_point: Position3D {
                latitude: intersection.geo_ref.latitude,
                longitude: intersection.geo_ref.longitude,
                elevation: has_elevation
                    .then(|| (f64::from(intersection.geo_ref.elevation) / 10.0).round() as i32),
            },
            lane_width: Some(ref_width),
            speed_limit: (speed_units != UNKNOWN_SPEED_LIMIT).then_some(speed_units),
            lanes: Vec::new(),
        };
        for &approach_idx in &group {
            let approach = &intersection.approaches[approach_idx];
            for lane in &approach.lanes {
                let directional_use = match approach.approach_type {
                    ApproachType::Inbound => 0b10,
                    ApproachType::Outbound => 0b01,
                    ApproachType::Crosswalk => 0b11,
                };
                let lane_type = if approach.approach_type == ApproachType::Crosswalk {
                    LaneTypeAttributes::Crosswalk(
                        msb_field(lane.attributes.bits() & 0xFFFF, 16) as u16
                    )
                } else {
                    LaneTypeAttributes::Vehicle(msb_field(lane.attributes.bits() & 0xFF, 8) as u8)
                };
                let maneuvers = (approach.approach_type != ApproachType::Crosswalk).then(|| {
                    AllowedManeuvers::from_bits_truncate(
                        msb_field((lane.attributes.bits() >> 8) & 0xFFF, 12) as u16,
                    )
                });
                let connects_to = lane
                    .connect_to
                    .iter()
                    .map(|conn| Connection {
                        lane: conn.lane_id,
                        maneuver: connection_maneuver(conn.maneuver),
                        remote_intersection: (conn.intersection_id != intersection.id)
                            .then_some(conn.intersection_id),
                        signal_group: (lane.control_phase != 0).then_some(lane.control_phase),
                    })
                    .collect();
                let mut nodes = Vec::with_capacity(lane.nodes.len());
                let mut prev = crate::geo::Point2D { x: 0, y: 0 };
                for (i, node) in lane.nodes.iter().enumerate() {
                    nodes.push(NodeXY {
                        dx: node.pt.x - prev.x,
                        dy: node.pt.y - prev.y,
                        d_width: (i == 0 && lane.width != ref_width)
                            .then(|| lane.width as i16 - ref_width as i16),
                    });
                    prev = node.pt;
                }
                let (ingress_approach, egress_approach) = match approach.approach_type {
                    ApproachType::Outbound => (None, Some(approach.id)),
                    _ => (Some(approach.id), None),
                };
                geometry.lanes.push(GenericLane {
                    lane_id: lane.id,
                    ingress_approach,
                    egress_approach,
                    attributes: LaneAttributes {
                        directional_use,
                        shared_with: 0,
                        lane_type,
                    },
                    maneuvers,
                    connects_to,
                    nodes,
                });
            }
        }
        map.geometries.push(geometry);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::locate::{build_polygons, set_local_offsets_and_headings};
    use crate::map::nmap::parse_nmap;
    use crate::map::nmap::tests::SIMPLE_NMAP;

    #[test]
    fn speed_conversion_is_round_tripped_at_25mph() {
        // 25 mph = 11.176 m/s = 559 units of 0.02 m/s
        assert_eq!(speed_mph_to_units(25), 559);
        assert_eq!(speed_mph_to_units(0xFF), UNKNOWN_SPEED_LIMIT);
    }

    #[test]
    fn groups_lanes_by_speed_and_offsets_chain() {
        let mut db = parse_nmap(SIMPLE_NMAP).unwrap();
        set_local_offsets_and_headings(db.intersections_mut()).unwrap();
        build_polygons(db.intersections_mut());
        let intersection = &db.intersections()[0];
        let map = build_map_data(intersection);
        assert_eq!(map.map_version, 2);
        // single posted speed, single geometry carrying both approaches
        assert_eq!(map.geometries.len(), 1);
        let geometry = &map.geometries[0];
        assert_eq!(geometry.id, 1000);
        assert_eq!(geometry.lanes.len(), 2);
        assert_eq!(geometry.speed_limit, Some(559));
        // node offsets accumulate back to the cached ENU points
        let lane = &geometry.lanes[0];
        let mut acc = crate::geo::Point2D { x: 0, y: 0 };
        for (node_xy, node) in lane.nodes.iter().zip(&intersection.approaches[0].lanes[0].nodes) {
            acc.x += node_xy.dx;
            acc.y += node_xy.dy;
            assert_eq!(acc, node.pt);
        }
        // encode the whole record and decode it back
        let mut buf = vec![0u8; 2048];
        let used = map.encode(&mut buf).unwrap();
        let decoded = MapData::decode(&buf[..used]).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn maneuver_bits_land_on_wire_positions() {
        // nmap attribute bit 8 (straight allowed) becomes the first
        // AllowedManeuvers wire bit
        assert_eq!(msb_field(0b1 << 8 >> 8, 12) as u16, 1 << 11);
        assert_eq!(
            connection_maneuver(Maneuver::LeftTurn),
            Some(AllowedManeuvers::LEFT_TURN)
        );
    }
}
