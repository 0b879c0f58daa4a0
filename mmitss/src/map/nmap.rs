//! Reader for the line-oriented intersection nmap file.

use crate::error::MapError;
use crate::geo::{GeoPoint, GeoRefPoint};
use crate::map::{
    Approach, ApproachType, ConnectTo, IntersectionAttributes, IntersectionMap, Lane,
    LaneAttributeSet, LaneType, Maneuver, MapDb, Node,
};

struct PendingConnection {
    intersection: usize,
    approach: usize,
    lane: usize,
    slot: usize,
    target_intersection_id: u16,
    /// 1-based within the target intersection
    target_approach_seq: usize,
    target_lane_seq: usize,
}

fn syntax(line: usize, what: impl Into<String>) -> MapError {
    MapError::Syntax {
        line,
        what: what.into(),
    }
}

fn parse_num<T: std::str::FromStr>(tok: Option<&str>, line: usize, what: &str) -> Result<T, MapError> {
    tok.ok_or_else(|| syntax(line, format!("missing {what}")))?
        .parse::<T>()
        .map_err(|_| syntax(line, format!("bad {what}")))
}

fn parse_bits(tok: Option<&str>, line: usize, what: &str) -> Result<u32, MapError> {
    let s = tok.ok_or_else(|| syntax(line, format!("missing {what}")))?;
    u32::from_str_radix(s, 2).map_err(|_| syntax(line, format!("bad {what}")))
}

pub(crate) fn parse_nmap(text: &str) -> Result<MapDb, MapError> {
    let mut intersections: Vec<IntersectionMap> = Vec::new();
    let mut pending: Vec<PendingConnection> = Vec::new();

    let mut lines = text.lines().enumerate();
    let mut current: Option<IntersectionMap> = None;

    while let Some((lineno, raw)) = lines.next() {
        let lineno = lineno + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with("----") {
            continue;
        }
        let mut toks = line.split_whitespace();
        let key = toks.next().unwrap_or_default();
        match key {
            "MAP_Name" => {
                let mut intersection = IntersectionMap::default();
                intersection.name = toks.next().unwrap_or_default().to_string();
                current = Some(intersection);
            },
            "RSU_ID" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "RSU_ID before MAP_Name"))?;
                intersection.rsu_id = toks.next().unwrap_or_default().to_string();
            },
            "MAP_Version" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray MAP_Version"))?;
                intersection.map_version = parse_num::<u32>(toks.next(), lineno, "MAP_Version")? as u8;
            },
            "IntersectionID" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray IntersectionID"))?;
                intersection.id = parse_num(toks.next(), lineno, "IntersectionID")?;
            },
            "Intersection_attributes" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray attributes"))?;
                intersection.attributes = IntersectionAttributes::from_bits_truncate(parse_bits(
                    toks.next(),
                    lineno,
                    "Intersection_attributes",
                )?
                    as u8);
            },
            "Reference_point" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray Reference_point"))?;
                let latitude: f64 = parse_num(toks.next(), lineno, "reference latitude")?;
                let longitude: f64 = parse_num(toks.next(), lineno, "reference longitude")?;
                let elevation = if intersection.attributes.contains(IntersectionAttributes::ELEVATION) {
                    // file carries decimeters
                    parse_num::<f64>(toks.next(), lineno, "reference elevation")? / 10.0
                } else {
                    0.0
                };
                let geo = GeoPoint {
                    latitude,
                    longitude,
                    elevation,
                };
                intersection.geo_ref = GeoRefPoint::from(geo);
                intersection.enu = crate::geo::EnuCoord::new(geo);
            },
            "No_Approach" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray No_Approach"))?;
                let count: usize = parse_num(toks.next(), lineno, "No_Approach")?;
                if count == 0 {
                    return Err(syntax(lineno, "No_Approach must be positive"));
                }
                intersection.approaches.reserve(count);
            },
            "Approach_type" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray Approach_type"))?;
                let approach = intersection
                    .approaches
                    .last_mut()
                    .ok_or_else(|| syntax(lineno, "Approach_type before Approach"))?;
                approach.approach_type = match parse_num::<u8>(toks.next(), lineno, "Approach_type")? {
                    1 => ApproachType::Inbound,
                    2 => ApproachType::Outbound,
                    3 => ApproachType::Crosswalk,
                    other => return Err(syntax(lineno, format!("invalid Approach_type {other}"))),
                };
                if !intersection.attributes.contains(IntersectionAttributes::SPEED_LIMIT) {
                    approach.speed_limit = if approach.approach_type == ApproachType::Crosswalk {
                        0
                    } else {
                        0xFF
                    };
                }
            },
            "Speed_limit" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray Speed_limit"))?;
                let approach = intersection
                    .approaches
                    .last_mut()
                    .ok_or_else(|| syntax(lineno, "Speed_limit before Approach"))?;
                approach.speed_limit = parse_num(toks.next(), lineno, "Speed_limit")?;
            },
            "Approach" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray Approach"))?;
                let mut approach = Approach::default();
                approach.id = parse_num(toks.next(), lineno, "Approach id")?;
                intersection.approaches.push(approach);
            },
            "No_lane" => {
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray No_lane"))?;
                let count: usize = parse_num(toks.next(), lineno, "No_lane")?;
                let speed_limit = intersection
                    .approaches
                    .last()
                    .ok_or_else(|| syntax(lineno, "No_lane before Approach"))?
                    .speed_limit;
                if count > 0 && !intersection.speeds.contains(&speed_limit) {
                    intersection.speeds.push(speed_limit);
                }
                intersection
                    .approaches
                    .last_mut()
                    .expect("checked above")
                    .lanes
                    .reserve(count);
            },
            "Lane_ID" => {
                let lane = current_lane(&mut current, lineno)?;
                lane.id = parse_num(toks.next(), lineno, "Lane_ID")?;
            },
            "Lane_type" => {
                let lane = current_lane(&mut current, lineno)?;
                lane.lane_type = match parse_num::<u8>(toks.next(), lineno, "Lane_type")? {
                    1 => LaneType::Vehicle,
                    2 | 4 => LaneType::Crosswalk,
                    other => return Err(syntax(lineno, format!("invalid Lane_type {other}"))),
                };
            },
            "Lane_attributes" => {
                let lane = current_lane(&mut current, lineno)?;
                lane.attributes =
                    LaneAttributeSet::from_bits_truncate(parse_bits(toks.next(), lineno, "Lane_attributes")?);
            },
            "Lane_width" => {
                let lane = current_lane(&mut current, lineno)?;
                lane.width = parse_num(toks.next(), lineno, "Lane_width")?;
            },
            "Lane" => {
                // "Lane <approach>.<seq> <controlPhase>" opens a lane block
                let intersection = current.as_mut().ok_or_else(|| syntax(lineno, "stray Lane"))?;
                let _seq = toks.next();
                let phase: u8 = parse_num(toks.next(), lineno, "control phase")?;
                if phase > 8 {
                    return Err(syntax(lineno, format!("invalid control phase {phase}")));
                }
                let approach = intersection
                    .approaches
                    .last_mut()
                    .ok_or_else(|| syntax(lineno, "Lane before Approach"))?;
                approach.lanes.push(Lane {
                    control_phase: phase,
                    ..Lane::default()
                });
            },
            "No_nodes" => {
                let count: usize = parse_num(toks.next(), lineno, "No_nodes")?;
                if !(2..=63).contains(&count) {
                    return Err(syntax(lineno, format!("invalid No_nodes {count}")));
                }
                let ref_elevation = current
                    .as_ref()
                    .map(|i| i.geo_ref.elevation)
                    .unwrap_or_default();
                let lane = current_lane(&mut current, lineno)?;
                for _ in 0..count {
                    let (node_lineno, node_line) = lines
                        .next()
                        .ok_or_else(|| syntax(lineno, "unexpected end of node list"))?;
                    let node_lineno = node_lineno + 1;
                    let mut node_toks = node_line.split_whitespace();
                    let _seq = node_toks.next();
                    let latitude: f64 = parse_num(node_toks.next(), node_lineno, "node latitude")?;
                    let longitude: f64 = parse_num(node_toks.next(), node_lineno, "node longitude")?;
                    // node elevation rides on the intersection reference
                    let geo = GeoRefPoint::from(GeoPoint {
                        latitude,
                        longitude,
                        elevation: 0.0,
                    });
                    lane.nodes.push(Node {
                        geo: GeoRefPoint {
                            elevation: ref_elevation,
                            ..geo
                        },
                        ..Node::default()
                    });
                }
            },
            "No_Conn_lane" => {
                let count: usize = parse_num(toks.next(), lineno, "No_Conn_lane")?;
                let intersection_idx = intersections.len();
                let (approach_idx, lane_idx, slot_base) = {
                    let intersection = current.as_ref().ok_or_else(|| syntax(lineno, "stray No_Conn_lane"))?;
                    let approach_idx = intersection.approaches.len() - 1;
                    let lane_idx = intersection.approaches[approach_idx].lanes.len() - 1;
                    (approach_idx, lane_idx, 0usize)
                };
                for i in 0..count {
                    let (conn_lineno, conn_line) = lines
                        .next()
                        .ok_or_else(|| syntax(lineno, "unexpected end of connection list"))?;
                    let conn_lineno = conn_lineno + 1;
                    let mut conn_toks = conn_line.split_whitespace();
                    let target = conn_toks
                        .next()
                        .ok_or_else(|| syntax(conn_lineno, "missing connection target"))?;
                    let mut parts = target.split('.');
                    let target_intersection_id: u16 =
                        parse_num(parts.next(), conn_lineno, "connection intersection")?;
                    let target_approach_seq: usize =
                        parse_num(parts.next(), conn_lineno, "connection approach")?;
                    let target_lane_seq: usize = parse_num(parts.next(), conn_lineno, "connection lane")?;
                    let raw_maneuver: u8 = parse_num(conn_toks.next(), conn_lineno, "connection maneuver")?;
                    let maneuver = Maneuver::from_u8(raw_maneuver)
                        .ok_or_else(|| syntax(conn_lineno, format!("invalid maneuver {raw_maneuver}")))?;
                    let lane = current_lane(&mut current, conn_lineno)?;
                    lane.connect_to.push(ConnectTo {
                        intersection_id: target_intersection_id,
                        lane_id: 0, // resolved after the whole file is read
                        maneuver,
                    });
                    pending.push(PendingConnection {
                        intersection: intersection_idx,
                        approach: approach_idx,
                        lane: lane_idx,
                        slot: slot_base + i,
                        target_intersection_id,
                        target_approach_seq,
                        target_lane_seq,
                    });
                }
            },
            "end_lane" | "end_approach" => {},
            "end_map" => {
                let intersection = current
                    .take()
                    .ok_or_else(|| syntax(lineno, "end_map without MAP_Name"))?;
                if intersection.speeds.is_empty() {
                    return Err(syntax(
                        lineno,
                        format!("missing speed limit for intersection {}", intersection.name),
                    ));
                }
                intersections.push(intersection);
            },
            _ => return Err(syntax(lineno, format!("unrecognized keyword {key}"))),
        }
    }
    if current.is_some() {
        return Err(MapError::Syntax {
            line: 0,
            what: "truncated nmap: missing end_map".into(),
        });
    }

    // resolve connection targets from (approachSeq, laneSeq) to lane ids
    for conn in &pending {
        let target = intersections
            .iter()
            .find(|i| i.id == conn.target_intersection_id)
            .ok_or(MapError::UnknownId {
                intersection: conn.target_intersection_id,
                lane: 0,
            })?;
        let lane_id = target
            .approaches
            .get(conn.target_approach_seq - 1)
            .and_then(|a| a.lanes.get(conn.target_lane_seq - 1))
            .map(|l| l.id)
            .ok_or(MapError::UnknownId {
                intersection: conn.target_intersection_id,
                lane: conn.target_lane_seq as u8,
            })?;
        intersections[conn.intersection].approaches[conn.approach].lanes[conn.lane].connect_to
            [conn.slot]
            .lane_id = lane_id;
    }

    let mut db = MapDb {
        intersections,
        index: Default::default(),
    };
    db.rebuild_index()?;
    Ok(db)
}

fn current_lane<'a>(
    current: &'a mut Option<IntersectionMap>,
    lineno: usize,
) -> Result<&'a mut Lane, MapError> {
    current
        .as_mut()
        .and_then(|i| i.approaches.last_mut())
        .and_then(|a| a.lanes.last_mut())
        .ok_or_else(|| syntax(lineno, "lane attribute outside a lane block"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SIMPLE_NMAP: &str = "\
MAP_Name test_intx
RSU_ID rsu_1
MAP_Version 2
IntersectionID 1000
Intersection_attributes 00000111
Reference_point 37.790000000 -122.150000000 1200.00
No_Approach 2
Approach 1
Approach_type 1
Speed_limit 25
No_lane 1
Lane 1.1 2
Lane_ID 1
Lane_type 1
Lane_attributes 00000000000100000000
Lane_width 366
No_nodes 3
1.1.1 37.789800000 -122.150000000
1.1.2 37.788900000 -122.150000000
1.1.3 37.788000000 -122.150000000
No_Conn_lane 1
1000.2.1 5
end_lane
end_approach
Approach 2
Approach_type 2
Speed_limit 25
No_lane 1
Lane 2.1 0
Lane_ID 101
Lane_type 1
Lane_attributes 00000000000000000000
Lane_width 366
No_nodes 2
2.1.1 37.790200000 -122.150000000
2.1.2 37.791100000 -122.150000000
No_Conn_lane 0
end_lane
end_approach
end_map
";

    #[test]
    fn parses_two_approach_map() {
        let db = parse_nmap(SIMPLE_NMAP).unwrap();
        let intersection = &db.intersections()[0];
        assert_eq!(intersection.id, 1000);
        assert_eq!(intersection.map_version, 2);
        assert_eq!(intersection.approaches.len(), 2);
        assert_eq!(intersection.speeds, vec![25]);
        let inbound = &intersection.approaches[0];
        assert_eq!(inbound.approach_type, ApproachType::Inbound);
        assert_eq!(inbound.lanes[0].control_phase, 2);
        assert_eq!(inbound.lanes[0].nodes.len(), 3);
        // connection resolved from 1000.2.1 to lane id 101
        assert_eq!(
            inbound.lanes[0].connect_to[0],
            ConnectTo {
                intersection_id: 1000,
                lane_id: 101,
                maneuver: Maneuver::Straight,
            }
        );
        assert_eq!(db.indexes_by_ids(1000, 101), Some((0, 1, 0)));
    }

    #[test]
    fn rejects_bad_control_phase() {
        let broken = SIMPLE_NMAP.replace("Lane 1.1 2", "Lane 1.1 9");
        assert!(matches!(
            parse_nmap(&broken),
            Err(MapError::Syntax { .. })
        ));
    }

    #[test]
    fn rejects_unknown_connection_target() {
        let broken = SIMPLE_NMAP.replace("1000.2.1 5", "2000.2.1 5");
        assert!(matches!(
            parse_nmap(&broken),
            Err(MapError::UnknownId {
                intersection: 2000,
                ..
            })
        ));
    }
}
