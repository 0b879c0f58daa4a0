//! Lane-level locating properties over a loaded nmap: lateral jitter within
//! half a lane width stays on the lane, and box containment reports the box.

use mmitss::geo::{enu_to_lla, Point2D};
use mmitss::map::{ConnectedVehicle, MapDb, MapLocType, MotionState};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NMAP: &str = "\
MAP_Name prop_intx
RSU_ID rsu_9
MAP_Version 1
IntersectionID 2000
Intersection_attributes 00000111
Reference_point 37.790000000 -122.150000000 1200.00
No_Approach 2
Approach 1
Approach_type 1
Speed_limit 25
No_lane 2
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
2000.2.1 5
end_lane
Lane 1.2 2
Lane_ID 2
Lane_type 1
Lane_attributes 00000000000100000000
Lane_width 366
No_nodes 3
1.2.1 37.789800000 -122.149958600
1.2.2 37.788900000 -122.149958600
1.2.3 37.788000000 -122.149958600
No_Conn_lane 1
2000.2.1 5
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

fn load_map() -> MapDb {
    let dir = std::env::temp_dir().join("mmitss_map_location_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("prop.nmap");
    std::fs::write(&path, NMAP).unwrap();
    MapDb::load(&path).unwrap()
}

fn vehicle_at(map: &MapDb, pt: Point2D, heading: f64, speed: f64) -> ConnectedVehicle {
    ConnectedVehicle {
        id: 1,
        geo_point: enu_to_lla(&map.intersections()[0].enu, pt),
        motion: MotionState { speed, heading },
        ..ConnectedVehicle::default()
    }
}

#[test]
fn jittered_points_stay_on_their_lane() {
    let map = load_map();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let lanes = map.intersections()[0].approaches[0].lanes.clone();
    for (lane_idx, lane) in lanes.iter().enumerate() {
        let half_width = f64::from(lane.width) / 2.0;
        for node in &lane.nodes[1..lane.nodes.len() - 1] {
            for _ in 0..8 {
                // northbound travel: the lane normal is east-west
                let offset = rng.gen_range(-0.49..0.49) * 2.0 * half_width;
                let pt = Point2D {
                    x: node.pt.x + offset as i32,
                    y: node.pt.y + rng.gen_range(-200..200),
                };
                let cv = vehicle_at(&map, pt, 0.0, 12.0);
                let tracking = map
                    .locate_vehicle_in_map(&cv)
                    .expect("jittered point must locate");
                assert_eq!(tracking.status, MapLocType::OnInbound);
                assert_eq!(tracking.lane, lane_idx, "offset {offset:.0} cm");
            }
        }
    }
}

#[test]
fn lateral_distance_matches_the_injected_offset() {
    let map = load_map();
    let lane = &map.intersections()[0].approaches[0].lanes[0];
    let node = lane.nodes[1];
    let pt = Point2D {
        x: node.pt.x + 100,
        y: node.pt.y,
    };
    let cv = vehicle_at(&map, pt, 0.0, 12.0);
    let tracking = map.locate_vehicle_in_map(&cv).unwrap();
    let aware = map.update_location_aware(&tracking);
    // 100 cm east of a northbound lane center is one meter right of travel
    assert!((aware.dist_lat - 1.0).abs() < 0.1, "dist_lat {}", aware.dist_lat);
    assert!(aware.dist_long > 0.0);
    assert_eq!(aware.control_phase, 2);
}

#[test]
fn approach_preference_follows_location_class() {
    let map = load_map();
    // a point on the outbound lane, northbound: onOutbound, not inbound
    let lane = &map.intersections()[0].approaches[1].lanes[0];
    let pt = Point2D {
        x: lane.nodes[1].pt.x,
        y: lane.nodes[1].pt.y - 500,
    };
    let cv = vehicle_at(&map, pt, 0.0, 12.0);
    let tracking = map.locate_vehicle_in_map(&cv).unwrap();
    assert_eq!(tracking.status, MapLocType::OnOutbound);
    let aware = map.update_location_aware(&tracking);
    assert_eq!(aware.lane_id, 101);
    assert_eq!(aware.control_phase, 0);
}
