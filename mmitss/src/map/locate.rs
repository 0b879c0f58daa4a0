//! Lane-level map matching: ENU offsets and headings at load time, approach
//! and intersection polygons, and the per-BSM location state machine.

use crate::error::MapError;
use crate::geo::{
    self, convex_hull, convex_or_concave, point_inside_polygon, project_point_to_line, GeoPoint,
    Point2D, PolygonType,
};
use crate::map::{
    ApproachType, ConnectedVehicle, IntersectionMap, LaneLocType, LaneProjection, MapDb,
    MapLocType, MotionState, VehicleTracking, HEADING_ERROR_BOUND_LOW_SPEED,
    HEADING_ERROR_BOUND_NORMAL, LANE_WIDTH_RATIO, LOW_SPEED_THRESHOLD,
};

/// Fills node ENU offsets, cumulative distances, node headings, the
/// stop-bar-to-center distances and the intersection radius.
pub(crate) fn set_local_offsets_and_headings(
    intersections: &mut [IntersectionMap],
) -> Result<(), MapError> {
    let origin = Point2D { x: 0, y: 0 };
    for intersection in intersections.iter_mut() {
        let mut radius: u32 = 0;
        let enu = intersection.enu;
        for approach in &mut intersection.approaches {
            for lane in &mut approach.lanes {
                if lane.nodes.len() < 2 {
                    return Err(MapError::Geometry(format!(
                        "lane {} has fewer than two nodes",
                        lane.id
                    )));
                }
                let mut dist: u32 = 0;
                for i in 0..lane.nodes.len() {
                    lane.nodes[i].pt = geo::lla_to_enu(&enu, GeoPoint::from(lane.nodes[i].geo));
                    if i > 0 {
                        dist += lane.nodes[i].pt.distance_to(&lane.nodes[i - 1].pt);
                    }
                    lane.nodes[i].dist_to_first = dist;
                    radius = radius.max(lane.nodes[i].pt.length());
                }
                // First-node distance becomes the gap between the stop-bar
                // (or crosswalk entrance) and the intersection central line,
                // from projecting the reference point onto the closest
                // segment. Crossing detection leans on this, it does not
                // change distance-to-stop-bar math.
                match approach.approach_type {
                    ApproachType::Inbound => {
                        let proj =
                            project_point_to_line(lane.nodes[1].pt, lane.nodes[0].pt, origin);
                        lane.nodes[0].dist_to_first =
                            ((proj.t - 1.0) * proj.length).abs() as u32;
                    },
                    ApproachType::Outbound => {
                        let proj =
                            project_point_to_line(lane.nodes[0].pt, lane.nodes[1].pt, origin);
                        lane.nodes[0].dist_to_first = (proj.t * proj.length).abs() as u32;
                    },
                    ApproachType::Crosswalk => {},
                }
            }
            approach.min_dist_to_central_line = approach
                .lanes
                .iter()
                .map(|l| l.nodes[0].dist_to_first)
                .min()
                .unwrap_or(2000);
        }
        intersection.radius = radius;

        for approach in &mut intersection.approaches {
            if approach.approach_type == ApproachType::Outbound {
                // outbound sequences walk downstream
                for lane in &mut approach.lanes {
                    for i in 0..lane.nodes.len() - 1 {
                        lane.nodes[i].heading = lane.nodes[i].pt.direction_to(&lane.nodes[i + 1].pt);
                    }
                    let last = lane.nodes.len() - 1;
                    lane.nodes[last].heading = lane.nodes[last - 1].heading;
                }
            } else {
                // inbound and crosswalk sequences walk towards the box
                for lane in &mut approach.lanes {
                    for i in 1..lane.nodes.len() {
                        lane.nodes[i].heading = lane.nodes[i].pt.direction_to(&lane.nodes[i - 1].pt);
                    }
                    lane.nodes[0].heading = lane.nodes[1].heading;
                }
            }
        }
    }
    Ok(())
}

/// Builds the convex approach polygons (curb/centerline extrema) and the
/// intersection polygon (four nearest-waypoint pairs around the center).
pub(crate) fn build_polygons(intersections: &mut [IntersectionMap]) {
    for intersection in intersections.iter_mut() {
        build_intersection_polygons(intersection);
    }
}

fn widened_waypoint(node_pt: Point2D, heading_decideg: u16, half_width: f64, flip: bool) -> Point2D {
    let alpha = (f64::from(heading_decideg) / 10.0).to_radians();
    let direction = if flip { -1.0 } else { 1.0 };
    Point2D {
        x: node_pt.x + (direction * half_width * alpha.cos()) as i32,
        y: node_pt.y - (direction * half_width * alpha.sin()) as i32,
    }
}

fn build_intersection_polygons(intersection: &mut IntersectionMap) {
    let origin = Point2D { x: 0, y: 0 };
    let mut nearest_pairs = [(origin, origin); 4];
    for approach in &mut intersection.approaches {
        if approach.approach_type == ApproachType::Crosswalk || approach.lanes.is_empty() {
            continue;
        }
        let quadrant = usize::from((approach.id - 1) / 2).min(3);
        let mut polygon: Vec<Point2D> = Vec::new();
        let mut farthest: Vec<Point2D> = Vec::new();
        let mut near_curb = origin;
        let mut near_center = origin;
        let lane_count = approach.lanes.len();
        for (i, lane) in approach.lanes.iter().enumerate() {
            let half_width = f64::from(lane.width) * LANE_WIDTH_RATIO;
            let first = lane.nodes.first().expect("two nodes checked at load");
            let last = lane.nodes.last().expect("two nodes checked at load");
            // curb and centerline lanes widen outward; a single-lane
            // approach widens to both sides so its footprint has area
            if i == 0 {
                let way = widened_waypoint(first.pt, first.heading, half_width, false);
                polygon.push(way);
                near_curb = way;
                farthest.push(widened_waypoint(last.pt, last.heading, half_width, false));
            }
            if i == lane_count - 1 {
                let way = widened_waypoint(first.pt, first.heading, half_width, true);
                polygon.push(way);
                near_center = way;
                farthest.push(widened_waypoint(last.pt, last.heading, half_width, true));
            }
            if i != 0 && i != lane_count - 1 {
                polygon.push(first.pt);
                farthest.push(last.pt);
            }
        }
        if nearest_pairs[quadrant].0 == origin {
            nearest_pairs[quadrant] = (near_curb, near_center);
        } else {
            nearest_pairs[quadrant].1 = near_curb;
        }
        polygon.extend(farthest.into_iter().rev());
        if convex_or_concave(&polygon) != PolygonType::Convex {
            polygon = convex_hull(&polygon);
        }
        approach.polygon_type = Some(convex_or_concave(&polygon));
        approach.polygon = polygon;
    }
    let mut box_polygon: Vec<Point2D> = Vec::with_capacity(8);
    for pair in nearest_pairs {
        box_polygon.push(pair.0);
        box_polygon.push(pair.1);
    }
    if convex_or_concave(&box_polygon) != PolygonType::Convex {
        box_polygon = convex_hull(&box_polygon);
    }
    intersection.polygon_type = Some(convex_or_concave(&box_polygon));
    intersection.polygon = box_polygon;
}

fn heading_difference(node_heading_decideg: u16, pt_heading_deg: f64) -> f64 {
    let mut d = pt_heading_deg - f64::from(node_heading_decideg) / 10.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d < -180.0 {
        d += 360.0;
    }
    d
}

fn heading_error_bound(speed: f64) -> f64 {
    if speed < LOW_SPEED_THRESHOLD {
        HEADING_ERROR_BOUND_LOW_SPEED
    } else {
        HEADING_ERROR_BOUND_NORMAL
    }
}

#[derive(Debug, Clone, Copy)]
struct LaneTracking {
    status: LaneLocType,
    lane_proj: LaneProjection,
}

impl MapDb {
    /// The vehicle's geodetic point with a missing elevation replaced by the
    /// intersection reference elevation.
    fn effective_geo_point(&self, intersection: usize, geo_point: GeoPoint) -> GeoPoint {
        if geo_point.elevation.is_finite() {
            geo_point
        } else {
            GeoPoint {
                elevation: f64::from(self.intersections()[intersection].geo_ref.elevation) / 100.0,
                ..geo_point
            }
        }
    }

    fn to_enu(&self, intersection: usize, geo_point: GeoPoint) -> Point2D {
        let p = self.effective_geo_point(intersection, geo_point);
        geo::lla_to_enu(&self.intersections()[intersection].enu, p)
    }

    fn is_point_near_intersection(&self, intersection: usize, geo_point: GeoPoint) -> bool {
        let pt = self.to_enu(intersection, geo_point);
        pt.length() <= self.intersections()[intersection].radius
    }

    fn is_inside_intersection_box(&self, intersection: usize, pt: Point2D) -> bool {
        point_inside_polygon(&self.intersections()[intersection].polygon, pt)
    }

    fn is_on_approach(&self, intersection: usize, approach: usize, pt: Point2D) -> bool {
        let polygon = &self.intersections()[intersection].approaches[approach].polygon;
        !polygon.is_empty() && point_inside_polygon(polygon, pt)
    }

    fn neared_intersections(&self, geo_point: GeoPoint) -> Vec<usize> {
        (0..self.intersections().len())
            .filter(|&i| self.is_point_near_intersection(i, geo_point))
            .collect()
    }

    fn on_approaches(&self, intersection: usize, pt: Point2D) -> Vec<usize> {
        (0..self.intersections()[intersection].approaches.len())
            .filter(|&a| self.is_on_approach(intersection, a, pt))
            .collect()
    }

    /// Projects the point onto every heading-compatible segment of one lane
    /// and classifies the result as approaching / inside / leaving.
    fn project_pt_to_lane(
        &self,
        intersection: usize,
        approach: usize,
        lane: usize,
        pt: Point2D,
        motion: &MotionState,
    ) -> LaneTracking {
        let approach_obj = &self.intersections()[intersection].approaches[approach];
        let lane_obj = &approach_obj.lanes[lane];
        let bound = heading_error_bound(motion.speed);
        let mut projections: Vec<LaneProjection> = Vec::new();
        if approach_obj.approach_type == ApproachType::Inbound {
            // node order runs upstream; walk in travel direction
            for i in (1..lane_obj.nodes.len()).rev() {
                if heading_difference(lane_obj.nodes[i].heading, motion.heading).abs() > bound {
                    continue;
                }
                projections.push(LaneProjection {
                    node_index: i as u8,
                    proj: project_point_to_line(
                        lane_obj.nodes[i].pt,
                        lane_obj.nodes[i - 1].pt,
                        pt,
                    ),
                });
            }
        } else {
            for i in 0..lane_obj.nodes.len() - 1 {
                if heading_difference(lane_obj.nodes[i].heading, motion.heading).abs() > bound {
                    continue;
                }
                projections.push(LaneProjection {
                    node_index: i as u8,
                    proj: project_point_to_line(
                        lane_obj.nodes[i].pt,
                        lane_obj.nodes[i + 1].pt,
                        pt,
                    ),
                });
            }
        }
        let outside = LaneTracking {
            status: LaneLocType::Outside,
            lane_proj: LaneProjection::default(),
        };
        let Some(first) = projections.first() else {
            return outside;
        };
        if first.proj.t < 0.0 {
            return LaneTracking {
                status: LaneLocType::Approaching,
                lane_proj: *first,
            };
        }
        let last = projections.last().expect("nonempty");
        if last.proj.t > 1.0 {
            return LaneTracking {
                status: LaneLocType::Leaving,
                lane_proj: *last,
            };
        }
        let geofence = f64::from(lane_obj.width) * LANE_WIDTH_RATIO;
        // best in-segment projection within the geofence
        let inside = projections
            .iter()
            .filter(|p| (0.0..=1.0).contains(&p.proj.t) && p.proj.d.abs() < geofence)
            .min_by(|a, b| a.proj.d.abs().total_cmp(&b.proj.d.abs()));
        if let Some(best) = inside {
            return LaneTracking {
                status: LaneLocType::Inside,
                lane_proj: *best,
            };
        }
        // two-segment special case: just past one segment, just before the next
        let mut candidate: Option<LaneProjection> = None;
        for pair in projections.windows(2) {
            let d1 = pair[0].proj.d.abs();
            let d2 = pair[1].proj.d.abs();
            if pair[0].proj.t > 1.0 && d1 < geofence && pair[1].proj.t < 0.0 && d2 < geofence {
                let better = if d1 < d2 { pair[0] } else { pair[1] };
                if candidate.is_none_or(|c| better.proj.d.abs() < c.proj.d.abs()) {
                    candidate = Some(better);
                }
            }
        }
        if let Some(best) = candidate {
            return LaneTracking {
                status: LaneLocType::Inside,
                lane_proj: best,
            };
        }
        outside
    }

    /// Picks the approach lane with minimum lateral offset, if any.
    fn locate_vehicle_on_approach(
        &self,
        intersection: usize,
        approach: usize,
        pt: Point2D,
        motion: &MotionState,
    ) -> Option<VehicleTracking> {
        const MAX_LATERAL_CM: f64 = 1000.0;
        let approach_obj = &self.intersections()[intersection].approaches[approach];
        let mut best: Option<(usize, LaneTracking)> = None;
        for lane in 0..approach_obj.lanes.len() {
            let tracking = self.project_pt_to_lane(intersection, approach, lane, pt, motion);
            if tracking.status != LaneLocType::Inside
                || tracking.lane_proj.proj.d.abs() >= MAX_LATERAL_CM
            {
                continue;
            }
            if best.is_none_or(|(_, b)| tracking.lane_proj.proj.d.abs() < b.lane_proj.proj.d.abs())
            {
                best = Some((lane, tracking));
            }
        }
        best.map(|(lane, tracking)| VehicleTracking {
            status: if approach_obj.approach_type == ApproachType::Inbound {
                MapLocType::OnInbound
            } else {
                MapLocType::OnOutbound
            },
            intersection,
            approach,
            lane,
            lane_proj: tracking.lane_proj,
        })
    }

    /// From an outbound lane, tries the connecting inbound lane of the
    /// downstream intersection.
    fn egress_connects_to_ingress(
        &self,
        intersection: usize,
        approach: usize,
        lane: usize,
        geo_point: GeoPoint,
        motion: &MotionState,
    ) -> Option<VehicleTracking> {
        let connect = self.intersections()[intersection].approaches[approach].lanes[lane]
            .connect_to
            .first()?;
        let (ci, ca, _) = self.indexes_by_ids(connect.intersection_id, connect.lane_id)?;
        let pt = self.to_enu(ci, geo_point);
        if !self.is_on_approach(ci, ca, pt) {
            return None;
        }
        self.locate_vehicle_on_approach(ci, ca, pt, motion)
    }

    /// Minimum projected upstream distance to any egress lane of an outbound
    /// approach, centimeters.
    fn pt_dist_to_egress(&self, intersection: usize, approach: usize, pt: Point2D) -> f64 {
        let mut dminimum = 2000.0f64;
        for lane in &self.intersections()[intersection].approaches[approach].lanes {
            let proj = project_point_to_line(lane.nodes[0].pt, lane.nodes[1].pt, pt);
            let d = proj.t * proj.length;
            if d <= 0.0 && d.abs() < dminimum {
                dminimum = d.abs();
            }
        }
        dminimum
    }

    fn outbound_candidates(
        &self,
        intersection: usize,
        pt: Point2D,
        motion: &MotionState,
        allowed_approaches: Option<&[usize]>,
    ) -> Option<VehicleTracking> {
        let mut best: Option<VehicleTracking> = None;
        for approach in self.on_approaches(intersection, pt) {
            if self.intersections()[intersection].approaches[approach].approach_type
                != ApproachType::Outbound
            {
                continue;
            }
            if let Some(allowed) = allowed_approaches {
                if !allowed.contains(&approach) {
                    continue;
                }
            }
            if let Some(tracking) =
                self.locate_vehicle_on_approach(intersection, approach, pt, motion)
            {
                if best
                    .is_none_or(|b| tracking.lane_proj.proj.d.abs() < b.lane_proj.proj.d.abs())
                {
                    best = Some(tracking);
                }
            }
        }
        best
    }

    /// Maps a BSM fix onto the intersection field, carrying the prior
    /// tracking state forward. `None` means the vehicle is outside the map.
    pub fn locate_vehicle_in_map(&self, cv: &ConnectedVehicle) -> Option<VehicleTracking> {
        if !cv.is_in_map {
            return self.locate_fresh_vehicle(cv);
        }
        let intersection = cv.tracking.intersection;
        let pt = self.to_enu(intersection, cv.geo_point);
        match cv.tracking.status {
            MapLocType::Outside => self.locate_fresh_vehicle(cv),
            MapLocType::InsideIntersectionBox => self.from_inside_box(cv, intersection, pt),
            MapLocType::OnInbound => self.from_on_inbound(cv, intersection, pt),
            MapLocType::OnOutbound => self.from_on_outbound(cv, intersection, pt),
            MapLocType::AtIntersectionBox => self.from_at_box(cv, intersection, pt),
        }
    }

    fn locate_fresh_vehicle(&self, cv: &ConnectedVehicle) -> Option<VehicleTracking> {
        let mut candidates: Vec<VehicleTracking> = Vec::new();
        for intersection in self.neared_intersections(cv.geo_point) {
            let pt = self.to_enu(intersection, cv.geo_point);
            if self.is_inside_intersection_box(intersection, pt) {
                candidates.push(VehicleTracking {
                    status: MapLocType::InsideIntersectionBox,
                    intersection,
                    ..VehicleTracking::default()
                });
                continue;
            }
            let mut best: Option<VehicleTracking> = None;
            for approach in self.on_approaches(intersection, pt) {
                if let Some(tracking) =
                    self.locate_vehicle_on_approach(intersection, approach, pt, &cv.motion)
                {
                    if best.is_none_or(|b| {
                        tracking.lane_proj.proj.d.abs() < b.lane_proj.proj.d.abs()
                    }) {
                        best = Some(tracking);
                    }
                }
            }
            if let Some(tracking) = best {
                candidates.push(tracking);
            }
        }
        // prefer onInbound, then onOutbound, then insideIntersectionBox
        for wanted in [
            MapLocType::OnInbound,
            MapLocType::OnOutbound,
            MapLocType::InsideIntersectionBox,
        ] {
            if let Some(tracking) = candidates.iter().find(|t| t.status == wanted) {
                return Some(*tracking);
            }
        }
        None
    }

    fn from_inside_box(
        &self,
        cv: &ConnectedVehicle,
        intersection: usize,
        pt: Point2D,
    ) -> Option<VehicleTracking> {
        if self.is_inside_intersection_box(intersection, pt) {
            return Some(cv.tracking);
        }
        let outbound = self.outbound_candidates(intersection, pt, &cv.motion, None)?;
        if let Some(ingress) = self.egress_connects_to_ingress(
            outbound.intersection,
            outbound.approach,
            outbound.lane,
            cv.geo_point,
            &cv.motion,
        ) {
            return Some(ingress);
        }
        Some(outbound)
    }

    fn from_on_inbound(
        &self,
        cv: &ConnectedVehicle,
        intersection: usize,
        pt: Point2D,
    ) -> Option<VehicleTracking> {
        let approach = cv.tracking.approach;
        let lane = cv.tracking.lane;
        if self.is_on_approach(intersection, approach, pt) {
            if let Some(tracking) =
                self.locate_vehicle_on_approach(intersection, approach, pt, &cv.motion)
            {
                return Some(tracking);
            }
        }
        // connecting outbound lanes only
        let lane_obj = &self.intersections()[intersection].approaches[approach].lanes[lane];
        let connect_approaches: Vec<usize> = lane_obj
            .connect_to
            .iter()
            .filter_map(|c| self.indexes_by_ids(c.intersection_id, c.lane_id))
            .map(|(_, a, _)| a)
            .collect();
        if let Some(outbound) =
            self.outbound_candidates(intersection, pt, &cv.motion, Some(&connect_approaches))
        {
            if let Some(ingress) = self.egress_connects_to_ingress(
                outbound.intersection,
                outbound.approach,
                outbound.lane,
                cv.geo_point,
                &cv.motion,
            ) {
                return Some(ingress);
            }
            return Some(outbound);
        }
        // past the stop-bar: inside the box polygon, or within half the
        // polygon gap of it, counts as atIntersectionBox
        let proj = project_point_to_line(lane_obj.nodes[1].pt, lane_obj.nodes[0].pt, pt);
        let dist_into = proj.t * proj.length - f64::from(lane_obj.nodes[1].dist_to_first);
        if self.is_inside_intersection_box(intersection, pt)
            || dist_into.abs() < f64::from(lane_obj.nodes[0].dist_to_first) / 2.0
        {
            return Some(VehicleTracking {
                status: MapLocType::AtIntersectionBox,
                lane_proj: LaneProjection {
                    node_index: 1,
                    proj,
                },
                ..cv.tracking
            });
        }
        None
    }

    fn from_on_outbound(
        &self,
        cv: &ConnectedVehicle,
        intersection: usize,
        pt: Point2D,
    ) -> Option<VehicleTracking> {
        if let Some(ingress) = self.egress_connects_to_ingress(
            intersection,
            cv.tracking.approach,
            cv.tracking.lane,
            cv.geo_point,
            &cv.motion,
        ) {
            return Some(ingress);
        }
        if self.is_on_approach(intersection, cv.tracking.approach, pt) {
            if let Some(tracking) =
                self.locate_vehicle_on_approach(intersection, cv.tracking.approach, pt, &cv.motion)
            {
                return Some(tracking);
            }
        }
        None
    }

    fn from_at_box(
        &self,
        cv: &ConnectedVehicle,
        intersection: usize,
        pt: Point2D,
    ) -> Option<VehicleTracking> {
        let approach = cv.tracking.approach;
        let lane = cv.tracking.lane;
        let lane_obj = &self.intersections()[intersection].approaches[approach].lanes[lane];
        let connect_approaches: Vec<usize> = lane_obj
            .connect_to
            .iter()
            .filter_map(|c| self.indexes_by_ids(c.intersection_id, c.lane_id))
            .map(|(_, a, _)| a)
            .collect();
        // near an egress lane start?
        let mut near_egress = false;
        for &egress in &connect_approaches {
            if self.on_approaches(intersection, pt).contains(&egress) {
                let d = self.pt_dist_to_egress(intersection, egress, pt);
                let half_gap = f64::from(
                    self.intersections()[intersection].approaches[egress].min_dist_to_central_line,
                ) / 2.0;
                if d < half_gap {
                    near_egress = true;
                }
            }
        }
        if let Some(outbound) =
            self.outbound_candidates(intersection, pt, &cv.motion, Some(&connect_approaches))
        {
            if let Some(ingress) = self.egress_connects_to_ingress(
                outbound.intersection,
                outbound.approach,
                outbound.lane,
                cv.geo_point,
                &cv.motion,
            ) {
                return Some(ingress);
            }
            return Some(outbound);
        }
        // GPS overshoot near the stop-bar: allow falling back to onInbound
        if self.is_on_approach(intersection, approach, pt) {
            if let Some(tracking) =
                self.locate_vehicle_on_approach(intersection, approach, pt, &cv.motion)
            {
                return Some(tracking);
            }
        }
        let proj = project_point_to_line(lane_obj.nodes[1].pt, lane_obj.nodes[0].pt, pt);
        let dist_into = proj.t * proj.length - f64::from(lane_obj.nodes[1].dist_to_first);
        if self.is_inside_intersection_box(intersection, pt)
            || dist_into.abs() < f64::from(lane_obj.nodes[0].dist_to_first)
            || near_egress
        {
            return Some(VehicleTracking {
                status: MapLocType::AtIntersectionBox,
                lane_proj: LaneProjection {
                    node_index: 1,
                    proj,
                },
                ..cv.tracking
            });
        }
        None
    }

    /// Longitudinal/lateral distance for a tracking state: `x` is distance
    /// to the stop-bar in centimeters (negative once inside the box, or
    /// downstream distance on an outbound lane), `y` is the signed lateral
    /// offset.
    pub fn pt_dist_2d(&self, tracking: &VehicleTracking) -> Point2D {
        match tracking.status {
            MapLocType::Outside | MapLocType::InsideIntersectionBox => Point2D { x: 0, y: 0 },
            _ => {
                let lane =
                    &self.intersections()[tracking.intersection].approaches[tracking.approach]
                        .lanes[tracking.lane];
                let node_index = usize::from(tracking.lane_proj.node_index);
                let node_dist = if node_index == 0 {
                    0.0
                } else {
                    f64::from(lane.nodes[node_index].dist_to_first)
                };
                let into_line = tracking.lane_proj.proj.t * tracking.lane_proj.proj.length;
                let x = if tracking.status == MapLocType::OnOutbound {
                    node_dist + into_line
                } else {
                    node_dist - into_line
                };
                Point2D {
                    x: x as i32,
                    y: tracking.lane_proj.proj.d as i32,
                }
            },
        }
    }

    /// Lane-level awareness for a tracking state.
    pub fn update_location_aware(&self, tracking: &VehicleTracking) -> crate::map::LocationAware {
        let mut aware = crate::map::LocationAware::default();
        match tracking.status {
            MapLocType::Outside => {},
            MapLocType::InsideIntersectionBox => {
                aware.intersection_id = self.intersections()[tracking.intersection].id;
            },
            _ => {
                let intersection = &self.intersections()[tracking.intersection];
                let lane = &intersection.approaches[tracking.approach].lanes[tracking.lane];
                aware.intersection_id = intersection.id;
                aware.lane_id = lane.id;
                aware.control_phase = lane.control_phase;
                aware.connections = lane.connect_to.clone();
            },
        }
        let pt = self.pt_dist_2d(tracking);
        aware.dist_long = f64::from(pt.x) / 100.0;
        aware.dist_lat = f64::from(pt.y) / 100.0;
        aware
    }
}
