//! Planar and geodetic geometry for lane-level map matching: WGS-84
//! LLA/ECEF/ENU conversion, segment projection, convexity tests and the
//! convex hull used to repair non-convex approach footprints.

/// WGS-84 semi-major axis, meters
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 first eccentricity squared
const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// 1/10th microdegree per degree
pub const DEG_TO_TENTH_MICRO: f64 = 1.0e7;
/// centimeters per meter
pub const CM_PER_METER: f64 = 100.0;

/// Geodetic point in degrees and meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

/// Geodetic point in 1/10th microdegree and centimeters, the wire and map
/// file representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoRefPoint {
    pub latitude: i32,
    pub longitude: i32,
    pub elevation: i32,
}

impl From<GeoPoint> for GeoRefPoint {
    fn from(p: GeoPoint) -> Self {
        GeoRefPoint {
            latitude: (p.latitude * DEG_TO_TENTH_MICRO).round() as i32,
            longitude: (p.longitude * DEG_TO_TENTH_MICRO).round() as i32,
            elevation: (p.elevation * CM_PER_METER).round() as i32,
        }
    }
}

impl From<GeoRefPoint> for GeoPoint {
    fn from(p: GeoRefPoint) -> Self {
        GeoPoint {
            latitude: f64::from(p.latitude) / DEG_TO_TENTH_MICRO,
            longitude: f64::from(p.longitude) / DEG_TO_TENTH_MICRO,
            elevation: f64::from(p.elevation) / CM_PER_METER,
        }
    }
}

/// ECEF or local cartesian point in meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// ENU offset in centimeters relative to an intersection reference point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point2D {
    pub x: i32,
    pub y: i32,
}

impl Point2D {
    pub fn length(&self) -> u32 {
        f64::from(self.x).hypot(f64::from(self.y)) as u32
    }

    pub fn distance_to(&self, other: &Point2D) -> u32 {
        f64::from(self.x - other.x).hypot(f64::from(self.y - other.y)) as u32
    }

    /// Compass bearing from `self` towards `other` in decidegrees
    /// (0 = north, clockwise).
    pub fn direction_to(&self, other: &Point2D) -> u16 {
        let dx = f64::from(other.x - self.x);
        let dy = f64::from(other.y - self.y);
        let mut deg = dx.atan2(dy).to_degrees();
        if deg < 0.0 {
            deg += 360.0;
        }
        (deg * 10.0).round() as u16 % 3600
    }
}

/// Cached ENU frame: the reference point in ECEF plus the rotation terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnuCoord {
    pub point_ecef: Point3D,
    pub sin_lat: f64,
    pub cos_lat: f64,
    pub sin_lon: f64,
    pub cos_lon: f64,
}

impl EnuCoord {
    pub fn new(reference: GeoPoint) -> Self {
        let lat = reference.latitude.to_radians();
        let lon = reference.longitude.to_radians();
        EnuCoord {
            point_ecef: lla_to_ecef(reference),
            sin_lat: lat.sin(),
            cos_lat: lat.cos(),
            sin_lon: lon.sin(),
            cos_lon: lon.cos(),
        }
    }
}

pub fn lla_to_ecef(p: GeoPoint) -> Point3D {
    let lat = p.latitude.to_radians();
    let lon = p.longitude.to_radians();
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin() * lat.sin()).sqrt();
    Point3D {
        x: (n + p.elevation) * lat.cos() * lon.cos(),
        y: (n + p.elevation) * lat.cos() * lon.sin(),
        z: (n * (1.0 - WGS84_E2) + p.elevation) * lat.sin(),
    }
}

pub fn ecef_to_lla(p: Point3D) -> GeoPoint {
    // Bowring's closed-form approximation
    let b = WGS84_A * (1.0 - WGS84_E2).sqrt();
    let ep2 = (WGS84_A * WGS84_A - b * b) / (b * b);
    let r = p.x.hypot(p.y);
    let theta = (p.z * WGS84_A).atan2(r * b);
    let lat = (p.z + ep2 * b * theta.sin().powi(3))
        .atan2(r - WGS84_E2 * WGS84_A * theta.cos().powi(3));
    let lon = p.y.atan2(p.x);
    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin() * lat.sin()).sqrt();
    let elevation = r / lat.cos() - n;
    GeoPoint {
        latitude: lat.to_degrees(),
        longitude: lon.to_degrees(),
        elevation,
    }
}

pub fn ecef_to_enu(frame: &EnuCoord, p: Point3D) -> Point3D {
    let dx = p.x - frame.point_ecef.x;
    let dy = p.y - frame.point_ecef.y;
    let dz = p.z - frame.point_ecef.z;
    Point3D {
        x: -frame.sin_lon * dx + frame.cos_lon * dy,
        y: -frame.sin_lat * frame.cos_lon * dx - frame.sin_lat * frame.sin_lon * dy
            + frame.cos_lat * dz,
        z: frame.cos_lat * frame.cos_lon * dx + frame.cos_lat * frame.sin_lon * dy
            + frame.sin_lat * dz,
    }
}

pub fn enu_to_ecef(frame: &EnuCoord, p: Point3D) -> Point3D {
    Point3D {
        x: frame.point_ecef.x - frame.sin_lon * p.x
            - frame.sin_lat * frame.cos_lon * p.y
            + frame.cos_lat * frame.cos_lon * p.z,
        y: frame.point_ecef.y + frame.cos_lon * p.x - frame.sin_lat * frame.sin_lon * p.y
            + frame.cos_lat * frame.sin_lon * p.z,
        z: frame.point_ecef.z + frame.cos_lat * p.y + frame.sin_lat * p.z,
    }
}

/// Converts a geodetic point to an ENU offset in centimeters.
pub fn lla_to_enu(frame: &EnuCoord, p: GeoPoint) -> Point2D {
    let enu = ecef_to_enu(frame, lla_to_ecef(p));
    Point2D {
        x: (enu.x * CM_PER_METER).round() as i32,
        y: (enu.y * CM_PER_METER).round() as i32,
    }
}

/// Converts an ENU centimeter offset back to a geodetic point (the frame
/// reference elevation is assumed).
pub fn enu_to_lla(frame: &EnuCoord, p: Point2D) -> GeoPoint {
    let enu = Point3D {
        x: f64::from(p.x) / CM_PER_METER,
        y: f64::from(p.y) / CM_PER_METER,
        z: 0.0,
    };
    ecef_to_lla(enu_to_ecef(frame, enu))
}

/// Great-circle distance between two geodetic points in meters (haversine).
pub fn geo_distance(p1: GeoPoint, p2: GeoPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlon = (p2.longitude - p1.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * WGS84_A * a.sqrt().asin()
}

/// Projection of a point onto a directed line segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Projection {
    /// position along the segment, unit-less (0 at start, 1 at end)
    pub t: f64,
    /// lateral offset in centimeters, positive on the right of travel
    pub d: f64,
    /// segment length in centimeters
    pub length: f64,
}

/// Projects `pt` onto the directed segment `start -> end`.
pub fn project_point_to_line(start: Point2D, end: Point2D, pt: Point2D) -> Projection {
    let vx = f64::from(end.x - start.x);
    let vy = f64::from(end.y - start.y);
    let wx = f64::from(pt.x - start.x);
    let wy = f64::from(pt.y - start.y);
    let length = vx.hypot(vy);
    if length < f64::EPSILON {
        return Projection {
            t: 0.0,
            d: wx.hypot(wy),
            length: 0.0,
        };
    }
    Projection {
        t: (wx * vx + wy * vy) / (length * length),
        // right of travel is positive
        d: (wx * vy - wy * vx) / length,
        length,
    }
}

pub fn cross(o: Point2D, a: Point2D, b: Point2D) -> i64 {
    i64::from(a.x - o.x) * i64::from(b.y - o.y) - i64::from(a.y - o.y) * i64::from(b.x - o.x)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonType {
    Colinear,
    Concave,
    Convex,
}

/// Classifies a closed polygon by walking consecutive edge cross products.
pub fn convex_or_concave(polygon: &[Point2D]) -> PolygonType {
    if polygon.len() < 3 {
        return PolygonType::Colinear;
    }
    let n = polygon.len();
    let mut positive = 0usize;
    let mut negative = 0usize;
    for i in 0..n {
        let z = cross(polygon[i], polygon[(i + 1) % n], polygon[(i + 2) % n]);
        if z > 0 {
            positive += 1;
        } else if z < 0 {
            negative += 1;
        }
    }
    if positive + negative == 0 {
        PolygonType::Colinear
    } else if positive == 0 || negative == 0 {
        PolygonType::Convex
    } else {
        PolygonType::Concave
    }
}

/// Same-side containment test for a convex polygon; points on the boundary
/// count as inside.
pub fn point_inside_polygon(polygon: &[Point2D], pt: Point2D) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let n = polygon.len();
    let mut positive = false;
    let mut negative = false;
    for i in 0..n {
        let z = cross(polygon[i], polygon[(i + 1) % n], pt);
        if z > 0 {
            positive = true;
        } else if z < 0 {
            negative = true;
        }
        if positive && negative {
            return false;
        }
    }
    true
}

/// Andrew's monotone chain; returns the hull in counter-clockwise order
/// without the repeated first point.
pub fn convex_hull(points: &[Point2D]) -> Vec<Point2D> {
    let mut pts: Vec<Point2D> = points.to_vec();
    pts.sort();
    pts.dedup();
    let n = pts.len();
    if n < 3 {
        return pts;
    }
    let mut hull: Vec<Point2D> = Vec::with_capacity(2 * n);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev() {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: GeoPoint = GeoPoint {
        latitude: 37.79,
        longitude: -122.15,
        elevation: 120.0,
    };

    #[test]
    fn enu_roundtrip_within_a_centimeter() {
        let frame = EnuCoord::new(REF);
        for (dlat, dlon) in [(0.001, 0.002), (-0.004, 0.003), (0.02, -0.03)] {
            let p = GeoPoint {
                latitude: REF.latitude + dlat,
                longitude: REF.longitude + dlon,
                elevation: REF.elevation,
            };
            let enu = lla_to_enu(&frame, p);
            let back = enu_to_lla(&frame, enu);
            assert!(
                geo_distance(p, back) < 0.01,
                "roundtrip error {} m",
                geo_distance(p, back)
            );
        }
    }

    #[test]
    fn enu_axes_point_east_and_north() {
        let frame = EnuCoord::new(REF);
        let east = lla_to_enu(
            &frame,
            GeoPoint {
                longitude: REF.longitude + 0.001,
                ..REF
            },
        );
        assert!(east.x > 0 && east.y.abs() < east.x / 10);
        let north = lla_to_enu(
            &frame,
            GeoPoint {
                latitude: REF.latitude + 0.001,
                ..REF
            },
        );
        assert!(north.y > 0 && north.x.abs() < north.y / 10);
    }

    #[test]
    fn direction_to_is_compass_oriented() {
        let origin = Point2D { x: 0, y: 0 };
        assert_eq!(origin.direction_to(&Point2D { x: 0, y: 100 }), 0);
        assert_eq!(origin.direction_to(&Point2D { x: 100, y: 0 }), 900);
        assert_eq!(origin.direction_to(&Point2D { x: 0, y: -100 }), 1800);
        assert_eq!(origin.direction_to(&Point2D { x: -100, y: 0 }), 2700);
    }

    #[test]
    fn projection_signs_follow_travel_direction() {
        let start = Point2D { x: 0, y: 0 };
        let end = Point2D { x: 0, y: 1000 };
        // northbound travel, point east of the line: right side, positive d
        let proj = project_point_to_line(start, end, Point2D { x: 120, y: 500 });
        assert!((proj.t - 0.5).abs() < 1e-9);
        assert!((proj.d - 120.0).abs() < 1e-9);
        assert!((proj.length - 1000.0).abs() < 1e-9);
        let proj = project_point_to_line(start, end, Point2D { x: -80, y: 1500 });
        assert!(proj.t > 1.0);
        assert!(proj.d < 0.0);
    }

    #[test]
    fn convexity_classification() {
        let square = [
            Point2D { x: 0, y: 0 },
            Point2D { x: 100, y: 0 },
            Point2D { x: 100, y: 100 },
            Point2D { x: 0, y: 100 },
        ];
        assert_eq!(convex_or_concave(&square), PolygonType::Convex);
        let dented = [
            Point2D { x: 0, y: 0 },
            Point2D { x: 100, y: 0 },
            Point2D { x: 50, y: 40 },
            Point2D { x: 100, y: 100 },
            Point2D { x: 0, y: 100 },
        ];
        assert_eq!(convex_or_concave(&dented), PolygonType::Concave);
    }

    #[test]
    fn hull_repairs_concave_footprint() {
        let dented = [
            Point2D { x: 0, y: 0 },
            Point2D { x: 100, y: 0 },
            Point2D { x: 50, y: 40 },
            Point2D { x: 100, y: 100 },
            Point2D { x: 0, y: 100 },
        ];
        let hull = convex_hull(&dented);
        assert_eq!(hull.len(), 4);
        assert_eq!(convex_or_concave(&hull), PolygonType::Convex);
        assert!(point_inside_polygon(&hull, Point2D { x: 50, y: 40 }));
    }

    #[test]
    fn containment_includes_boundary() {
        let square = [
            Point2D { x: 0, y: 0 },
            Point2D { x: 100, y: 0 },
            Point2D { x: 100, y: 100 },
            Point2D { x: 0, y: 100 },
        ];
        assert!(point_inside_polygon(&square, Point2D { x: 50, y: 50 }));
        assert!(point_inside_polygon(&square, Point2D { x: 0, y: 50 }));
        assert!(!point_inside_polygon(&square, Point2D { x: 101, y: 50 }));
    }
}
