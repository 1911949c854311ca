//! Geographic primitives shared by the graph and placement layers.
//!
//! Distances are in meters. Bearings follow the road-network convention:
//! degrees clockwise from north, in `[0, 360)`.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_009.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial bearing from `a` to `b`, degrees clockwise from north in `[0, 360)`.
pub fn initial_bearing(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Circular deviation between two bearings, in `[0, 180]`.
pub fn bearing_deviation(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

pub fn reverse_bearing(bearing: f64) -> f64 {
    (bearing + 180.0) % 360.0
}

/// Project `p` into a local tangent plane centered on `origin`.
/// Returns (east, north) in meters. Accurate over the few kilometers a
/// camera network spans.
fn to_local_m(origin: Point, p: Point) -> (f64, f64) {
    let east = (p.lon - origin.lon).to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_M;
    let north = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (east, north)
}

/// Distance in meters from `p` to the segment `a`-`b`.
pub fn point_segment_distance_m(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = to_local_m(a, p);
    let (bx, by) = to_local_m(a, b);
    let seg_len_sq = bx * bx + by * by;
    if seg_len_sq == 0.0 {
        return (px * px + py * py).sqrt();
    }
    let t = ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * bx;
    let dy = py - t * by;
    (dx * dx + dy * dy).sqrt()
}
