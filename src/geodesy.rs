/// Great-circle distance between GPS coordinates
///
/// Uses the spherical law of cosines on a mean Earth radius of 6372.795 km.
/// Coordinates are `geo::Point`s built with `point!(x: lon, y: lat)`.
/// A point at exactly (0, 0) means "no fix" and never contributes distance.

use geo::Point;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6372.795;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Meters,
    Kilometers,
}

impl DistanceUnit {
    fn per_kilometer(self) -> f64 {
        match self {
            DistanceUnit::Meters => 1000.0,
            DistanceUnit::Kilometers => 1.0,
        }
    }
}

pub fn is_sentinel(point: &Point<f64>) -> bool {
    point.x() == 0.0 && point.y() == 0.0
}

pub fn distance(start: Point<f64>, end: Point<f64>, unit: DistanceUnit) -> f64 {
    if is_sentinel(&start) || is_sentinel(&end) {
        return 0.0;
    }

    let lat1 = start.y().to_radians();
    let lat2 = end.y().to_radians();
    let delta_lon = (start.x() - end.x()).to_radians();

    // Identical points can round just past 1.0, where acos is NaN
    let cos_angle = (lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * delta_lon.cos())
        .clamp(-1.0, 1.0);

    cos_angle.acos() * EARTH_RADIUS_KM * unit.per_kilometer()
}

/// Sum of consecutive leg distances; zero for fewer than two points.
pub fn path_distance(points: &[Point<f64>], unit: DistanceUnit) -> f64 {
    points
        .windows(2)
        .map(|pair| distance(pair[0], pair[1], unit))
        .sum()
}
