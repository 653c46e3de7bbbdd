// meridian_core/src/messages.rs

use crate::types::Pose;
use nalgebra::{Point3, Vector3};

// =========================================================================
// == Point Cloud Data Structures ==
// =========================================================================

/// A single 3D sample, from a live scan or from the prebuilt map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Coordinates in whichever frame the owning cloud is expressed in.
    pub position: Point3<f64>,
    /// Optional: the intensity of the laser return for this point.
    pub intensity: Option<f32>,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Point3::new(x, y, z),
            intensity: None,
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// True when all three coordinates are finite (no NaN, no infinity).
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|c| c.is_finite())
    }
}

/// An ordered collection of points.
///
/// Order only matters for file round-trips; matching treats a cloud as a set.
/// Clouds are treated as values: filters and transforms produce new clouds
/// rather than editing one that somebody else may be reading.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    /// Capture time of the scan in seconds (zero for map clouds).
    pub timestamp: f64,
    /// The collection of points that make up the cloud.
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(timestamp: f64, points: Vec<Point>) -> Self {
        Self { timestamp, points }
    }

    /// Builds an intensity-free cloud from raw coordinates.
    pub fn from_xyz<I>(coords: I) -> Self
    where
        I: IntoIterator<Item = [f64; 3]>,
    {
        coords
            .into_iter()
            .map(|[x, y, z]| Point::new(x, y, z))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Drops every point with a non-finite coordinate.
    ///
    /// Returns the cleaned cloud and the number of points removed.
    pub fn into_finite(mut self) -> (Self, usize) {
        let before = self.points.len();
        self.points.retain(Point::is_finite);
        let removed = before - self.points.len();
        (self, removed)
    }

    /// Returns a copy of this cloud with every point mapped through `pose`.
    pub fn transformed(&self, pose: &Pose) -> Self {
        Self {
            timestamp: self.timestamp,
            points: self
                .points
                .iter()
                .map(|p| Point {
                    position: pose.transform_point(&p.position),
                    intensity: p.intensity,
                })
                .collect(),
        }
    }

    /// Axis-aligned bounds `(min, max)`, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.points.first()?.position;
        let (min, max) = self.points.iter().fold((first, first), |(lo, hi), p| {
            (lo.inf(&p.position), hi.sup(&p.position))
        });
        Some((min, max))
    }

    /// Arithmetic mean of all positions, or `None` for an empty cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.points.iter().map(|p| p.position.coords).sum();
        Some(Point3::from(sum / self.points.len() as f64))
    }
}

impl FromIterator<Point> for PointCloud {
    fn from_iter<T: IntoIterator<Item = Point>>(iter: T) -> Self {
        Self {
            timestamp: 0.0,
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pose_from_xyz_rpy;
    use approx::assert_abs_diff_eq;

    fn sample_scan() -> PointCloud {
        PointCloud::from_xyz([
            [1.0, 2.0, 3.0],
            [-4.0, 0.5, 2.0],
            [10.0, -7.0, 0.25],
            [0.0, 0.0, 0.0],
        ])
    }

    #[test]
    fn into_finite_drops_nan_and_infinite_points() {
        let mut cloud = sample_scan();
        cloud.points.push(Point::new(f64::NAN, 0.0, 0.0));
        cloud.points.push(Point::new(0.0, f64::INFINITY, 0.0));
        cloud.points.push(Point::new(0.0, 0.0, f64::NEG_INFINITY));

        let (clean, removed) = cloud.into_finite();
        assert_eq!(removed, 3);
        assert_eq!(clean, sample_scan());
    }

    #[test]
    fn transform_then_inverse_reproduces_the_scan() {
        let scan = sample_scan();
        let pose = pose_from_xyz_rpy(12.0, -3.0, 1.5, 0.2, -0.1, 2.4);

        let round_trip = scan.transformed(&pose).transformed(&pose.inverse());
        for (a, b) in scan.iter().zip(round_trip.iter()) {
            assert_abs_diff_eq!(a.position, b.position, epsilon = 1e-9);
        }
    }

    #[test]
    fn transform_keeps_intensity_and_timestamp() {
        let mut scan = PointCloud::new(4.5, vec![Point::new(1.0, 0.0, 0.0).with_intensity(7.0)]);
        scan.points.push(Point::new(0.0, 1.0, 0.0));
        let moved = scan.transformed(&pose_from_xyz_rpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        assert_eq!(moved.timestamp, 4.5);
        assert_eq!(moved.points[0].intensity, Some(7.0));
        assert_eq!(moved.points[1].intensity, None);
        assert_abs_diff_eq!(moved.points[0].position.x, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn bounds_and_centroid() {
        let scan = sample_scan();
        let (min, max) = scan.bounds().unwrap();
        assert_eq!(min, Point3::new(-4.0, -7.0, 0.0));
        assert_eq!(max, Point3::new(10.0, 2.0, 3.0));

        let c = scan.centroid().unwrap();
        assert_abs_diff_eq!(c.x, 7.0 / 4.0, epsilon = 1e-12);
        assert!(PointCloud::default().bounds().is_none());
        assert!(PointCloud::default().centroid().is_none());
    }
}
