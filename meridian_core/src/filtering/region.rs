// meridian_core/src/filtering/region.rs

use crate::messages::PointCloud;
use crate::types::Axis;
use nalgebra::Point3;
use std::fmt;

// =========================================================================
// == Region ==
// =========================================================================

/// An axis-aligned box around an origin. Bounds are inclusive.
///
/// A region is always derived wholesale from an origin and a half-extent;
/// there is no way to move a single edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub origin: Point3<f64>,
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Region {
    pub fn around(origin: Point3<f64>, half_extent: [f64; 3]) -> Self {
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for i in 0..3 {
            min[i] = origin[i] - half_extent[i];
            max[i] = origin[i] + half_extent[i];
        }
        Self { origin, min, max }
    }

    /// The `(near, far)` edge pair along one axis.
    pub fn edge(&self, axis: Axis) -> (f64, f64) {
        let i = axis.index();
        (self.min[i], self.max[i])
    }

    /// Edges in `(xmin, xmax, ymin, ymax, zmin, zmax)` order.
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.min[0],
            self.max[0],
            self.min[1],
            self.max[1],
            self.min[2],
            self.max[2],
        ]
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}] x [{:.2}, {:.2}] x [{:.2}, {:.2}]",
            self.min[0], self.max[0], self.min[1], self.max[1], self.min[2], self.max[2]
        )
    }
}

// =========================================================================
// == Region Filter ==
// =========================================================================

/// # RegionFilter
/// Crops clouds to a box of fixed half-extent around a movable origin.
#[derive(Debug, Clone)]
pub struct RegionFilter {
    half_extent: [f64; 3],
    region: Region,
}

impl RegionFilter {
    /// A filter centred on the map origin.
    pub fn new(half_extent: [f64; 3]) -> Self {
        Self {
            half_extent,
            region: Region::around(Point3::origin(), half_extent),
        }
    }

    pub fn half_extent(&self) -> [f64; 3] {
        self.half_extent
    }

    /// Moves the box; its edges are recomputed from the new origin.
    pub fn set_origin(&mut self, origin: Point3<f64>) {
        self.region = Region::around(origin, self.half_extent);
    }

    /// Moves the box to `origin` and returns the points of `cloud` inside it.
    pub fn filter(&mut self, cloud: &PointCloud, origin: Point3<f64>) -> PointCloud {
        self.set_origin(origin);
        self.crop(cloud)
    }

    /// Returns the points of `cloud` inside the current box.
    pub fn crop(&self, cloud: &PointCloud) -> PointCloud {
        let points = cloud
            .iter()
            .filter(|p| self.region.contains(&p.position))
            .copied()
            .collect();
        PointCloud::new(cloud.timestamp, points)
    }

    /// The current box.
    pub fn edges(&self) -> &Region {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_follow_origin_and_half_extent() {
        let mut filter = RegionFilter::new([60.0, 60.0, 10.0]);
        assert_eq!(
            filter.edges().as_array(),
            [-60.0, 60.0, -60.0, 60.0, -10.0, 10.0]
        );

        filter.set_origin(Point3::new(45.0, -5.0, 1.0));
        assert_eq!(filter.edges().edge(Axis::X), (-15.0, 105.0));
        assert_eq!(filter.edges().edge(Axis::Y), (-65.0, 55.0));
        assert_eq!(filter.edges().edge(Axis::Z), (-9.0, 11.0));
        assert_eq!(filter.edges().origin, Point3::new(45.0, -5.0, 1.0));
    }

    #[test]
    fn crop_keeps_points_on_the_boundary() {
        let cloud = PointCloud::from_xyz([
            [1.0, 0.0, 0.0],
            [-1.0, 1.0, -1.0],
            [1.0001, 0.0, 0.0],
            [0.0, 0.0, 2.0],
        ]);
        let mut filter = RegionFilter::new([1.0, 1.0, 1.0]);
        let out = filter.filter(&cloud, Point3::origin());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| filter.edges().contains(&p.position)));
    }

    #[test]
    fn origin_outside_the_cloud_gives_an_empty_crop() {
        let cloud = PointCloud::from_xyz([[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
        let mut filter = RegionFilter::new([5.0, 5.0, 5.0]);
        assert!(filter.filter(&cloud, Point3::new(100.0, 0.0, 0.0)).is_empty());
    }
}
