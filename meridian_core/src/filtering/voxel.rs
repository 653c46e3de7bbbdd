// meridian_core/src/filtering/voxel.rs

use crate::filtering::CloudFilter;
use crate::messages::{Point, PointCloud};
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// Integer coordinates of a voxel in the grid.
type VoxelKey = (i64, i64, i64);

/// Running sums for one voxel. Accumulated in f64 so large map coordinates
/// do not lose precision.
#[derive(Default)]
struct VoxelAccum {
    position: Vector3<f64>,
    count: usize,
    intensity: f64,
    intensity_count: usize,
}

/// # VoxelFilter
/// Replaces every occupied voxel of an axis-aligned grid by the centroid of
/// its points. Output order follows the voxel key, so two runs over the same
/// input give the same cloud.
#[derive(Debug, Clone)]
pub struct VoxelFilter {
    inv_leaf: Vector3<f64>,
}

impl VoxelFilter {
    /// `leaf_size` is validated as strictly positive by the configuration.
    pub fn new(leaf_size: [f64; 3]) -> Self {
        Self {
            inv_leaf: Vector3::new(1.0 / leaf_size[0], 1.0 / leaf_size[1], 1.0 / leaf_size[2]),
        }
    }

    fn key(&self, p: &Point) -> VoxelKey {
        let scaled = p.position.coords.component_mul(&self.inv_leaf);
        (
            scaled.x.floor() as i64,
            scaled.y.floor() as i64,
            scaled.z.floor() as i64,
        )
    }
}

impl CloudFilter for VoxelFilter {
    fn filter(&self, cloud: &PointCloud) -> PointCloud {
        let mut voxels: BTreeMap<VoxelKey, VoxelAccum> = BTreeMap::new();

        for p in cloud.iter().filter(|p| p.is_finite()) {
            let entry = voxels.entry(self.key(p)).or_default();
            entry.position += p.position.coords;
            entry.count += 1;
            if let Some(i) = p.intensity {
                entry.intensity += f64::from(i);
                entry.intensity_count += 1;
            }
        }

        let points = voxels
            .into_values()
            .map(|acc| {
                let n = acc.count as f64;
                Point {
                    position: (acc.position / n).into(),
                    intensity: (acc.intensity_count > 0)
                        .then(|| (acc.intensity / acc.intensity_count as f64) as f32),
                }
            })
            .collect();

        PointCloud::new(cloud.timestamp, points)
    }

    fn name(&self) -> &'static str {
        "Voxel"
    }
}
