// meridian_core/src/registration/ndt.rs

//! Normal Distributions Transform, point-to-distribution variant.
//!
//! The target is voxelized at `resolution`; every voxel holding enough points
//! becomes a Gaussian `(mean, covariance)`. A source point `x` mapped through
//! the pose scores against every Gaussian whose mean lies within one
//! resolution of it:
//!
//! ```text
//! q     = (x - mean)^T cov^-1 (x - mean)
//! score = -d1 * exp(-d2 / 2 * q)
//! ```
//!
//! with the Magnusson constants `d1`, `d2` derived from `outlier_ratio`.
//! The score is maximised by iteratively reweighted Gauss-Newton on a left
//! perturbation of the pose; each point/Gaussian pair carries the weight
//! `exp(-d2 / 2 * q)`, so pairs far out in the tail fade away smoothly.

use crate::config::NdtConfig;
use crate::error::RegistrationError;
use crate::messages::PointCloud;
use crate::registration::{Alignment, Registration};
use crate::types::Pose;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Matrix3x6, Matrix6, Point3, SymmetricEigen, Vector3, Vector6};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

const BUCKET_SIZE: usize = 256;

/// Eigenvalues smaller than this fraction of the largest are raised to it,
/// keeping planar cells invertible.
const MIN_EIGENVALUE_RATIO: f64 = 0.01;

/// Relative Levenberg damping added to the Gauss-Newton Hessian.
const DAMPING: f64 = 1e-6;

/// One target voxel summarized as a Gaussian.
#[derive(Debug, Clone)]
struct Cell {
    mean: Point3<f64>,
    inv_cov: Matrix3<f64>,
}

/// Gaussians of the current target plus a k-d tree over their means.
struct CellGrid {
    cells: Vec<Cell>,
    search: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE>,
}

impl CellGrid {
    fn build(target: &PointCloud, resolution: f64, min_points: usize) -> Option<Self> {
        let inv = 1.0 / resolution;
        let mut buckets: HashMap<(i64, i64, i64), Vec<Vector3<f64>>> = HashMap::new();
        for p in target.iter() {
            let c = p.position.coords * inv;
            buckets
                .entry((c.x.floor() as i64, c.y.floor() as i64, c.z.floor() as i64))
                .or_default()
                .push(p.position.coords);
        }

        let mut cells: Vec<Cell> = buckets
            .into_values()
            .filter(|pts| pts.len() >= min_points)
            .filter_map(|pts| gaussian(&pts))
            .collect();
        if cells.is_empty() {
            return None;
        }
        // HashMap order is arbitrary; sort so results do not depend on it.
        cells.sort_by(|a, b| {
            a.mean
                .coords
                .iter()
                .zip(b.mean.coords.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let means: Vec<[f64; 3]> = cells
            .iter()
            .map(|c| [c.mean.x, c.mean.y, c.mean.z])
            .collect();
        let search = (&*means).into();
        Some(Self { cells, search })
    }

    fn near(&self, x: &Point3<f64>, radius: f64) -> impl Iterator<Item = &Cell> {
        self.search
            .within::<SquaredEuclidean>(&[x.x, x.y, x.z], radius * radius)
            .into_iter()
            .map(move |nn| &self.cells[nn.item as usize])
    }
}

/// Sample mean and regularized inverse covariance of a voxel's points.
fn gaussian(points: &[Vector3<f64>]) -> Option<Cell> {
    let n = points.len() as f64;
    let mean: Vector3<f64> = points.iter().sum::<Vector3<f64>>() / n;
    let cov: Matrix3<f64> = points
        .iter()
        .map(|p| (p - mean) * (p - mean).transpose())
        .sum::<Matrix3<f64>>()
        / (n - 1.0);

    let eigen = SymmetricEigen::new(cov);
    let largest = eigen.eigenvalues.max();
    if !(largest.is_finite() && largest > 0.0) {
        return None;
    }
    let floor = largest * MIN_EIGENVALUE_RATIO;
    let inv_values = eigen.eigenvalues.map(|l| 1.0 / l.max(floor));
    let inv_cov =
        eigen.eigenvectors * Matrix3::from_diagonal(&inv_values) * eigen.eigenvectors.transpose();

    Some(Cell {
        mean: Point3::from(mean),
        inv_cov,
    })
}

/// Skew-symmetric cross-product matrix: `skew(a) * b == a.cross(&b)`.
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// NDT scan matcher.
pub struct NdtRegistration {
    config: NdtConfig,
    grid: Option<CellGrid>,
    d1: f64,
    d2: f64,
}

impl NdtRegistration {
    pub fn new(config: NdtConfig) -> Self {
        // Magnusson (2009), eq. 6.8: a mixture of a Gaussian and a uniform
        // outlier distribution, approximated by a single Gaussian.
        let c1 = 10.0 * (1.0 - config.outlier_ratio);
        let c2 = config.outlier_ratio / config.resolution.powi(3);
        let d3 = -c2.ln();
        let d1 = -(c1 + c2).ln() - d3;
        let d2 = -2.0 * ((-(c1 * (-0.5f64).exp() + c2).ln() - d3) / d1).ln();
        Self {
            config,
            grid: None,
            d1,
            d2,
        }
    }

    /// Weighted normal equations at `pose`, plus the summed score and the
    /// number of points that touched at least one Gaussian.
    fn linearize(&self, grid: &CellGrid, source: &PointCloud, pose: &Pose) -> Linearization {
        let mut lin = Linearization::zeros();
        for p in source.iter() {
            let x = pose.transform_point(&p.position);
            let mut jacobian = Matrix3x6::zeros();
            jacobian
                .fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&Matrix3::identity());
            jacobian
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-skew(&x.coords)));

            let mut touched = false;
            for cell in grid.near(&x, self.config.resolution) {
                let d = x - cell.mean;
                let q = d.dot(&(cell.inv_cov * d));
                let w = (-0.5 * self.d2 * q).exp();
                if !w.is_finite() || w < 1e-12 {
                    continue;
                }
                touched = true;
                let jt_s = jacobian.transpose() * cell.inv_cov;
                lin.hessian += w * jt_s * jacobian;
                lin.gradient += w * jt_s * d;
                lin.score += -self.d1 * w;
                lin.mahalanobis += q;
                lin.pairs += 1;
            }
            if touched {
                lin.points += 1;
            }
        }
        lin
    }
}

struct Linearization {
    hessian: Matrix6<f64>,
    gradient: Vector6<f64>,
    score: f64,
    mahalanobis: f64,
    pairs: usize,
    points: usize,
}

impl Linearization {
    fn zeros() -> Self {
        Self {
            hessian: Matrix6::zeros(),
            gradient: Vector6::zeros(),
            score: 0.0,
            mahalanobis: 0.0,
            pairs: 0,
            points: 0,
        }
    }
}

/// Fewer scored points than unknowns leaves the update underdetermined.
const MIN_SCORED_POINTS: usize = 6;

impl Registration for NdtRegistration {
    fn set_target(&mut self, target: Arc<PointCloud>) {
        self.grid = CellGrid::build(
            &target,
            self.config.resolution,
            self.config.min_points_per_voxel,
        );
        match &self.grid {
            Some(grid) => debug!(
                points = target.len(),
                cells = grid.cells.len(),
                "ndt target voxelized"
            ),
            None => debug!(points = target.len(), "ndt target has no usable cells"),
        }
    }

    /// `fitness` is the mean Mahalanobis distance `q` over every
    /// point/Gaussian pair at the final pose.
    fn align(&self, source: &PointCloud, guess: &Pose) -> Result<Alignment, RegistrationError> {
        let grid = self.grid.as_ref().ok_or(RegistrationError::EmptyTarget)?;
        if source.is_empty() {
            return Err(RegistrationError::EmptySource);
        }

        let mut pose = *guess;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.config.max_iter {
            iterations += 1;
            let lin = self.linearize(grid, source, &pose);
            if lin.points < MIN_SCORED_POINTS {
                return Err(RegistrationError::InsufficientCorrespondences {
                    found: lin.points,
                    required: MIN_SCORED_POINTS,
                });
            }

            let scale = lin.hessian.diagonal().max().max(1.0);
            let damped = lin.hessian + Matrix6::identity() * (DAMPING * scale);
            let Some(cholesky) = damped.cholesky() else {
                return Err(RegistrationError::Degenerate("NDT Hessian is not positive definite"));
            };
            let mut delta = -cholesky.solve(&lin.gradient);

            let length = delta.norm();
            if length > self.config.step_size {
                delta *= self.config.step_size / length;
            }

            let translation = Vector3::new(delta[0], delta[1], delta[2]);
            let rotation = Vector3::new(delta[3], delta[4], delta[5]);
            pose = Pose::new(translation, rotation) * pose;

            trace!(
                iteration = iterations,
                score = lin.score,
                points = lin.points,
                step = delta.norm(),
                "ndt step"
            );
            if delta.norm() < self.config.trans_eps {
                converged = true;
                break;
            }
        }

        let final_lin = self.linearize(grid, source, &pose);
        let fitness = if final_lin.pairs == 0 {
            f64::INFINITY
        } else {
            final_lin.mahalanobis / final_lin.pairs as f64
        };

        Ok(Alignment {
            pose,
            aligned: source.transformed(&pose),
            converged,
            iterations,
            fitness,
        })
    }

    fn name(&self) -> &'static str {
        "Ndt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::{CloudFilter, VoxelFilter};
    use crate::registration::test_clouds::structured_room;
    use crate::types::pose_from_xyz_rpy;
    use approx::assert_abs_diff_eq;

    fn engine() -> NdtRegistration {
        NdtRegistration::new(NdtConfig {
            max_iter: 60,
            ..NdtConfig::default()
        })
    }

    #[test]
    fn magnusson_constants_have_the_expected_signs() {
        let ndt = engine();
        assert!(ndt.d1 < 0.0);
        assert!(ndt.d2 > 0.0);
    }

    #[test]
    fn planar_cells_stay_invertible() {
        let points: Vec<Vector3<f64>> = (0..5)
            .flat_map(|i| (0..5).map(move |j| Vector3::new(i as f64 * 0.2, j as f64 * 0.2, 0.0)))
            .collect();
        let cell = gaussian(&points).unwrap();
        assert!(cell.inv_cov.iter().all(|v| v.is_finite()));
        // Normal direction is the stiffest.
        assert!(cell.inv_cov[(2, 2)] > cell.inv_cov[(0, 0)]);
    }

    #[test]
    fn recovers_a_small_offset_in_a_structured_scene() {
        let target = structured_room(5);
        let truth = pose_from_xyz_rpy(0.1, -0.08, 0.03, 0.0, 0.0, 0.005);
        // A sparser, independently sampled view of the same room.
        let scan = VoxelFilter::new([0.5, 0.5, 0.5]).filter(&structured_room(6));
        let source = scan.transformed(&truth.inverse());

        let mut ndt = engine();
        ndt.set_target(Arc::new(target));
        let result = ndt.align(&source, &Pose::identity()).unwrap();

        assert_abs_diff_eq!(
            result.pose.translation.vector,
            truth.translation.vector,
            epsilon = 0.05
        );
        assert_abs_diff_eq!(
            result.pose.rotation.angle_to(&truth.rotation),
            0.0,
            epsilon = 0.01
        );
        assert!(result.fitness.is_finite());
    }

    #[test]
    fn step_length_is_clamped() {
        let target = structured_room(5);
        let truth = pose_from_xyz_rpy(0.4, 0.0, 0.0, 0.0, 0.0, 0.0);
        let source = VoxelFilter::new([0.5, 0.5, 0.5])
            .filter(&structured_room(6))
            .transformed(&truth.inverse());

        let mut ndt = NdtRegistration::new(NdtConfig {
            max_iter: 1,
            ..NdtConfig::default()
        });
        ndt.set_target(Arc::new(target));
        let result = ndt.align(&source, &Pose::identity()).unwrap();
        assert_eq!(result.iterations, 1);
        assert!(result.pose.translation.vector.norm() <= 0.1 + 1e-9);
    }

    #[test]
    fn empty_target_is_reported_not_panicked() {
        let mut ndt = engine();
        ndt.set_target(Arc::new(PointCloud::default()));
        let err = ndt.align(&structured_room(1), &Pose::identity()).unwrap_err();
        assert_eq!(err, RegistrationError::EmptyTarget);
    }

    #[test]
    fn sparse_target_without_cells_counts_as_empty() {
        let mut ndt = engine();
        // Four points can never fill a cell that needs five.
        ndt.set_target(Arc::new(PointCloud::from_xyz([
            [0.1, 0.1, 0.1],
            [0.2, 0.1, 0.1],
            [0.1, 0.2, 0.1],
            [0.1, 0.1, 0.2],
        ])));
        let err = ndt.align(&structured_room(1), &Pose::identity()).unwrap_err();
        assert_eq!(err, RegistrationError::EmptyTarget);
    }
}
