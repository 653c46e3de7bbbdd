// meridian_core/src/registration/icp.rs

//! Point-to-point Iterative Closest Point.
//!
//! ```text
//! pose = guess
//! repeat up to max_iter:
//!     pair every source point (mapped through pose) with its nearest target
//!     point, dropping pairs farther apart than max_correspondence_distance
//!     solve the rigid delta minimising the paired distances (Kabsch / SVD)
//!     pose = delta * pose
//!     stop once delta is below trans_eps and rot_eps
//! ```

use crate::config::IcpConfig;
use crate::error::RegistrationError;
use crate::messages::PointCloud;
use crate::registration::{Alignment, Registration};
use crate::types::Pose;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::{Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::sync::Arc;
use tracing::trace;

/// Larger than kiddo's default so planar maps with many equal coordinates
/// on one axis still build.
const BUCKET_SIZE: usize = 256;

type TargetTree = ImmutableKdTree<f64, u64, 3, BUCKET_SIZE>;

/// Point-to-point ICP over a k-d tree of the target.
pub struct IcpRegistration {
    config: IcpConfig,
    target: Arc<PointCloud>,
    tree: Option<TargetTree>,
}

impl IcpRegistration {
    pub fn new(config: IcpConfig) -> Self {
        Self {
            config,
            target: Arc::new(PointCloud::default()),
            tree: None,
        }
    }

    /// Pairs every source point, as seen through `pose`, with its nearest
    /// target point. Returns `(source_in_target_frame, target_point, d²)`.
    fn correspondences(
        &self,
        tree: &TargetTree,
        source: &PointCloud,
        pose: &Pose,
    ) -> Vec<(Point3<f64>, Point3<f64>, f64)> {
        let max_d2 = self.config.max_correspondence_distance.powi(2);
        source
            .iter()
            .filter_map(|p| {
                let moved = pose.transform_point(&p.position);
                let nearest = tree.nearest_one::<SquaredEuclidean>(&[moved.x, moved.y, moved.z]);
                (nearest.distance <= max_d2).then(|| {
                    let target = self.target.points[nearest.item as usize].position;
                    (moved, target, nearest.distance)
                })
            })
            .collect()
    }
}

/// Closed-form rigid transform minimising `sum |R s + t - d|²` over the pairs.
fn kabsch(pairs: &[(Point3<f64>, Point3<f64>, f64)]) -> Result<Pose, RegistrationError> {
    let n = pairs.len() as f64;
    let source_centroid = pairs.iter().map(|(s, _, _)| s.coords).sum::<Vector3<f64>>() / n;
    let target_centroid = pairs.iter().map(|(_, t, _)| t.coords).sum::<Vector3<f64>>() / n;

    // H = sum (s - cs)(t - ct)^T
    let h: Matrix3<f64> = pairs
        .iter()
        .map(|(s, t, _)| (s.coords - source_centroid) * (t.coords - target_centroid).transpose())
        .sum();

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(RegistrationError::Degenerate("SVD of the cross-covariance failed"));
    };

    let mut v = v_t.transpose();
    let mut r = v * u.transpose();
    if r.determinant() < 0.0 {
        // Reflection: flip the axis of the smallest singular value.
        v.column_mut(2).neg_mut();
        r = v * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = target_centroid - rotation * source_centroid;
    Ok(Pose::from_parts(Translation3::from(translation), rotation))
}

impl Registration for IcpRegistration {
    fn set_target(&mut self, target: Arc<PointCloud>) {
        self.tree = if target.is_empty() {
            None
        } else {
            let coords: Vec<[f64; 3]> = target
                .iter()
                .map(|p| [p.position.x, p.position.y, p.position.z])
                .collect();
            Some((&*coords).into())
        };
        self.target = target;
    }

    /// `fitness` is the mean squared distance of the accepted pairs at the
    /// final pose.
    fn align(&self, source: &PointCloud, guess: &Pose) -> Result<Alignment, RegistrationError> {
        let tree = self.tree.as_ref().ok_or(RegistrationError::EmptyTarget)?;
        if source.is_empty() {
            return Err(RegistrationError::EmptySource);
        }

        let mut pose = *guess;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.config.max_iter {
            iterations += 1;
            let pairs = self.correspondences(tree, source, &pose);
            if pairs.len() < self.config.min_correspondences {
                return Err(RegistrationError::InsufficientCorrespondences {
                    found: pairs.len(),
                    required: self.config.min_correspondences,
                });
            }

            let delta = kabsch(&pairs)?;
            pose = delta * pose;

            let dt = delta.translation.vector.norm();
            let dr = delta.rotation.angle();
            trace!(iteration = iterations, pairs = pairs.len(), dt, dr, "icp step");
            if dt < self.config.trans_eps && dr < self.config.rot_eps {
                converged = true;
                break;
            }
        }

        let pairs = self.correspondences(tree, source, &pose);
        let fitness = if pairs.is_empty() {
            f64::INFINITY
        } else {
            pairs.iter().map(|(_, _, d2)| d2).sum::<f64>() / pairs.len() as f64
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
        "Icp"
    }
}
