// meridian_core/src/localization/predictor.rs

use crate::types::Pose;

/// # PosePredictor
/// Constant-relative-motion extrapolation used to seed registration.
///
/// After each refined pose `P`:
///
/// ```text
/// step      = last⁻¹ · P    // motion of the last cycle, in last's frame
/// predicted = P · step      // the same motion applied once more
/// last      = P
/// ```
///
/// No uncertainty is tracked. Both poses start at identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosePredictor {
    last: Pose,
    predicted: Pose,
}

impl Default for PosePredictor {
    fn default() -> Self {
        Self::new(Pose::identity())
    }
}

impl PosePredictor {
    /// A predictor at rest at `pose`.
    pub fn new(pose: Pose) -> Self {
        Self {
            last: pose,
            predicted: pose,
        }
    }

    /// Forgets the motion history and rests at `pose`.
    pub fn seed(&mut self, pose: Pose) {
        *self = Self::new(pose);
    }

    /// Folds in a refined pose and returns the new prediction.
    pub fn observe(&mut self, refined: &Pose) -> Pose {
        let step = self.last.inverse() * refined;
        self.predicted = refined * step;
        self.last = *refined;
        self.predicted
    }

    pub fn last(&self) -> &Pose {
        &self.last
    }

    pub fn predicted(&self) -> &Pose {
        &self.predicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pose_from_xyz_rpy;
    use approx::assert_abs_diff_eq;

    #[test]
    fn starts_at_identity() {
        let predictor = PosePredictor::default();
        assert_eq!(*predictor.last(), Pose::identity());
        assert_eq!(*predictor.predicted(), Pose::identity());
    }

    #[test]
    fn zero_motion_predicts_the_same_pose() {
        let pose = pose_from_xyz_rpy(4.0, -1.0, 0.5, 0.01, 0.02, 1.3);
        let mut predictor = PosePredictor::new(pose);
        for _ in 0..5 {
            let predicted = predictor.observe(&pose);
            assert_abs_diff_eq!(
                predicted.to_homogeneous(),
                pose.to_homogeneous(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn extrapolates_a_constant_body_frame_motion() {
        // Drive forward while turning: the increment is fixed in the body frame.
        let increment = pose_from_xyz_rpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.1);
        let start = pose_from_xyz_rpy(10.0, 5.0, 0.0, 0.0, 0.0, 0.7);
        let mut predictor = PosePredictor::new(start);

        let mut truth = start;
        for _ in 0..4 {
            truth *= increment;
            predictor.observe(&truth);
        }
        let expected = truth * increment;
        assert_abs_diff_eq!(
            predictor.predicted().to_homogeneous(),
            expected.to_homogeneous(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn seed_forgets_history() {
        let mut predictor = PosePredictor::default();
        predictor.observe(&pose_from_xyz_rpy(1.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        let fix = pose_from_xyz_rpy(100.0, 200.0, 3.0, 0.0, 0.0, 0.0);
        predictor.seed(fix);
        assert_eq!(*predictor.last(), fix);
        assert_eq!(*predictor.predicted(), fix);
    }
}
