// meridian_core/src/types.rs

use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::fmt;

// --- Core Type Aliases ---

/// A rigid-body transform taking points from the sensor frame into the map frame.
///
/// The 4×4 homogeneous form is available through `Isometry3::to_homogeneous`.
/// Orthonormality of the rotation is a property of `UnitQuaternion`, so any
/// `Pose` built through nalgebra is a valid rigid transform by construction.
pub type Pose = Isometry3<f64>;

// --- Axis Identifier ---

/// One of the three Cartesian axes of the map frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in the order the refresh policy examines them.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// The component index of this axis in a `Vector3`/`Point3`.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

// =========================================================================
// == Pose Helpers ==
// =========================================================================

/// A pure translation, used when recentring on a position.
pub fn pose_from_xyz(x: f64, y: f64, z: f64) -> Pose {
    Isometry3::translation(x, y, z)
}

/// Builds a pose from a translation and roll/pitch/yaw angles in radians.
pub fn pose_from_xyz_rpy(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Pose {
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

/// Converts a homogeneous 4×4 matrix into a pose.
///
/// The upper-left 3×3 block is projected onto the nearest rotation, so
/// matrices carrying round-off from text files still yield a valid `Pose`.
pub fn pose_from_homogeneous(matrix: &Matrix4<f64>) -> Pose {
    let linear: Matrix3<f64> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
    let rotation = Rotation3::from_matrix(&linear);
    let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);
    Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_rotation_matrix(&rotation),
    )
}

/// Parses the twelve row-major values of a 3×4 `[R | t]` block (KITTI layout).
pub fn pose_from_row_major_3x4(values: &[f64; 12]) -> Pose {
    let mut matrix = Matrix4::identity();
    for row in 0..3 {
        for col in 0..4 {
            matrix[(row, col)] = values[row * 4 + col];
        }
    }
    pose_from_homogeneous(&matrix)
}

/// The inverse of [`pose_from_row_major_3x4`].
pub fn pose_to_row_major_3x4(pose: &Pose) -> [f64; 12] {
    let matrix = pose.to_homogeneous();
    let mut values = [0.0; 12];
    for row in 0..3 {
        for col in 0..4 {
            values[row * 4 + col] = matrix[(row, col)];
        }
    }
    values
}
