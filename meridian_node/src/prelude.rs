// meridian_node/src/prelude.rs

// Re-export the entire meridian_core prelude so you can easily access
// pure types like `Pose`, `PointCloud`, `Localizer`, etc.
pub use meridian_core::prelude::*;

// Re-export common host-specific types.
pub use crate::cli::{Cli, Command, InitMode};
pub use crate::config::load_localization_config;
pub use crate::dataset::{list_scans, read_kitti_poses, write_kitti_poses};
