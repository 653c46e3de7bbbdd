// meridian_core/src/filtering/mod.rs

use crate::config::FilterConfig;
use crate::messages::PointCloud;

// --- The Downsampling Contract ---
/// The contract for any algorithm that performs the "downsampling" role.
/// Given a cloud, it returns a new, reduced-density cloud that preserves
/// spatial coverage. The input is never modified.
pub trait CloudFilter: std::fmt::Debug + Send + Sync {
    fn filter(&self, cloud: &PointCloud) -> PointCloud;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl FilterConfig {
    /// Resolves this configuration into a concrete filter, once, at startup.
    pub fn build(&self) -> Box<dyn CloudFilter> {
        match self {
            FilterConfig::None => Box::new(NoneFilter),
            FilterConfig::Voxel { leaf_size } => Box::new(VoxelFilter::new(*leaf_size)),
        }
    }
}

// --- Declare the implementation sub-modules ---
mod none;
mod region;
mod voxel;

// --- Re-export the public structs for a clean API ---
pub use none::NoneFilter;
pub use region::{Region, RegionFilter};
pub use voxel::VoxelFilter;
