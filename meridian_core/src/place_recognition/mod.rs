// meridian_core/src/place_recognition/mod.rs

use crate::config::PlaceRecognitionConfig;
use crate::error::PlaceRecognitionError;
use crate::messages::PointCloud;
use crate::types::Pose;
use tracing::info;

/// A coarse pose proposal for the current scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceMatch {
    /// Proposed sensor pose in the map frame.
    pub pose: Pose,
    /// Index of the matched key frame.
    pub key_frame: usize,
    /// Descriptor distance of the match; lower is better.
    pub distance: f64,
    /// Heading offset (radians) recovered between the scan and the key frame.
    pub yaw: f64,
}

// --- The Place-Recognition Contract ---
/// The contract for any prebuilt index that can propose a global pose from
/// a single scan.
pub trait PlaceRecognizer: Send + Sync {
    /// `None` when no stored place is close enough to the scan.
    fn query(&self, scan: &PointCloud) -> Option<PlaceMatch>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl PlaceRecognitionConfig {
    /// Loads the configured index from disk.
    pub fn build(&self) -> Result<Box<dyn PlaceRecognizer>, PlaceRecognitionError> {
        match self {
            PlaceRecognitionConfig::ScanContext {
                index_path,
                num_candidates,
                distance_threshold,
            } => {
                let index = ScanContextIndex::load(index_path)?
                    .with_search(*num_candidates, *distance_threshold);
                info!(
                    path = %index_path.display(),
                    key_frames = index.len(),
                    "loaded scan context index"
                );
                Ok(Box::new(index))
            }
        }
    }
}

// --- Declare the implementation sub-modules ---
mod scan_context;

// --- Re-export the public structs for a clean API ---
pub use scan_context::{ScanContextIndex, ScanContextParams};
