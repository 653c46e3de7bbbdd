// meridian_core/src/config.rs

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # LocalizationConfig
/// Everything `Localizer::new` needs. Usually parsed from a TOML file by the
/// host; every algorithm choice is a closed, tagged enum so that an unknown
/// method name fails at parse time rather than mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct LocalizationConfig {
    /// Path to the serialized global map (PCD).
    pub map_path: PathBuf,

    /// Distance (map units) the platform may come to a local-map edge before
    /// the window is recentred.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: f64,

    /// Number of coarse fixes that must be exceeded before tracking is declared.
    /// A confidence heuristic, not a derived bound.
    #[serde(default = "default_coarse_fix_threshold")]
    pub coarse_fix_threshold: u32,

    /// Whether coarse fixes keep overwriting the stored coarse pose once tracking.
    #[serde(default)]
    pub coarse_fix_overwrite: CoarseFixOverwrite,

    #[serde(default)]
    pub region: RegionConfig,

    #[serde(default)]
    pub filters: FilterSet,

    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Optional prebuilt place-recognition index. Without it, place-recognition
    /// initialization always reports failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_recognition: Option<PlaceRecognitionConfig>,
}

fn default_refresh_margin() -> f64 {
    50.0
}

fn default_coarse_fix_threshold() -> u32 {
    3
}

impl LocalizationConfig {
    /// A configuration with every default applied and the given map.
    pub fn with_map_path(map_path: impl Into<PathBuf>) -> Self {
        Self {
            map_path: map_path.into(),
            refresh_margin: default_refresh_margin(),
            coarse_fix_threshold: default_coarse_fix_threshold(),
            coarse_fix_overwrite: CoarseFixOverwrite::default(),
            region: RegionConfig::default(),
            filters: FilterSet::default(),
            registration: RegistrationConfig::default(),
            place_recognition: None,
        }
    }

    /// Checks numeric ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.refresh_margin.is_finite() && self.refresh_margin >= 0.0) {
            return Err(invalid(
                "refresh_margin",
                format!("must be a finite, non-negative distance, got {}", self.refresh_margin),
            ));
        }
        if self.coarse_fix_threshold == 0 {
            return Err(invalid("coarse_fix_threshold", "must be at least 1".into()));
        }
        self.region.validate()?;
        self.filters.global_map.validate("filters.global_map")?;
        self.filters.local_map.validate("filters.local_map")?;
        self.filters.frame.validate("filters.frame")?;
        self.registration.validate()?;
        if let Some(place_recognition) = &self.place_recognition {
            place_recognition.validate()?;
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

fn ensure_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite and > 0, got {value}")))
    }
}

// =========================================================================
// == Initialization Policy ==
// =========================================================================

/// What happens to the stored coarse pose when fixes keep arriving after
/// tracking has been declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoarseFixOverwrite {
    /// Every fix overwrites the stored coarse pose, whatever the state.
    #[default]
    Always,
    /// Fixes stop overwriting the stored coarse pose once tracking.
    UntilTracking,
}

// =========================================================================
// == Local Map Region ==
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    /// Half-size of the local-map box along [x, y, z], in map units.
    pub half_extent: [f64; 3],
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            half_extent: [150.0, 150.0, 150.0],
        }
    }
}

impl RegionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for value in self.half_extent {
            ensure_positive("region.half_extent", value)?;
        }
        Ok(())
    }
}

// =========================================================================
// == Filters ==
// =========================================================================

/// One downsampling filter per role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSet {
    /// Applied once to the global map to produce the display copy.
    #[serde(default = "default_global_map_filter")]
    pub global_map: FilterConfig,
    /// Applied once to the global map at load; sets the matching resolution.
    #[serde(default = "default_local_map_filter")]
    pub local_map: FilterConfig,
    /// Applied to every incoming scan before registration.
    #[serde(default = "default_frame_filter")]
    pub frame: FilterConfig,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            global_map: default_global_map_filter(),
            local_map: default_local_map_filter(),
            frame: default_frame_filter(),
        }
    }
}

fn default_global_map_filter() -> FilterConfig {
    FilterConfig::Voxel {
        leaf_size: [0.9, 0.9, 0.9],
    }
}

fn default_local_map_filter() -> FilterConfig {
    FilterConfig::Voxel {
        leaf_size: [0.5, 0.5, 0.5],
    }
}

fn default_frame_filter() -> FilterConfig {
    FilterConfig::Voxel {
        leaf_size: [1.5, 1.5, 1.5],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")] // The "type" field in TOML determines the variant
#[serde(rename_all = "PascalCase")]
pub enum FilterConfig {
    /// Pass-through: the output equals the input.
    None,
    /// Replaces the points of every occupied voxel with their centroid.
    Voxel { leaf_size: [f64; 3] },
}

impl FilterConfig {
    pub fn get_type_str(&self) -> &str {
        match self {
            FilterConfig::None => "None",
            FilterConfig::Voxel { .. } => "Voxel",
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        match self {
            FilterConfig::None => Ok(()),
            FilterConfig::Voxel { leaf_size } => {
                for value in leaf_size {
                    ensure_positive(field, *value)?;
                }
                Ok(())
            }
        }
    }
}

// =========================================================================
// == Registration ==
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationConfig {
    Icp(IcpConfig),
    Ndt(NdtConfig),
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig::Ndt(NdtConfig::default())
    }
}

impl RegistrationConfig {
    pub fn get_type_str(&self) -> &str {
        match self {
            RegistrationConfig::Icp(_) => "Icp",
            RegistrationConfig::Ndt(_) => "Ndt",
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            RegistrationConfig::Icp(c) => {
                ensure_positive(
                    "registration.max_correspondence_distance",
                    c.max_correspondence_distance,
                )?;
                ensure_positive("registration.trans_eps", c.trans_eps)?;
                ensure_positive("registration.rot_eps", c.rot_eps)?;
                if c.max_iter == 0 {
                    return Err(invalid("registration.max_iter", "must be at least 1".into()));
                }
                if c.min_correspondences < 3 {
                    return Err(invalid(
                        "registration.min_correspondences",
                        format!("a rigid fit needs at least 3, got {}", c.min_correspondences),
                    ));
                }
                Ok(())
            }
            RegistrationConfig::Ndt(c) => {
                ensure_positive("registration.resolution", c.resolution)?;
                ensure_positive("registration.step_size", c.step_size)?;
                ensure_positive("registration.trans_eps", c.trans_eps)?;
                if c.max_iter == 0 {
                    return Err(invalid("registration.max_iter", "must be at least 1".into()));
                }
                if !(c.outlier_ratio > 0.0 && c.outlier_ratio < 1.0) {
                    return Err(invalid(
                        "registration.outlier_ratio",
                        format!("must lie in (0, 1), got {}", c.outlier_ratio),
                    ));
                }
                if c.min_points_per_voxel < 4 {
                    return Err(invalid(
                        "registration.min_points_per_voxel",
                        format!("a 3D covariance needs at least 4, got {}", c.min_points_per_voxel),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Point-to-point ICP parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcpConfig {
    /// Point pairs farther apart than this are rejected as outliers.
    #[serde(default = "default_icp_max_correspondence_distance")]
    pub max_correspondence_distance: f64,
    #[serde(default = "default_icp_max_iter")]
    pub max_iter: u32,
    /// Converged once an iteration moves the pose less than this (map units).
    #[serde(default = "default_icp_eps")]
    pub trans_eps: f64,
    /// Converged once an iteration rotates the pose less than this (radians).
    #[serde(default = "default_icp_eps")]
    pub rot_eps: f64,
    #[serde(default = "default_icp_min_correspondences")]
    pub min_correspondences: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_correspondence_distance: default_icp_max_correspondence_distance(),
            max_iter: default_icp_max_iter(),
            trans_eps: default_icp_eps(),
            rot_eps: default_icp_eps(),
            min_correspondences: default_icp_min_correspondences(),
        }
    }
}

fn default_icp_max_correspondence_distance() -> f64 {
    1.0
}
fn default_icp_max_iter() -> u32 {
    50
}
fn default_icp_eps() -> f64 {
    1e-4
}
fn default_icp_min_correspondences() -> usize {
    10
}

/// Normal Distributions Transform parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NdtConfig {
    /// Edge length of the target voxels, in map units.
    #[serde(default = "default_ndt_resolution")]
    pub resolution: f64,
    /// Maximum length of a single pose update (6-vector norm).
    #[serde(default = "default_ndt_step_size")]
    pub step_size: f64,
    /// Converged once an update is shorter than this.
    #[serde(default = "default_ndt_trans_eps")]
    pub trans_eps: f64,
    #[serde(default = "default_ndt_max_iter")]
    pub max_iter: u32,
    /// Expected fraction of outliers in the source, shapes the score function.
    #[serde(default = "default_ndt_outlier_ratio")]
    pub outlier_ratio: f64,
    /// Voxels with fewer target points carry no distribution.
    #[serde(default = "default_ndt_min_points_per_voxel")]
    pub min_points_per_voxel: usize,
}

impl Default for NdtConfig {
    fn default() -> Self {
        Self {
            resolution: default_ndt_resolution(),
            step_size: default_ndt_step_size(),
            trans_eps: default_ndt_trans_eps(),
            max_iter: default_ndt_max_iter(),
            outlier_ratio: default_ndt_outlier_ratio(),
            min_points_per_voxel: default_ndt_min_points_per_voxel(),
        }
    }
}

fn default_ndt_resolution() -> f64 {
    1.0
}
fn default_ndt_step_size() -> f64 {
    0.1
}
fn default_ndt_trans_eps() -> f64 {
    0.01
}
fn default_ndt_max_iter() -> u32 {
    30
}
fn default_ndt_outlier_ratio() -> f64 {
    0.55
}
fn default_ndt_min_points_per_voxel() -> usize {
    5
}

// =========================================================================
// == Place Recognition ==
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "PascalCase")]
pub enum PlaceRecognitionConfig {
    ScanContext {
        /// JSON index produced by `ScanContextIndex::save`.
        index_path: PathBuf,
        /// How many nearest ring keys are compared in full.
        #[serde(default = "default_num_candidates")]
        num_candidates: usize,
        /// Maximum column-shift cosine distance accepted as a match.
        #[serde(default = "default_distance_threshold")]
        distance_threshold: f64,
    },
}

fn default_num_candidates() -> usize {
    10
}

fn default_distance_threshold() -> f64 {
    0.2
}

impl PlaceRecognitionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PlaceRecognitionConfig::ScanContext {
                num_candidates,
                distance_threshold,
                ..
            } => {
                if *num_candidates == 0 {
                    return Err(invalid(
                        "place_recognition.num_candidates",
                        "must be at least 1".into(),
                    ));
                }
                ensure_positive("place_recognition.distance_threshold", *distance_threshold)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = LocalizationConfig::with_map_path("map.pcd");
        assert_eq!(config.refresh_margin, 50.0);
        assert_eq!(config.coarse_fix_threshold, 3);
        assert_eq!(config.coarse_fix_overwrite, CoarseFixOverwrite::Always);
        assert_eq!(config.registration.get_type_str(), "Ndt");
        assert_eq!(config.filters.frame.get_type_str(), "Voxel");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_half_extent() {
        let mut config = LocalizationConfig::with_map_path("map.pcd");
        config.region.half_extent = [60.0, 0.0, 60.0];
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "region.half_extent",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_coarse_fix_threshold() {
        let mut config = LocalizationConfig::with_map_path("map.pcd");
        config.coarse_fix_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_voxel_leaf() {
        let mut config = LocalizationConfig::with_map_path("map.pcd");
        config.filters.frame = FilterConfig::Voxel {
            leaf_size: [1.0, -1.0, 1.0],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_outlier_ratio() {
        let mut config = LocalizationConfig::with_map_path("map.pcd");
        config.registration = RegistrationConfig::Ndt(NdtConfig {
            outlier_ratio: 1.0,
            ..NdtConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_few_icp_correspondences() {
        let mut config = LocalizationConfig::with_map_path("map.pcd");
        config.registration = RegistrationConfig::Icp(IcpConfig {
            min_correspondences: 2,
            ..IcpConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_tagged_variants_from_json() {
        let text = r#"{
            "map_path": "data/map.pcd",
            "coarse_fix_overwrite": "UntilTracking",
            "region": { "half_extent": [60.0, 60.0, 10.0] },
            "filters": { "frame": { "type": "None" } },
            "registration": { "type": "Icp", "max_iter": 20 },
            "place_recognition": { "type": "ScanContext", "index_path": "sc.json" }
        }"#;
        let config: LocalizationConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.coarse_fix_overwrite, CoarseFixOverwrite::UntilTracking);
        assert_eq!(config.filters.frame, FilterConfig::None);
        // Unspecified roles fall back to their own defaults.
        assert_eq!(config.filters.local_map, default_local_map_filter());
        match &config.registration {
            RegistrationConfig::Icp(icp) => {
                assert_eq!(icp.max_iter, 20);
                assert_eq!(icp.min_correspondences, 10);
            }
            other => panic!("expected Icp, got {other:?}"),
        }
        match config.place_recognition {
            Some(PlaceRecognitionConfig::ScanContext {
                num_candidates,
                distance_threshold,
                ..
            }) => {
                assert_eq!(num_candidates, 10);
                assert_eq!(distance_threshold, 0.2);
            }
            None => panic!("place recognition should be configured"),
        }
    }

    #[test]
    fn unknown_method_name_is_a_parse_error() {
        let text = r#"{ "map_path": "m.pcd", "registration": { "type": "Gicp" } }"#;
        assert!(serde_json::from_str::<LocalizationConfig>(text).is_err());
    }
}
