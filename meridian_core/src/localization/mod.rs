// meridian_core/src/localization/mod.rs

//! The map-relative localization loop.
//!
//! [`Localizer`] owns the global map, the local map window, the pose
//! predictor and the initialization arbiter, and runs the per-scan update:
//!
//! ```text
//! scan -> drop non-finite points -> downsample
//!      -> seed (coarse fix before tracking, prediction after)
//!      -> register against the local map
//!      -> publish the scan in the map frame
//!      -> update the predictor
//!      -> recentre the local map if the pose nears an edge
//! ```
//!
//! Everything here runs on the caller's thread, in scan order. Consumers on
//! other threads read results through [`LocalizationOutputs`].

mod initialization;
mod local_map;
mod predictor;

pub use initialization::{CoarseFixOutcome, InitState, InitializationArbiter};
pub use local_map::LocalMapWindow;
pub use predictor::PosePredictor;

use crate::config::LocalizationConfig;
use crate::error::{ConfigError, LocalizationError};
use crate::filtering::{CloudFilter, Region};
use crate::io::read_pcd;
use crate::messages::PointCloud;
use crate::place_recognition::PlaceRecognizer;
use crate::publish::LocalizationOutputs;
use crate::registration::Registration;
use crate::types::Pose;
use nalgebra::Point3;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one [`Localizer::update`].
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Refined sensor pose in the map frame.
    pub pose: Pose,
    pub converged: bool,
    pub fitness: f64,
    pub iterations: u32,
    /// The new region when this update recentred the local map.
    pub local_map_refreshed: Option<Region>,
    /// Finite points in the incoming scan.
    pub points_in: usize,
    /// Points left after downsampling, i.e. handed to registration.
    pub points_used: usize,
}

/// # Localizer
/// Estimates the sensor pose in a prebuilt map from a stream of scans.
pub struct Localizer {
    window: LocalMapWindow,
    registration: Box<dyn Registration>,
    frame_filter: Box<dyn CloudFilter>,
    place_recognizer: Option<Box<dyn PlaceRecognizer>>,
    arbiter: InitializationArbiter,
    predictor: PosePredictor,
    /// Whether any update has produced a pose yet.
    localized: bool,
    outputs: Arc<LocalizationOutputs>,
}

impl Localizer {
    /// Validates `config`, loads the global map from `config.map_path` and
    /// builds every configured component.
    pub fn new(config: &LocalizationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let map = read_pcd(&config.map_path).map_err(|source| ConfigError::MapLoad {
            path: config.map_path.clone(),
            source,
        })?;
        info!(
            path = %config.map_path.display(),
            points = map.len(),
            "global map loaded"
        );
        Self::from_map(config, map)
    }

    /// Like [`Localizer::new`] with an already loaded global map.
    /// `config.map_path` is only used in messages.
    pub fn from_map(config: &LocalizationConfig, map: PointCloud) -> Result<Self, ConfigError> {
        config.validate()?;

        let (map, dropped) = map.into_finite();
        if dropped > 0 {
            warn!(dropped, "global map contained non-finite points");
        }
        if map.is_empty() {
            return Err(ConfigError::EmptyMap(config.map_path.clone()));
        }

        let global_filter = config.filters.global_map.build();
        let local_filter = config.filters.local_map.build();
        let frame_filter = config.filters.frame.build();

        // The display copy is derived once; matching works on the map at
        // local-map resolution.
        let display_map = Arc::new(global_filter.filter(&map));
        let matching_map = Arc::new(local_filter.filter(&map));
        info!(
            points = map.len(),
            display = display_map.len(),
            matching = matching_map.len(),
            global_filter = global_filter.name(),
            local_filter = local_filter.name(),
            frame_filter = frame_filter.name(),
            "global map prepared"
        );

        let place_recognizer = config
            .place_recognition
            .as_ref()
            .map(|pr| pr.build())
            .transpose()?;

        let registration = config.registration.build();
        info!(
            registration = registration.name(),
            half_extent = ?config.region.half_extent,
            margin = config.refresh_margin,
            "localizer configured"
        );

        let outputs = Arc::new(LocalizationOutputs::default());
        outputs.global_map.publish(display_map);

        let mut localizer = Self {
            window: LocalMapWindow::new(
                matching_map,
                config.region.half_extent,
                config.refresh_margin,
            ),
            registration,
            frame_filter,
            place_recognizer,
            arbiter: InitializationArbiter::new(
                config.coarse_fix_threshold,
                config.coarse_fix_overwrite,
            ),
            predictor: PosePredictor::default(),
            localized: false,
            outputs,
        };
        localizer.reset_local_map_around(0.0, 0.0, 0.0);
        Ok(localizer)
    }

    /// Replaces the registration engine and points it at the current local map.
    pub fn with_registration(mut self, mut registration: Box<dyn Registration>) -> Self {
        registration.set_target(Arc::clone(self.window.local_map()));
        self.registration = registration;
        self
    }

    /// Replaces (or installs) the place-recognition index.
    pub fn with_place_recognizer(mut self, recognizer: Box<dyn PlaceRecognizer>) -> Self {
        self.place_recognizer = Some(recognizer);
        self
    }

    // --- Local Map ---

    /// Recentres the local map on `(x, y, z)`, re-targets registration and
    /// publishes the new local map. Returns the new region.
    pub fn reset_local_map_around(&mut self, x: f64, y: f64, z: f64) -> Region {
        let local = self.window.recenter(Point3::new(x, y, z));
        self.registration.set_target(Arc::clone(&local));
        self.outputs.local_map.publish(local);
        *self.window.region()
    }

    // --- Per-Scan Update ---

    /// Registers one raw scan (sensor frame) against the local map.
    ///
    /// Always attempts registration: before initialization the seed falls
    /// back to the latest coarse fix or identity. A registration failure is
    /// returned as an error and leaves the predictor and the published scan
    /// untouched; the caller decides whether to skip the frame or
    /// reinitialize.
    pub fn update(&mut self, scan: PointCloud) -> Result<UpdateReport, LocalizationError> {
        let (scan, dropped) = scan.into_finite();
        let filtered = self.frame_filter.filter(&scan);

        let guess = if self.arbiter.is_tracking() {
            *self.predictor.predicted()
        } else {
            self.arbiter.seed()
        };

        let alignment = self.registration.align(&filtered, &guess).map_err(|e| {
            warn!(
                error = %e,
                state = %self.arbiter.state(),
                points = filtered.len(),
                "registration failed"
            );
            e
        })?;
        let pose = alignment.pose;
        if !alignment.converged {
            warn!(
                iterations = alignment.iterations,
                fitness = alignment.fitness,
                "registration did not converge"
            );
        }

        self.outputs
            .current_scan
            .publish(Arc::new(scan.transformed(&pose)));

        self.predictor.observe(&pose);
        self.localized = true;

        let position = Point3::from(pose.translation.vector);
        let local_map_refreshed = self.window.refresh_trigger(&position).map(|axis| {
            debug!(%axis, "pose within refresh margin of the local map edge");
            self.reset_local_map_around(position.x, position.y, position.z)
        });

        debug!(
            timestamp = scan.timestamp,
            dropped,
            points_in = scan.len(),
            points_used = filtered.len(),
            iterations = alignment.iterations,
            fitness = alignment.fitness,
            x = pose.translation.x,
            y = pose.translation.y,
            z = pose.translation.z,
            "scan registered"
        );

        Ok(UpdateReport {
            pose,
            converged: alignment.converged,
            fitness: alignment.fitness,
            iterations: alignment.iterations,
            local_map_refreshed,
            points_in: scan.len(),
            points_used: filtered.len(),
        })
    }

    // --- Initialization ---

    /// Feeds one coarse absolute fix. Returns the resulting state.
    pub fn submit_coarse_fix(&mut self, pose: Pose) -> InitState {
        let outcome = self.arbiter.submit_coarse_fix(pose);
        if let Some(committed) = outcome.committed {
            self.set_initial_pose(&committed);
        } else if !self.localized && !self.arbiter.is_tracking() {
            self.predictor.seed(pose);
        }
        outcome.state
    }

    /// Asks the place-recognition index for a pose of `scan`. On a match
    /// the pose is committed and tracking starts; otherwise nothing changes
    /// and `false` is returned so the caller can retry with a later scan.
    pub fn submit_place_recognition(&mut self, scan: &PointCloud) -> bool {
        let Some(recognizer) = &self.place_recognizer else {
            warn!("place recognition requested but no index is configured");
            return false;
        };
        let (scan, _) = scan.clone().into_finite();
        let Some(found) = recognizer.query(&scan) else {
            debug!(state = %self.arbiter.state(), "no place recognition match");
            return false;
        };

        info!(
            key_frame = found.key_frame,
            distance = found.distance,
            yaw = found.yaw,
            x = found.pose.translation.x,
            y = found.pose.translation.y,
            z = found.pose.translation.z,
            "place recognized"
        );
        self.arbiter.accept_proposal(found.pose);
        self.set_initial_pose(&found.pose);
        true
    }

    /// Manual override: declare tracking without further evidence.
    pub fn mark_initialized(&mut self) {
        self.arbiter.mark_initialized();
    }

    fn set_initial_pose(&mut self, pose: &Pose) {
        let t = pose.translation.vector;
        self.reset_local_map_around(t.x, t.y, t.z);
        self.predictor.seed(*pose);
    }

    // --- Queries ---

    pub fn initial_pose(&self) -> Pose {
        *self.arbiter.initial_pose()
    }

    pub fn is_tracking(&self) -> bool {
        self.arbiter.is_tracking()
    }

    pub fn init_state(&self) -> InitState {
        self.arbiter.state()
    }

    pub fn predictor(&self) -> &PosePredictor {
        &self.predictor
    }

    pub fn region(&self) -> &Region {
        self.window.region()
    }

    /// Shared handle for consumers on other threads.
    pub fn outputs(&self) -> Arc<LocalizationOutputs> {
        Arc::clone(&self.outputs)
    }

    pub fn global_map_for_display(&self) -> Arc<PointCloud> {
        self.outputs.global_map_for_display()
    }

    pub fn local_map(&self) -> Arc<PointCloud> {
        self.outputs.local_map()
    }

    pub fn transformed_current_scan(&self) -> Arc<PointCloud> {
        self.outputs.transformed_current_scan()
    }

    pub fn has_new_global_map(&self) -> bool {
        self.outputs.has_new_global_map()
    }

    pub fn has_new_local_map(&self) -> bool {
        self.outputs.has_new_local_map()
    }
}
