// meridian_core/src/place_recognition/scan_context.rs

//! Scan Context place recognition (Kim & Kim, 2018).
//!
//! A scan is summarized as a polar grid around the sensor: `rings` radial
//! bins by `sectors` angular bins, each cell holding the highest point that
//! fell into it (offset by the sensor mount height). Rotating the sensor
//! about z only shifts the grid's columns, so two descriptors are compared
//! under every column shift and the best shift also yields the heading
//! difference.
//!
//! Lookup is two-stage: the rotation-invariant ring key (per-ring occupancy)
//! preselects candidates, the full descriptor decides.

use crate::error::PlaceRecognitionError;
use crate::messages::PointCloud;
use crate::place_recognition::{PlaceMatch, PlaceRecognizer};
use crate::types::{pose_from_row_major_3x4, pose_to_row_major_3x4, Pose};
use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fs;
use std::path::Path;
use tracing::debug;

// =========================================================================
// == Parameters ==
// =========================================================================

/// Geometry of the polar grid. Stored inside the index file so that a
/// query is always described the same way as the key frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanContextParams {
    pub rings: usize,
    pub sectors: usize,
    /// Points farther than this (horizontally) are ignored.
    pub max_radius: f64,
    /// Added to every z so that ground returns register as occupied.
    pub lidar_height: f64,
}

impl Default for ScanContextParams {
    fn default() -> Self {
        Self {
            rings: 20,
            sectors: 60,
            max_radius: 80.0,
            lidar_height: 2.0,
        }
    }
}

// =========================================================================
// == Descriptor ==
// =========================================================================

/// Row-major `rings x sectors` grid.
#[derive(Debug, Clone, PartialEq)]
struct Descriptor {
    cells: Vec<f64>,
    ring_key: Vec<f64>,
}

impl Descriptor {
    fn from_scan(scan: &PointCloud, params: &ScanContextParams) -> Self {
        let mut cells = vec![0.0_f64; params.rings * params.sectors];
        for p in scan.iter().filter(|p| p.is_finite()) {
            let (x, y, z) = (p.position.x, p.position.y, p.position.z);
            let radius = x.hypot(y);
            if radius <= 0.0 || radius > params.max_radius {
                continue;
            }
            let ring = ((radius / params.max_radius * params.rings as f64) as usize)
                .min(params.rings - 1);
            let angle = y.atan2(x).rem_euclid(TAU);
            let sector =
                ((angle / TAU * params.sectors as f64) as usize).min(params.sectors - 1);

            let cell = &mut cells[ring * params.sectors + sector];
            *cell = cell.max(z + params.lidar_height);
        }
        Self::from_cells(cells, params)
    }

    fn from_cells(cells: Vec<f64>, params: &ScanContextParams) -> Self {
        let ring_key = cells
            .chunks(params.sectors)
            .map(|ring| ring.iter().filter(|&&v| v > 0.0).count() as f64 / params.sectors as f64)
            .collect();
        Self { cells, ring_key }
    }

    fn column(&self, sector: usize, params: &ScanContextParams) -> Column {
        Column(
            (0..params.rings)
                .map(|ring| self.cells[ring * params.sectors + sector])
                .collect(),
        )
    }

    /// Column-shift cosine distance: `1 - mean cosine similarity` over the
    /// column pairs where both columns have returns. Query column `j` is
    /// compared to key column `(j + shift) % sectors`.
    fn distance_at(&self, key: &Descriptor, shift: usize, params: &ScanContextParams) -> f64 {
        let mut similarity = 0.0;
        let mut valid = 0usize;
        for j in 0..params.sectors {
            let a = self.column(j, params);
            let b = key.column((j + shift) % params.sectors, params);
            let (na, nb) = (a.norm(), b.norm());
            if na == 0.0 || nb == 0.0 {
                continue;
            }
            similarity += a.dot(&b) / (na * nb);
            valid += 1;
        }
        if valid == 0 {
            1.0
        } else {
            1.0 - similarity / valid as f64
        }
    }

    /// Best `(distance, shift)` over every column shift.
    fn best_alignment(&self, key: &Descriptor, params: &ScanContextParams) -> (f64, usize) {
        (0..params.sectors)
            .map(|shift| (self.distance_at(key, shift, params), shift))
            .fold((f64::INFINITY, 0), |best, cur| if cur.0 < best.0 { cur } else { best })
    }
}

/// A ring-length column of a descriptor.
struct Column(Vec<f64>);

impl Column {
    fn norm(&self) -> f64 {
        self.0.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn dot(&self, other: &Self) -> f64 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }
}

fn ring_key_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

// =========================================================================
// == Index ==
// =========================================================================

#[derive(Debug, Clone)]
struct KeyFrame {
    pose: Pose,
    descriptor: Descriptor,
}

/// # ScanContextIndex
/// Key frames of a previous traversal (sensor-frame scan + map pose),
/// searchable by descriptor.
#[derive(Debug, Clone)]
pub struct ScanContextIndex {
    params: ScanContextParams,
    key_frames: Vec<KeyFrame>,
    num_candidates: usize,
    distance_threshold: f64,
}

/// On-disk form of the index.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexFile {
    params: ScanContextParams,
    key_frames: Vec<KeyFrameRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyFrameRecord {
    /// Row-major 3x4 `[R | t]`.
    pose: [f64; 12],
    descriptor: Vec<f64>,
}

impl ScanContextParams {
    /// Rejects grids with no cells or a non-positive radius.
    pub fn validate(&self) -> Result<(), PlaceRecognitionError> {
        if self.rings == 0 || self.sectors == 0 || !(self.max_radius > 0.0) {
            return Err(PlaceRecognitionError::Inconsistent(format!(
                "degenerate grid {self:?}"
            )));
        }
        Ok(())
    }
}

impl ScanContextIndex {
    /// An empty index over the grid described by `params`.
    pub fn new(params: ScanContextParams) -> Result<Self, PlaceRecognitionError> {
        params.validate()?;
        Ok(Self {
            params,
            key_frames: Vec::new(),
            num_candidates: 10,
            distance_threshold: 0.2,
        })
    }

    /// Sets how many ring-key neighbours are compared in full and the
    /// largest distance still accepted as a match.
    pub fn with_search(mut self, num_candidates: usize, distance_threshold: f64) -> Self {
        self.num_candidates = num_candidates.max(1);
        self.distance_threshold = distance_threshold;
        self
    }

    pub fn params(&self) -> &ScanContextParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.key_frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_frames.is_empty()
    }

    /// Stores `scan` (sensor frame) taken at `pose` (map frame).
    pub fn add_key_frame(&mut self, scan: &PointCloud, pose: Pose) {
        self.key_frames.push(KeyFrame {
            pose,
            descriptor: Descriptor::from_scan(scan, &self.params),
        });
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PlaceRecognitionError> {
        let path = path.as_ref();
        let file = IndexFile {
            params: self.params,
            key_frames: self
                .key_frames
                .iter()
                .map(|k| KeyFrameRecord {
                    pose: pose_to_row_major_3x4(&k.pose),
                    descriptor: k.descriptor.cells.clone(),
                })
                .collect(),
        };
        let text = serde_json::to_string(&file).map_err(|source| PlaceRecognitionError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| PlaceRecognitionError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads an index written by [`ScanContextIndex::save`], with default
    /// search settings.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlaceRecognitionError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| PlaceRecognitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IndexFile =
            serde_json::from_str(&text).map_err(|source| PlaceRecognitionError::Format {
                path: path.to_path_buf(),
                source,
            })?;

        let params = file.params;
        let mut index = Self::new(params)?;
        let expected = params.rings * params.sectors;
        for (i, record) in file.key_frames.into_iter().enumerate() {
            if record.descriptor.len() != expected {
                return Err(PlaceRecognitionError::Inconsistent(format!(
                    "key frame {i} has {} cells, expected {expected}",
                    record.descriptor.len()
                )));
            }
            index.key_frames.push(KeyFrame {
                pose: pose_from_row_major_3x4(&record.pose),
                descriptor: Descriptor::from_cells(record.descriptor, &params),
            });
        }
        Ok(index)
    }

    /// Heading offset of a column shift, wrapped into (-pi, pi].
    fn shift_to_yaw(&self, shift: usize) -> f64 {
        let n = self.params.sectors as i64;
        let mut s = shift as i64;
        if s > n / 2 {
            s -= n;
        }
        s as f64 * TAU / n as f64
    }
}

impl PlaceRecognizer for ScanContextIndex {
    fn query(&self, scan: &PointCloud) -> Option<PlaceMatch> {
        if self.key_frames.is_empty() {
            return None;
        }
        let query = Descriptor::from_scan(scan, &self.params);

        // The index is small enough for a linear ring-key scan.
        let mut candidates: Vec<(f64, usize)> = self
            .key_frames
            .iter()
            .enumerate()
            .map(|(i, k)| (ring_key_distance(&query.ring_key, &k.descriptor.ring_key), i))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
        candidates.truncate(self.num_candidates);

        let (distance, shift, key_frame) = candidates
            .iter()
            .map(|&(_, i)| {
                let (d, s) = query.best_alignment(&self.key_frames[i].descriptor, &self.params);
                (d, s, i)
            })
            .fold((f64::INFINITY, 0, 0), |best, cur| if cur.0 < best.0 { cur } else { best });

        debug!(key_frame, distance, shift, "scan context best candidate");
        if distance >= self.distance_threshold {
            return None;
        }

        let yaw = self.shift_to_yaw(shift);
        let pose = self.key_frames[key_frame].pose
            * Isometry3::rotation(Vector3::new(0.0, 0.0, yaw));
        Some(PlaceMatch {
            pose,
            key_frame,
            distance,
            yaw,
        })
    }

    fn name(&self) -> &'static str {
        "ScanContext"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Point;
    use crate::types::pose_from_xyz_rpy;
    use approx::assert_abs_diff_eq;

    const SECTOR: f64 = TAU / 60.0;

    /// Points at sector centres so that whole-sector rotations map cells
    /// onto cells exactly. Only rings in `rings` are populated.
    fn scene(seed: usize, rings: std::ops::Range<usize>) -> PointCloud {
        let mut points = Vec::new();
        for ring in rings {
            let radius = (ring as f64 + 0.5) * 4.0;
            for sector in 0..60 {
                if (sector * 7 + ring * 3 + seed) % 5 == 0 {
                    continue;
                }
                let angle = (sector as f64 + 0.5) * SECTOR;
                let height = ((sector * 13 + ring * 5 + seed) % 11) as f64 * 0.5 - 1.0;
                points.push(Point::new(radius * angle.cos(), radius * angle.sin(), height));
            }
        }
        PointCloud::new(0.0, points)
    }

    fn rotate_z(cloud: &PointCloud, angle: f64) -> PointCloud {
        cloud.transformed(&Isometry3::rotation(Vector3::new(0.0, 0.0, angle)))
    }

    #[test]
    fn identical_scan_matches_with_zero_distance() {
        let scan = scene(1, 0..20);
        let desc = Descriptor::from_scan(&scan, &ScanContextParams::default());
        let (distance, shift) = desc.best_alignment(&desc, &ScanContextParams::default());
        assert_abs_diff_eq!(distance, 0.0, epsilon = 1e-12);
        assert_eq!(shift, 0);
    }

    #[test]
    fn ring_key_is_rotation_invariant() {
        let params = ScanContextParams::default();
        let scan = scene(2, 0..20);
        let a = Descriptor::from_scan(&scan, &params);
        let b = Descriptor::from_scan(&rotate_z(&scan, 11.0 * SECTOR), &params);
        assert_eq!(a.ring_key, b.ring_key);
    }

    #[test]
    fn recovers_heading_of_a_rotated_revisit() {
        let key_pose = pose_from_xyz_rpy(50.0, -20.0, 1.0, 0.0, 0.0, 0.4);
        let scan = scene(3, 0..20);
        let mut index = ScanContextIndex::new(ScanContextParams::default()).unwrap();
        index.add_key_frame(&scene(4, 0..20), pose_from_xyz_rpy(0.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        index.add_key_frame(&scan, key_pose);

        // Sensor yawed +3 sectors relative to the key frame sees the world
        // rotated the other way.
        let yaw = 3.0 * SECTOR;
        let found = index.query(&rotate_z(&scan, -yaw)).unwrap();
        assert_eq!(found.key_frame, 1);
        assert_abs_diff_eq!(found.yaw, yaw, epsilon = 1e-9);
        assert_abs_diff_eq!(
            found.pose.to_homogeneous(),
            (key_pose * Isometry3::rotation(Vector3::new(0.0, 0.0, yaw))).to_homogeneous(),
            epsilon = 1e-9
        );

        // Negative headings wrap instead of appearing as large positive shifts.
        let found = index.query(&rotate_z(&scan, 5.0 * SECTOR)).unwrap();
        assert_abs_diff_eq!(found.yaw, -5.0 * SECTOR, epsilon = 1e-9);
    }

    #[test]
    fn unrelated_scan_is_rejected() {
        let mut index = ScanContextIndex::new(ScanContextParams::default()).unwrap();
        index.add_key_frame(&scene(5, 0..10), Pose::identity());
        assert!(index.query(&scene(5, 10..20)).is_none());
        assert!(index.query(&PointCloud::default()).is_none());
    }

    #[test]
    fn empty_index_never_matches() {
        let index = ScanContextIndex::new(ScanContextParams::default()).unwrap();
        assert!(index.query(&scene(1, 0..20)).is_none());
    }

    #[test]
    fn save_and_load_preserve_matching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let key_pose = pose_from_xyz_rpy(3.0, 4.0, 0.0, 0.0, 0.0, -1.2);

        let mut index = ScanContextIndex::new(ScanContextParams::default()).unwrap();
        index.add_key_frame(&scene(6, 0..20), key_pose);
        index.save(&path).unwrap();

        let loaded = ScanContextIndex::load(&path).unwrap().with_search(5, 0.1);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.params(), &ScanContextParams::default());
        let found = loaded.query(&scene(6, 0..20)).unwrap();
        assert_abs_diff_eq!(
            found.pose.to_homogeneous(),
            key_pose.to_homogeneous(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn load_rejects_truncated_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"params":{"rings":2,"sectors":3,"max_radius":10.0,"lidar_height":2.0},
                "key_frames":[{"pose":[1,0,0,0, 0,1,0,0, 0,0,1,0],"descriptor":[1.0,2.0]}]}"#,
        )
        .unwrap();
        let err = ScanContextIndex::load(&path).unwrap_err();
        assert!(matches!(err, PlaceRecognitionError::Inconsistent(_)));
    }

    #[test]
    fn empty_grid_is_rejected_at_construction() {
        let no_rings = ScanContextParams {
            rings: 0,
            ..ScanContextParams::default()
        };
        assert!(matches!(
            ScanContextIndex::new(no_rings),
            Err(PlaceRecognitionError::Inconsistent(_))
        ));
        let no_radius = ScanContextParams {
            max_radius: 0.0,
            ..ScanContextParams::default()
        };
        assert!(ScanContextIndex::new(no_radius).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ScanContextIndex::load("/nonexistent/index.json").unwrap_err();
        assert!(matches!(err, PlaceRecognitionError::Io { .. }));
    }
}
