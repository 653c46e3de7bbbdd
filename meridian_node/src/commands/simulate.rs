// meridian_node/src/commands/simulate.rs

//! Writes a synthetic, fully reproducible dataset:
//!
//! ```text
//! <out>/map.pcd             global map
//! <out>/scans/000000.pcd    one scan per frame, sensor frame
//! <out>/poses.txt           ground-truth poses (KITTI)
//! <out>/coarse_fixes.txt    ground truth plus GNSS-like noise (KITTI)
//! <out>/meridian.toml       a config that localizes against map.pcd
//! ```
//!
//! The world is a straight street: ground, two facades, poles and parked
//! boxes. Scans crop the map around each pose, add range noise and a few
//! invalid returns.

use crate::cli::SimulateArgs;
use crate::dataset::write_kitti_poses;
use anyhow::Context;
use meridian_core::config::{FilterConfig, LocalizationConfig};
use meridian_core::io::{write_pcd, PcdEncoding};
use meridian_core::messages::{Point, PointCloud};
use meridian_core::types::{pose_from_xyz_rpy, Pose};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::fs;
use std::path::Path;
use tracing::info;

// --- World & Sensor Parameters ---
const STEP: f64 = 1.5;
const SENSOR_HEIGHT: f64 = 1.8;
const SENSOR_RANGE: f64 = 40.0;
const STREET_HALF_WIDTH: f64 = 15.0;
const RANGE_NOISE_STDDEV: f64 = 0.02;
const FIX_NOISE_STDDEV: f64 = 0.3;
const FIX_YAW_NOISE_STDDEV: f64 = 0.01;
/// Fraction of returns replaced by NaN.
const INVALID_RETURN_RATIO: f64 = 0.002;

pub fn run(args: &SimulateArgs) -> anyhow::Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let out = args.out.as_path();
    let scans_dir = out.join("scans");
    fs::create_dir_all(&scans_dir)
        .with_context(|| format!("failed to create {}", scans_dir.display()))?;

    let truth = trajectory(args.frames);
    let map = synthetic_map(&mut rng, args.frames);
    write_pcd(out.join("map.pcd"), &map, PcdEncoding::Binary)?;
    info!(points = map.len(), frames = args.frames, seed = args.seed, "map written");

    let fix_noise = Normal::new(0.0, FIX_NOISE_STDDEV)?;
    let yaw_noise = Normal::new(0.0, FIX_YAW_NOISE_STDDEV)?;
    let mut fixes = Vec::with_capacity(truth.len());
    for (i, pose) in truth.iter().enumerate() {
        let mut scan = observe(&map, pose, &mut rng)?;
        scan.timestamp = i as f64 * 0.1;
        write_pcd(scans_dir.join(format!("{i:06}.pcd")), &scan, PcdEncoding::Binary)?;

        let t = pose.translation.vector;
        fixes.push(pose_from_xyz_rpy(
            t.x + fix_noise.sample(&mut rng),
            t.y + fix_noise.sample(&mut rng),
            t.z,
            0.0,
            0.0,
            yaw_noise.sample(&mut rng),
        ));
    }
    write_kitti_poses(&out.join("poses.txt"), &truth)?;
    write_kitti_poses(&out.join("coarse_fixes.txt"), &fixes)?;

    let config_path = out.join("meridian.toml");
    let config = toml::to_string_pretty(&dataset_config())
        .context("failed to serialize the generated config")?;
    fs::write(&config_path, config)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    info!(out = %out.display(), "synthetic dataset written");
    Ok(())
}

/// A config sized for the synthetic street, with paths relative to the dataset.
pub fn dataset_config() -> LocalizationConfig {
    let mut config = LocalizationConfig::with_map_path("map.pcd");
    config.region.half_extent = [60.0, 60.0, 30.0];
    config.refresh_margin = 20.0;
    config.filters.frame = FilterConfig::Voxel {
        leaf_size: [0.5, 0.5, 0.5],
    };
    config
}

/// Drives along +x at sensor height, one pose every `STEP`.
pub fn trajectory(frames: usize) -> Vec<Pose> {
    (0..frames)
        .map(|i| pose_from_xyz_rpy(i as f64 * STEP, 0.0, SENSOR_HEIGHT, 0.0, 0.0, 0.0))
        .collect()
}

/// The street around a trajectory of `frames` poses, with margin on both ends.
pub fn synthetic_map(rng: &mut ChaCha8Rng, frames: usize) -> PointCloud {
    let x_min = -SENSOR_RANGE;
    let x_max = frames as f64 * STEP + SENSOR_RANGE;
    let length = x_max - x_min;
    let mut points = Vec::new();

    // ground
    let ground = (length * 2.0 * STREET_HALF_WIDTH * 3.0) as usize;
    for _ in 0..ground {
        let x = rng.gen_range(x_min..x_max);
        let y = rng.gen_range(-STREET_HALF_WIDTH..STREET_HALF_WIDTH);
        points.push(Point::new(x, y, rng.gen_range(-0.03..0.03)).with_intensity(10.0));
    }

    // facades, with recessed doorways every ~12 m so the walls are not featureless
    for side in [-1.0, 1.0] {
        let facade = (length * 8.0 * 3.0) as usize;
        for _ in 0..facade {
            let x = rng.gen_range(x_min..x_max);
            let z = rng.gen_range(0.0..8.0);
            let recess = if (x / 12.0).fract().abs() < 0.2 && z < 3.0 { 1.0 } else { 0.0 };
            let y = side * (STREET_HALF_WIDTH + recess) + rng.gen_range(-0.03..0.03);
            points.push(Point::new(x, y, z).with_intensity(40.0));
        }
    }

    // poles
    let poles = (length / 6.0) as usize;
    for _ in 0..poles {
        let cx = rng.gen_range(x_min..x_max);
        let cy = rng.gen_range(-STREET_HALF_WIDTH + 1.0..STREET_HALF_WIDTH - 1.0);
        if cy.abs() < 4.0 {
            // keep the driving lane clear
            continue;
        }
        for _ in 0..200 {
            let angle = rng.gen_range(0.0..std::f64::consts::TAU);
            let z = rng.gen_range(0.0..6.0);
            points.push(
                Point::new(cx + 0.15 * angle.cos(), cy + 0.15 * angle.sin(), z)
                    .with_intensity(80.0),
            );
        }
    }

    // parked boxes
    let boxes = (length / 10.0) as usize;
    for _ in 0..boxes {
        let cx = rng.gen_range(x_min..x_max);
        let cy = if rng.gen_bool(0.5) { -10.0 } else { 10.0 };
        let half = [2.0, 0.9, 0.75];
        for _ in 0..400 {
            let mut p = [
                rng.gen_range(-half[0]..half[0]),
                rng.gen_range(-half[1]..half[1]),
                rng.gen_range(-half[2]..half[2]),
            ];
            // push the sample onto one of the faces
            let axis = rng.gen_range(0..3);
            p[axis] = if rng.gen_bool(0.5) { half[axis] } else { -half[axis] };
            points.push(Point::new(cx + p[0], cy + p[1], half[2] + p[2]).with_intensity(60.0));
        }
    }

    PointCloud::new(0.0, points)
}

/// What a sensor at `pose` would see: map points in range, expressed in the
/// sensor frame, jittered along the ray, with a sprinkle of NaN returns.
pub fn observe(map: &PointCloud, pose: &Pose, rng: &mut ChaCha8Rng) -> anyhow::Result<PointCloud> {
    let noise = Normal::new(0.0, RANGE_NOISE_STDDEV)?;
    let inverse = pose.inverse();
    let mut points = Vec::new();
    for point in map.iter() {
        let local = inverse * point.position;
        let range = local.coords.norm();
        if range > SENSOR_RANGE || range < 1.0 {
            continue;
        }
        if rng.gen_bool(INVALID_RETURN_RATIO) {
            points.push(Point::new(f64::NAN, f64::NAN, f64::NAN));
            continue;
        }
        let jittered = local.coords * (1.0 + noise.sample(rng) / range);
        points.push(Point {
            position: jittered.into(),
            intensity: point.intensity,
        });
    }
    Ok(PointCloud::new(0.0, points))
}
