// meridian_node/src/commands/localize.rs

//! Replays a directory of recorded scans through a [`Localizer`], the way a
//! live pipeline would feed it: initialization inputs first, then
//! `update` once per scan.

use crate::cli::{InitMode, LocalizeArgs};
use crate::config::load_localization_config;
use crate::dataset::{list_scans, read_kitti_poses, write_kitti_poses};
use anyhow::{ensure, Context};
use meridian_core::io::{read_pcd, write_pcd, PcdEncoding};
use meridian_core::localization::Localizer;
use meridian_core::types::Pose;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Counters reported at the end of a replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub scans: usize,
    pub registered: usize,
    pub failed: usize,
    pub not_converged: usize,
    pub local_map_refreshes: usize,
    /// Index of the first scan processed while tracking, if any.
    pub tracking_from: Option<usize>,
}

pub fn run(args: &LocalizeArgs) -> anyhow::Result<()> {
    let (trajectory, summary) = replay(args)?;
    if let Some(path) = &args.trajectory {
        write_kitti_poses(path, &trajectory)?;
        info!(path = %path.display(), poses = trajectory.len(), "trajectory written");
    }
    info!(
        scans = summary.scans,
        registered = summary.registered,
        failed = summary.failed,
        not_converged = summary.not_converged,
        refreshes = summary.local_map_refreshes,
        tracking_from = ?summary.tracking_from,
        "replay finished"
    );
    Ok(())
}

/// Runs the replay and returns one pose per scan plus the counters.
///
/// A scan whose registration fails keeps the previous pose in the
/// trajectory so rows stay aligned with the input.
pub fn replay(args: &LocalizeArgs) -> anyhow::Result<(Vec<Pose>, ReplaySummary)> {
    let config = load_localization_config(&args.config)?;
    let scans = list_scans(&args.scans)?;
    ensure!(!scans.is_empty(), "no .pcd scans found in {}", args.scans.display());

    let fixes = match args.init {
        InitMode::CoarseFix => {
            let path = args
                .coarse_fixes
                .as_deref()
                .context("--init coarse-fix needs --coarse-fixes <kitti.txt>")?;
            let fixes = read_kitti_poses(path)?;
            if fixes.len() < scans.len() {
                warn!(
                    fixes = fixes.len(),
                    scans = scans.len(),
                    "fewer coarse fixes than scans"
                );
            }
            fixes
        }
        InitMode::PlaceRecognition | InitMode::Manual => Vec::new(),
    };

    if let Some(dir) = &args.local_map_dir {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut localizer = Localizer::new(&config).context("failed to build the localizer")?;
    if args.init == InitMode::Manual {
        localizer.mark_initialized();
    }

    let mut summary = ReplaySummary {
        scans: scans.len(),
        ..ReplaySummary::default()
    };
    let mut trajectory = Vec::with_capacity(scans.len());
    let mut dumped = 0;

    for (i, path) in scans.iter().enumerate() {
        let scan = read_pcd(path).with_context(|| format!("failed to read scan {}", path.display()))?;

        if !localizer.is_tracking() {
            match args.init {
                InitMode::CoarseFix => {
                    if let Some(fix) = fixes.get(i) {
                        localizer.submit_coarse_fix(*fix);
                    }
                }
                InitMode::PlaceRecognition => {
                    localizer.submit_place_recognition(&scan);
                }
                InitMode::Manual => {}
            }
        }
        if localizer.is_tracking() && summary.tracking_from.is_none() {
            summary.tracking_from = Some(i);
        }

        match localizer.update(scan) {
            Ok(report) => {
                summary.registered += 1;
                if !report.converged {
                    summary.not_converged += 1;
                }
                if report.local_map_refreshed.is_some() {
                    summary.local_map_refreshes += 1;
                }
                trajectory.push(report.pose);
            }
            Err(e) => {
                summary.failed += 1;
                warn!(scan = %path.display(), error = %e, "scan skipped");
                trajectory.push(*localizer.predictor().last());
            }
        }

        if let Some(dir) = &args.local_map_dir {
            if localizer.has_new_local_map() {
                dump_local_map(dir, dumped, &localizer)?;
                dumped += 1;
            }
        }
    }

    Ok((trajectory, summary))
}

fn dump_local_map(dir: &Path, seq: usize, localizer: &Localizer) -> anyhow::Result<()> {
    let path = dir.join(format!("local_map_{seq:04}.pcd"));
    write_pcd(&path, &localizer.local_map(), PcdEncoding::Binary)
        .with_context(|| format!("failed to write {}", path.display()))
}
