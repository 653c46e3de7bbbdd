// meridian_node/src/commands/build_index.rs

use crate::cli::BuildIndexArgs;
use crate::dataset::{list_scans, read_kitti_poses};
use anyhow::{ensure, Context};
use meridian_core::io::read_pcd;
use meridian_core::place_recognition::{ScanContextIndex, ScanContextParams};
use tracing::{debug, info};

pub fn run(args: &BuildIndexArgs) -> anyhow::Result<()> {
    let scans = list_scans(&args.scans)?;
    let poses = read_kitti_poses(&args.poses)?;
    ensure!(
        scans.len() == poses.len(),
        "{} scans but {} poses; every scan needs exactly one pose",
        scans.len(),
        poses.len()
    );

    let every = usize::try_from(args.every).context("--every is too large")?;
    let mut index = ScanContextIndex::new(ScanContextParams::default())?;
    for (path, pose) in scans.iter().zip(&poses).step_by(every) {
        let (scan, dropped) = read_pcd(path)
            .with_context(|| format!("failed to read scan {}", path.display()))?
            .into_finite();
        debug!(scan = %path.display(), points = scan.len(), dropped, "key frame");
        index.add_key_frame(&scan, *pose);
    }

    index
        .save(&args.out)
        .with_context(|| format!("failed to write index to {}", args.out.display()))?;
    info!(
        key_frames = index.len(),
        scans = scans.len(),
        out = %args.out.display(),
        "scan context index written"
    );
    Ok(())
}
