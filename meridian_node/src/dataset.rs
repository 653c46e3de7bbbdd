// meridian_node/src/dataset.rs

//! Recorded data on disk: scan directories and KITTI-format pose files.
//!
//! A KITTI pose file holds one pose per line as the 12 row-major values of
//! the top 3×4 block of the homogeneous transform.

use anyhow::{bail, ensure, Context};
use meridian_core::types::{pose_from_row_major_3x4, pose_to_row_major_3x4, Pose};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every `*.pcd` file directly inside `dir`, sorted by file name.
pub fn list_scans(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    ensure!(dir.is_dir(), "scan directory not found at {}", dir.display());

    let mut scans = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().map_or(false, |ext| ext == "pcd")
        {
            scans.push(entry.into_path());
        }
    }
    Ok(scans)
}

pub fn read_kitti_poses(path: &Path) -> anyhow::Result<Vec<Pose>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read poses from {}", path.display()))?;
    parse_kitti_poses(&text).with_context(|| format!("malformed pose file {}", path.display()))
}

/// Parses KITTI rows; blank lines are skipped.
pub fn parse_kitti_poses(text: &str) -> anyhow::Result<Vec<Pose>> {
    let mut poses = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut values = [0.0; 12];
        let mut count = 0;
        for token in line.split_whitespace() {
            if count == values.len() {
                bail!("line {}: more than 12 values", line_no + 1);
            }
            values[count] = token
                .parse()
                .with_context(|| format!("line {}: `{token}` is not a number", line_no + 1))?;
            count += 1;
        }
        ensure!(count == 12, "line {}: expected 12 values, found {count}", line_no + 1);
        poses.push(pose_from_row_major_3x4(&values));
    }
    Ok(poses)
}

pub fn write_kitti_poses(path: &Path, poses: &[Pose]) -> anyhow::Result<()> {
    fs::write(path, format_kitti_poses(poses))
        .with_context(|| format!("failed to write poses to {}", path.display()))
}

pub fn format_kitti_poses(poses: &[Pose]) -> String {
    let mut out = String::new();
    for pose in poses {
        let row: Vec<String> = pose_to_row_major_3x4(pose)
            .iter()
            .map(|v| format!("{v:.9e}"))
            .collect();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{}", row.join(" "));
    }
    out
}
