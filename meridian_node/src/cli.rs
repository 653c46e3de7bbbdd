// meridian_node/src/cli.rs

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Meridian: localize a LiDAR against a prebuilt point-cloud map.
///
/// This struct defines the command-line arguments accepted by the
/// `meridian` binary.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit newline-delimited JSON logs instead of human-readable lines.
    /// Verbosity follows `RUST_LOG` (default `info`).
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Replay recorded scans through the localizer and write the trajectory.
    Localize(LocalizeArgs),
    /// Build a Scan Context place-recognition index from posed scans.
    BuildIndex(BuildIndexArgs),
    /// Generate a synthetic map, scans and ground truth to try things out.
    Simulate(SimulateArgs),
}

/// How the localizer obtains its first pose.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Feed one coarse fix per scan (from `--coarse-fixes`) until tracking.
    CoarseFix,
    /// Query the configured place-recognition index with each scan until a match.
    PlaceRecognition,
    /// Start tracking at identity straight away.
    Manual,
}

#[derive(Args, Debug, Clone)]
pub struct LocalizeArgs {
    /// Localization config (TOML). Relative paths inside it resolve against
    /// the file's directory.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory of `*.pcd` scans, replayed in file-name order.
    #[arg(short, long)]
    pub scans: PathBuf,

    /// Coarse absolute fixes in KITTI format, one row per scan.
    #[arg(long)]
    pub coarse_fixes: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = InitMode::CoarseFix)]
    pub init: InitMode,

    /// Where to write the estimated trajectory (KITTI format).
    #[arg(short, long)]
    pub trajectory: Option<PathBuf>,

    /// Dump every published local map into this directory.
    #[arg(long)]
    pub local_map_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildIndexArgs {
    /// Directory of `*.pcd` scans, matched to poses in file-name order.
    #[arg(short, long)]
    pub scans: PathBuf,

    /// Map-frame pose of every scan (KITTI format).
    #[arg(short, long)]
    pub poses: PathBuf,

    /// Output JSON index.
    #[arg(short, long)]
    pub out: PathBuf,

    /// Keep every n-th scan as a key frame.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub every: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Output directory; created if missing.
    #[arg(short, long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of scans along the trajectory.
    #[arg(long, default_value_t = 20)]
    pub frames: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localize_defaults_to_coarse_fix_init() {
        let cli = Cli::try_parse_from([
            "meridian", "localize", "--config", "m.toml", "--scans", "scans",
        ])
        .unwrap();
        let Command::Localize(args) = cli.command else {
            panic!("expected localize");
        };
        assert_eq!(args.init, InitMode::CoarseFix);
        assert!(args.trajectory.is_none());
        assert!(!cli.log_json);
    }

    #[test]
    fn init_mode_uses_kebab_case() {
        let cli = Cli::try_parse_from([
            "meridian",
            "localize",
            "-c",
            "m.toml",
            "-s",
            "scans",
            "--init",
            "place-recognition",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        let Command::Localize(args) = cli.command else {
            panic!("expected localize");
        };
        assert_eq!(args.init, InitMode::PlaceRecognition);
    }

    #[test]
    fn every_must_be_positive() {
        let result = Cli::try_parse_from([
            "meridian", "build-index", "-s", "s", "-p", "p.txt", "-o", "i.json", "--every", "0",
        ]);
        assert!(result.is_err());
    }
}
