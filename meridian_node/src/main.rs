// meridian_node/src/main.rs

use clap::Parser;
use meridian_node::cli::{Cli, Command};
use meridian_node::commands;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match &cli.command {
        Command::Localize(args) => commands::localize::run(args),
        Command::BuildIndex(args) => commands::build_index::run(args),
        Command::Simulate(args) => commands::simulate::run(args),
    }
}

/// Installs the global subscriber. Verbosity comes from `RUST_LOG`,
/// defaulting to `info`.
fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}
