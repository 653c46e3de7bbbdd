// meridian_node/src/commands/mod.rs

//! One module per subcommand. Each exposes `run(&Args) -> anyhow::Result<()>`.

pub mod build_index;
pub mod localize;
pub mod simulate;
