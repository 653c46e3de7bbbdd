// meridian_node/src/lib.rs

// This prelude is for convenience for other files WITHIN the meridian_node crate.
pub mod prelude;

// Command-line surface and the three subcommands behind it.
pub mod cli;
pub mod commands;

// Loading configuration and recorded data from disk.
pub mod config;
pub mod dataset;
