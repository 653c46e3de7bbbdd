// meridian_core/src/io/mod.rs

//! Point-cloud file formats.

pub mod pcd;

pub use pcd::{parse_pcd, read_pcd, write_pcd, PcdEncoding};
