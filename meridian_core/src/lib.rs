// meridian_core/src/lib.rs

// This file defines the public modules of the library.
pub mod config;
pub mod error;
pub mod filtering;
pub mod io;
pub mod localization;
pub mod messages;
pub mod place_recognition;
pub mod prelude;
pub mod publish;
pub mod registration;
pub mod types;
