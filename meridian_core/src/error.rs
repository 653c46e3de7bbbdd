// meridian_core/src/error.rs

//! Error types, one enum per concern.
//!
//! Only [`ConfigError`] is fatal: it is returned from `Localizer::new` and the
//! host is expected to abort. Everything raised while scans are flowing is
//! recoverable and reported to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Problems found while building the localizer from its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load the global map from {path:?}")]
    MapLoad {
        path: PathBuf,
        #[source]
        source: PcdError,
    },

    #[error("the global map at {0:?} contains no finite points")]
    EmptyMap(PathBuf),

    #[error("failed to load the place-recognition index")]
    PlaceRecognition(#[from] PlaceRecognitionError),
}

/// Point-cloud file I/O failures.
#[derive(Debug, Error)]
pub enum PcdError {
    #[error("I/O error while accessing a PCD file")]
    Io(#[from] std::io::Error),

    #[error("malformed PCD header: {0}")]
    Header(String),

    #[error("unsupported PCD data encoding `{0}`")]
    UnsupportedEncoding(String),

    #[error("unsupported PCD field `{field}` with type {kind} and size {size}")]
    UnsupportedField { field: String, kind: char, size: usize },

    #[error("PCD file is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("malformed PCD data at point {index}: {reason}")]
    Data { index: usize, reason: String },
}

/// Degraded-match conditions reported by a registration engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("registration target is empty (local map outside the global map?)")]
    EmptyTarget,

    #[error("registration source is empty after filtering")]
    EmptySource,

    #[error("only {found} correspondences found, at least {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("registration problem is degenerate: {0}")]
    Degenerate(&'static str),
}

/// Failures while reading or writing a place-recognition index.
#[derive(Debug, Error)]
pub enum PlaceRecognitionError {
    #[error("I/O error on place-recognition index {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("place-recognition index {path:?} is not valid")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("place-recognition index is inconsistent: {0}")]
    Inconsistent(String),
}

/// Per-scan failures of a running `Localizer`. Construction reports
/// `ConfigError` directly.
#[derive(Debug, Error)]
pub enum LocalizationError {
    #[error("scan-to-map registration failed")]
    Registration(#[from] RegistrationError),
}
