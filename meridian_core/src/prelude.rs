// meridian_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::filtering::CloudFilter;
pub use crate::place_recognition::PlaceRecognizer;
pub use crate::registration::Registration;

// --- Core Data Structures ---
pub use crate::messages::{Point, PointCloud};
pub use crate::types::{Axis, Pose};

// --- The Localization Loop ---
pub use crate::localization::{InitState, Localizer, UpdateReport};
pub use crate::publish::LocalizationOutputs;

// --- Configuration & Errors ---
pub use crate::config::{LocalizationConfig, PlaceRecognitionConfig, RegistrationConfig};
pub use crate::error::{ConfigError, LocalizationError, RegistrationError};
