// meridian_node/src/config.rs

//! Loads a `LocalizationConfig` from a TOML file with `MERIDIAN_`
//! environment overrides, e.g. `MERIDIAN_REFRESH_MARGIN=30` or
//! `MERIDIAN_REGISTRATION__MAX_ITER=50` (`__` separates nested keys).

use anyhow::{ensure, Context};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use meridian_core::config::{LocalizationConfig, PlaceRecognitionConfig};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_PREFIX: &str = "MERIDIAN_";

/// Reads, merges and validates the config at `path`.
///
/// Relative `map_path` and `index_path` values are resolved against the
/// directory holding the config file, so a dataset directory can be moved
/// around as a whole.
pub fn load_localization_config(path: &Path) -> anyhow::Result<LocalizationConfig> {
    ensure!(path.is_file(), "config file not found at {}", path.display());
    info!("Loading localization config from: {}", path.display());

    let mut config: LocalizationConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("failed to parse config at {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.map_path = resolve(base, &config.map_path);
    if let Some(PlaceRecognitionConfig::ScanContext { index_path, .. }) =
        config.place_recognition.as_mut()
    {
        *index_path = resolve(base, index_path);
    }

    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use meridian_core::config::RegistrationConfig;

    const MINIMAL: &str = r#"
        map_path = "maps/map.pcd"

        [registration]
        type = "Icp"
        max_iter = 20

        [place_recognition]
        type = "ScanContext"
        index_path = "index.json"
    "#;

    #[test]
    fn relative_paths_follow_the_config_file() {
        Jail::expect_with(|jail| {
            std::fs::create_dir(jail.directory().join("dataset")).map_err(|e| e.to_string())?;
            jail.create_file("dataset/meridian.toml", MINIMAL)?;

            let config = load_localization_config(Path::new("dataset/meridian.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.map_path, Path::new("dataset/maps/map.pcd"));
            let Some(PlaceRecognitionConfig::ScanContext { index_path, .. }) =
                &config.place_recognition
            else {
                panic!("place recognition should be configured");
            };
            assert_eq!(index_path, Path::new("dataset/index.json"));
            match config.registration {
                RegistrationConfig::Icp(icp) => assert_eq!(icp.max_iter, 20),
                other => panic!("expected Icp, got {}", other.get_type_str()),
            }
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_the_file() {
        Jail::expect_with(|jail| {
            jail.create_file("meridian.toml", MINIMAL)?;
            jail.set_env("MERIDIAN_REFRESH_MARGIN", "12.5");
            jail.set_env("MERIDIAN_REGISTRATION__MAX_ITER", "7");

            let config = load_localization_config(Path::new("meridian.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.refresh_margin, 12.5);
            match config.registration {
                RegistrationConfig::Icp(icp) => assert_eq!(icp.max_iter, 7),
                other => panic!("expected Icp, got {}", other.get_type_str()),
            }
            Ok(())
        });
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("typo.toml", "map_path = \"m.pcd\"\nrefresh_marign = 3.0\n")?;
            assert!(load_localization_config(Path::new("typo.toml")).is_err());

            jail.create_file("zero.toml", "map_path = \"m.pcd\"\ncoarse_fix_threshold = 0\n")?;
            let err = load_localization_config(Path::new("zero.toml")).unwrap_err();
            assert!(format!("{err:#}").contains("coarse_fix_threshold"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_localization_config(Path::new("/nonexistent/meridian.toml")).is_err());
    }
}
