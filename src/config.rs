//! Runtime settings.
//!
//! Sources, later overriding earlier: `superstore.yaml` in the working
//! directory, the file named by `--config` or `SUPERSTORE_CONFIG`, then
//! `SUPERSTORE__*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "superstore.yaml";
pub const CONFIG_ENV_VAR: &str = "SUPERSTORE_CONFIG";
pub const CONFIG_ENV_PREFIX: &str = "SUPERSTORE";
pub const LOG_ENV_VAR: &str = "SUPERSTORE_LOG";

pub const DEFAULT_INPUT_PATH: &str = "data/Superstore.csv";
pub const DEFAULT_COORDS_PATH: &str = "data/city_coordinates.csv";
pub const NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_USER_AGENT: &str = "superstore_dashboard";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input_path: PathBuf,
    pub coords_path: PathBuf,
    pub geocoder: GeocoderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            coords_path: PathBuf::from(DEFAULT_COORDS_PATH),
            geocoder: GeocoderSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    /// When false a cold cache records every place as not found.
    pub enabled: bool,
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum pause between successive lookups.
    pub pause_millis: u64,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: NOMINATIM_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 10,
            pause_millis: 1000,
        }
    }
}

impl GeocoderSettings {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_point_at_data_dir() {
        let settings = Settings::default();
        assert_eq!(settings.input_path, PathBuf::from("data/Superstore.csv"));
        assert_eq!(settings.coords_path, PathBuf::from("data/city_coordinates.csv"));
        assert_eq!(settings.geocoder.pause(), Duration::from_secs(1));
        assert!(settings.geocoder.enabled);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "input_path: /tmp/orders.csv").unwrap();
        writeln!(file, "geocoder:").unwrap();
        writeln!(file, "  pause_millis: 0").unwrap();
        writeln!(file, "  enabled: false").unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.input_path, PathBuf::from("/tmp/orders.csv"));
        assert_eq!(settings.coords_path, PathBuf::from(DEFAULT_COORDS_PATH));
        assert_eq!(settings.geocoder.pause_millis, 0);
        assert!(!settings.geocoder.enabled);
        assert_eq!(settings.geocoder.user_agent, DEFAULT_USER_AGENT);
    }
}
