use std::path::PathBuf;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::SimError;

pub const SETTINGS_ENV: &str = "SENSORNODE_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub config_path: String,
    pub factory_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    /// Length of one simulated day, so diurnal curves cycle quickly.
    pub day_length_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub device: Device,
    pub simulation: Simulation,
}

impl Settings {
    /// Loads the bundled defaults, or the file named by `SENSORNODE_SETTINGS`.
    pub fn new() -> Result<Self, SimError> {
        let content = match env::var(SETTINGS_ENV) {
            Ok(path) => fs::read_to_string(Self::normalize_path(&path)?)?,
            Err(_) => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../",
                "configs/default.toml"
            ))
            .to_string(),
        };

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, SimError> {
        let mut settings: Settings = toml::from_str(content)?;

        settings.device.config_path = Self::normalize_path(&settings.device.config_path)?
            .to_string_lossy()
            .to_string();
        settings.device.factory_path = Self::normalize_path(&settings.device.factory_path)?
            .to_string_lossy()
            .to_string();

        Ok(settings)
    }

    fn normalize_path(path: &str) -> io::Result<PathBuf> {
        let path_buf = PathBuf::from(path);

        Ok(if path_buf.is_absolute() {
            path_buf
        } else {
            env::current_dir()?.as_path().join(&path_buf)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_settings_parse() {
        let settings = Settings::parse(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../configs/default.toml"
        )))
        .unwrap();

        assert!(PathBuf::from(&settings.device.config_path).is_absolute());
        assert!(settings.simulation.day_length_s > 0);
    }

    #[test]
    fn test_absolute_paths_kept() {
        let settings = Settings::parse(
            r#"
            [logger]
            level = "info"

            [device]
            config_path = "/etc/sensornode/device.json"
            factory_path = "/etc/sensornode/device_default.json"

            [simulation]
            day_length_s = 60
            "#,
        )
        .unwrap();

        assert_eq!(settings.device.config_path, "/etc/sensornode/device.json");
    }
}
