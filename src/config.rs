use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings read from `rapport.toml` (or `--config`) and `RAPPORT__*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Remote template catalog. Without one only local templates can be used.
    #[serde(default)]
    pub catalog_url: Option<String>,

    /// File path or http(s) URL of the data the editor starts with.
    #[serde(default = "default_data_path")]
    pub data_path: String,

    /// Where `rapport.docx` is written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// How long the success state of the generate button lasts.
    #[serde(default = "default_confirmation_ms")]
    pub confirmation_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_url: None,
            data_path: default_data_path(),
            output_dir: default_output_dir(),
            confirmation_ms: default_confirmation_ms(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Loads `file` when given, `rapport.toml` in the working directory
    /// otherwise, then applies environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("rapport").required(false),
        };
        let builder = config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix("RAPPORT").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.catalog_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl {
                    key: "catalog_url",
                    value: url.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }
}

fn default_data_path() -> String {
    "data.json".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_confirmation_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.catalog_url, None);
        assert_eq!(settings.data_path, "data.json");
        assert_eq!(settings.output_dir, PathBuf::from("."));
        assert_eq!(settings.confirmation(), Duration::from_secs(2));
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rapport.toml");
        std::fs::write(
            &path,
            "catalog_url = \"https://templates.example/templates.json\"\nconfirmation_ms = 500\noutput_dir = \"out\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.catalog_url.as_deref(), Some("https://templates.example/templates.json"));
        assert_eq!(settings.confirmation(), Duration::from_millis(500));
        assert_eq!(settings.output_dir, PathBuf::from("out"));
        assert_eq!(settings.data_path, "data.json");
    }

    #[test]
    fn test_rejects_non_http_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rapport.toml");
        std::fs::write(&path, "catalog_url = \"ftp://templates.example\"\n").unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key: "catalog_url", .. }));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
