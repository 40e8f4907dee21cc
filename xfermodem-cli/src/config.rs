//! Local configuration file support for xfermodem.
//!
//! Configuration is loaded from, in priority order (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (`XFERMODEM_*`)
//! 3. Local config file (`./xfermodem.toml`)
//!
//! There is no global/user config directory lookup; this is a single-host
//! transfer tool, not a multi-project build tool.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Local configuration structure, backed by `./xfermodem.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

impl Config {
    /// Load configuration from `./xfermodem.toml`, if present.
    pub fn load() -> Self {
        Self::load_from_file(Path::new("xfermodem.toml")).unwrap_or_default()
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("loaded config from {}", path.display());
                    Some(config)
                },
                Err(e) => {
                    warn!("failed to parse config file {}: {e}", path.display());
                    None
                },
            },
            Err(e) => {
                warn!("failed to read config file {}: {e}", path.display());
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_empty() {
        let config = Config::default();
        assert!(config.port.is_none());
        assert!(config.baud.is_none());
    }

    #[test]
    fn missing_file_loads_default() {
        let config = Config::load_from_file(Path::new("does-not-exist.toml"));
        assert!(config.is_none());
    }

    #[test]
    fn parses_toml_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xfermodem.toml");
        fs::write(&path, "port = \"/dev/ttyUSB0\"\nbaud = 115200\n").unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud, Some(115_200));
    }
}
