//! settings.json access for the bridge
//!
//! The bridge reads everything it needs at startup: peer address, port,
//! frames per packet, jitter depth and the audio format defaults.  Values
//! missing from the file fall back to the defaults object passed to
//! [`Config::build`].
use json::JsonValue;
use log::{info, warn};
use regex::Regex;
use std::{error::Error, fmt, io::ErrorKind};

#[derive(Debug)]
pub struct MissingConfigError {
    key: String,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Required configuration value '{}' is missing", self.key)
    }
}

impl Error for MissingConfigError {}

pub struct Config {
    filename: String,
    settings: JsonValue,
    defaults: JsonValue,
}

impl Config {
    pub fn build(filename: String, defaults: JsonValue) -> Result<Config, std::io::Error> {
        // Validate filename only contains valid characters and ends in .json
        let filename_regex = Regex::new(r"^[a-zA-Z0-9_\-\.]+\.json$").unwrap();
        if !filename_regex.is_match(&filename) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid filename '{}' - must contain only letters, numbers, underscore, dash, dot and end in .json", filename),
            ));
        }

        let mut config = Config {
            filename,
            settings: json::object! {},
            defaults,
        };

        if let Err(err) = config.load_from_file() {
            warn!("Using default settings: {}", err);
        }

        Ok(config)
    }

    fn load_from_file(&mut self) -> std::io::Result<()> {
        let raw_data = std::fs::read_to_string(&self.filename)?;
        match json::parse(&raw_data) {
            Ok(parsed) => {
                self.settings.clone_from(&parsed);
                info!("Loaded settings from {}", self.filename);
            }
            Err(err) => {
                warn!("Failed to parse config file {}: {}", self.filename, err);
            }
        }
        Ok(())
    }

    pub fn get_str_value(
        &self,
        key: &str,
        default: Option<String>,
    ) -> Result<String, MissingConfigError> {
        if let Some(val) = self.settings[key].as_str() {
            return Ok(val.to_string());
        }
        if let Some(def) = default {
            return Ok(def);
        }
        if let Some(val) = self.defaults[key].as_str() {
            return Ok(val.to_string());
        }
        Err(MissingConfigError {
            key: key.to_string(),
        })
    }

    pub fn get_bool_value(
        &self,
        key: &str,
        default: Option<bool>,
    ) -> Result<bool, MissingConfigError> {
        if let Some(val) = self.settings[key].as_bool() {
            return Ok(val);
        }
        if let Some(def) = default {
            return Ok(def);
        }
        if let Some(val) = self.defaults[key].as_bool() {
            return Ok(val);
        }
        Err(MissingConfigError {
            key: key.to_string(),
        })
    }

    pub fn get_u32_value(&self, key: &str, default: Option<u32>) -> Result<u32, MissingConfigError> {
        if let Some(val) = self.settings[key].as_u32() {
            return Ok(val);
        }
        if let Some(def) = default {
            return Ok(def);
        }
        if let Some(val) = self.defaults[key].as_u32() {
            return Ok(val);
        }
        Err(MissingConfigError {
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    fn test_defaults() -> JsonValue {
        json::object! {
            "peer_host": "192.168.0.120",
            "port": 2025,
            "frames_per_packet": 2,
            "jitter_depth": 5,
            "echo": false
        }
    }

    fn test_config(filename: &str) -> Config {
        match Config::build(filename.to_string(), test_defaults()) {
            Ok(config) => config,
            Err(e) => panic!("Failed to build config: {}", e),
        }
    }

    #[test]
    fn build_with_missing_file() {
        // no file on disk means the defaults object answers everything
        let config = test_config("no_such_settings.json");
        assert_eq!(
            config.get_str_value("peer_host", None).unwrap(),
            "192.168.0.120"
        );
        assert_eq!(config.get_u32_value("port", None).unwrap(), 2025);
        assert_eq!(config.get_bool_value("echo", None).unwrap(), false);
    }

    #[test]
    fn explicit_default_wins_over_config_default() {
        let config = test_config("no_such_settings.json");
        assert_eq!(
            config.get_u32_value("port", Some(9999)).unwrap(),
            9999
        );
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = test_config("no_such_settings.json");
        let boom = config.get_u32_value("i_dont_exist", None);
        assert!(boom.is_err());
        assert_eq!(
            boom.err().unwrap().to_string(),
            "Required configuration value 'i_dont_exist' is missing"
        );
    }

    #[test]
    fn invalid_filename_is_rejected() {
        let boom = Config::build("Illegal*File$Name".to_string(), test_defaults());
        match boom {
            Ok(_) => panic!("Expected error for invalid filename"),
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
        }
    }
}
