use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use crate::rtc::DS3231_I2C_ADDRESS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse Error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation Error: {0}")]
    Validation(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub rtc: RtcConfig,
    #[serde(default)]
    pub obd: ObdConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RtcConfig {
    #[serde(default = "default_i2c_bus")]
    pub bus: String,
    #[serde(default = "default_rtc_address")]
    pub address: u16,
}

fn default_i2c_bus() -> String {
    "/dev/i2c-1".to_string()
}

fn default_rtc_address() -> u16 {
    DS3231_I2C_ADDRESS
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObdConfig {
    #[serde(default = "default_obd_port")]
    pub port: String, // "auto" or a device path
    pub baud_rate: Option<u32>,
}

fn default_obd_port() -> String {
    "auto".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_file() -> String {
    "datetime_log.csv".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            bus: default_i2c_bus(),
            address: default_rtc_address(),
        }
    }
}

impl Default for ObdConfig {
    fn default() -> Self {
        Self {
            port: default_obd_port(),
            baud_rate: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            log_file: default_log_file(),
        }
    }
}

impl OutputConfig {
    pub fn log_path(&self) -> PathBuf {
        self.directory.join(&self.log_file)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if tracing::Level::from_str(&self.general.log_level).is_err() {
            return Err(ConfigError::Validation(format!("Unknown log level '{}'", self.general.log_level)));
        }
        if self.rtc.address > 0x7F {
            return Err(ConfigError::Validation(format!("RTC address 0x{:X} is not a 7-bit address", self.rtc.address)));
        }
        if self.obd.baud_rate == Some(0) {
            return Err(ConfigError::Validation("Baud rate must be non-zero".to_string()));
        }
        if self.output.log_file.trim().is_empty() {
            return Err(ConfigError::Validation("Log file name is empty".to_string()));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rtc.bus, "/dev/i2c-1");
        assert_eq!(config.rtc.address, 0x68);
        assert_eq!(config.obd.port, "auto");
        assert_eq!(config.output.log_path(), PathBuf::from("./datetime_log.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = "[obd]\nport = \"/dev/rfcomm0\"\nbaud_rate = 9600\n\n[rtc]\naddress = 0x57\n"
            .parse()
            .unwrap();
        assert_eq!(config.obd.port, "/dev/rfcomm0");
        assert_eq!(config.obd.baud_rate, Some(9600));
        assert_eq!(config.rtc.address, 0x57);
        assert_eq!(config.rtc.bus, "/dev/i2c-1");
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_empty_file() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.output.log_file, "datetime_log.csv");
    }

    #[test]
    fn test_validation() {
        assert!(matches!("[rtc]\naddress = 0x80".parse::<Config>(), Err(ConfigError::Validation(_))));
        assert!(matches!("[general]\nlog_level = \"loud\"".parse::<Config>(), Err(ConfigError::Validation(_))));
        assert!(matches!("[output]\nlog_file = \"\"".parse::<Config>(), Err(ConfigError::Validation(_))));
        assert!(matches!("[obd]\nbaud_rate = 0".parse::<Config>(), Err(ConfigError::Validation(_))));
        assert!(matches!("[rtc\n".parse::<Config>(), Err(ConfigError::Parse(_))));
    }
}
