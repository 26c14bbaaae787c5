//! Configuration of the library and the command line tool.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{LevelFilter, error, info};
use serde::{Deserialize, Deserializer, de};

use crate::{
    commons::util::ext_serde,
    constants::{DEFAULT_TOKEN_TIMEOUT, TOKENCERT_APP},
    token::{CandidateModule, discovery},
};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        LevelFilter::Warn
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./tokencert.log")
    }

    fn token_timeout() -> Duration {
        DEFAULT_TOKEN_TIMEOUT
    }
}

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    /// PKCS#11 libraries to try, in order. Replaces the discovery of known
    /// vendor libraries when not empty.
    #[serde(default)]
    pub module_paths: Vec<PathBuf>,

    #[serde(
        rename = "token_timeout_seconds",
        default = "ConfigDefaults::token_timeout",
        deserialize_with = "ext_serde::de_seconds"
    )]
    pub token_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            module_paths: Vec::new(),
            token_timeout: ConfigDefaults::token_timeout(),
        }
    }
}

/// # Create
///
impl Config {
    /// Loads the config file if one is given, uses the defaults otherwise,
    /// and sets up logging.
    pub fn create(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) => Self::read_config(path).map_err(|e| {
                ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    path.display(),
                    e
                ))
            })?,
            None => Config::default(),
        };

        config.init_logging()?;
        if let Some(path) = config_file {
            info!("{} uses configuration file: {}", TOKENCERT_APP, path.display());
        }
        Ok(config)
    }

    pub fn read_config(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// The candidate libraries: the configured ones if there are any, the
    /// known vendor libraries found on this system otherwise.
    pub fn candidates(&self) -> Vec<CandidateModule> {
        if self.module_paths.is_empty() {
            discovery::available_modules()
        } else {
            self.module_paths.iter().map(CandidateModule::new).collect()
        }
    }
}

/// # Logging
///
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {}", e)))
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // The PKCS#11 binding is chatty at debug level.
        let framework_level = self.log_level.min(LevelFilter::Info);

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("cryptoki", framework_level)
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(LevelFilter::Warn, config.log_level);
        assert_eq!(LogType::Stderr, config.log_type);
        assert!(config.module_paths.is_empty());
        assert_eq!(DEFAULT_TOKEN_TIMEOUT, config.token_timeout);
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"
            log_type = "file"
            log_file = "/var/log/tokencert.log"
            module_paths = ["/usr/lib/opensc-pkcs11.so", "/opt/vendor/libeToken.so"]
            token_timeout_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(LevelFilter::Debug, config.log_level);
        assert_eq!(LogType::File, config.log_type);
        assert_eq!(Duration::from_secs(5), config.token_timeout);

        let candidates = config.candidates();
        assert_eq!(2, candidates.len());
        assert_eq!("opensc-pkcs11.so", candidates[0].name());
        assert_eq!("libeToken.so", candidates[1].name());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(toml::from_str::<Config>(r#"log_type = "syslog""#).is_err());
        assert!(toml::from_str::<Config>(r#"log_level = "loud""#).is_err());
        assert!(toml::from_str::<Config>("token_timeout_seconds = 0").is_err());
    }

    #[test]
    fn read_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = Config::read_config(&dir.path().join("missing.conf"));
        assert!(matches!(res, Err(ConfigError::IoError(_))));
    }
}
