//! Locates, reads and writes the TOML configuration, then applies
//! `PERSISTENT_SERIAL_*` environment overrides on top.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const ENV_PREFIX: &str = "PERSISTENT_SERIAL";
const CONFIG_PATH_ENV: &str = "PERSISTENT_SERIAL_CONFIG";
const CONFIG_FILE_NAME: &str = "persistent-serial.toml";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    config: Config,
}

impl ConfigLoader {
    /// Resolve a file and load it.
    ///
    /// Search order:
    /// 1. `PERSISTENT_SERIAL_CONFIG`
    /// 2. `./persistent-serial.toml`
    /// 3. the platform config directory (`~/.config/persistent-serial/` on Linux)
    /// 4. built-in defaults
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();
        let mut config = match config_path {
            Some(ref path) => read_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load a specific file. A missing file is an error here.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = read_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Defaults plus environment overrides, no file.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Write back to the file this loader was resolved from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.config_path.as_ref().ok_or(ConfigError::NoPath)?;
        write_file(&self.config, path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        write_file(&self.config, path.as_ref())
    }
}

/// First existing candidate in the search order, if any.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }

    default_config_path().filter(|path| path.exists())
}

/// Where a new config file would be created on this platform.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "persistent-serial")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn read_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

fn write_file(config: &Config, path: &Path) -> ConfigResult<()> {
    let write_error = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(write_error)
}

fn env_value(section: &str, key: &str) -> Option<(String, String)> {
    let var = format!("{ENV_PREFIX}_{section}_{key}");
    std::env::var(&var).ok().map(|value| (var, value))
}

fn parse_env<T: FromStr>(var: &str, value: &str, expected: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(var, format!("expected {expected}, got '{value}'")))
}

fn parse_bool(var: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env(var, format!("expected a boolean, got '{value}'"))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Overrides follow `PERSISTENT_SERIAL_<SECTION>_<KEY>`, e.g.
/// `PERSISTENT_SERIAL_CONNECTION_PORT=/dev/ttyACM0`. List values are
/// comma separated.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    let connection = &mut config.connection;
    if let Some((_, value)) = env_value("CONNECTION", "PORT") {
        connection.port = value;
    }
    if let Some((var, value)) = env_value("CONNECTION", "BAUD_RATE") {
        connection.baud_rate = parse_env(&var, &value, "a baud rate")?;
    }
    if let Some((var, value)) = env_value("CONNECTION", "AUTO_RECONNECT") {
        connection.auto_reconnect = parse_bool(&var, &value)?;
    }
    if let Some((var, value)) = env_value("CONNECTION", "RECONNECT_INTERVAL_MS") {
        connection.reconnect_interval_ms = parse_env(&var, &value, "milliseconds")?;
    }
    if let Some((var, value)) = env_value("CONNECTION", "DEBUG") {
        connection.debug = parse_bool(&var, &value)?;
    }
    if let Some((_, value)) = env_value("CONNECTION", "DELIMITER") {
        connection.delimiter = unescape(&value);
    }
    if let Some((var, value)) = env_value("CONNECTION", "MAX_LINE_BYTES") {
        connection.max_line_bytes = parse_env(&var, &value, "a byte count")?;
    }

    let lister = &mut config.lister;
    if let Some((var, value)) = env_value("LISTER", "ENABLED") {
        lister.enabled = parse_bool(&var, &value)?;
    }
    if let Some((var, value)) = env_value("LISTER", "POLL_INTERVAL_MS") {
        lister.poll_interval_ms = parse_env(&var, &value, "milliseconds")?;
    }
    if let Some((_, value)) = env_value("LISTER", "EXCLUDE_PATH_PREFIXES") {
        lister.exclude_path_prefixes = parse_list(&value);
    }
    if let Some((_, value)) = env_value("LISTER", "EXCLUDE_MANUFACTURERS") {
        lister.exclude_manufacturers = parse_list(&value);
    }

    let logging = &mut config.logging;
    if let Some((_, value)) = env_value("LOGGING", "LEVEL") {
        logging.level = value.trim().to_ascii_lowercase();
    }
    if let Some((var, value)) = env_value("LOGGING", "FORMAT") {
        logging.format = match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => {
                return Err(ConfigError::env(
                    var,
                    format!("expected json, pretty or compact, got '{value}'"),
                ))
            }
        };
    }
    if let Some((_, value)) = env_value("LOGGING", "FILE") {
        logging.file = Some(PathBuf::from(value));
    }

    Ok(())
}

/// Shells make a literal newline awkward, so `\n`, `\r` and `\t` escapes are
/// accepted in the delimiter override.
fn unescape(value: &str) -> String {
    value
        .replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}
