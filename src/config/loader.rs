//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "MARLIN_HARNESS";

/// Config file name
const CONFIG_FILE_NAME: &str = "harness.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "MARLIN_HARNESS_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `MARLIN_HARNESS_CONFIG` environment variable (explicit path)
    /// 2. `./harness.toml` (current directory)
    /// 3. `harness.toml` in the platform config directory
    ///    (`~/.config/marlin-harness/` on Linux)
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override any file values. The result is
    /// validated before it is returned.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path. A missing file is an
    /// error here, unlike during automatic resolution.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if apply_env_overrides(&mut config).is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform-specific config directory for this tool.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "marlin-harness").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default config file path.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

fn env_var(key: &str) -> (String, Option<String>) {
    let var = format!("{ENV_PREFIX}_{key}");
    let value = std::env::var(&var).ok();
    (var, value)
}

fn parse_env<T: FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    match env_var(key) {
        (_, None) => Ok(None),
        (var, Some(raw)) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}: '{raw}'"))),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `MARLIN_HARNESS_<SECTION>_<KEY>`
/// For example:
/// - `MARLIN_HARNESS_SERIAL_PORT=/dev/ttyACM0`
/// - `MARLIN_HARNESS_RUN_RETRIES=3`
/// - `MARLIN_HARNESS_RUN_AGENTS=hardware,safety`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let (_, Some(val)) = env_var("SERIAL_PORT") {
        config.serial.port = val;
    }
    if let Some(val) = parse_env("SERIAL_BAUD", "baud rate")? {
        config.serial.baud = val;
    }
    if let Some(val) = parse_env("SERIAL_CONNECT_TIMEOUT_MS", "timeout")? {
        config.serial.connect_timeout_ms = val;
    }
    if let Some(val) = parse_env("SERIAL_COMMAND_TIMEOUT_MS", "timeout")? {
        config.serial.command_timeout_ms = val;
    }

    // Run overrides
    if let Some(val) = parse_env("RUN_RETRIES", "retry count")? {
        config.run.retries = val;
    }
    if let Some(val) = parse_env("RUN_RETRY_BACKOFF_MS", "backoff")? {
        config.run.retry_backoff_ms = val;
    }
    if let Some(val) = parse_env("RUN_BACKOFF_MULTIPLIER", "multiplier")? {
        config.run.backoff_multiplier = val;
    }
    if let (_, Some(val)) = env_var("RUN_AGENTS") {
        config.run.agents = split_list(&val);
    }

    // Logging overrides
    if let (_, Some(val)) = env_var("LOGGING_LEVEL") {
        config.logging.level = val;
    }
    if let (var, Some(val)) = env_var("LOGGING_FORMAT") {
        config.logging.format = val.parse().map_err(|e: String| ConfigError::env_parse(var, e))?;
    }

    Ok(())
}

/// Split a comma separated agent list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
