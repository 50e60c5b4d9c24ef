//! Errors raised while resolving `harness.toml` and its overrides.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Only raised for a path named by `--config` or `MARLIN_HARNESS_CONFIG`;
    /// a missing default file just means built-in defaults.
    #[error("no harness configuration at {0}")]
    NotFound(PathBuf),

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("harness.toml is not valid: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Only reachable from `--print-config`.
    #[error("cannot render the effective configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// `key` is the dotted path of the offending setting, e.g. `run.agents`.
    #[error("{key}: {message}")]
    ValidationError { key: String, message: String },

    /// A `MARLIN_HARNESS_*` override that does not parse as its setting's type.
    #[error("environment override {var}: {message}")]
    EnvParseError { var: String, message: String },
}

impl ConfigError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env_parse(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_setting() {
        let err = ConfigError::validation("serial.baud", "must be greater than zero");
        assert_eq!(err.to_string(), "serial.baud: must be greater than zero");

        let err = ConfigError::env_parse("MARLIN_HARNESS_RUN_RETRIES", "not a number");
        assert_eq!(
            err.to_string(),
            "environment override MARLIN_HARNESS_RUN_RETRIES: not a number"
        );

        let err = ConfigError::NotFound(PathBuf::from("/tmp/rig.toml"));
        assert_eq!(err.to_string(), "no harness configuration at /tmp/rig.toml");
    }
}
