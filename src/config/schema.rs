//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration that runs the default schedule on the platform's usual port.

use super::error::{ConfigError, ConfigResult};
use crate::agent::Agent;
use crate::case::{ExecutionPolicy, TestCase};
use crate::catalog;
use crate::codec::Command;
use crate::expect::Expectation;
use crate::port::{DataBits, FlowControl, Parity, PortConfiguration, StopBits};
use crate::transport::ConnectionParams;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial link configuration
    pub serial: SerialConfig,
    /// Test run policy and schedule
    pub run: RunConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Agents defined in the file, in addition to the built-in ones
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentDefinition>,
}

/// Serial link section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name or alias
    pub port: String,
    pub baud: u32,
    /// Maximum wait for the identification probe to be answered
    pub connect_timeout_ms: u64,
    /// Maximum wait per command unless a case overrides it
    pub command_timeout_ms: u64,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Port aliases for convenience, e.g. `printer = "/dev/ttyACM0"`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub port_aliases: HashMap<String, String>,
}

#[cfg(windows)]
const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: 115_200,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 5_000,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Everything the transport needs to open the link.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            port: self.resolve_port(&self.port),
            framing: PortConfiguration {
                baud_rate: self.baud,
                data_bits: self.data_bits,
                flow_control: self.flow_control,
                parity: self.parity,
                stop_bits: self.stop_bits,
                ..PortConfiguration::default()
            },
            connect_timeout: self.connect_timeout(),
        }
    }
}

/// Run policy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Retries per case after the first attempt
    pub retries: u32,
    /// Delay before the first retry
    pub retry_backoff_ms: u64,
    /// Growth factor applied to the delay on each further retry
    pub backoff_multiplier: f64,
    /// Agents to run, in order
    pub agents: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_backoff_ms: 500,
            backoff_multiplier: 2.0,
            agents: catalog::DEFAULT_SCHEDULE
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: "trace" ... "error"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines
    Json,
    /// Multi-line with colors
    Pretty,
    /// Single line per event
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}' (json, pretty, compact)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}

/// A custom agent declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cases: Vec<CaseDefinition>,
}

/// A custom case. Commands are written as raw G-code lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub name: String,
    pub command: Command,
    #[serde(default = "acknowledged")]
    pub expect: Expectation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
}

fn acknowledged() -> Expectation {
    Expectation::Acknowledged
}

impl CaseDefinition {
    pub fn to_case(&self) -> TestCase {
        TestCase {
            name: self.name.clone(),
            command: self.command.clone(),
            expectation: self.expect.clone(),
            timeout: self.timeout_ms.map(Duration::from_millis),
            retries: self.retries,
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
            settle: self.settle_ms.map(Duration::from_millis),
        }
    }
}

impl AgentDefinition {
    pub fn to_agent(&self) -> Agent {
        Agent {
            name: self.name.clone(),
            description: self.description.clone(),
            cases: self.cases.iter().map(CaseDefinition::to_case).collect(),
        }
    }
}

impl Config {
    /// Retry and timeout defaults for every case.
    pub fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            command_timeout: self.serial.command_timeout(),
            retries: self.run.retries,
            retry_backoff: Duration::from_millis(self.run.retry_backoff_ms),
            backoff_multiplier: self.run.backoff_multiplier,
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::validation("serial.port", "must not be empty"));
        }
        if self.serial.baud == 0 {
            return Err(ConfigError::validation("serial.baud", "must be greater than zero"));
        }
        if self.serial.connect_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.connect_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.serial.command_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "serial.command_timeout_ms",
                "must be greater than zero",
            ));
        }
        if !self.run.backoff_multiplier.is_finite() || self.run.backoff_multiplier < 1.0 {
            return Err(ConfigError::validation(
                "run.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if self.run.agents.is_empty() {
            return Err(ConfigError::validation("run.agents", "schedule at least one agent"));
        }

        let mut seen = HashSet::new();
        for definition in &self.agents {
            let key = format!("agents.{}", definition.name);
            if catalog::BUILTIN.iter().any(|(name, _)| *name == definition.name) {
                return Err(ConfigError::validation(key, "name clashes with a built-in agent"));
            }
            if !seen.insert(definition.name.as_str()) {
                return Err(ConfigError::validation(key, "defined more than once"));
            }
            if definition.cases.is_empty() {
                return Err(ConfigError::validation(key, "needs at least one case"));
            }
        }

        for name in &self.run.agents {
            if !seen.contains(name.as_str()) && !catalog::BUILTIN.iter().any(|(b, _)| b == name) {
                return Err(ConfigError::validation(
                    "run.agents",
                    format!("unknown agent '{name}'"),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the scheduled agent names, in order.
    pub fn schedule(&self) -> ConfigResult<Vec<Agent>> {
        self.run
            .agents
            .iter()
            .map(|name| {
                if let Some(definition) = self.agents.iter().find(|a| &a.name == name) {
                    return Ok(definition.to_agent());
                }
                catalog::builtin(name)
                    .map_err(|e| ConfigError::validation(format!("agents.{name}"), e.to_string()))?
                    .ok_or_else(|| {
                        ConfigError::validation("run.agents", format!("unknown agent '{name}'"))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.run.agents, vec!["hardware", "tmc", "bltouch"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("printer".to_string(), "/dev/ttyACM0".to_string());
        config.port = "printer".to_string();

        assert_eq!(config.connection_params().port, "/dev/ttyACM0");
        assert_eq!(config.resolve_port("COM5"), "COM5");
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            port = "COM7"
            command_timeout_ms = 2000

            [run]
            retries = 2
            agents = ["hardware", "homing"]

            [[agents]]
            name = "homing"

            [[agents.cases]]
            name = "Home all"
            command = "G28"
            timeout_ms = 60000

            [[agents.cases]]
            name = "Position"
            command = "M114"
            expect = { kind = "number", field = "X", max = 1.0 }
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud, 115_200);
        assert_eq!(config.policy().command_timeout, Duration::from_millis(2000));

        let schedule = config.schedule().unwrap();
        let names: Vec<&str> = schedule.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["hardware", "homing"]);
        let homing = &schedule[1];
        assert_eq!(homing.cases[0].expectation, Expectation::Acknowledged);
        assert_eq!(homing.cases[0].timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.run.agents.push("nonexistent".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { key, .. }) if key == "run.agents"
        ));

        let mut config = Config::default();
        config.run.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agents.push(AgentDefinition {
            name: "safety".into(),
            description: String::new(),
            cases: Vec::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_command_in_file_is_parse_error() {
        let toml_str = r#"
            [[agents]]
            name = "broken"
            [[agents.cases]]
            name = "nonsense"
            command = "HELLO"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
