//! Configuration module for marlin-harness.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `--config <path>` on the command line
//! 2. `MARLIN_HARNESS_CONFIG` environment variable (explicit path)
//! 3. `./harness.toml` (current directory)
//! 4. `harness.toml` in the platform config directory
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any scalar value can be overridden via environment variables.
//! The pattern is: `MARLIN_HARNESS_<SECTION>_<KEY>`
//!
//! Examples:
//! - `MARLIN_HARNESS_SERIAL_PORT=/dev/ttyACM0`
//! - `MARLIN_HARNESS_SERIAL_BAUD=250000`
//! - `MARLIN_HARNESS_RUN_AGENTS=hardware,tmc`
//!
//! # Example
//!
//! ```rust,no_run
//! use marlin_harness::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Port: {}", config.serial.port);
//! println!("Agents: {:?}", config.run.agents);
//! # Ok::<(), marlin_harness::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, split_list,
    ConfigLoader,
};
pub use schema::{
    AgentDefinition, CaseDefinition, Config, LogFormat, LoggingConfig, RunConfig, SerialConfig,
};
