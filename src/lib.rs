//! Marlin hardware validation harness.
//!
//! Sends diagnostic G-code to a 3D-printer board over a serial link, checks
//! the replies against declarative expectations and reports the outcome.
//!
//! # Modules
//!
//! - `port`: serial port abstraction (real port and scripted mock)
//! - `transport`: exclusive, line-framed command/reply exchange
//! - `codec`: G-code encoding and per-family reply grammars
//! - `expect`: expectations evaluated against decoded replies
//! - `case`: test cases and their retry state machine
//! - `agent`: ordered groups of cases
//! - `catalog`: the built-in agents
//! - `orchestrator`: runs a whole session over one link
//! - `session`, `report`: session record and summaries
//! - `config`: TOML configuration with environment overrides
//! - `logging`: tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use marlin_harness::{report, ConfigLoader, Orchestrator};
//!
//! let config = ConfigLoader::load()?.into_config();
//! let orchestrator = Orchestrator::new(
//!     config.serial.connection_params(),
//!     config.policy(),
//!     config.schedule()?,
//! );
//! let session = orchestrator.run();
//! println!("{}", report::render_text(&report::summarize(&session)));
//! # Ok::<(), marlin_harness::ConfigError>(())
//! ```

pub mod agent;
pub mod case;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod expect;
pub mod logging;
pub mod orchestrator;
pub mod port;
pub mod report;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use agent::{Agent, AgentReport};
pub use case::{AbortReason, CancelToken, ExecutionPolicy, TestCase, TestResult, TestStatus};
pub use codec::{Command, ParsedReply, RawReply};
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use error::{HarnessError, HarnessResult};
pub use expect::{Expectation, Mismatch};
pub use orchestrator::Orchestrator;
pub use port::{
    DataBits, FlowControl, MockResponse, MockSerialPort, Parity, PortConfiguration, PortError,
    SerialPortAdapter, StopBits, SyncSerialPort,
};
pub use report::{SessionSummary, summarize};
pub use session::Session;
pub use transport::{ConnectionParams, Transport, TransportError, TransportStats};
