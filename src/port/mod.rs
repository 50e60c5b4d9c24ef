//! Port abstraction layer for serial communication.
//!
//! Provides the byte-level adapter trait and its two implementations: the
//! real `serialport`-backed port and a scripted mock printer for tests.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockResponse, MockSerialPort};
pub use sync_port::SyncSerialPort;
pub use traits::*;
