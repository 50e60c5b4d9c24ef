//! The byte-level seam between the transport and a printer board.
//!
//! A real board and the scripted mock both sit behind `SerialPortAdapter`,
//! so every engine path can be exercised without hardware.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Line framing for the board's USB-serial link.
///
/// Marlin boards almost always run 8N1 without flow control; only the
/// speed varies between builds (115200 and 250000 are the usual ones).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfiguration {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub flow_control: FlowControl,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// Per-read timeout handed to the driver. The transport shortens this to
    /// its poll interval; it is not the per-command timeout.
    pub timeout: Duration,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// `software` is XON/XOFF, which Marlin does not speak by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// A byte pipe to the board. It knows nothing about G-code: line framing,
/// reply terminators and command deadlines live in
/// [`crate::transport::Transport`].
pub trait SerialPortAdapter: Send + std::fmt::Debug {
    /// Hand a whole command line to the board. A short write is an error.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Whatever the board has sent so far. An empty port is reported as an
    /// error for which [`PortError::is_idle`] is true, never as `Ok(0)`.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Device path (`/dev/ttyACM0`, `COM3`) or mock name, used in logs.
    fn name(&self) -> &str;

    /// Longest a single `read_bytes` may block.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError>;

    /// Drop unread bytes: boot banners, stale temperature reports and
    /// leftovers from an earlier command.
    fn clear_input(&mut self) -> Result<(), PortError>;

    /// False once the board has been unplugged or reset away.
    fn is_connected(&self) -> bool {
        true
    }
}
