//! Line-oriented command/response transport over a serial link.
//!
//! The transport owns the port exclusively. Every operation takes `&mut self`
//! and the type is not `Clone`, so the borrow checker enforces that at most
//! one command is ever in flight. Dropping the transport closes the port,
//! which makes release automatic on every exit path.

use crate::codec::{self, RawReply};
use crate::port::{PortConfiguration, PortError, SerialPortAdapter, SyncSerialPort};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on a single driver read; keeps deadlines responsive.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Back-off when the adapter reports "no data" without waiting itself.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// How often the identification probe is repeated while the board boots.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Errors surfaced by the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link could not be established, or the device went away.
    #[error("connection error: {0}")]
    Connection(String),

    /// No terminator arrived in time. `partial` holds everything received.
    #[error("no reply terminator within {after:?} ({} partial line(s) received)", .partial.len())]
    Timeout {
        after: Duration,
        partial: Vec<String>,
    },

    /// A read or write failed but the device still appears to be attached.
    #[error(transparent)]
    Io(PortError),
}

impl TransportError {
    /// Connection errors end the session; everything else is per-command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// The cause without the variant's own prefix, for abort reasons that
    /// add their own.
    pub fn detail(&self) -> String {
        match self {
            Self::Connection(detail) => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl From<PortError> for TransportError {
    fn from(err: PortError) -> Self {
        if err.is_disconnect() {
            Self::Connection(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

/// Parameters needed to open the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub port: String,
    pub framing: PortConfiguration,
    pub connect_timeout: Duration,
}

/// Traffic counters, reported with the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub commands_sent: u64,
    pub lines_received: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

/// Exclusive, line-framed access to one device.
pub struct Transport {
    port: Box<dyn SerialPortAdapter>,
    buffer: Vec<u8>,
    identification: Vec<String>,
    stats: TransportStats,
    driver_timeout: Option<Duration>,
}

impl Transport {
    /// Open the real serial port described by `params` and identify the device.
    pub fn connect(params: &ConnectionParams) -> Result<Self, TransportError> {
        let port = SyncSerialPort::open(&params.port, &params.framing)
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Self::open(Box::new(port), params.connect_timeout)
    }

    /// Take ownership of an adapter and run the identification probe.
    ///
    /// The probe is re-sent every second until the device acknowledges it,
    /// since many boards reset when the port opens and ignore input while
    /// they boot. No acknowledgement within `connect_timeout` is a
    /// connection error.
    pub fn open(
        port: Box<dyn SerialPortAdapter>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut transport = Self {
            port,
            buffer: Vec::new(),
            identification: Vec::new(),
            stats: TransportStats::default(),
            driver_timeout: None,
        };
        let name = transport.name().to_string();
        let deadline = Instant::now() + connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Connection(format!(
                    "{name} did not answer {} within {connect_timeout:?}",
                    codec::IDENTIFY
                )));
            }

            transport
                .send_line(codec::IDENTIFY)
                .map_err(|e| TransportError::Connection(format!("{name}: {e}")))?;

            match transport.read_until(codec::is_terminator, remaining.min(PROBE_INTERVAL)) {
                Ok(reply) => {
                    info!(port = %name, lines = reply.lines.len(), "device identified");
                    transport.identification = reply.lines;
                    return Ok(transport);
                }
                Err(TransportError::Timeout { partial, .. }) => {
                    debug!(port = %name, partial = partial.len(), "identification probe unanswered, retrying");
                }
                Err(e) => {
                    return Err(TransportError::Connection(format!("{name}: {e}")));
                }
            }
        }
    }

    /// Name of the underlying port.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Lines the device sent in answer to the identification probe.
    pub fn identification(&self) -> &[String] {
        &self.identification
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Write one command line. Stale input from earlier exchanges is dropped
    /// first so it cannot be mistaken for this command's reply.
    pub fn send_line(&mut self, text: &str) -> Result<(), TransportError> {
        let text = text.trim();
        if text.contains('\n') || text.contains('\r') {
            return Err(TransportError::Io(PortError::config(
                "command text must be a single line",
            )));
        }

        self.buffer.clear();
        self.port.clear_input()?;

        let wire = format!("{text}\n");
        self.port.write_bytes(wire.as_bytes())?;
        self.stats.commands_sent += 1;
        self.stats.bytes_written += wire.len() as u64;
        debug!(target: "marlin_harness::wire", port = %self.port.name(), ">> {text}");
        Ok(())
    }

    /// Lazily yield received lines until one satisfies `terminator`.
    ///
    /// The terminating line is yielded last. If `timeout` elapses first the
    /// iterator yields a single [`TransportError::Timeout`] carrying every
    /// line received so far plus any unterminated fragment, then ends.
    pub fn lines_until<F>(&mut self, terminator: F, timeout: Duration) -> ReplyLines<'_, F>
    where
        F: Fn(&str) -> bool,
    {
        ReplyLines {
            deadline: Instant::now() + timeout,
            timeout,
            terminator,
            received: Vec::new(),
            done: false,
            transport: self,
        }
    }

    /// Collect a complete reply (see [`Transport::lines_until`]).
    pub fn read_until<F>(&mut self, terminator: F, timeout: Duration) -> Result<RawReply, TransportError>
    where
        F: Fn(&str) -> bool,
    {
        let lines = self
            .lines_until(terminator, timeout)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawReply::new(lines))
    }

    /// Send a line and wait for its terminated reply.
    pub fn exchange(&mut self, text: &str, timeout: Duration) -> Result<RawReply, TransportError> {
        self.send_line(text)?;
        self.read_until(codec::is_terminator, timeout)
    }

    /// Cheap liveness check; does not touch the wire.
    pub fn check_link(&self) -> Result<(), TransportError> {
        if self.port.is_connected() {
            Ok(())
        } else {
            Err(TransportError::Connection(format!(
                "{} is no longer attached",
                self.port.name()
            )))
        }
    }

    /// Release the port and return the final counters.
    pub fn close(self) -> TransportStats {
        self.stats.clone()
    }

    fn take_line(&mut self) -> Option<String> {
        while let Some(pos) = memchr::memchr(b'\n', &self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                self.stats.lines_received += 1;
                debug!(target: "marlin_harness::wire", port = %self.port.name(), "<< {line}");
                return Some(line);
            }
        }
        None
    }

    fn take_fragment(&mut self) -> Option<String> {
        let fragment = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        (!fragment.is_empty()).then_some(fragment)
    }

    fn fill(&mut self, deadline: Instant) -> Result<(), TransportError> {
        let wait = deadline
            .saturating_duration_since(Instant::now())
            .min(POLL_INTERVAL)
            .max(Duration::from_millis(1));
        if self.driver_timeout != Some(wait) {
            self.port.set_timeout(wait)?;
            self.driver_timeout = Some(wait);
        }

        let mut chunk = [0u8; 256];
        match self.port.read_bytes(&mut chunk) {
            Ok(0) => std::thread::sleep(IDLE_SLEEP.min(wait)),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                self.stats.bytes_read += n as u64;
            }
            Err(e) if e.is_idle() => std::thread::sleep(IDLE_SLEEP.min(wait)),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        info!(
            port = %self.port.name(),
            commands = self.stats.commands_sent,
            lines = self.stats.lines_received,
            "closing serial link"
        );
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.port)
            .field("buffered", &self.buffer.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Iterator returned by [`Transport::lines_until`].
pub struct ReplyLines<'t, F> {
    transport: &'t mut Transport,
    terminator: F,
    deadline: Instant,
    timeout: Duration,
    received: Vec<String>,
    done: bool,
}

impl<F> Iterator for ReplyLines<'_, F>
where
    F: Fn(&str) -> bool,
{
    type Item = Result<String, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(line) = self.transport.take_line() {
                if (self.terminator)(&line) {
                    self.done = true;
                }
                self.received.push(line.clone());
                return Some(Ok(line));
            }

            if Instant::now() >= self.deadline {
                self.done = true;
                let mut partial = std::mem::take(&mut self.received);
                partial.extend(self.transport.take_fragment());
                warn!(
                    port = %self.transport.name(),
                    partial = partial.len(),
                    "reply timed out after {:?}",
                    self.timeout
                );
                return Some(Err(TransportError::Timeout {
                    after: self.timeout,
                    partial,
                }));
            }

            if let Err(e) = self.transport.fill(self.deadline) {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
