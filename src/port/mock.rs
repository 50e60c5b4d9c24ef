//! Scripted mock serial port for testing.
//!
//! `MockSerialPort` behaves like a printer on the other end of the wire: every
//! complete line written to it is looked up by its first word (the G-code
//! mnemonic) and the scripted response is queued for reading. Unscripted
//! commands get no answer at all, which is how timeouts are exercised.

use super::error::PortError;
use super::traits::SerialPortAdapter;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// What the simulated device does when it receives a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Reply with these lines, each followed by `\n`.
    Lines(Vec<String>),
    /// Reply with raw bytes exactly as given (no framing added).
    Raw(Vec<u8>),
    /// Say nothing.
    Silence,
    /// Fail the write that carried the command with the given I/O error kind.
    WriteError(io::ErrorKind),
    /// The device disappears: this write and everything after it fails.
    Disconnect,
}

impl MockResponse {
    /// Convenience constructor from a multi-line string.
    pub fn lines(text: &str) -> Self {
        Self::Lines(text.lines().map(str::to_string).collect())
    }

    /// A bare acknowledgement.
    pub fn ok() -> Self {
        Self::Lines(vec!["ok".to_string()])
    }
}

type Responder = Arc<dyn Fn(&str) -> MockResponse + Send + Sync>;

#[derive(Default)]
struct MockPortState {
    read_queue: VecDeque<u8>,
    pending_line: Vec<u8>,
    sent_lines: Vec<String>,
    queued: HashMap<String, VecDeque<MockResponse>>,
    defaults: HashMap<String, MockResponse>,
    responder: Option<Responder>,
    disconnect_after: Option<usize>,
    connected: bool,
    timeout: Duration,
    input_cleared: usize,
}

/// A scripted reply, or the responder to ask once the state lock is released.
enum Lookup {
    Ready(MockResponse),
    Ask(Responder),
}

impl MockPortState {
    fn response_for(&mut self, line: &str) -> Lookup {
        let mnemonic = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        if let Some(queue) = self.queued.get_mut(&mnemonic) {
            if let Some(response) = queue.pop_front() {
                return Lookup::Ready(response);
            }
        }
        if let Some(response) = self.defaults.get(&mnemonic) {
            return Lookup::Ready(response.clone());
        }
        match &self.responder {
            Some(responder) => Lookup::Ask(Arc::clone(responder)),
            None => Lookup::Ready(MockResponse::Silence),
        }
    }

    fn disconnected_error(&self) -> PortError {
        PortError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "mock device unplugged",
        ))
    }
}

/// Mock serial port implementation for testing.
///
/// Clones share state, so a test can keep a handle for inspection after the
/// port itself has been moved into a transport.
///
/// # Example
/// ```
/// use marlin_harness::port::{MockResponse, MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
/// port.set_default_reply("M115", MockResponse::lines("FIRMWARE_NAME:Marlin\nok"));
///
/// port.write_bytes(b"M115\n").unwrap();
/// let mut buffer = [0u8; 64];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"FIRMWARE_NAME:Marlin\nok\n");
/// assert_eq!(port.sent_lines(), vec!["M115".to_string()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState {
                connected: true,
                timeout: Duration::from_millis(100),
                ..Default::default()
            })),
        }
    }

    /// Enqueue unsolicited bytes (a boot banner, stray output) for reading.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Queue a one-shot response for the next command with this mnemonic.
    ///
    /// Queued responses are consumed in order and take precedence over the
    /// default reply and the responder.
    pub fn push_reply(&self, mnemonic: &str, response: MockResponse) {
        self.state
            .lock()
            .queued
            .entry(mnemonic.to_ascii_uppercase())
            .or_default()
            .push_back(response);
    }

    /// Set the response used every time this mnemonic is received.
    pub fn set_default_reply(&self, mnemonic: &str, response: MockResponse) {
        self.state
            .lock()
            .defaults
            .insert(mnemonic.to_ascii_uppercase(), response);
    }

    /// Fallback for commands with neither queued nor default replies.
    ///
    /// The closure runs without the port's lock held, so it may inspect a
    /// clone of this port (for example through [`Self::sent_lines`]).
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> MockResponse + Send + Sync + 'static,
    {
        self.state.lock().responder = Some(Arc::new(responder));
    }

    /// Unplug the device after it has received `lines` command lines.
    ///
    /// The reply to the last accepted line is still delivered.
    pub fn disconnect_after(&self, lines: usize) {
        self.state.lock().disconnect_after = Some(lines);
    }

    /// Unplug the device now.
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    /// Every command line received so far, without line terminators.
    pub fn sent_lines(&self) -> Vec<String> {
        self.state.lock().sent_lines.clone()
    }

    /// How many received lines started with the given mnemonic.
    pub fn count_sent(&self, mnemonic: &str) -> usize {
        let mnemonic = mnemonic.to_ascii_uppercase();
        self.state
            .lock()
            .sent_lines
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(mnemonic.as_str()))
            .count()
    }

    /// Number of times the receive buffer was cleared.
    pub fn input_clear_count(&self) -> usize {
        self.state.lock().input_cleared
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

impl SerialPortAdapter for MockSerialPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(state.disconnected_error());
        }

        state.pending_line.extend_from_slice(data);

        let mut outcome = Ok(data.len());
        while let Some(pos) = memchr::memchr(b'\n', &state.pending_line) {
            let raw: Vec<u8> = state.pending_line.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() {
                continue;
            }
            state.sent_lines.push(line.clone());

            let response = match state.response_for(&line) {
                Lookup::Ready(response) => response,
                Lookup::Ask(responder) => {
                    // The responder may inspect this port, so it runs unlocked.
                    drop(state);
                    let response = responder(&line);
                    state = self.state.lock();
                    response
                }
            };

            match response {
                MockResponse::Lines(lines) => {
                    for reply in lines {
                        state.read_queue.extend(reply.as_bytes());
                        state.read_queue.push_back(b'\n');
                    }
                }
                MockResponse::Raw(bytes) => state.read_queue.extend(bytes),
                MockResponse::Silence => {}
                MockResponse::WriteError(kind) => {
                    outcome = Err(PortError::Io(io::Error::new(kind, "mock write failure")));
                }
                MockResponse::Disconnect => {
                    state.connected = false;
                    state.read_queue.clear();
                    return Err(state.disconnected_error());
                }
            }

            if let Some(limit) = state.disconnect_after {
                if state.sent_lines.len() >= limit {
                    state.connected = false;
                }
            }
        }

        outcome
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            match state.read_queue.pop_front() {
                Some(queued) => {
                    *byte = queued;
                    bytes_read += 1;
                }
                None => break,
            }
        }

        if bytes_read > 0 {
            Ok(bytes_read)
        } else if !state.connected {
            Err(state.disconnected_error())
        } else {
            Err(PortError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "No data available",
            )))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PortError> {
        self.state.lock().timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), PortError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(state.disconnected_error());
        }
        state.read_queue.clear();
        state.input_cleared += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(port: &mut MockSerialPort) -> String {
        let mut buffer = [0u8; 256];
        match port.read_bytes(&mut buffer) {
            Ok(n) => String::from_utf8_lossy(&buffer[..n]).to_string(),
            Err(_) => String::new(),
        }
    }

    #[test]
    fn test_default_reply_is_repeated() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_default_reply("M105", MockResponse::lines("ok T:20.0 /0.0"));

        port.write_bytes(b"M105\n").unwrap();
        port.write_bytes(b"M105\n").unwrap();

        assert_eq!(read_all(&mut port), "ok T:20.0 /0.0\nok T:20.0 /0.0\n");
        assert_eq!(port.count_sent("M105"), 2);
    }

    #[test]
    fn test_queued_replies_take_precedence_in_order() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_default_reply("M119", MockResponse::lines("default\nok"));
        port.push_reply("M119", MockResponse::lines("first\nok"));
        port.push_reply("M119", MockResponse::lines("second\nok"));

        port.write_bytes(b"M119\n").unwrap();
        assert_eq!(read_all(&mut port), "first\nok\n");
        port.write_bytes(b"M119\n").unwrap();
        assert_eq!(read_all(&mut port), "second\nok\n");
        port.write_bytes(b"M119\n").unwrap();
        assert_eq!(read_all(&mut port), "default\nok\n");
    }

    #[test]
    fn test_line_split_across_writes() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_default_reply("G28", MockResponse::ok());

        port.write_bytes(b"G2").unwrap();
        assert!(port.sent_lines().is_empty());
        port.write_bytes(b"8 X\n").unwrap();

        assert_eq!(port.sent_lines(), vec!["G28 X".to_string()]);
        assert_eq!(read_all(&mut port), "ok\n");
    }

    #[test]
    fn test_unscripted_command_is_silent() {
        let mut port = MockSerialPort::new("MOCK0");
        port.write_bytes(b"M999\n").unwrap();

        let mut buffer = [0u8; 8];
        let err = port.read_bytes(&mut buffer).unwrap_err();
        assert!(err.is_idle());
    }

    #[test]
    fn test_responder_fallback() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_responder(|line| MockResponse::Lines(vec![format!("echo:{line}"), "ok".into()]));

        port.write_bytes(b"G1 X5\n").unwrap();
        assert_eq!(read_all(&mut port), "echo:G1 X5\nok\n");
    }

    #[test]
    fn test_responder_can_inspect_its_port() {
        let mut port = MockSerialPort::new("MOCK0");
        let observer = port.clone();
        port.set_responder(move |_| {
            MockResponse::Lines(vec![format!("echo:lines {}", observer.sent_lines().len()), "ok".into()])
        });

        port.write_bytes(b"G4 P1\nG4 P2\n").unwrap();
        assert_eq!(read_all(&mut port), "echo:lines 1\nok\necho:lines 2\nok\n");
    }

    #[test]
    fn test_write_error_response() {
        let mut port = MockSerialPort::new("MOCK0");
        port.push_reply("M122", MockResponse::WriteError(io::ErrorKind::BrokenPipe));

        let err = port.write_bytes(b"M122\n").unwrap_err();
        assert!(!err.is_disconnect());
        assert!(port.is_connected());
    }

    #[test]
    fn test_disconnect_after_lines() {
        let mut port = MockSerialPort::new("MOCK0");
        port.set_default_reply("M105", MockResponse::ok());
        port.disconnect_after(1);

        port.write_bytes(b"M105\n").unwrap();
        assert!(!port.is_connected());
        // The reply that was already on the wire is still readable.
        assert_eq!(read_all(&mut port), "ok\n");

        let err = port.write_bytes(b"M105\n").unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_clear_input() {
        let mut port = MockSerialPort::new("MOCK0");
        port.enqueue_read(b"start\necho: boot banner\n");

        port.clear_input().unwrap();
        assert_eq!(port.available_bytes(), 0);
        assert_eq!(port.input_clear_count(), 1);
    }
}
