//! Test cases and their execution.
//!
//! A [`TestCase`] is an immutable definition. Running it drives an explicit
//! [`CaseState`] machine against a borrowed [`Transport`], so exclusive use
//! of the link is held for the whole case, retries and backoff included.

use crate::codec::{self, Command, ParsedReply};
use crate::expect::{Expectation, Mismatch};
use crate::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Session-wide cancellation flag, shared with the signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns false if the token was tripped.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(SLICE));
        }
    }
}

/// Defaults applied to cases that do not override them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    pub command_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            retries: 1,
            retry_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl ExecutionPolicy {
    /// Delay before attempt `failed + 1`, growing geometrically.
    pub fn backoff_after(&self, failed: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(failed.saturating_sub(1) as i32);
        self.retry_backoff.mul_f64(factor.min(64.0))
    }
}

/// Final verdict of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// The expectation held.
    Passed,
    /// The firmware answered, but not as expected.
    Failed,
    /// The check could not be completed (timeout, I/O, connection).
    Error,
    /// Never attempted because the session was aborted or cancelled.
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        })
    }
}

/// The recorded outcome of running a case. Built once, never updated.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub command: String,
    pub status: TestStatus,
    pub elapsed: Duration,
    pub attempts: u32,
    pub message: Option<String>,
    pub raw: Vec<String>,
}

impl TestResult {
    pub fn skipped(case: &TestCase, reason: &str) -> Self {
        Self {
            name: case.name.clone(),
            command: case.command.encode(),
            status: TestStatus::Skipped,
            elapsed: Duration::ZERO,
            attempts: 0,
            message: Some(reason.to_string()),
            raw: Vec::new(),
        }
    }
}

/// Why the rest of the session cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// The link never came up.
    ConnectFailed(String),
    ConnectionLost(String),
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(detail) => write!(f, "could not connect: {detail}"),
            Self::ConnectionLost(detail) => write!(f, "connection lost: {detail}"),
            Self::Cancelled => f.write_str("cancelled by user"),
        }
    }
}

/// A case's result plus whether it ended the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRun {
    pub result: TestResult,
    pub abort: Option<AbortReason>,
}

/// One declarative check.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub command: Command,
    pub expectation: Expectation,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    /// Sent (and each acknowledged) before every attempt.
    pub setup: Vec<Command>,
    /// Sent best-effort once the verdict is known.
    pub teardown: Vec<Command>,
    /// Pause after the case, for hardware that needs to come to rest.
    pub settle: Option<Duration>,
}

/// Lifecycle of one case execution.
#[derive(Debug)]
pub enum CaseState {
    Pending,
    Sending { attempt: u32 },
    AwaitingReply { attempt: u32 },
    RetryPending { attempt: u32, cause: Attempt },
    Passed,
    Failed(String),
    Error(String),
}

/// Why an attempt did not pass.
#[derive(Debug)]
pub enum Attempt {
    Mismatch(Mismatch),
    Transport(TransportError),
    /// A setup step never got its acknowledgement.
    Setup { step: String, error: TransportError },
}

impl Attempt {
    fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Mismatch(_) => None,
            Self::Transport(error) | Self::Setup { error, .. } => Some(error),
        }
    }
}

fn describe_transport(f: &mut fmt::Formatter<'_>, error: &TransportError) -> fmt::Result {
    match error {
        TransportError::Timeout { after, partial } => {
            write!(f, "timed out after {after:?} waiting for a reply")?;
            if partial.is_empty() {
                f.write_str(" (nothing received)")
            } else {
                write!(f, "; partial reply: {}", partial.join(" | "))
            }
        }
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch(m) => write!(f, "{m}"),
            Self::Transport(error) => describe_transport(f, error),
            Self::Setup { step, error } => {
                write!(f, "setup {step}: ")?;
                describe_transport(f, error)
            }
        }
    }
}

impl TestCase {
    pub fn new(name: impl Into<String>, command: Command, expectation: Expectation) -> Self {
        Self {
            name: name.into(),
            command,
            expectation,
            timeout: None,
            retries: None,
            setup: Vec::new(),
            teardown: Vec::new(),
            settle: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_setup(mut self, command: Command) -> Self {
        self.setup.push(command);
        self
    }

    pub fn with_teardown(mut self, command: Command) -> Self {
        self.teardown.push(command);
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }

    /// Run the case to a single verdict.
    pub fn run(
        &self,
        transport: &mut Transport,
        policy: &ExecutionPolicy,
        cancel: &CancelToken,
    ) -> CaseRun {
        let span = info_span!("case", name = %self.name, command = %self.command);
        let _guard = span.enter();

        let timeout = self.timeout.unwrap_or(policy.command_timeout);
        let max_attempts = self.retries.unwrap_or(policy.retries).saturating_add(1);
        let started = Instant::now();
        let mut attempts = 0;
        let mut raw: Vec<String> = Vec::new();
        let mut abort = None;

        let mut state = CaseState::Pending;
        let (status, message) = loop {
            debug!(?state, "case state");
            state = match state {
                CaseState::Pending => CaseState::Sending { attempt: 1 },

                CaseState::Sending { attempt } => {
                    if cancel.is_cancelled() {
                        abort = Some(AbortReason::Cancelled);
                        if attempt == 1 {
                            return CaseRun {
                                result: TestResult::skipped(self, "session cancelled"),
                                abort,
                            };
                        }
                        CaseState::Error(format!("cancelled before attempt {attempt}"))
                    } else {
                        attempts = attempt;
                        match self.send(transport, timeout) {
                            Ok(()) => CaseState::AwaitingReply { attempt },
                            Err(cause) => self.next_after(attempt, max_attempts, cause, &mut raw, &mut abort),
                        }
                    }
                }

                CaseState::AwaitingReply { attempt } => {
                    match transport.read_until(codec::is_terminator, timeout) {
                        Ok(reply) => {
                            let parsed = codec::decode(&self.command, &reply);
                            match self.expectation.evaluate(&parsed) {
                                Ok(()) => {
                                    raw = parsed.raw;
                                    CaseState::Passed
                                }
                                Err(mismatch) => {
                                    raw = parsed.raw;
                                    self.next_after(
                                        attempt,
                                        max_attempts,
                                        Attempt::Mismatch(mismatch),
                                        &mut raw,
                                        &mut abort,
                                    )
                                }
                            }
                        }
                        Err(e) => self.next_after(
                            attempt,
                            max_attempts,
                            Attempt::Transport(e),
                            &mut raw,
                            &mut abort,
                        ),
                    }
                }

                CaseState::RetryPending { attempt, cause } => {
                    let delay = policy.backoff_after(attempt);
                    warn!(attempt, max_attempts, ?delay, "attempt failed, retrying: {cause}");
                    if cancel.sleep(delay) {
                        CaseState::Sending { attempt: attempt + 1 }
                    } else {
                        abort = Some(AbortReason::Cancelled);
                        CaseState::Error(format!("cancelled while retrying after: {cause}"))
                    }
                }

                CaseState::Passed => break (TestStatus::Passed, None),
                CaseState::Failed(m) => break (TestStatus::Failed, Some(m)),
                CaseState::Error(m) => break (TestStatus::Error, Some(m)),
            };
        };

        let elapsed = started.elapsed();
        info!(%status, attempts, elapsed_ms = elapsed.as_millis() as u64, "case finished");

        if abort.is_none() {
            abort = self.finish(transport, timeout, cancel);
        }

        CaseRun {
            result: TestResult {
                name: self.name.clone(),
                command: self.command.encode(),
                status,
                elapsed,
                attempts,
                message,
                raw,
            },
            abort,
        }
    }

    /// Setup commands then the case's own command.
    fn send(&self, transport: &mut Transport, timeout: Duration) -> Result<(), Attempt> {
        for step in &self.setup {
            let reply = transport
                .exchange(&step.encode(), timeout)
                .map_err(|error| Attempt::Setup {
                    step: step.encode(),
                    error,
                })?;
            let parsed = codec::decode(step, &reply);
            if !parsed.success {
                return Err(Attempt::Mismatch(setup_mismatch(step, &parsed)));
            }
        }
        transport
            .send_line(&self.command.encode())
            .map_err(Attempt::Transport)
    }

    fn next_after(
        &self,
        attempt: u32,
        max_attempts: u32,
        cause: Attempt,
        raw: &mut Vec<String>,
        abort: &mut Option<AbortReason>,
    ) -> CaseState {
        if let Some(TransportError::Timeout { partial, .. }) = cause.transport_error() {
            raw.clone_from(partial);
        }
        if let Some(e) = cause.transport_error() {
            if e.is_fatal() {
                warn!("connection lost: {e}");
                *abort = Some(AbortReason::ConnectionLost(e.detail()));
                return CaseState::Error(cause.to_string());
            }
        }
        if attempt < max_attempts {
            return CaseState::RetryPending { attempt, cause };
        }
        match cause {
            Attempt::Mismatch(m) => CaseState::Failed(m.to_string()),
            transport => CaseState::Error(transport.to_string()),
        }
    }

    /// Teardown and settle. A connection loss here still aborts the session.
    fn finish(
        &self,
        transport: &mut Transport,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Option<AbortReason> {
        for step in &self.teardown {
            if cancel.is_cancelled() {
                return Some(AbortReason::Cancelled);
            }
            match transport.exchange(&step.encode(), timeout) {
                Ok(_) => debug!(command = %step, "teardown acknowledged"),
                Err(e) if e.is_fatal() => {
                    warn!(command = %step, "connection lost during teardown: {e}");
                    return Some(AbortReason::ConnectionLost(e.detail()));
                }
                Err(e) => warn!(command = %step, "teardown step failed: {e}"),
            }
        }
        if let Some(settle) = self.settle {
            debug!(?settle, "settling");
            if !cancel.sleep(settle) {
                return Some(AbortReason::Cancelled);
            }
        }
        None
    }
}

fn setup_mismatch(step: &Command, parsed: &ParsedReply) -> Mismatch {
    Mismatch::Predicate {
        field: format!("setup {step}"),
        expected: "ok".to_string(),
        actual: parsed
            .errors
            .first()
            .cloned()
            .unwrap_or_else(|| "no acknowledgement".to_string()),
    }
}
