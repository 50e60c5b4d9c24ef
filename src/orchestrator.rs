//! Drives a whole session: one link, agents strictly in schedule order.

use crate::agent::{Agent, AgentReport};
use crate::case::{AbortReason, CancelToken, ExecutionPolicy};
use crate::session::Session;
use crate::transport::{ConnectionParams, Transport, TransportError, TransportStats};
use chrono::Utc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

pub struct Orchestrator {
    connection: ConnectionParams,
    policy: ExecutionPolicy,
    agents: Vec<Agent>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(connection: ConnectionParams, policy: ExecutionPolicy, agents: Vec<Agent>) -> Self {
        Self {
            connection,
            policy,
            agents,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run against the real serial port.
    pub fn run(&self) -> Session {
        self.run_with(Transport::connect)
    }

    /// Run with a caller-supplied way of opening the link.
    ///
    /// The transport is opened once and shared by every case. It is dropped
    /// (closing the port) before this returns, whatever happened. The
    /// returned session always holds one report per scheduled agent.
    pub fn run_with<F>(&self, open: F) -> Session
    where
        F: FnOnce(&ConnectionParams) -> Result<Transport, TransportError>,
    {
        let id = Uuid::new_v4();
        let span = info_span!("session", %id, port = %self.connection.port);
        let _guard = span.enter();
        let started_at = Utc::now();
        info!(agents = self.agents.len(), "session starting");

        let mut reports = Vec::with_capacity(self.agents.len());
        let mut firmware = Vec::new();
        let mut stats = TransportStats::default();

        let mut abort = if self.cancel.is_cancelled() {
            Some(AbortReason::Cancelled)
        } else {
            None
        };

        let transport = match abort {
            Some(_) => None,
            None => match open(&self.connection) {
                Ok(transport) => Some(transport),
                Err(e) => {
                    error!("could not open link: {e}");
                    abort = Some(AbortReason::ConnectFailed(e.detail()));
                    None
                }
            },
        };

        if let Some(mut transport) = transport {
            firmware = transport.identification().to_vec();
            for agent in &self.agents {
                if abort.is_none() && self.cancel.is_cancelled() {
                    abort = Some(AbortReason::Cancelled);
                }
                if abort.is_none() {
                    if let Err(e) = transport.check_link() {
                        warn!(agent = %agent.name, "link check failed: {e}");
                        abort = Some(AbortReason::ConnectionLost(e.detail()));
                    }
                }
                let report = match &abort {
                    Some(reason) => agent.skipped(reason),
                    None => {
                        let (report, agent_abort) =
                            agent.run(&mut transport, &self.policy, &self.cancel);
                        abort = agent_abort;
                        report
                    }
                };
                reports.push(report);
            }
            stats = transport.close();
        }

        // Anything not yet reported never ran.
        if let Some(reason) = &abort {
            let remaining: Vec<AgentReport> = self.agents[reports.len()..]
                .iter()
                .map(|agent| agent.skipped(reason))
                .collect();
            reports.extend(remaining);
        }

        let session = Session {
            id,
            connection: self.connection.clone(),
            firmware,
            reports,
            started_at,
            finished_at: Utc::now(),
            abort,
            stats,
        };
        match &session.abort {
            Some(reason) => warn!("session aborted: {reason}"),
            None => info!(success = session.success(), "session finished"),
        }
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{TestCase, TestStatus};
    use crate::codec::Command;
    use crate::expect::Expectation;
    use crate::port::{MockResponse, MockSerialPort, PortConfiguration};
    use std::time::Duration;

    fn params() -> ConnectionParams {
        ConnectionParams {
            port: "MOCK0".into(),
            framing: PortConfiguration::default(),
            connect_timeout: Duration::from_millis(300),
        }
    }

    fn policy() -> ExecutionPolicy {
        ExecutionPolicy {
            command_timeout: Duration::from_millis(50),
            retries: 0,
            retry_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        }
    }

    fn agent(name: &str, lines: &[&str]) -> Agent {
        lines.iter().fold(Agent::new(name, ""), |agent, line| {
            agent.case(TestCase::new(
                *line,
                Command::parse(line).unwrap(),
                Expectation::Acknowledged,
            ))
        })
    }

    #[test]
    fn test_unreachable_device_skips_everything() {
        let orchestrator = Orchestrator::new(
            params(),
            policy(),
            vec![agent("a", &["M105"]), agent("b", &["M119", "M114"])],
        );
        let silent = MockSerialPort::new("MOCK0");
        let session = orchestrator.run_with(|p| Transport::open(Box::new(silent), p.connect_timeout));

        assert!(matches!(session.abort, Some(AbortReason::ConnectFailed(_))));
        assert_eq!(session.reports.len(), 2);
        assert_eq!(session.reports[1].count(TestStatus::Skipped), 2);
        assert!(!session.success());
    }

    #[test]
    fn test_transport_shared_and_stats_recorded() {
        let mock = MockSerialPort::new("MOCK0");
        mock.set_default_reply("M115", MockResponse::lines("FIRMWARE_NAME:Marlin\nok"));
        mock.set_responder(|_| MockResponse::ok());
        let orchestrator = Orchestrator::new(
            params(),
            policy(),
            vec![agent("a", &["M105"]), agent("b", &["M400"])],
        );

        let probe = mock.clone();
        let session = orchestrator.run_with(|p| Transport::open(Box::new(probe), p.connect_timeout));
        assert!(session.success());
        assert_eq!(session.firmware[0], "FIRMWARE_NAME:Marlin");
        assert_eq!(session.stats.commands_sent, 3);
        assert_eq!(mock.count_sent("M115"), 1);
    }

    #[test]
    fn test_pre_cancelled_session_never_opens() {
        let orchestrator = Orchestrator::new(params(), policy(), vec![agent("a", &["M105"])]);
        orchestrator.cancel_token().cancel();

        let session = orchestrator.run_with(|_| panic!("must not open the link"));
        assert_eq!(session.abort, Some(AbortReason::Cancelled));
        assert_eq!(session.reports[0].results[0].status, TestStatus::Skipped);
    }
}
