//! Session summaries.
//!
//! Everything here is a pure function of a finished [`Session`]: calling it
//! twice on the same session yields identical output.

use crate::case::{TestResult, TestStatus};
use crate::codec::{Grammar, ParsedReply};
use crate::session::Session;
use crate::transport::TransportStats;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

/// Case counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
}

impl Counts {
    fn add(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Error => self.error += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: &Counts) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.error += other.error;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub name: String,
    pub command: String,
    pub status: TestStatus,
    pub elapsed_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub raw: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub name: String,
    pub counts: Counts,
    pub elapsed_ms: u64,
    pub cases: Vec<CaseSummary>,
}

/// The first case, in execution order, that did not pass or get skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstFailure {
    pub agent: String,
    pub case: String,
    pub status: TestStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub port: String,
    pub baud_rate: u32,
    pub firmware: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
    pub success: bool,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub totals: Counts,
    pub first_failure: Option<FirstFailure>,
    pub agents: Vec<AgentSummary>,
    pub transport: TransportStats,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn firmware_name(lines: &[String]) -> Option<String> {
    let mut grammar = Grammar::Identification;
    let mut reply = ParsedReply::default();
    for line in lines {
        grammar.feed(line.trim(), &mut reply);
    }
    reply.field("FIRMWARE_NAME").map(ToString::to_string)
}

fn case_summary(result: &TestResult) -> CaseSummary {
    CaseSummary {
        name: result.name.clone(),
        command: result.command.clone(),
        status: result.status,
        elapsed_ms: millis(result.elapsed),
        attempts: result.attempts,
        message: result.message.clone(),
        // Raw lines are only interesting when something went wrong.
        raw: match result.status {
            TestStatus::Failed | TestStatus::Error => result.raw.clone(),
            TestStatus::Passed | TestStatus::Skipped => Vec::new(),
        },
    }
}

/// Build the structured summary of a session.
pub fn summarize(session: &Session) -> SessionSummary {
    let mut totals = Counts::default();
    let mut first_failure = None;

    let agents: Vec<AgentSummary> = session
        .reports
        .iter()
        .map(|report| {
            let mut counts = Counts::default();
            for result in &report.results {
                counts.add(result.status);
                if first_failure.is_none()
                    && matches!(result.status, TestStatus::Failed | TestStatus::Error)
                {
                    first_failure = Some(FirstFailure {
                        agent: report.agent.clone(),
                        case: result.name.clone(),
                        status: result.status,
                        message: result.message.clone(),
                    });
                }
            }
            totals.merge(&counts);
            AgentSummary {
                name: report.agent.clone(),
                counts,
                elapsed_ms: millis(report.elapsed),
                cases: report.results.iter().map(case_summary).collect(),
            }
        })
        .collect();

    SessionSummary {
        session_id: session.id.to_string(),
        port: session.connection.port.clone(),
        baud_rate: session.connection.framing.baud_rate,
        firmware: firmware_name(&session.firmware),
        started_at: session.started_at.to_rfc3339(),
        finished_at: session.finished_at.to_rfc3339(),
        elapsed_ms: u64::try_from(session.elapsed().num_milliseconds()).unwrap_or(0),
        success: session.success(),
        aborted: session.aborted(),
        abort_reason: session.abort.as_ref().map(ToString::to_string),
        totals,
        first_failure,
        agents,
        transport: session.stats.clone(),
    }
}

/// Pretty-printed JSON.
pub fn to_json(summary: &SessionSummary) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summary)
}

fn seconds(ms: u64) -> String {
    format!("{:.1}s", ms as f64 / 1000.0)
}

fn tag(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASS",
        TestStatus::Failed => "FAIL",
        TestStatus::Error => "ERR ",
        TestStatus::Skipped => "SKIP",
    }
}

/// Human-readable rendering.
pub fn render_text(summary: &SessionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session {}", summary.session_id);
    let _ = writeln!(out, "Port: {} @ {} baud", summary.port, summary.baud_rate);
    if let Some(firmware) = &summary.firmware {
        let _ = writeln!(out, "Firmware: {firmware}");
    }

    for agent in &summary.agents {
        let _ = writeln!(
            out,
            "\n[{}] {}/{} passed ({})",
            agent.name,
            agent.counts.passed,
            agent.counts.total,
            seconds(agent.elapsed_ms)
        );
        for case in &agent.cases {
            let _ = write!(out, "  {}  {}", tag(case.status), case.name);
            match &case.message {
                Some(message) => {
                    let _ = writeln!(out, ": {message}");
                }
                None => {
                    let _ = writeln!(out, " ({})", seconds(case.elapsed_ms));
                }
            }
        }
    }

    let t = &summary.totals;
    let _ = writeln!(
        out,
        "\nOverall: {}/{} passed, {} failed, {} error, {} skipped in {}",
        t.passed,
        t.total,
        t.failed,
        t.error,
        t.skipped,
        seconds(summary.elapsed_ms)
    );
    if let Some(first) = &summary.first_failure {
        let _ = write!(out, "First failure: {} / {} ({})", first.agent, first.case, first.status);
        match &first.message {
            Some(message) => {
                let _ = writeln!(out, ": {message}");
            }
            None => out.push('\n'),
        }
    }
    if let Some(reason) = &summary.abort_reason {
        let _ = writeln!(out, "Aborted: {reason}");
    }
    let _ = writeln!(out, "Result: {}", if summary.success { "PASS" } else { "FAIL" });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentReport;
    use crate::case::AbortReason;
    use crate::port::PortConfiguration;
    use crate::transport::ConnectionParams;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn result(name: &str, status: TestStatus, message: Option<&str>) -> TestResult {
        TestResult {
            name: name.into(),
            command: "M105".into(),
            status,
            elapsed: Duration::from_millis(120),
            attempts: 1,
            message: message.map(str::to_string),
            raw: vec!["T:err".into(), "ok".into()],
        }
    }

    fn session(abort: Option<AbortReason>) -> Session {
        let started = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Session {
            id: Uuid::nil(),
            connection: ConnectionParams {
                port: "/dev/ttyACM0".into(),
                framing: PortConfiguration::default(),
                connect_timeout: Duration::from_secs(5),
            },
            firmware: vec![
                "FIRMWARE_NAME:Marlin 2.1.2 (Github) SOURCE_CODE_URL:github.com/MarlinFirmware/Marlin".into(),
                "ok".into(),
            ],
            reports: vec![
                AgentReport {
                    agent: "hardware".into(),
                    results: vec![
                        result("Firmware Version", TestStatus::Passed, None),
                        result("Temperature Sensors", TestStatus::Failed, Some("T: field 'T' should be a number, got 'err'")),
                    ],
                    elapsed: Duration::from_millis(2500),
                },
                AgentReport {
                    agent: "tmc".into(),
                    results: vec![result("TMC Status", TestStatus::Skipped, Some("not run"))],
                    elapsed: Duration::ZERO,
                },
            ],
            started_at: started,
            finished_at: started + chrono::Duration::milliseconds(4200),
            abort,
            stats: TransportStats::default(),
        }
    }

    #[test]
    fn test_counts_and_first_failure() {
        let summary = summarize(&session(None));
        assert_eq!(
            summary.totals,
            Counts {
                total: 3,
                passed: 1,
                failed: 1,
                error: 0,
                skipped: 1
            }
        );
        assert_eq!(summary.firmware.as_deref(), Some("Marlin 2.1.2 (Github)"));
        assert_eq!(summary.elapsed_ms, 4200);
        assert!(!summary.success);
        let first = summary.first_failure.unwrap();
        assert_eq!((first.agent.as_str(), first.case.as_str()), ("hardware", "Temperature Sensors"));
    }

    #[test]
    fn test_raw_lines_only_for_problems() {
        let summary = summarize(&session(None));
        assert!(summary.agents[0].cases[0].raw.is_empty());
        assert_eq!(summary.agents[0].cases[1].raw.len(), 2);
    }

    #[test]
    fn test_summaries_are_idempotent() {
        let session = session(Some(AbortReason::ConnectionLost("unplugged".into())));
        let first = to_json(&summarize(&session)).unwrap();
        let second = to_json(&summarize(&session)).unwrap();
        assert_eq!(first, second);
        assert_eq!(render_text(&summarize(&session)), render_text(&summarize(&session)));
    }

    #[test]
    fn test_text_rendering() {
        let text = render_text(&summarize(&session(Some(AbortReason::Cancelled))));
        assert!(text.contains("[hardware] 1/2 passed (2.5s)"));
        assert!(text.contains("  FAIL  Temperature Sensors: T: field 'T'"));
        assert!(text.contains("Overall: 1/3 passed, 1 failed, 0 error, 1 skipped in 4.2s"));
        assert!(text.contains("First failure: hardware / Temperature Sensors (failed)"));
        assert!(text.contains("Aborted: cancelled by user"));
        assert!(text.ends_with("Result: FAIL\n"));
    }
}
