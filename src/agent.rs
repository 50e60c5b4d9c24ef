//! Agents: named, ordered groups of test cases.

use crate::case::{AbortReason, CancelToken, ExecutionPolicy, TestCase, TestResult, TestStatus};
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub name: String,
    pub description: String,
    pub cases: Vec<TestCase>,
}

/// Results of one agent, in case declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub agent: String,
    pub results: Vec<TestResult>,
    pub elapsed: Duration,
}

impl AgentReport {
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

impl Agent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            cases: Vec::new(),
        }
    }

    pub fn case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    /// Run every case in order. A failing case never stops its siblings;
    /// only a connection loss or cancellation does, and then every remaining
    /// case is recorded as skipped.
    pub fn run(
        &self,
        transport: &mut Transport,
        policy: &ExecutionPolicy,
        cancel: &CancelToken,
    ) -> (AgentReport, Option<AbortReason>) {
        let span = info_span!("agent", name = %self.name);
        let _guard = span.enter();
        info!(cases = self.cases.len(), "agent starting");

        let started = Instant::now();
        let mut results = Vec::with_capacity(self.cases.len());
        let mut abort = None;

        for case in &self.cases {
            if let Some(reason) = &abort {
                results.push(TestResult::skipped(case, &skip_message(reason)));
                continue;
            }
            let run = case.run(transport, policy, cancel);
            if let Some(reason) = &run.abort {
                warn!(case = %case.name, "aborting agent: {reason}");
            }
            abort = run.abort;
            results.push(run.result);
        }

        let report = AgentReport {
            agent: self.name.clone(),
            results,
            elapsed: started.elapsed(),
        };
        info!(
            passed = report.count(TestStatus::Passed),
            failed = report.count(TestStatus::Failed),
            errors = report.count(TestStatus::Error),
            skipped = report.count(TestStatus::Skipped),
            "agent finished"
        );
        (report, abort)
    }

    /// Report for an agent that never got to run.
    pub fn skipped(&self, reason: &AbortReason) -> AgentReport {
        let message = skip_message(reason);
        AgentReport {
            agent: self.name.clone(),
            results: self
                .cases
                .iter()
                .map(|case| TestResult::skipped(case, &message))
                .collect(),
            elapsed: Duration::ZERO,
        }
    }
}

fn skip_message(reason: &AbortReason) -> String {
    format!("not run: {reason}")
}
