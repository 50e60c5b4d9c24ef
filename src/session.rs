//! A completed test session.

use crate::agent::AgentReport;
use crate::case::{AbortReason, TestStatus};
use crate::transport::{ConnectionParams, TransportStats};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub connection: ConnectionParams,
    /// Lines returned by the identification probe.
    pub firmware: Vec<String>,
    /// One report per scheduled agent, in schedule order.
    pub reports: Vec<AgentReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub abort: Option<AbortReason>,
    pub stats: TransportStats,
}

impl Session {
    pub fn aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Not aborted and every executed case passed.
    pub fn success(&self) -> bool {
        !self.aborted()
            && self
                .reports
                .iter()
                .flat_map(|r| &r.results)
                .filter(|r| r.status != TestStatus::Skipped)
                .all(|r| r.status == TestStatus::Passed)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
