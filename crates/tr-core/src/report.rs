//! Machine-readable run summaries.
//!
//! §3's `Result` entity carries only a wall-clock `Duration`; this
//! wraps a whole stage run with a run identifier and start/finish
//! timestamps (`run_id: Uuid`, `started_at`/`finished_at: DateTime<Utc>`)
//! for callers that want to log or archive a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tr_types::{StepResult, TerminalStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<StepResult>,
}

impl RunReport {
    pub fn count(&self, status: TerminalStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Total wall-clock elapsed across the whole run (not the sum of per-step
    /// durations, which overlap under concurrency).
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counts_by_status() {
        let report = RunReport {
            run_id: Uuid::new_v4(),
            stage: "main".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            results: vec![
                StepResult::ok("a", "done", Duration::ZERO),
                StepResult::ok("b", "done", Duration::ZERO),
                StepResult::error("c", "boom", "boom".to_string(), Duration::ZERO),
                StepResult::skipped("d", "skipped (dependency failed: c)"),
            ],
        };
        assert_eq!(report.count(TerminalStatus::Ok), 2);
        assert_eq!(report.count(TerminalStatus::Error), 1);
        assert_eq!(report.count(TerminalStatus::Skipped), 1);
        assert_eq!(report.count(TerminalStatus::Warn), 0);
    }
}
