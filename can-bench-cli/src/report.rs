//! Bench run summary
//!
//! Collects the scenario reports of one `run` and renders them as a text
//! table or as JSON (`--json`).

use can_bench::{ScenarioOutcome, ScenarioReport};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct BenchSummary {
    /// RFC 3339 start time of the run
    pub started_at: String,
    pub interface: String,
    pub scenarios: Vec<ScenarioReport>,
    pub failed: usize,
    /// True if Ctrl-C stopped the run before every scenario finished
    pub cancelled: bool,
}

impl BenchSummary {
    pub fn new(started_at: DateTime<Local>, interface: &str) -> Self {
        Self {
            started_at: started_at.to_rfc3339(),
            interface: interface.to_string(),
            scenarios: Vec::new(),
            failed: 0,
            cancelled: false,
        }
    }

    pub fn push(&mut self, report: ScenarioReport) {
        if report.outcome.is_failure() {
            self.failed += 1;
        }
        if report.run.cancelled {
            self.cancelled = true;
        }
        self.scenarios.push(report);
    }

    pub fn passed(&self) -> bool {
        self.failed == 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Bench run on {} started {}", self.interface, self.started_at);
        for report in &self.scenarios {
            let status = match &report.outcome {
                ScenarioOutcome::Passed => "PASS".to_string(),
                ScenarioOutcome::Failed { reason } => format!("FAIL ({})", reason),
                ScenarioOutcome::Observed { samples, .. } => format!("{} sample(s)", samples),
            };
            let _ = writeln!(
                out,
                "  {:<32} {:<40} {} sent, {} received, {:.2} s",
                report.name,
                status,
                report.run.frames_sent,
                report.run.frames_received,
                report.run.elapsed.as_secs_f64()
            );
        }
        let _ = write!(
            out,
            "{} scenario(s), {} failed{}",
            self.scenarios.len(),
            self.failed,
            if self.cancelled { ", cancelled" } else { "" }
        );
        out
    }
}
