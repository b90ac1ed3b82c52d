use serde::{Deserialize, Serialize};
use stackcheck_core::LoadError;
use std::fmt::Write as _;

use crate::finding::{Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Evaluated,
    /// The document could not be parsed or read.
    MalformedDocument,
    /// The document parsed but is not a valid template.
    SchemaError,
    /// Some resources could not be inspected.
    Incomplete,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Evaluated => "evaluated",
            Status::MalformedDocument => "malformed_document",
            Status::SchemaError => "schema_error",
            Status::Incomplete => "incomplete",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub total: usize,
}

impl Summary {
    fn of(findings: &[Finding]) -> Self {
        let mut s = Summary::default();
        for f in findings {
            match f.severity {
                Severity::Critical => s.critical += 1,
                Severity::High => s.high += 1,
                Severity::Medium => s.medium += 1,
                Severity::Low => s.low += 1,
                Severity::Info => s.info += 1,
            }
        }
        s.total = findings.len();
        s
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// File or stack the report is about; empty when unnamed.
    #[serde(default)]
    pub source: String,
    pub status: Status,
    pub findings: Vec<Finding>,
    pub summary: Summary,
    pub fail_on: Severity,
    pub passed: bool,
    /// Why the report is not `evaluated`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregates findings with the default `high` threshold.
pub fn aggregate(findings: Vec<Finding>) -> Report {
    aggregate_with(findings, Severity::High)
}

pub fn aggregate_with(findings: Vec<Finding>, fail_on: Severity) -> Report {
    Report::build(String::new(), Status::Evaluated, findings, fail_on, None)
}

impl Report {
    fn build(source: String, status: Status, findings: Vec<Finding>, fail_on: Severity, error: Option<String>) -> Self {
        let summary = Summary::of(&findings);
        let passed = status == Status::Evaluated && findings.iter().all(|f| f.severity < fail_on);
        Report { source, status, findings, summary, fail_on, passed, error }
    }

    /// A resource-free report for a template that did not load.
    pub fn load_failure(source: impl Into<String>, error: &LoadError, fail_on: Severity) -> Self {
        let status = if error.is_malformed() { Status::MalformedDocument } else { Status::SchemaError };
        Report::build(source.into(), status, Vec::new(), fail_on, Some(error.to_string()))
    }

    /// Keeps the findings gathered so far; never passes.
    pub fn incomplete(findings: Vec<Finding>, fail_on: Severity, reason: impl Into<String>) -> Self {
        Report::build(String::new(), Status::Incomplete, findings, fail_on, Some(reason.into()))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Findings at or above the threshold.
    pub fn failing(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= self.fail_on)
    }

    /// 0 on pass, 1 on failing findings, 2 when the template could not be
    /// fully evaluated.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            Status::Evaluated if self.passed => 0,
            Status::Evaluated => 1,
            _ => 2,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let name = if self.source.is_empty() { "<template>" } else { self.source.as_str() };
        let _ = writeln!(out, "{name}: {}", self.status.as_str());
        if let Some(error) = &self.error {
            let _ = writeln!(out, "  error: {error}");
        }
        for f in &self.findings {
            let _ = writeln!(out, "  {f}");
        }
        let counts: Vec<String> = Severity::ALL
            .iter()
            .filter(|s| self.summary.count(**s) > 0)
            .map(|s| format!("{} {s}", self.summary.count(*s)))
            .collect();
        let _ = write!(out, "  {} finding(s)", self.summary.total);
        if !counts.is_empty() {
            let _ = write!(out, " ({})", counts.join(", "));
        }
        let _ = writeln!(out, "; fail_on {}: {}", self.fail_on, if self.passed { "PASSED" } else { "FAILED" });
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
