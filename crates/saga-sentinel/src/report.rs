//! Sentinel reports and the bounded log that retains them.
//!
//! A [`SentinelReport`] records one observation: which layer it concerns, how
//! severe it is, a message, free-form metadata, a timestamp and a correlation
//! id. The [`ReportLog`] keeps the most recent reports in insertion order and
//! evicts the oldest once its capacity is reached.
//!
//! # Query API
//!
//! - **Layer and minimum severity**: [`ReportLog::filtered`]
//! - **Correlation id**: [`ReportLog::correlated`]
//!
//! # Example
//!
//! ```
//! use saga_sentinel::report::{Layer, ReportLog, SentinelReport, Severity};
//!
//! let mut log = ReportLog::with_capacity(2);
//! for message in ["a", "b", "c"] {
//!     log.push(SentinelReport::new(Layer::Authority, Severity::Info, message, serde_json::Value::Null));
//! }
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.evicted(), 1);
//! assert_eq!(log.filtered(None, None).next().unwrap().message, "b");
//! ```

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Severity and Layer
// ---------------------------------------------------------------------------

/// How serious an observation is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// The part of the progression core an observation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Prerequisites,
    Compiler,
    Authority,
    Persistence,
    Sentinel,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Prerequisites => "prerequisites",
            Layer::Compiler => "compiler",
            Layer::Authority => "authority",
            Layer::Persistence => "persistence",
            Layer::Sentinel => "sentinel",
        })
    }
}

// ---------------------------------------------------------------------------
// SentinelReport
// ---------------------------------------------------------------------------

/// One structured, timestamped, correlated observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelReport {
    pub layer: Layer,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Transaction id for transaction checks, a fresh id otherwise.
    pub correlation_id: Uuid,
}

impl SentinelReport {
    /// Build a report stamped now with a fresh correlation id.
    pub fn new(
        layer: Layer,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            layer,
            severity,
            message: message.into(),
            metadata,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

// ---------------------------------------------------------------------------
// ReportLog
// ---------------------------------------------------------------------------

/// Append-only, bounded report retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportLog {
    reports: VecDeque<SentinelReport>,
    capacity: usize,
    evicted: u64,
}

impl ReportLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            reports: VecDeque::new(),
            capacity,
            evicted: 0,
        }
    }

    /// Append a report, evicting the oldest ones beyond capacity.
    pub fn push(&mut self, report: SentinelReport) {
        self.reports.push_back(report);
        while self.reports.len() > self.capacity {
            self.reports.pop_front();
            self.evicted += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reports dropped to honor the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &SentinelReport> {
        self.reports.iter()
    }

    /// Reports matching an optional layer and at least an optional severity,
    /// oldest first.
    pub fn filtered(
        &self,
        layer: Option<Layer>,
        min_severity: Option<Severity>,
    ) -> impl Iterator<Item = &SentinelReport> {
        self.reports.iter().filter(move |r| {
            layer.map_or(true, |l| r.layer == l) && min_severity.map_or(true, |s| r.severity >= s)
        })
    }

    /// Reports sharing one correlation id.
    pub fn correlated(&self, correlation_id: Uuid) -> impl Iterator<Item = &SentinelReport> {
        self.reports
            .iter()
            .filter(move |r| r.correlation_id == correlation_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report(layer: Layer, severity: Severity, message: &str) -> SentinelReport {
        SentinelReport::new(layer, severity, message, serde_json::Value::Null)
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn severity_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn filter_by_layer_and_min_severity() {
        let mut log = ReportLog::with_capacity(10);
        log.push(report(Layer::Authority, Severity::Info, "committed"));
        log.push(report(Layer::Authority, Severity::Critical, "nested mutation"));
        log.push(report(Layer::Compiler, Severity::Error, "bad step"));

        let authority: Vec<_> = log.filtered(Some(Layer::Authority), None).collect();
        assert_eq!(authority.len(), 2);

        let serious: Vec<_> = log.filtered(None, Some(Severity::Error)).collect();
        assert_eq!(serious.len(), 2);

        let both: Vec<_> = log
            .filtered(Some(Layer::Authority), Some(Severity::Error))
            .map(|r| r.message.as_str())
            .collect();
        assert_eq!(both, vec!["nested mutation"]);
    }

    #[test]
    fn eviction_keeps_newest_reports() {
        let mut log = ReportLog::with_capacity(3);
        for i in 0..5 {
            log.push(report(Layer::Sentinel, Severity::Info, &format!("r{i}")));
        }
        let messages: Vec<_> = log.iter().map(|r| r.message.clone()).collect();
        assert_eq!(messages, vec!["r2", "r3", "r4"]);
        assert_eq!(log.evicted(), 2);
        assert_eq!(log.capacity(), 3);
    }

    #[test]
    fn correlated_reports_are_grouped() {
        let id = Uuid::new_v4();
        let mut log = ReportLog::with_capacity(10);
        log.push(report(Layer::Authority, Severity::Error, "a").correlated(id));
        log.push(report(Layer::Authority, Severity::Error, "b"));
        log.push(report(Layer::Authority, Severity::Critical, "c").correlated(id));
        assert_eq!(log.correlated(id).count(), 2);
    }
}
