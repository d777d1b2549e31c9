//! The Invariant Sentinel: passive observation of the progression core.
//!
//! The sentinel never mutates character state. It receives reports from any
//! layer through [`Sentinel::report`] and watches the Mutation Authority as a
//! [`TransactionObserver`]. What happens to each report depends on the
//! [`SentinelMode`] the sentinel runs in, consulted through
//! [`SentinelMode::disposition`].
//!
//! # Transaction checks
//!
//! | Event | Check | Severity |
//! |-------|-------|----------|
//! | `Started` / `Rejected` | another transaction already open for the character | CRITICAL |
//! | `Rejected` | any other structural rejection | ERROR |
//! | `Ended` | identifiers duplicated within a touched collection | CRITICAL |
//! | `Ended` | derived recalculation count differs from the expected count | ERROR |
//! | `Ended` | mutation count above the ceiling | ERROR |
//! | `Ended` | write failure | ERROR |
//! | `Ended` | transaction abandoned without a plan | WARN |

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use saga_core::character::{CharacterId, Collection};
use saga_core::event::{
    ObserverVeto, TransactionEvent, TransactionId, TransactionObserver, TransactionOutcome,
    TransactionSummary,
};
use saga_core::plan::StructuralFailure;

use crate::report::{Layer, ReportLog, SentinelReport, Severity};
use crate::InvariantViolation;

/// Name the sentinel signs its observer vetoes with.
pub const OBSERVER_NAME: &str = "invariant-sentinel";

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// How loudly the sentinel reacts to what it observes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelMode {
    /// Inert. Reports are discarded and transactions are not observed.
    Off,
    /// Violations of ERROR severity and above become hard failures.
    #[default]
    Development,
    /// Every violation is surfaced as a warning.
    Strict,
    /// Reports are logged and retained without interrupting anything.
    Production,
}

impl fmt::Display for SentinelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SentinelMode::Off => "off",
            SentinelMode::Development => "development",
            SentinelMode::Strict => "strict",
            SentinelMode::Production => "production",
        })
    }
}

/// What the sentinel does with one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop it.
    Ignore,
    /// Retain it and log at the level matching its severity.
    Log,
    /// Retain it and emit a warning.
    Warn,
    /// Retain it and fail the caller.
    Raise,
}

impl SentinelMode {
    /// The policy consulted for every report.
    pub fn disposition(self, severity: Severity) -> Disposition {
        match self {
            SentinelMode::Off => Disposition::Ignore,
            SentinelMode::Development if severity >= Severity::Error => Disposition::Raise,
            SentinelMode::Development => Disposition::Log,
            SentinelMode::Strict if severity >= Severity::Warn => Disposition::Warn,
            SentinelMode::Strict | SentinelMode::Production => Disposition::Log,
        }
    }

    pub fn is_active(self) -> bool {
        self != SentinelMode::Off
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sentinel configuration. Every field has a default, so partial JSON works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub mode: SentinelMode,
    /// Reports retained before the oldest are evicted.
    pub max_reports: usize,
    /// Transaction observations retained for diagnostics.
    pub max_observations: usize,
    /// Raw writes a single transaction may perform before it is flagged.
    pub mutation_ceiling: usize,
    /// Derived recalculations a committed transaction must perform.
    pub expected_derived_recalculations: u32,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            mode: SentinelMode::Development,
            max_reports: 500,
            max_observations: 256,
            mutation_ceiling: 64,
            expected_derived_recalculations: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Observation state
// ---------------------------------------------------------------------------

/// Whether the sentinel is observing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelState {
    Off,
    Active,
}

/// Where one transaction stands from the sentinel's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationState {
    Observing,
    Reported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionObservation {
    pub transaction_id: TransactionId,
    pub character_id: CharacterId,
    pub state: ObservationState,
    /// Reports this transaction produced.
    pub findings: usize,
}

/// Read-only export of everything the sentinel holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub mode: SentinelMode,
    pub state: SentinelState,
    pub total_reports: u64,
    pub evicted_reports: u64,
    pub counts_by_severity: BTreeMap<Severity, usize>,
    pub open_transactions: BTreeMap<CharacterId, TransactionId>,
    pub observations: Vec<TransactionObservation>,
    pub reports: Vec<SentinelReport>,
}

struct Inner {
    config: SentinelConfig,
    log: ReportLog,
    total_reports: u64,
    open: BTreeMap<CharacterId, TransactionId>,
    observations: VecDeque<TransactionObservation>,
}

impl Inner {
    /// Apply the mode policy to one report.
    fn record(&mut self, report: SentinelReport) -> Result<(), InvariantViolation> {
        let disposition = self.config.mode.disposition(report.severity);
        if disposition == Disposition::Ignore {
            return Ok(());
        }

        match disposition {
            Disposition::Raise | Disposition::Warn => warn!(
                layer = %report.layer,
                severity = %report.severity,
                correlation = %report.correlation_id,
                "{}",
                report.message
            ),
            _ => log_at_severity(&report),
        }

        let violation = (disposition == Disposition::Raise).then(|| InvariantViolation {
            layer: report.layer,
            severity: report.severity,
            message: report.message.clone(),
            correlation_id: report.correlation_id,
        });
        self.total_reports += 1;
        self.log.push(report);

        match violation {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }

    fn observe(&mut self, transaction_id: TransactionId, character_id: &CharacterId) {
        self.observations.push_back(TransactionObservation {
            transaction_id,
            character_id: character_id.clone(),
            state: ObservationState::Observing,
            findings: 0,
        });
        while self.observations.len() > self.config.max_observations {
            self.observations.pop_front();
        }
    }

    fn conclude(&mut self, summary: &TransactionSummary, findings: usize) {
        match self
            .observations
            .iter_mut()
            .find(|o| o.transaction_id == summary.transaction_id)
        {
            Some(observation) => {
                observation.state = ObservationState::Reported;
                observation.findings = findings;
            }
            None => {
                // Started before the sentinel became active.
                self.observe(summary.transaction_id, &summary.character_id);
                if let Some(observation) = self.observations.back_mut() {
                    observation.state = ObservationState::Reported;
                    observation.findings = findings;
                }
            }
        }
    }
}

fn log_at_severity(report: &SentinelReport) {
    match report.severity {
        Severity::Info => info!(
            layer = %report.layer,
            correlation = %report.correlation_id,
            "{}",
            report.message
        ),
        Severity::Warn => warn!(
            layer = %report.layer,
            correlation = %report.correlation_id,
            "{}",
            report.message
        ),
        Severity::Error | Severity::Critical => error!(
            layer = %report.layer,
            severity = %report.severity,
            correlation = %report.correlation_id,
            "{}",
            report.message
        ),
    }
}

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

/// Passive observer of every layer of the progression core.
///
/// ```
/// use saga_sentinel::prelude::*;
///
/// let sentinel = Sentinel::new(SentinelConfig {
///     mode: SentinelMode::Production,
///     ..SentinelConfig::default()
/// });
/// sentinel
///     .report(Layer::Compiler, Severity::Error, "step produced no delta", serde_json::Value::Null)
///     .unwrap();
/// assert_eq!(sentinel.get_reports(Some(Layer::Compiler), None).len(), 1);
///
/// sentinel.set_mode(SentinelMode::Development);
/// assert!(sentinel
///     .report(Layer::Compiler, Severity::Critical, "again", serde_json::Value::Null)
///     .is_err());
/// ```
pub struct Sentinel {
    inner: Mutex<Inner>,
}

impl Sentinel {
    pub fn new(config: SentinelConfig) -> Self {
        let log = ReportLog::with_capacity(config.max_reports);
        Self {
            inner: Mutex::new(Inner {
                config,
                log,
                total_reports: 0,
                open: BTreeMap::new(),
                observations: VecDeque::new(),
            }),
        }
    }

    /// Record an observation with a fresh correlation id.
    ///
    /// # Errors
    ///
    /// [`InvariantViolation`] when the current mode raises at this severity.
    pub fn report(
        &self,
        layer: Layer,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<(), InvariantViolation> {
        self.lock()
            .record(SentinelReport::new(layer, severity, message, metadata))
    }

    /// Record an observation tied to an existing correlation id.
    pub fn report_correlated(
        &self,
        correlation_id: Uuid,
        layer: Layer,
        severity: Severity,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<(), InvariantViolation> {
        self.lock().record(
            SentinelReport::new(layer, severity, message, metadata).correlated(correlation_id),
        )
    }

    /// Retained reports, oldest first, filtered by layer and minimum severity.
    pub fn get_reports(
        &self,
        layer: Option<Layer>,
        min_severity: Option<Severity>,
    ) -> Vec<SentinelReport> {
        self.lock()
            .log
            .filtered(layer, min_severity)
            .cloned()
            .collect()
    }

    /// Retained reports sharing one correlation id.
    pub fn reports_for(&self, correlation_id: Uuid) -> Vec<SentinelReport> {
        self.lock().log.correlated(correlation_id).cloned().collect()
    }

    pub fn mode(&self) -> SentinelMode {
        self.lock().config.mode
    }

    /// Change the mode at runtime. Switching to [`SentinelMode::Off`] forgets
    /// open-transaction tracking, since nothing is observed while off.
    pub fn set_mode(&self, mode: SentinelMode) {
        let mut inner = self.lock();
        let previous = inner.config.mode;
        inner.config.mode = mode;
        if !mode.is_active() {
            inner.open.clear();
        }
        if previous != mode {
            info!(from = %previous, to = %mode, "sentinel mode changed");
        }
    }

    pub fn state(&self) -> SentinelState {
        if self.mode().is_active() {
            SentinelState::Active
        } else {
            SentinelState::Off
        }
    }

    pub fn export_diagnostics(&self) -> Diagnostics {
        let inner = self.lock();
        let mut counts_by_severity = BTreeMap::new();
        for report in inner.log.iter() {
            *counts_by_severity.entry(report.severity).or_insert(0) += 1;
        }
        Diagnostics {
            mode: inner.config.mode,
            state: if inner.config.mode.is_active() {
                SentinelState::Active
            } else {
                SentinelState::Off
            },
            total_reports: inner.total_reports,
            evicted_reports: inner.log.evicted(),
            counts_by_severity,
            open_transactions: inner.open.clone(),
            observations: inner.observations.iter().cloned().collect(),
            reports: inner.log.iter().cloned().collect(),
        }
    }

    // -- internal helpers ---------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_started(
        inner: &mut Inner,
        transaction_id: TransactionId,
        character_id: &CharacterId,
    ) -> Vec<InvariantViolation> {
        let mut raised = Vec::new();
        if let Some(open) = inner.open.get(character_id).copied() {
            let report = SentinelReport::new(
                Layer::Authority,
                Severity::Critical,
                "nested mutation",
                json!({
                    "character": character_id,
                    "open_transaction": open,
                    "new_transaction": transaction_id,
                }),
            )
            .correlated(transaction_id.0);
            raised.extend(inner.record(report).err());
        } else {
            inner.open.insert(character_id.clone(), transaction_id);
        }
        inner.observe(transaction_id, character_id);
        raised
    }

    fn on_rejected(
        inner: &mut Inner,
        character_id: &CharacterId,
        failure: &StructuralFailure,
    ) -> Vec<InvariantViolation> {
        let report = match failure {
            StructuralFailure::NestedTransaction { open, .. } => SentinelReport::new(
                Layer::Authority,
                Severity::Critical,
                "nested mutation",
                json!({ "character": character_id, "open_transaction": open }),
            )
            .correlated(open.0),
            other => SentinelReport::new(
                Layer::Authority,
                Severity::Error,
                format!("transaction rejected: {other}"),
                json!({ "character": character_id, "failure": other }),
            ),
        };
        inner.record(report).err().into_iter().collect()
    }

    fn on_ended(
        inner: &mut Inner,
        summary: &TransactionSummary,
        touched_collections: &BTreeMap<Collection, Vec<String>>,
    ) -> Vec<InvariantViolation> {
        if inner.open.get(&summary.character_id) == Some(&summary.transaction_id) {
            inner.open.remove(&summary.character_id);
        }

        let correlation = summary.transaction_id.0;
        let mut findings = Vec::new();

        match &summary.outcome {
            TransactionOutcome::Committed => {
                for (collection, ids) in touched_collections {
                    let mut seen = BTreeSet::new();
                    let duplicates: Vec<&str> = ids
                        .iter()
                        .filter(|id| !seen.insert(id.as_str()))
                        .map(String::as_str)
                        .collect();
                    if !duplicates.is_empty() {
                        findings.push(SentinelReport::new(
                            Layer::Authority,
                            Severity::Critical,
                            format!("duplicate identifiers in {collection}"),
                            json!({ "collection": collection, "duplicates": duplicates }),
                        ));
                    }
                }
                let expected = inner.config.expected_derived_recalculations;
                if summary.derived_recalculations != expected {
                    findings.push(SentinelReport::new(
                        Layer::Authority,
                        Severity::Error,
                        format!(
                            "derived values recalculated {} times, expected {expected}",
                            summary.derived_recalculations
                        ),
                        json!({ "derived_recalculations": summary.derived_recalculations }),
                    ));
                }
                if summary.mutation_count > inner.config.mutation_ceiling {
                    findings.push(SentinelReport::new(
                        Layer::Authority,
                        Severity::Error,
                        format!(
                            "transaction performed {} mutations, ceiling is {}",
                            summary.mutation_count, inner.config.mutation_ceiling
                        ),
                        json!({ "mutation_count": summary.mutation_count }),
                    ));
                }
            }
            TransactionOutcome::Failed { reason, restored } => {
                // Restored failures had started writing; the rest were refused
                // before any write.
                let layer = if *restored {
                    Layer::Persistence
                } else {
                    Layer::Authority
                };
                findings.push(SentinelReport::new(
                    layer,
                    Severity::Error,
                    format!("transaction failed: {reason}"),
                    json!({ "restored": restored }),
                ));
            }
            TransactionOutcome::Abandoned => {
                findings.push(SentinelReport::new(
                    Layer::Authority,
                    Severity::Warn,
                    "transaction abandoned without applying a plan",
                    serde_json::Value::Null,
                ));
            }
        }

        inner.conclude(summary, findings.len());
        findings
            .into_iter()
            .filter_map(|report| inner.record(report.correlated(correlation)).err())
            .collect()
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new(SentinelConfig::default())
    }
}

impl TransactionObserver for Sentinel {
    fn on_event(&self, event: &TransactionEvent) -> Result<(), ObserverVeto> {
        let mut inner = self.lock();
        if !inner.config.mode.is_active() {
            return Ok(());
        }

        let raised = match event {
            TransactionEvent::Started {
                transaction_id,
                character_id,
                ..
            } => Self::on_started(&mut inner, *transaction_id, character_id),
            TransactionEvent::Rejected {
                character_id,
                failure,
                ..
            } => Self::on_rejected(&mut inner, character_id, failure),
            TransactionEvent::Ended {
                summary,
                touched_collections,
            } => Self::on_ended(&mut inner, summary, touched_collections),
        };

        if raised.is_empty() {
            return Ok(());
        }
        let message = raised
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ObserverVeto {
            observer: OBSERVER_NAME.to_owned(),
            message,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use saga_core::event::MutationOrigin;

    fn sentinel(mode: SentinelMode) -> Sentinel {
        Sentinel::new(SentinelConfig {
            mode,
            ..SentinelConfig::default()
        })
    }

    fn summary(derived_recalculations: u32, outcome: TransactionOutcome) -> TransactionSummary {
        TransactionSummary {
            transaction_id: TransactionId::new(),
            character_id: CharacterId::new("c1"),
            origin: MutationOrigin::LevelUp,
            mutation_count: 2,
            cascaded_modifiers: 0,
            derived_recalculations,
            outcome,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    fn ended(summary: TransactionSummary) -> TransactionEvent {
        TransactionEvent::Ended {
            summary,
            touched_collections: BTreeMap::new(),
        }
    }

    // -- mode policy --------------------------------------------------------

    #[test]
    fn disposition_table() {
        use Disposition::*;
        assert_eq!(SentinelMode::Off.disposition(Severity::Critical), Ignore);
        assert_eq!(SentinelMode::Development.disposition(Severity::Warn), Log);
        assert_eq!(SentinelMode::Development.disposition(Severity::Error), Raise);
        assert_eq!(SentinelMode::Strict.disposition(Severity::Info), Log);
        assert_eq!(SentinelMode::Strict.disposition(Severity::Critical), Warn);
        assert_eq!(SentinelMode::Production.disposition(Severity::Critical), Log);
    }

    #[test]
    fn off_mode_discards_reports() {
        let s = sentinel(SentinelMode::Off);
        s.report(Layer::Compiler, Severity::Critical, "x", json!({}))
            .unwrap();
        assert!(s.get_reports(None, None).is_empty());
        assert_eq!(s.state(), SentinelState::Off);
    }

    #[test]
    fn development_mode_raises_on_error() {
        let s = sentinel(SentinelMode::Development);
        s.report(Layer::Compiler, Severity::Warn, "soft", json!({}))
            .unwrap();
        let violation = s
            .report(Layer::Compiler, Severity::Error, "hard", json!({}))
            .unwrap_err();
        assert_eq!(violation.severity, Severity::Error);
        // Raised reports are still retained.
        assert_eq!(s.get_reports(None, None).len(), 2);
    }

    #[test]
    fn set_mode_switches_policy_at_runtime() {
        let s = sentinel(SentinelMode::Production);
        assert!(s
            .report(Layer::Authority, Severity::Critical, "a", json!({}))
            .is_ok());
        s.set_mode(SentinelMode::Development);
        assert!(s
            .report(Layer::Authority, Severity::Critical, "b", json!({}))
            .is_err());
        assert_eq!(s.mode(), SentinelMode::Development);
    }

    // -- transaction checks -------------------------------------------------

    #[test]
    fn second_start_for_same_character_is_nested_mutation() {
        let s = sentinel(SentinelMode::Production);
        let character_id = CharacterId::new("c1");
        for _ in 0..2 {
            s.on_event(&TransactionEvent::Started {
                transaction_id: TransactionId::new(),
                character_id: character_id.clone(),
                origin: MutationOrigin::LevelUp,
                at: Utc::now(),
            })
            .unwrap();
        }
        let critical = s.get_reports(Some(Layer::Authority), Some(Severity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].message, "nested mutation");
    }

    #[test]
    fn nested_start_keeps_tracking_the_first_transaction() {
        let s = sentinel(SentinelMode::Production);
        let character_id = CharacterId::new("c1");
        let start = |transaction_id| TransactionEvent::Started {
            transaction_id,
            character_id: character_id.clone(),
            origin: MutationOrigin::LevelUp,
            at: Utc::now(),
        };
        let first = TransactionId::new();
        let second = TransactionId::new();
        s.on_event(&start(first)).unwrap();
        s.on_event(&start(second)).unwrap();

        let mut closed = summary(
            0,
            TransactionOutcome::Failed {
                reason: "refused".to_owned(),
                restored: false,
            },
        );
        closed.transaction_id = second;
        s.on_event(&ended(closed)).unwrap();

        let open = s.export_diagnostics().open_transactions;
        assert_eq!(open.get(&character_id), Some(&first));
    }

    #[test]
    fn failures_are_attributed_by_whether_anything_was_written() {
        let s = sentinel(SentinelMode::Production);
        for restored in [false, true] {
            s.on_event(&ended(summary(
                0,
                TransactionOutcome::Failed {
                    reason: "boom".to_owned(),
                    restored,
                },
            )))
            .unwrap();
        }
        let authority = s.get_reports(Some(Layer::Authority), None);
        assert_eq!(authority.len(), 1);
        assert_eq!(authority[0].metadata["restored"], json!(false));
        let persistence = s.get_reports(Some(Layer::Persistence), None);
        assert_eq!(persistence.len(), 1);
        assert_eq!(persistence[0].metadata["restored"], json!(true));
    }

    #[test]
    fn rejected_nested_transaction_vetoes_in_development() {
        let s = sentinel(SentinelMode::Development);
        let open = TransactionId::new();
        let veto = s
            .on_event(&TransactionEvent::Rejected {
                character_id: CharacterId::new("c1"),
                failure: StructuralFailure::NestedTransaction {
                    character: CharacterId::new("c1"),
                    open,
                },
                at: Utc::now(),
            })
            .unwrap_err();
        assert_eq!(veto.observer, OBSERVER_NAME);
        assert!(veto.message.contains("nested mutation"));
        assert_eq!(s.reports_for(open.0).len(), 1);
    }

    #[test]
    fn recalculation_count_mismatch_is_an_error() {
        let s = sentinel(SentinelMode::Production);
        let bad = summary(2, TransactionOutcome::Committed);
        let id = bad.transaction_id;
        s.on_event(&ended(bad)).unwrap();
        let reports = s.reports_for(id.0);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Error);
    }

    #[test]
    fn clean_commit_produces_no_reports() {
        let s = sentinel(SentinelMode::Development);
        s.on_event(&ended(summary(1, TransactionOutcome::Committed)))
            .unwrap();
        assert!(s.get_reports(None, None).is_empty());
        let diagnostics = s.export_diagnostics();
        assert_eq!(diagnostics.observations.len(), 1);
        assert_eq!(diagnostics.observations[0].state, ObservationState::Reported);
    }

    #[test]
    fn duplicate_identifiers_are_critical() {
        let s = sentinel(SentinelMode::Strict);
        let mut touched = BTreeMap::new();
        touched.insert(
            Collection::Feats,
            vec!["dodge".to_owned(), "dodge".to_owned()],
        );
        s.on_event(&TransactionEvent::Ended {
            summary: summary(1, TransactionOutcome::Committed),
            touched_collections: touched,
        })
        .unwrap();
        let critical = s.get_reports(None, Some(Severity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].metadata["duplicates"], json!(["dodge"]));
    }

    #[test]
    fn mutation_ceiling_is_enforced() {
        let s = Sentinel::new(SentinelConfig {
            mode: SentinelMode::Production,
            mutation_ceiling: 1,
            ..SentinelConfig::default()
        });
        s.on_event(&ended(summary(1, TransactionOutcome::Committed)))
            .unwrap();
        assert_eq!(s.get_reports(None, Some(Severity::Error)).len(), 1);
    }

    #[test]
    fn off_mode_ignores_events() {
        let s = sentinel(SentinelMode::Off);
        s.on_event(&ended(summary(5, TransactionOutcome::Abandoned)))
            .unwrap();
        let diagnostics = s.export_diagnostics();
        assert!(diagnostics.reports.is_empty());
        assert!(diagnostics.observations.is_empty());
    }

    #[test]
    fn diagnostics_count_by_severity() {
        let s = sentinel(SentinelMode::Production);
        s.report(Layer::Compiler, Severity::Info, "a", json!({}))
            .unwrap();
        s.report(Layer::Compiler, Severity::Info, "b", json!({}))
            .unwrap();
        s.report(Layer::Prerequisites, Severity::Warn, "c", json!({}))
            .unwrap();
        let d = s.export_diagnostics();
        assert_eq!(d.total_reports, 3);
        assert_eq!(d.counts_by_severity[&Severity::Info], 2);
        assert_eq!(d.counts_by_severity[&Severity::Warn], 1);
        assert_eq!(d.state, SentinelState::Active);
    }

    #[test]
    fn config_deserializes_partially() {
        let config: SentinelConfig = serde_json::from_str(r#"{"mode":"strict"}"#).unwrap();
        assert_eq!(config.mode, SentinelMode::Strict);
        assert_eq!(config.max_reports, 500);
    }
}
