//! Saga Sentinel -- passive invariant observation for the progression core.
//!
//! The sentinel collects structured, severity-tagged reports from every layer
//! and subscribes to the Mutation Authority's transaction events. It never
//! touches character state; the only influence it has on a caller is the
//! hard failure it raises in [`SentinelMode::Development`].
//!
//! - [`report`]: report records and the bounded report log.
//! - [`sentinel`]: modes, configuration, transaction checks, diagnostics.
//!
//! # Wiring
//!
//! ```
//! use std::sync::Arc;
//! use saga_core::prelude::*;
//! use saga_sentinel::prelude::*;
//!
//! let sentinel = Arc::new(Sentinel::default());
//! let mut authority = MutationAuthority::new();
//! authority.subscribe(sentinel.clone());
//!
//! let mut character = Character::builder("c1").build().unwrap();
//! let mut plan = MutationPlan::new();
//! plan.add_entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"));
//! authority
//!     .apply_mutation_plan(&mut character, &plan, &ApplyOptions::default())
//!     .unwrap();
//!
//! assert!(sentinel.get_reports(None, Some(Severity::Error)).is_empty());
//! ```

#![deny(unsafe_code)]

pub mod report;
pub mod sentinel;

use uuid::Uuid;

use report::{Layer, Severity};

/// A report the current mode turns into a hard failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{severity} invariant violation in {layer}: {message}")]
pub struct InvariantViolation {
    pub layer: Layer,
    pub severity: Severity,
    pub message: String,
    pub correlation_id: Uuid,
}

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::report::{Layer, ReportLog, SentinelReport, Severity};
    pub use crate::sentinel::{
        Diagnostics, Disposition, ObservationState, Sentinel, SentinelConfig, SentinelMode,
        SentinelState, TransactionObservation,
    };
    pub use crate::InvariantViolation;
}
