//! Transaction events and the observer contract.
//!
//! The [`MutationAuthority`](crate::authority::MutationAuthority) emits a
//! [`TransactionEvent`] when a transaction starts, when it ends, and when an
//! attempt to open one is rejected. Subscribers implement
//! [`TransactionObserver`]. Emission is one-directional: the authority holds
//! `Arc<dyn TransactionObserver>` handles and knows nothing else about its
//! subscribers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::character::{CharacterId, Collection};
use crate::plan::StructuralFailure;

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Unique id of one transaction. Doubles as the correlation id of every
/// report the transaction produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// MutationOrigin
// ---------------------------------------------------------------------------

/// Which flow asked for a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MutationOrigin {
    CharacterCreation,
    LevelUp,
    Commerce,
    /// A talent or feat effect, named by the granting item.
    Effect(String),
    /// Anything else; prefer a specific variant.
    Other(String),
}

impl Default for MutationOrigin {
    fn default() -> Self {
        MutationOrigin::Other("unspecified".to_owned())
    }
}

// ---------------------------------------------------------------------------
// TransactionSummary
// ---------------------------------------------------------------------------

/// How a transaction finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed,
    Failed {
        reason: String,
        /// Whether the pre-transaction copy was put back.
        restored: bool,
    },
    /// Opened and released without a plan being applied.
    Abandoned,
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }
}

/// The record of one bounded transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: TransactionId,
    pub character_id: CharacterId,
    pub origin: MutationOrigin,
    /// Raw writes performed (set fields, added entries, deleted ids).
    pub mutation_count: usize,
    /// Modifiers removed because their source entry was deleted.
    pub cascaded_modifiers: usize,
    /// How many times derived values were recomputed.
    pub derived_recalculations: u32,
    pub outcome: TransactionOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TransactionEvent
// ---------------------------------------------------------------------------

/// Emitted by the authority to every subscribed observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Started {
        transaction_id: TransactionId,
        character_id: CharacterId,
        origin: MutationOrigin,
        at: DateTime<Utc>,
    },
    Ended {
        summary: TransactionSummary,
        /// Ids held after the transaction in every collection it touched.
        touched_collections: BTreeMap<Collection, Vec<String>>,
    },
    Rejected {
        character_id: CharacterId,
        failure: StructuralFailure,
        at: DateTime<Utc>,
    },
}

impl TransactionEvent {
    pub fn character_id(&self) -> &CharacterId {
        match self {
            TransactionEvent::Started { character_id, .. } => character_id,
            TransactionEvent::Ended { summary, .. } => &summary.character_id,
            TransactionEvent::Rejected { character_id, .. } => character_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Observer contract
// ---------------------------------------------------------------------------

/// An observer's refusal to let an event pass silently. The authority
/// surfaces vetoes to its caller; it never inspects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{observer}: {message}")]
pub struct ObserverVeto {
    pub observer: String,
    pub message: String,
}

/// Subscriber to authority transaction events.
pub trait TransactionObserver: Send + Sync {
    /// Observe one event. Returning a veto turns the observation into a hard
    /// failure for the caller of the authority.
    fn on_event(&self, event: &TransactionEvent) -> Result<(), ObserverVeto>;
}
