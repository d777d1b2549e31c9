//! The Mutation Authority: the exclusive write path for character state.
//!
//! Every change to a [`Character`] flows through
//! [`MutationAuthority::apply_mutation_plan`]. The document's write methods
//! are crate-private and this module is their only caller, so no other code
//! path can mutate a character.
//!
//! # Transactions
//!
//! Each application runs inside exactly one [`Transaction`] scoped to one
//! character:
//!
//! 1. Open: rejected with [`StructuralFailure::NestedTransaction`] if the
//!    character already has an open transaction in this process.
//! 2. Pre-validate the whole plan against the document (field existence,
//!    value shapes, uniqueness, presence of deleted ids). Nothing is written
//!    if this fails.
//! 3. Write `set`, then `add`, then `delete` (with modifier cascade).
//! 4. Recompute derived values exactly once.
//! 5. Persist through the optional [`CharacterStore`]. A store failure puts
//!    the pre-transaction copy back.
//! 6. Close and emit [`TransactionEvent::Ended`].
//!
//! Once step 3 begins the transaction runs to completion; there is no
//! cancellation mid-write.
//!
//! # Example
//!
//! ```
//! use saga_core::prelude::*;
//!
//! let mut character = Character::builder("c1").build().unwrap();
//! let authority = MutationAuthority::new();
//!
//! let mut plan = MutationPlan::new();
//! plan.set_field(&FieldPath::AbilityBase(Ability::Wis), serde_json::json!(14));
//! plan.add_entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"));
//!
//! let summary = authority
//!     .apply_mutation_plan(&mut character, &plan, &ApplyOptions::default())
//!     .unwrap();
//! assert_eq!(summary.mutation_count, 2);
//! assert_eq!(summary.derived_recalculations, 1);
//! assert_eq!(character.ability(Ability::Wis).modifier, 2);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::character::{Character, CharacterId, Collection, CollectionEntry, FieldWrite};
use crate::event::{
    MutationOrigin, ObserverVeto, TransactionEvent, TransactionId, TransactionObserver,
    TransactionOutcome, TransactionSummary,
};
use crate::plan::{MutationPlan, StructuralFailure};

// ---------------------------------------------------------------------------
// Persistence contract
// ---------------------------------------------------------------------------

/// A store refused or failed to durably record a character.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store rejected character {character}: {message}")]
pub struct StoreError {
    pub character: CharacterId,
    pub message: String,
}

/// The external persistence layer. It is responsible for durability and for
/// notifying presentation layers once a commit lands.
pub trait CharacterStore: Send + Sync {
    fn commit(&self, character: &Character) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Errors and options
// ---------------------------------------------------------------------------

/// Why [`MutationAuthority::apply_mutation_plan`] did not succeed cleanly.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// Malformed plan, duplicate id or nested transaction. Nothing was written.
    #[error("structural failure: {0}")]
    Structural(#[from] StructuralFailure),

    /// The store failed after the writes were made.
    #[error("transaction {transaction_id} failed to persist (restored: {restored}): {source}")]
    WriteFailed {
        transaction_id: TransactionId,
        restored: bool,
        #[source]
        source: StoreError,
    },

    /// An observer raised a hard failure as the transaction opened. It was
    /// closed again before anything was written.
    #[error("transaction {transaction_id} was refused by {} observer(s)", .vetoes.len())]
    Vetoed {
        transaction_id: TransactionId,
        vetoes: Vec<ObserverVeto>,
    },

    /// The transaction committed, but an observer raised a hard failure.
    #[error("transaction {} committed but {} observer(s) raised a violation", .summary.transaction_id, .vetoes.len())]
    ObserverRaised {
        summary: Box<TransactionSummary>,
        vetoes: Vec<ObserverVeto>,
    },
}

/// Per-call options for [`MutationAuthority::apply_mutation_plan`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub origin: MutationOrigin,
    /// Hand the result to the configured store. Ignored when no store is set.
    pub persist: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            origin: MutationOrigin::default(),
            persist: true,
        }
    }
}

impl ApplyOptions {
    pub fn with_origin(origin: MutationOrigin) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// MutationAuthority
// ---------------------------------------------------------------------------

/// The sole writer of character state.
///
/// The authority is `Sync`: one instance may be shared by every flow in the
/// process (creation, level-up, commerce, effects). The open-transaction
/// table is process-local self-defense; it is not a distributed lock across
/// independent processes.
pub struct MutationAuthority {
    observers: Vec<Arc<dyn TransactionObserver>>,
    store: Option<Arc<dyn CharacterStore>>,
    open: Mutex<BTreeMap<CharacterId, TransactionId>>,
}

impl MutationAuthority {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            store: None,
            open: Mutex::new(BTreeMap::new()),
        }
    }

    /// Use a persistence store for committed transactions.
    pub fn with_store(mut self, store: Arc<dyn CharacterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Subscribe an observer to transaction events.
    pub fn subscribe(&mut self, observer: Arc<dyn TransactionObserver>) {
        self.observers.push(observer);
    }

    /// Whether the character currently has an open transaction.
    pub fn is_open(&self, character_id: &CharacterId) -> bool {
        self.open_table().contains_key(character_id)
    }

    /// Open a transaction for one character.
    ///
    /// The returned guard closes the transaction when it is applied or
    /// dropped. Hold it across an external round-trip to keep other writers
    /// out of the character.
    ///
    /// # Errors
    ///
    /// - [`StructuralFailure::NestedTransaction`] if the character already has
    ///   an open transaction. This is a hard failure, not a queued retry.
    /// - [`AuthorityError::Vetoed`] if an observer raises on the start event,
    ///   for example a sentinel that sees the character open elsewhere.
    pub fn open_transaction(
        &self,
        character_id: &CharacterId,
        origin: MutationOrigin,
    ) -> Result<Transaction<'_>, AuthorityError> {
        let transaction_id = TransactionId::new();
        let started_at = Utc::now();
        {
            let mut open = self.open_table();
            if let Some(existing) = open.get(character_id).copied() {
                drop(open);
                warn!(
                    character = %character_id,
                    open_transaction = %existing,
                    "rejected nested transaction"
                );
                let failure = StructuralFailure::NestedTransaction {
                    character: character_id.clone(),
                    open: existing,
                };
                self.emit(&TransactionEvent::Rejected {
                    character_id: character_id.clone(),
                    failure: failure.clone(),
                    at: started_at,
                });
                return Err(failure.into());
            }
            open.insert(character_id.clone(), transaction_id);
        }

        debug!(character = %character_id, transaction = %transaction_id, "transaction opened");
        let mut vetoes = self.emit(&TransactionEvent::Started {
            transaction_id,
            character_id: character_id.clone(),
            origin: origin.clone(),
            at: started_at,
        });

        let mut transaction = Transaction {
            authority: self,
            transaction_id,
            character_id: character_id.clone(),
            origin,
            started_at,
            finished: false,
        };
        if vetoes.is_empty() {
            return Ok(transaction);
        }
        vetoes.extend(transaction.finish_failed(
            "observer raised a violation when the transaction opened",
            false,
            WriteCounts::default(),
        ));
        Err(AuthorityError::Vetoed {
            transaction_id,
            vetoes,
        })
    }

    /// Apply a plan to a character inside one transaction.
    ///
    /// Returns the committed transaction's summary.
    ///
    /// # Errors
    ///
    /// - [`AuthorityError::Structural`] if the transaction cannot be opened or
    ///   the plan fails pre-validation. The character is untouched.
    /// - [`AuthorityError::WriteFailed`] if the store fails. The
    ///   pre-transaction copy is restored.
    /// - [`AuthorityError::ObserverRaised`] if the plan committed but an
    ///   observer raised a violation.
    pub fn apply_mutation_plan(
        &self,
        character: &mut Character,
        plan: &MutationPlan,
        options: &ApplyOptions,
    ) -> Result<TransactionSummary, AuthorityError> {
        let transaction = self.open_transaction(character.id(), options.origin.clone())?;
        transaction.apply(character, plan, options.persist)
    }

    // -- internal helpers ---------------------------------------------------

    fn open_table(&self) -> MutexGuard<'_, BTreeMap<CharacterId, TransactionId>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, character_id: &CharacterId, transaction_id: TransactionId) {
        let mut open = self.open_table();
        if open.get(character_id) == Some(&transaction_id) {
            open.remove(character_id);
        }
    }

    fn emit(&self, event: &TransactionEvent) -> Vec<ObserverVeto> {
        let mut vetoes = Vec::new();
        for observer in &self.observers {
            if let Err(veto) = observer.on_event(event) {
                vetoes.push(veto);
            }
        }
        vetoes
    }
}

impl Default for MutationAuthority {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A plan decoded and checked against one document, ready to write.
struct PreparedPlan {
    sets: Vec<FieldWrite>,
    adds: Vec<(Collection, CollectionEntry)>,
    deletes: Vec<(Collection, String)>,
}

/// Counters accumulated while a transaction writes.
#[derive(Default)]
struct WriteCounts {
    mutations: usize,
    cascaded_modifiers: usize,
    derived_recalculations: u32,
}

/// An open transaction on one character. Dropping it without applying a plan
/// closes it as [`TransactionOutcome::Abandoned`].
pub struct Transaction<'a> {
    authority: &'a MutationAuthority,
    transaction_id: TransactionId,
    character_id: CharacterId,
    origin: MutationOrigin,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl Transaction<'_> {
    pub fn id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn character_id(&self) -> &CharacterId {
        &self.character_id
    }

    /// Apply a plan and close the transaction.
    ///
    /// See [`MutationAuthority::apply_mutation_plan`] for the error cases.
    pub fn apply(
        mut self,
        character: &mut Character,
        plan: &MutationPlan,
        persist: bool,
    ) -> Result<TransactionSummary, AuthorityError> {
        if character.id() != &self.character_id {
            let failure = StructuralFailure::CharacterMismatch {
                expected: self.character_id.clone(),
                actual: character.id().clone(),
            };
            self.finish_failed(&failure.to_string(), false, WriteCounts::default());
            return Err(failure.into());
        }

        let prepared = match prepare(character, plan) {
            Ok(prepared) => prepared,
            Err(failure) => {
                self.finish_failed(&failure.to_string(), false, WriteCounts::default());
                return Err(failure.into());
            }
        };

        let backup = character.clone();
        let mut counts = WriteCounts::default();
        let mut touched: BTreeSet<Collection> = BTreeSet::new();

        for write in prepared.sets {
            character.write_field(write);
            counts.mutations += 1;
        }
        for (collection, entry) in prepared.adds {
            if let Err(failure) = character.insert_entry(collection, entry) {
                *character = backup;
                self.finish_failed(&failure.to_string(), true, counts);
                return Err(failure.into());
            }
            touched.insert(collection);
            counts.mutations += 1;
        }
        for (collection, id) in prepared.deletes {
            match character.remove_entry(collection, &id) {
                Ok(cascaded) => counts.cascaded_modifiers += cascaded,
                Err(failure) => {
                    *character = backup;
                    self.finish_failed(&failure.to_string(), true, counts);
                    return Err(failure.into());
                }
            }
            touched.insert(collection);
            counts.mutations += 1;
        }

        character.recompute_derived();
        counts.derived_recalculations += 1;

        if persist {
            if let Some(store) = &self.authority.store {
                if let Err(source) = store.commit(character) {
                    *character = backup;
                    self.finish_failed(&source.to_string(), true, counts);
                    return Err(AuthorityError::WriteFailed {
                        transaction_id: self.transaction_id,
                        restored: true,
                        source,
                    });
                }
            }
        }

        let touched_collections = touched
            .into_iter()
            .map(|c| (c, character.entries(c).iter().map(|e| e.id.clone()).collect()))
            .collect();
        let (summary, vetoes) =
            self.finish(TransactionOutcome::Committed, counts, touched_collections);

        info!(
            character = %summary.character_id,
            transaction = %summary.transaction_id,
            mutations = summary.mutation_count,
            cascaded_modifiers = summary.cascaded_modifiers,
            "transaction committed"
        );

        if vetoes.is_empty() {
            Ok(summary)
        } else {
            Err(AuthorityError::ObserverRaised {
                summary: Box::new(summary),
                vetoes,
            })
        }
    }

    fn finish_failed(
        &mut self,
        reason: &str,
        restored: bool,
        counts: WriteCounts,
    ) -> Vec<ObserverVeto> {
        warn!(
            character = %self.character_id,
            transaction = %self.transaction_id,
            restored,
            reason,
            "transaction failed"
        );
        let (_, vetoes) = self.finish(
            TransactionOutcome::Failed {
                reason: reason.to_owned(),
                restored,
            },
            counts,
            BTreeMap::new(),
        );
        vetoes
    }

    fn finish(
        &mut self,
        outcome: TransactionOutcome,
        counts: WriteCounts,
        touched_collections: BTreeMap<Collection, Vec<String>>,
    ) -> (TransactionSummary, Vec<ObserverVeto>) {
        self.finished = true;
        self.authority
            .release(&self.character_id, self.transaction_id);

        let summary = TransactionSummary {
            transaction_id: self.transaction_id,
            character_id: self.character_id.clone(),
            origin: self.origin.clone(),
            mutation_count: counts.mutations,
            cascaded_modifiers: counts.cascaded_modifiers,
            derived_recalculations: counts.derived_recalculations,
            outcome,
            started_at: self.started_at,
            ended_at: Utc::now(),
        };
        debug!(transaction = %self.transaction_id, "transaction closed");
        let vetoes = self.authority.emit(&TransactionEvent::Ended {
            summary: summary.clone(),
            touched_collections,
        });
        (summary, vetoes)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(
                TransactionOutcome::Abandoned,
                WriteCounts::default(),
                BTreeMap::new(),
            );
        }
    }
}

/// Decode and check every part of a plan before anything is written.
fn prepare(character: &Character, plan: &MutationPlan) -> Result<PreparedPlan, StructuralFailure> {
    plan.check_shape()?;

    let mut sets = Vec::with_capacity(plan.set.len());
    for (path, value) in &plan.set {
        sets.push(character.decode_field(path, value)?);
    }

    let mut adds = Vec::new();
    for (collection, entries) in &plan.add {
        for entry in entries {
            if character.has_entry(*collection, &entry.id) {
                return Err(StructuralFailure::DuplicateEntry {
                    collection: *collection,
                    id: entry.id.clone(),
                });
            }
            adds.push((*collection, entry.clone()));
        }
    }

    let mut deletes = Vec::new();
    for (collection, ids) in &plan.delete {
        let mut seen = BTreeSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(StructuralFailure::DuplicateEntry {
                    collection: *collection,
                    id: id.clone(),
                });
            }
            if !character.has_entry(*collection, id) {
                return Err(StructuralFailure::MissingEntry {
                    collection: *collection,
                    id: id.clone(),
                });
            }
            deletes.push((*collection, id.clone()));
        }
    }

    Ok(PreparedPlan {
        sets,
        adds,
        deletes,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
