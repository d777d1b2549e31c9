//! Saga Core -- character document, snapshots and the governed write path.
//!
//! This crate holds the state side of the progression core:
//!
//! - [`character`]: the live character document, its collections, modifiers
//!   and derived values.
//! - [`snapshot`]: the Snapshot Builder, the only reader of live state.
//! - [`plan`]: the `{set, add, delete}` mutation plan.
//! - [`authority`]: the Mutation Authority, the only writer of live state.
//! - [`event`]: transaction events emitted to independent observers.
//!
//! # Quick Start
//!
//! ```
//! use saga_core::prelude::*;
//!
//! let mut character = Character::builder("kira")
//!     .name("Kira")
//!     .ability(Ability::Str, 12)
//!     .build()
//!     .unwrap();
//!
//! let snapshot = SnapshotBuilder::new(&character).build();
//! assert_eq!(snapshot.ability(Ability::Str).modifier, 1);
//!
//! let mut plan = MutationPlan::new();
//! plan.add_entry(Collection::Talents, CollectionEntry::new("block", "Block"));
//!
//! let authority = MutationAuthority::new();
//! authority
//!     .apply_mutation_plan(&mut character, &plan, &ApplyOptions::default())
//!     .unwrap();
//! assert!(character.has_entry(Collection::Talents, "block"));
//! ```

#![deny(unsafe_code)]

pub mod ability;
pub mod authority;
pub mod character;
pub mod event;
pub mod plan;
pub mod snapshot;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced when parsing names used by the document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// An ability name that is neither an abbreviation nor a full name.
    #[error("unknown ability '{name}'")]
    UnknownAbility { name: String },

    /// A collection name that is not one of the known collections.
    #[error("unknown collection '{name}'")]
    UnknownCollection { name: String },

    /// A field path that does not address a settable field.
    #[error("unknown field path '{path}'")]
    UnknownField { path: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::ability::Ability;
    pub use crate::authority::{
        ApplyOptions, AuthorityError, CharacterStore, MutationAuthority, StoreError, Transaction,
    };
    pub use crate::character::{
        AbilityScore, BackgroundEntry, BaseAttackProgression, Character, CharacterBuilder,
        CharacterId, ClassEntry, Collection, CollectionEntry, Defense, Derived, EntryRef,
        FieldPath, Modifier, ModifierSpec, ModifierTarget, SpeciesEntry, ABILITY_BASE_LIMIT,
    };
    pub use crate::event::{
        MutationOrigin, ObserverVeto, TransactionEvent, TransactionId, TransactionObserver,
        TransactionOutcome, TransactionSummary,
    };
    pub use crate::plan::{MutationPlan, StructuralFailure};
    pub use crate::snapshot::{AcquiredItem, ClassLevel, Snapshot, SnapshotBuilder};
    pub use crate::CoreError;
}
