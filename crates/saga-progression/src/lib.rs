//! Saga Progression -- prerequisite checking and the Progression Compiler.
//!
//! This crate turns player choices into mutation plans:
//!
//! - [`catalog`]: the rules-content contract and an in-memory catalog.
//! - [`tables`]: frozen prestige-combination tables.
//! - [`prereq`]: the Prerequisite Checker.
//! - [`compiler`]: the Progression Compiler, `(snapshot, step, selections)`
//!   to `{set, add, delete}`.
//! - [`session`]: compiler, authority and sentinel wired together.
//! - [`config`]: rule constants and sentinel settings.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use saga_core::prelude::*;
//! use saga_progression::prelude::*;
//!
//! let catalog = StaticCatalog::from_items([
//!     CatalogItem::new("power-attack", "Power Attack", ItemKind::Feat)
//!         .with_prerequisites("Str 13"),
//! ])
//! .unwrap();
//! let session = ProgressionSession::new(Arc::new(catalog), ProgressionConfig::default());
//!
//! let mut character = Character::builder("kira").ability(Ability::Str, 12).build().unwrap();
//! let err = session
//!     .advance(
//!         &mut character,
//!         StepId::Feats,
//!         &Selections::feats(["power-attack"]),
//!         CompileOptions::default(),
//!     )
//!     .unwrap_err();
//! let failure = err.validation().unwrap();
//! assert_eq!(failure.items[0].missing[0].requirement, "Strength 13");
//! assert!(!character.has_entry(Collection::Feats, "power-attack"));
//! ```

#![deny(unsafe_code)]

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod prereq;
pub mod session;
pub mod tables;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::catalog::{
        slug, Catalog, CatalogError, CatalogItem, ClassData, ItemKind, StaticCatalog,
    };
    pub use crate::compiler::{
        CompileError, CompileOptions, ItemFailure, ItemRef, ProgressionCompiler, Selections,
        StepId, ValidationFailure,
    };
    pub use crate::config::{CompilerConfig, ProgressionConfig};
    pub use crate::prereq::{
        MissingRequirement, PrerequisiteChecker, PrerequisiteResult, PrerequisiteRule, RuleOutcome,
    };
    pub use crate::session::{ProgressionSession, SessionError};
    pub use crate::tables::{rule_tables, CombinationTerm, PrestigeCombination, RuleTables};
}
