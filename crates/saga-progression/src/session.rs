//! The session facade: snapshot, compile and apply in one call.
//!
//! A [`ProgressionSession`] owns the compiler, a Mutation Authority and an
//! `Arc<Sentinel>` subscribed to that authority. Each wizard or level-up
//! flow calls [`ProgressionSession::advance`] once per step.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use saga_core::authority::{ApplyOptions, AuthorityError, CharacterStore, MutationAuthority};
use saga_core::character::Character;
use saga_core::event::TransactionSummary;
use saga_core::plan::MutationPlan;
use saga_core::snapshot::{Snapshot, SnapshotBuilder};
use saga_sentinel::report::{Layer, Severity};
use saga_sentinel::sentinel::{Diagnostics, Sentinel};

use crate::catalog::Catalog;
use crate::compiler::{
    CompileError, CompileOptions, ProgressionCompiler, Selections, StepId, ValidationFailure,
};
use crate::config::ProgressionConfig;

/// Errors from [`ProgressionSession::advance`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl SessionError {
    /// Per-item detail when the step failed validation.
    pub fn validation(&self) -> Option<&ValidationFailure> {
        match self {
            SessionError::Compile(CompileError::Validation(failure)) => Some(failure),
            _ => None,
        }
    }
}

/// Compiler, authority and sentinel wired together.
pub struct ProgressionSession {
    catalog: Arc<dyn Catalog>,
    compiler: ProgressionCompiler,
    authority: MutationAuthority,
    sentinel: Arc<Sentinel>,
}

impl ProgressionSession {
    pub fn new(catalog: Arc<dyn Catalog>, config: ProgressionConfig) -> Self {
        let sentinel = Arc::new(Sentinel::new(config.sentinel));
        let mut authority = MutationAuthority::new();
        authority.subscribe(sentinel.clone());
        info!(sentinel_mode = %sentinel.mode(), "progression session ready");
        Self {
            compiler: ProgressionCompiler::new(catalog.clone(), config.compiler),
            catalog,
            authority,
            sentinel,
        }
    }

    /// Persist committed transactions through `store`.
    pub fn with_store(mut self, store: Arc<dyn CharacterStore>) -> Self {
        self.authority = std::mem::take(&mut self.authority).with_store(store);
        self
    }

    pub fn snapshot(&self, character: &Character, freebuild: bool) -> Snapshot {
        SnapshotBuilder::new(character).freebuild(freebuild).build()
    }

    /// Compile a step without applying it.
    pub fn preview(
        &self,
        character: &Character,
        step: StepId,
        selections: &Selections,
        options: CompileOptions,
    ) -> Result<MutationPlan, SessionError> {
        self.compile(character, step, selections, options)
    }

    /// Snapshot, compile and apply one step.
    ///
    /// Nothing is written when compilation fails. Rejections are recorded
    /// with the sentinel at `INFO` on the compiler layer.
    pub fn advance(
        &self,
        character: &mut Character,
        step: StepId,
        selections: &Selections,
        options: CompileOptions,
    ) -> Result<TransactionSummary, SessionError> {
        let plan = self.compile(character, step, selections, options)?;
        let summary = self.authority.apply_mutation_plan(
            character,
            &plan,
            &ApplyOptions::with_origin(step.origin()),
        )?;
        info!(
            character = %summary.character_id,
            step = %step,
            transaction = %summary.transaction_id,
            mutations = summary.mutation_count,
            "step applied"
        );
        Ok(summary)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.sentinel.export_diagnostics()
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn compiler(&self) -> &ProgressionCompiler {
        &self.compiler
    }

    pub fn authority(&self) -> &MutationAuthority {
        &self.authority
    }

    pub fn sentinel(&self) -> &Arc<Sentinel> {
        &self.sentinel
    }

    fn compile(
        &self,
        character: &Character,
        step: StepId,
        selections: &Selections,
        options: CompileOptions,
    ) -> Result<MutationPlan, SessionError> {
        self.compiler
            .compile_for(character, step, selections, options)
            .map_err(|err| {
                self.record_rejection(character, step, &err);
                SessionError::from(err)
            })
    }

    fn record_rejection(&self, character: &Character, step: StepId, err: &CompileError) {
        let failed = match err {
            CompileError::Validation(failure) => failure.failed_ids(),
            _ => Vec::new(),
        };
        let metadata = json!({
            "character": character.id().as_str(),
            "step": step.as_str(),
            "failed": failed,
            "error": err.to_string(),
        });
        if let Err(violation) = self.sentinel.report(
            Layer::Compiler,
            Severity::Info,
            format!("{step} step rejected"),
            metadata,
        ) {
            debug!(error = %violation, "sentinel raised on a compiler rejection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, ItemKind, StaticCatalog};
    use saga_core::character::Collection;

    fn session() -> ProgressionSession {
        let catalog = StaticCatalog::from_items([
            CatalogItem::new("dodge", "Dodge", ItemKind::Feat),
            CatalogItem::new("mobility", "Mobility", ItemKind::Feat).with_prerequisites("Dex 13, Dodge"),
        ])
        .unwrap();
        ProgressionSession::new(Arc::new(catalog), ProgressionConfig::default())
    }

    #[test]
    fn advance_applies_a_compiled_step() {
        let session = session();
        let mut character = Character::builder("c1").build().unwrap();
        let summary = session
            .advance(&mut character, StepId::Feats, &Selections::feats(["dodge"]), CompileOptions::default())
            .unwrap();
        assert_eq!(summary.mutation_count, 1);
        assert!(character.has_entry(Collection::Feats, "dodge"));
    }

    #[test]
    fn rejected_step_writes_nothing_and_is_reported() {
        let session = session();
        let mut character = Character::builder("c1").build().unwrap();
        let before = character.state_hash();

        let err = session
            .advance(&mut character, StepId::Feats, &Selections::feats(["mobility"]), CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.validation().unwrap().failed_ids(), vec!["mobility"]);
        assert_eq!(character.state_hash(), before);

        let reports = session.sentinel().get_reports(Some(Layer::Compiler), None);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Info);
        assert_eq!(reports[0].metadata["failed"], json!(["mobility"]));
    }

    #[test]
    fn preview_leaves_the_character_alone() {
        let session = session();
        let character = Character::builder("c1").build().unwrap();
        let plan = session
            .preview(&character, StepId::Feats, &Selections::feats(["dodge"]), CompileOptions::default())
            .unwrap();
        assert_eq!(plan.added_ids(Collection::Feats), vec!["dodge"]);
        assert!(!character.has_entry(Collection::Feats, "dodge"));
    }

    #[test]
    fn diagnostics_count_no_open_transactions_after_advance() {
        let session = session();
        let mut character = Character::builder("c1").build().unwrap();
        session
            .advance(&mut character, StepId::Feats, &Selections::feats(["dodge"]), CompileOptions::default())
            .unwrap();
        let diagnostics = session.diagnostics();
        assert!(diagnostics.open_transactions.is_empty());
        assert_eq!(diagnostics.observations.len(), 1);
    }
}
