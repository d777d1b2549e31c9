//! The Progression Compiler.
//!
//! [`ProgressionCompiler::compile_step`] turns caller-normalized
//! [`Selections`] for one step into a [`MutationPlan`]. It never applies the
//! plan; that is the Mutation Authority's job.
//!
//! Internally every call goes through a private `Intent`: the step id and
//! selections are mapped to one intent variant, and the intent is dispatched
//! with an exhaustive `match`, so adding a step without handling it does not
//! compile.
//!
//! # Validation
//!
//! - Multi-item steps are all-or-nothing. Every referenced item is checked
//!   against the same snapshot. If any item fails, the whole step fails with
//!   a [`ValidationFailure`] listing every failing item and its missing
//!   requirements, and nothing is added.
//! - Freebuild bypasses prerequisite content and ability score ranges, with
//!   a warning unless suppressed. It never bypasses structural checks:
//!   unknown catalog ids, items selected twice or already held, missing
//!   ability scores, the exact ability-increase point count.
//! - Freeform entries reference no catalog content and are never checked
//!   for prerequisites. They are still recorded.
//! - Multi-item deltas are sorted by id, so the result does not depend on
//!   input order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use saga_core::prelude::*;
//! use saga_progression::prelude::*;
//!
//! let catalog = StaticCatalog::from_items([
//!     CatalogItem::new("dodge", "Dodge", ItemKind::Feat),
//! ]).unwrap();
//! let compiler = ProgressionCompiler::new(Arc::new(catalog), CompilerConfig::default());
//!
//! let character = Character::builder("c1").build().unwrap();
//! let plan = compiler
//!     .compile_for(&character, StepId::Feats, &Selections::feats(["Dodge"]), CompileOptions::default())
//!     .unwrap();
//! assert_eq!(plan.added_ids(Collection::Feats), vec!["dodge"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use saga_core::ability::Ability;
use saga_core::character::{
    BackgroundEntry, Character, ClassEntry, Collection, CollectionEntry, FieldPath, SpeciesEntry,
    ABILITY_BASE_LIMIT,
};
use saga_core::event::MutationOrigin;
use saga_core::plan::MutationPlan;
use saga_core::snapshot::{Snapshot, SnapshotBuilder};

use crate::catalog::{slug, Catalog, CatalogItem, ClassData, ItemKind};
use crate::config::CompilerConfig;
use crate::prereq::{MissingRequirement, PrerequisiteChecker};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One step of character creation or level-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Background,
    Species,
    Abilities,
    AbilityIncrease,
    Class,
    Skills,
    Feats,
    Talents,
    ForcePowers,
    ForceTechniques,
    ForceSecrets,
}

impl StepId {
    pub const ALL: [StepId; 11] = [
        StepId::Background,
        StepId::Species,
        StepId::Abilities,
        StepId::AbilityIncrease,
        StepId::Class,
        StepId::Skills,
        StepId::Feats,
        StepId::Talents,
        StepId::ForcePowers,
        StepId::ForceTechniques,
        StepId::ForceSecrets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepId::Background => "background",
            StepId::Species => "species",
            StepId::Abilities => "abilities",
            StepId::AbilityIncrease => "ability-increase",
            StepId::Class => "class",
            StepId::Skills => "skills",
            StepId::Feats => "feats",
            StepId::Talents => "talents",
            StepId::ForcePowers => "force-powers",
            StepId::ForceTechniques => "force-techniques",
            StepId::ForceSecrets => "force-secrets",
        }
    }

    /// The flow a step belongs to, recorded on the transaction.
    pub fn origin(self) -> MutationOrigin {
        match self {
            StepId::Background | StepId::Species | StepId::Abilities => {
                MutationOrigin::CharacterCreation
            }
            _ => MutationOrigin::LevelUp,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|step| step.as_str() == s.trim())
            .ok_or_else(|| CompileError::UnknownStep { step: s.to_owned() })
    }
}

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// A reference to one selected item: a catalog id or name, or a freeform
/// entry typed by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    Id(String),
    Entry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        freeform: bool,
    },
}

impl ItemRef {
    /// A user-typed entry with no catalog backing.
    pub fn freeform(name: impl Into<String>) -> Self {
        ItemRef::Entry {
            id: None,
            name: Some(name.into()),
            freeform: true,
        }
    }

    fn is_freeform(&self) -> bool {
        matches!(self, ItemRef::Entry { freeform: true, .. })
    }

    /// Catalog lookup key: id first, then name.
    fn key(&self) -> &str {
        match self {
            ItemRef::Id(id) => id.trim(),
            ItemRef::Entry { id, name, .. } => id
                .as_deref()
                .or(name.as_deref())
                .map(str::trim)
                .unwrap_or(""),
        }
    }
}

impl From<&str> for ItemRef {
    fn from(id: &str) -> Self {
        ItemRef::Id(id.to_owned())
    }
}

impl From<String> for ItemRef {
    fn from(id: String) -> Self {
        ItemRef::Id(id)
    }
}

/// Step-scoped, caller-normalized input. Each step reads only its own keys.
///
/// | Step | Keys |
/// |------|------|
/// | `background`, `species`, `class` | `id`, or `freeform` + `name` |
/// | `abilities` | `abilityScores` |
/// | `ability-increase` | `abilityIncreases` |
/// | `skills` | `skillIds` (the complete trained set) |
/// | `feats`, `talents` | `featIds`, `talentIds` |
/// | `force-powers`, `force-techniques`, `force-secrets` | `powerIds`, `techniqueIds`, `secretIds` |
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Selections {
    pub id: Option<String>,
    pub name: Option<String>,
    pub freeform: bool,
    pub ability_scores: BTreeMap<Ability, i32>,
    pub ability_increases: BTreeMap<Ability, u32>,
    pub feat_ids: Vec<ItemRef>,
    pub talent_ids: Vec<ItemRef>,
    pub skill_ids: Vec<ItemRef>,
    pub power_ids: Vec<ItemRef>,
    pub technique_ids: Vec<ItemRef>,
    pub secret_ids: Vec<ItemRef>,
}

fn refs<I>(items: I) -> Vec<ItemRef>
where
    I: IntoIterator,
    I::Item: Into<ItemRef>,
{
    items.into_iter().map(Into::into).collect()
}

impl Selections {
    /// A catalog id for `background`, `species` or `class`.
    pub fn catalog(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Freeform text for `background`, `species` or `class`.
    pub fn freeform(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            freeform: true,
            ..Self::default()
        }
    }

    pub fn ability_scores(scores: impl IntoIterator<Item = (Ability, i32)>) -> Self {
        Self {
            ability_scores: scores.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn ability_increases(increases: impl IntoIterator<Item = (Ability, u32)>) -> Self {
        Self {
            ability_increases: increases.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn skills<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            skill_ids: refs(items),
            ..Self::default()
        }
    }

    pub fn feats<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            feat_ids: refs(items),
            ..Self::default()
        }
    }

    pub fn talents<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            talent_ids: refs(items),
            ..Self::default()
        }
    }

    pub fn force_powers<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            power_ids: refs(items),
            ..Self::default()
        }
    }

    pub fn force_techniques<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            technique_ids: refs(items),
            ..Self::default()
        }
    }

    pub fn force_secrets<I: IntoIterator>(items: I) -> Self
    where
        I::Item: Into<ItemRef>,
    {
        Self {
            secret_ids: refs(items),
            ..Self::default()
        }
    }
}

/// Per-call compiler options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompileOptions {
    /// Accept items whose prerequisites are unmet.
    pub freebuild: bool,
    /// Do not log freebuild bypasses.
    pub suppress_warnings: bool,
}

impl CompileOptions {
    pub fn freebuild() -> Self {
        Self {
            freebuild: true,
            suppress_warnings: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One selected item that cannot be accepted, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub id: String,
    pub name: String,
    pub missing: Vec<MissingRequirement>,
}

impl ItemFailure {
    fn new(id: impl Into<String>, name: impl Into<String>, missing: MissingRequirement) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            missing: vec![missing],
        }
    }
}

/// A step failed validation. Nothing from the step may be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{step} step rejected: {}", summarize(.items))]
pub struct ValidationFailure {
    pub step: StepId,
    /// Every failing item, in input order.
    pub items: Vec<ItemFailure>,
}

impl ValidationFailure {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }
}

fn summarize(items: &[ItemFailure]) -> String {
    items
        .iter()
        .map(|item| {
            let missing: Vec<&str> = item.missing.iter().map(|m| m.description.as_str()).collect();
            format!("{} [{}]", item.id, missing.join("; "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// Selections do not have the shape the step needs.
    #[error("malformed selections for the {step} step: {reason}")]
    MalformedSelections { step: StepId, reason: String },

    #[error("unknown step '{step}'")]
    UnknownStep { step: String },

    #[error("failed to encode value for {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// What a step asks for. Never leaves this module.
#[derive(Debug)]
enum Intent {
    BackgroundFromCatalog { key: String },
    BackgroundFreeform { name: String },
    SpeciesFromCatalog { key: String },
    SpeciesFreeform { name: String },
    AbilityScores { scores: BTreeMap<Ability, i32> },
    AbilityIncrease { increases: BTreeMap<Ability, u32> },
    ClassFromCatalog { key: String },
    ClassFreeform { name: String },
    ChooseSkills { skills: Vec<ItemRef> },
    ChooseFeats { feats: Vec<ItemRef> },
    ChooseTalents { talents: Vec<ItemRef> },
    SetForcePowers { powers: Vec<ItemRef> },
    SetForceTechniques { techniques: Vec<ItemRef> },
    SetForceSecrets { secrets: Vec<ItemRef> },
}

/// Catalog key or freeform name for a single-choice step.
enum SingleChoice {
    Catalog(String),
    Freeform(String),
}

impl Intent {
    fn from_step(step: StepId, selections: &Selections) -> Result<Intent, CompileError> {
        let intent = match step {
            StepId::Background => match single_choice(step, selections)? {
                SingleChoice::Catalog(key) => Intent::BackgroundFromCatalog { key },
                SingleChoice::Freeform(name) => Intent::BackgroundFreeform { name },
            },
            StepId::Species => match single_choice(step, selections)? {
                SingleChoice::Catalog(key) => Intent::SpeciesFromCatalog { key },
                SingleChoice::Freeform(name) => Intent::SpeciesFreeform { name },
            },
            StepId::Class => match single_choice(step, selections)? {
                SingleChoice::Catalog(key) => Intent::ClassFromCatalog { key },
                SingleChoice::Freeform(name) => Intent::ClassFreeform { name },
            },
            StepId::Abilities => Intent::AbilityScores {
                scores: selections.ability_scores.clone(),
            },
            StepId::AbilityIncrease => Intent::AbilityIncrease {
                increases: selections.ability_increases.clone(),
            },
            StepId::Skills => Intent::ChooseSkills {
                skills: selections.skill_ids.clone(),
            },
            StepId::Feats => Intent::ChooseFeats {
                feats: selections.feat_ids.clone(),
            },
            StepId::Talents => Intent::ChooseTalents {
                talents: selections.talent_ids.clone(),
            },
            StepId::ForcePowers => Intent::SetForcePowers {
                powers: selections.power_ids.clone(),
            },
            StepId::ForceTechniques => Intent::SetForceTechniques {
                techniques: selections.technique_ids.clone(),
            },
            StepId::ForceSecrets => Intent::SetForceSecrets {
                secrets: selections.secret_ids.clone(),
            },
        };
        Ok(intent)
    }

    fn kind(&self) -> &'static str {
        match self {
            Intent::BackgroundFromCatalog { .. } => "background-from-catalog",
            Intent::BackgroundFreeform { .. } => "background-freeform",
            Intent::SpeciesFromCatalog { .. } => "species-from-catalog",
            Intent::SpeciesFreeform { .. } => "species-freeform",
            Intent::AbilityScores { .. } => "ability-scores",
            Intent::AbilityIncrease { .. } => "ability-increase",
            Intent::ClassFromCatalog { .. } => "class-from-catalog",
            Intent::ClassFreeform { .. } => "class-freeform",
            Intent::ChooseSkills { .. } => "choose-skills",
            Intent::ChooseFeats { .. } => "choose-feats",
            Intent::ChooseTalents { .. } => "choose-talents",
            Intent::SetForcePowers { .. } => "set-force-powers",
            Intent::SetForceTechniques { .. } => "set-force-techniques",
            Intent::SetForceSecrets { .. } => "set-force-secrets",
        }
    }
}

fn single_choice(step: StepId, selections: &Selections) -> Result<SingleChoice, CompileError> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };
    if selections.freeform {
        return non_empty(&selections.name)
            .or_else(|| non_empty(&selections.id))
            .map(SingleChoice::Freeform)
            .ok_or_else(|| CompileError::MalformedSelections {
                step,
                reason: "a freeform selection needs a name".to_owned(),
            });
    }
    non_empty(&selections.id)
        .or_else(|| non_empty(&selections.name))
        .map(SingleChoice::Catalog)
        .ok_or_else(|| CompileError::MalformedSelections {
            step,
            reason: "expected a catalog id or a freeform name".to_owned(),
        })
}

// ---------------------------------------------------------------------------
// ProgressionCompiler
// ---------------------------------------------------------------------------

/// Everything one compile call needs to know.
struct StepContext<'s> {
    snapshot: &'s Snapshot,
    step: StepId,
    freebuild: bool,
    suppress_warnings: bool,
}

/// The sole producer of mutation plans from selections.
#[derive(Clone)]
pub struct ProgressionCompiler {
    catalog: Arc<dyn Catalog>,
    checker: PrerequisiteChecker,
    config: CompilerConfig,
}

impl ProgressionCompiler {
    pub fn new(catalog: Arc<dyn Catalog>, config: CompilerConfig) -> Self {
        Self {
            checker: PrerequisiteChecker::new(catalog.clone()),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn checker(&self) -> &PrerequisiteChecker {
        &self.checker
    }

    /// Compile one step against a snapshot.
    ///
    /// Freebuild applies if either `options.freebuild` or the snapshot's own
    /// flag is set.
    ///
    /// # Errors
    ///
    /// - [`CompileError::Validation`] with per-item detail when any selected
    ///   item fails.
    /// - [`CompileError::MalformedSelections`] when the step's keys are
    ///   missing or unusable.
    pub fn compile_step(
        &self,
        snapshot: &Snapshot,
        step: StepId,
        selections: &Selections,
        options: CompileOptions,
    ) -> Result<MutationPlan, CompileError> {
        let intent = Intent::from_step(step, selections)?;
        let ctx = StepContext {
            snapshot,
            step,
            freebuild: options.freebuild || snapshot.freebuild(),
            suppress_warnings: options.suppress_warnings,
        };
        debug!(
            character = %snapshot.character_id(),
            step = %step,
            intent = intent.kind(),
            freebuild = ctx.freebuild,
            "compiling step"
        );

        let result = match intent {
            Intent::BackgroundFromCatalog { key } => self.background_from_catalog(&ctx, &key),
            Intent::BackgroundFreeform { name } => self.background_freeform(&name),
            Intent::SpeciesFromCatalog { key } => self.species_from_catalog(&ctx, &key),
            Intent::SpeciesFreeform { name } => self.species_freeform(&ctx, &name),
            Intent::AbilityScores { scores } => self.ability_scores(&ctx, &scores),
            Intent::AbilityIncrease { increases } => self.ability_increase(&ctx, &increases),
            Intent::ClassFromCatalog { key } => self.class_from_catalog(&ctx, &key),
            Intent::ClassFreeform { name } => self.class_freeform(&ctx, &name),
            Intent::ChooseSkills { skills } => self.skills(&ctx, &skills),
            Intent::ChooseFeats { feats } => self.acquire(&ctx, ItemKind::Feat, &feats),
            Intent::ChooseTalents { talents } => self.acquire(&ctx, ItemKind::Talent, &talents),
            Intent::SetForcePowers { powers } => self.acquire(&ctx, ItemKind::ForcePower, &powers),
            Intent::SetForceTechniques { techniques } => {
                self.acquire(&ctx, ItemKind::ForceTechnique, &techniques)
            }
            Intent::SetForceSecrets { secrets } => {
                self.acquire(&ctx, ItemKind::ForceSecret, &secrets)
            }
        };

        match result {
            Ok(mut plan) => {
                plan.canonicalize();
                debug!(step = %step, mutations = plan.mutation_count(), "step compiled");
                Ok(plan)
            }
            Err(err) => {
                debug!(step = %step, error = %err, "step rejected");
                Err(err)
            }
        }
    }

    /// Snapshot a live character and compile one step against it.
    pub fn compile_for(
        &self,
        character: &Character,
        step: StepId,
        selections: &Selections,
        options: CompileOptions,
    ) -> Result<MutationPlan, CompileError> {
        let snapshot = SnapshotBuilder::new(character)
            .freebuild(options.freebuild)
            .build();
        self.compile_step(&snapshot, step, selections, options)
    }

    // -- single-choice routines ---------------------------------------------

    fn background_from_catalog(
        &self,
        ctx: &StepContext<'_>,
        key: &str,
    ) -> Result<MutationPlan, CompileError> {
        let item = self.lookup_single(ctx, ItemKind::Background, key)?;
        let entry = BackgroundEntry {
            id: Some(item.id.clone()),
            name: item.name.clone(),
            freeform: false,
        };
        single_set(&FieldPath::Background, &entry)
    }

    fn background_freeform(&self, name: &str) -> Result<MutationPlan, CompileError> {
        let entry = BackgroundEntry {
            id: None,
            name: name.to_owned(),
            freeform: true,
        };
        single_set(&FieldPath::Background, &entry)
    }

    fn species_from_catalog(
        &self,
        ctx: &StepContext<'_>,
        key: &str,
    ) -> Result<MutationPlan, CompileError> {
        let item = self.lookup_single(ctx, ItemKind::Species, key)?;
        let entry = SpeciesEntry {
            id: item.id.clone(),
            name: item.name.clone(),
            ability_adjustments: item.ability_adjustments.clone(),
        };
        single_set(&FieldPath::Species, &entry)
    }

    fn species_freeform(&self, ctx: &StepContext<'_>, name: &str) -> Result<MutationPlan, CompileError> {
        let entry = SpeciesEntry {
            id: freeform_id(ctx.step, name)?,
            name: name.to_owned(),
            ability_adjustments: BTreeMap::new(),
        };
        single_set(&FieldPath::Species, &entry)
    }

    fn class_from_catalog(
        &self,
        ctx: &StepContext<'_>,
        key: &str,
    ) -> Result<MutationPlan, CompileError> {
        let item = self.lookup_single(ctx, ItemKind::Class, key)?;
        let data = item.class.clone().unwrap_or_default();
        let entry = ClassEntry {
            id: item.id.clone(),
            name: item.name.clone(),
            levels: ctx.snapshot.class_level(&item.id) + 1,
            freeform: false,
            base_attack: data.base_attack,
            defense_bonuses: data.defense_bonuses,
            grants_force_sensitivity: data.grants_force_sensitivity,
        };
        single_set(&FieldPath::Class(entry.id.clone()), &entry)
    }

    fn class_freeform(&self, ctx: &StepContext<'_>, name: &str) -> Result<MutationPlan, CompileError> {
        let id = freeform_id(ctx.step, name)?;
        if let Some(item) = self
            .catalog
            .lookup(ItemKind::Class, &id)
            .or_else(|| self.catalog.lookup(ItemKind::Class, name))
        {
            return Err(CompileError::MalformedSelections {
                step: ctx.step,
                reason: format!(
                    "freeform class '{name}' collides with catalog class '{}'",
                    item.id
                ),
            });
        }
        let held = ctx.snapshot.class_levels().get(&id);
        if held.is_some_and(|class| !class.freeform) {
            return Err(CompileError::MalformedSelections {
                step: ctx.step,
                reason: format!("freeform class '{name}' collides with held class '{id}'"),
            });
        }
        let defaults = ClassData::default();
        let entry = ClassEntry {
            levels: held.map_or(0, |class| class.levels) + 1,
            id,
            name: name.to_owned(),
            freeform: true,
            base_attack: defaults.base_attack,
            defense_bonuses: defaults.defense_bonuses,
            grants_force_sensitivity: false,
        };
        single_set(&FieldPath::Class(entry.id.clone()), &entry)
    }

    /// Resolve and admit the one catalog item of a single-choice step.
    fn lookup_single(
        &self,
        ctx: &StepContext<'_>,
        kind: ItemKind,
        key: &str,
    ) -> Result<&CatalogItem, CompileError> {
        let item = self
            .catalog
            .lookup(kind, key)
            .ok_or_else(|| reject(ctx.step, vec![unknown_item(kind, key)]))?;
        self.admit(ctx, kind, item)
            .map_err(|failure| reject(ctx.step, vec![failure]))?;
        Ok(item)
    }

    // -- ability routines ---------------------------------------------------

    fn ability_scores(
        &self,
        ctx: &StepContext<'_>,
        scores: &BTreeMap<Ability, i32>,
    ) -> Result<MutationPlan, CompileError> {
        let (min, max) = (self.config.ability_score_min, self.config.ability_score_max);
        let mut plan = MutationPlan::new();
        let mut failures = Vec::new();

        for ability in Ability::ALL {
            let Some(&score) = scores.get(&ability) else {
                failures.push(ItemFailure::new(
                    ability.abbreviation(),
                    ability.full_name(),
                    MissingRequirement::new(format!("a {ability} score"), "not provided"),
                ));
                continue;
            };
            if !(min..=max).contains(&score) {
                if !ctx.freebuild {
                    failures.push(ItemFailure::new(
                        ability.abbreviation(),
                        ability.full_name(),
                        MissingRequirement::new(
                            format!("{ability} between {min} and {max}"),
                            score.to_string(),
                        ),
                    ));
                    continue;
                }
                if !(-ABILITY_BASE_LIMIT..=ABILITY_BASE_LIMIT).contains(&score) {
                    failures.push(ItemFailure::new(
                        ability.abbreviation(),
                        ability.full_name(),
                        MissingRequirement::new(
                            format!("{ability} within {ABILITY_BASE_LIMIT} of zero"),
                            score.to_string(),
                        ),
                    ));
                    continue;
                }
                if !ctx.suppress_warnings {
                    warn!(ability = %ability, score, min, max, "freebuild accepted out-of-range ability score");
                }
            }
            plan.set_field(&FieldPath::AbilityBase(ability), json!(score));
        }

        if failures.is_empty() {
            Ok(plan)
        } else {
            Err(reject(ctx.step, failures))
        }
    }

    fn ability_increase(
        &self,
        ctx: &StepContext<'_>,
        increases: &BTreeMap<Ability, u32>,
    ) -> Result<MutationPlan, CompileError> {
        let required = self.config.ability_increase_points;
        let cap = self.config.max_increase_per_ability;
        let mut failures = Vec::new();

        for (ability, points) in increases {
            if *points > cap {
                failures.push(ItemFailure::new(
                    ability.abbreviation(),
                    ability.full_name(),
                    MissingRequirement::new(
                        format!("at most {cap} point(s) to {ability}"),
                        points.to_string(),
                    ),
                ));
            }
        }
        let spent = increases
            .values()
            .fold(0u32, |acc, points| acc.saturating_add(*points));
        if spent != required {
            failures.push(ItemFailure::new(
                "ability-increase",
                "Ability increase",
                MissingRequirement::new(
                    format!("exactly {required} points spent"),
                    spent.to_string(),
                ),
            ));
        }
        if !failures.is_empty() {
            return Err(reject(ctx.step, failures));
        }

        let mut plan = MutationPlan::new();
        for (ability, points) in increases.iter().filter(|(_, p)| **p > 0) {
            let base = ctx.snapshot.ability(*ability).base;
            plan.set_field(
                &FieldPath::AbilityBase(*ability),
                json!(base.saturating_add(i32::try_from(*points).unwrap_or(i32::MAX)))
            );
        }
        Ok(plan)
    }

    // -- multi-item routines ------------------------------------------------

    /// Feats, talents and Force options: all-or-nothing additions.
    fn acquire(
        &self,
        ctx: &StepContext<'_>,
        kind: ItemKind,
        items: &[ItemRef],
    ) -> Result<MutationPlan, CompileError> {
        let collection = collection_for(ctx.step, kind)?;
        let entries = self.resolve_items(ctx, kind, collection, items, true)?;
        let mut plan = MutationPlan::new();
        for entry in entries {
            plan.add_entry(collection, entry);
        }
        Ok(plan)
    }

    /// The complete trained-skill set: newly trained skills are added, skills
    /// no longer selected are removed.
    fn skills(&self, ctx: &StepContext<'_>, items: &[ItemRef]) -> Result<MutationPlan, CompileError> {
        let collection = collection_for(ctx.step, ItemKind::Skill)?;
        let entries = self.resolve_items(ctx, ItemKind::Skill, collection, items, false)?;
        let selected: BTreeSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();

        let mut plan = MutationPlan::new();
        for owned in ctx.snapshot.items(collection) {
            if !selected.contains(owned.id.as_str()) {
                plan.delete_entry(collection, owned.id.clone());
            }
        }
        for entry in entries {
            if !ctx.snapshot.has_item(collection, &entry.id) {
                plan.add_entry(collection, entry);
            }
        }
        Ok(plan)
    }

    /// Resolve every referenced item against the same snapshot. Fails with
    /// every failing item if any fails.
    fn resolve_items(
        &self,
        ctx: &StepContext<'_>,
        kind: ItemKind,
        collection: Collection,
        items: &[ItemRef],
        reject_held: bool,
    ) -> Result<Vec<CollectionEntry>, CompileError> {
        let mut entries = Vec::with_capacity(items.len());
        let mut failures = Vec::new();
        let mut seen = BTreeSet::new();

        for item in items {
            let (entry, catalog_item) = match self.resolve(ctx.step, kind, item) {
                Ok(resolved) => resolved,
                Err(failure) => {
                    failures.push(failure);
                    continue;
                }
            };
            if !seen.insert(entry.id.clone()) {
                failures.push(ItemFailure::new(
                    &entry.id,
                    &entry.name,
                    MissingRequirement::new("selected once per step", "selected more than once"),
                ));
                continue;
            }
            if reject_held && ctx.snapshot.has_item(collection, &entry.id) {
                failures.push(ItemFailure::new(
                    &entry.id,
                    &entry.name,
                    MissingRequirement::new(format!("a {kind} not already held"), "already acquired"),
                ));
                continue;
            }
            if let Some(catalog_item) = catalog_item {
                if let Err(failure) = self.admit(ctx, kind, catalog_item) {
                    failures.push(failure);
                    continue;
                }
            }
            entries.push(entry);
        }

        if failures.is_empty() {
            Ok(entries)
        } else {
            Err(reject(ctx.step, failures))
        }
    }

    /// The document entry for one reference, plus its catalog item unless it
    /// is freeform.
    fn resolve(
        &self,
        step: StepId,
        kind: ItemKind,
        item: &ItemRef,
    ) -> Result<(CollectionEntry, Option<&CatalogItem>), ItemFailure> {
        if item.is_freeform() {
            let name = match item {
                ItemRef::Entry { name: Some(name), .. } if !name.trim().is_empty() => name.trim(),
                _ => item.key(),
            };
            let id = match item {
                ItemRef::Entry { id: Some(id), .. } if !id.trim().is_empty() => id.trim().to_owned(),
                _ => slug(name),
            };
            if id.is_empty() {
                return Err(ItemFailure::new(
                    "",
                    "",
                    MissingRequirement::new(format!("a name for the freeform {kind}"), "empty"),
                ));
            }
            let mut entry = CollectionEntry::new(id, name);
            entry.freeform = true;
            debug!(step = %step, item = %entry.id, "freeform entry skips prerequisite checks");
            return Ok((entry, None));
        }

        let key = item.key();
        self.catalog
            .lookup(kind, key)
            .map(|catalog_item| (catalog_item.to_entry(), Some(catalog_item)))
            .ok_or_else(|| unknown_item(kind, key))
    }

    /// Apply the prerequisite check, honoring freebuild.
    fn admit(
        &self,
        ctx: &StepContext<'_>,
        kind: ItemKind,
        item: &CatalogItem,
    ) -> Result<(), ItemFailure> {
        let result = self.checker.check(ctx.snapshot, kind, &item.id);
        if result.met {
            return Ok(());
        }
        if ctx.freebuild {
            if !ctx.suppress_warnings {
                warn!(
                    step = %ctx.step,
                    item = %item.id,
                    missing = result.missing.len(),
                    "freebuild bypassed unmet prerequisites"
                );
            }
            return Ok(());
        }
        Err(ItemFailure {
            id: item.id.clone(),
            name: item.name.clone(),
            missing: result.missing,
        })
    }
}

fn reject(step: StepId, items: Vec<ItemFailure>) -> CompileError {
    CompileError::Validation(ValidationFailure { step, items })
}

fn unknown_item(kind: ItemKind, key: &str) -> ItemFailure {
    ItemFailure::new(
        key,
        key,
        MissingRequirement::new(
            format!("a {kind} known to the catalog"),
            format!("unknown {kind} '{key}'"),
        ),
    )
}

fn collection_for(step: StepId, kind: ItemKind) -> Result<Collection, CompileError> {
    kind.collection()
        .ok_or_else(|| CompileError::MalformedSelections {
            step,
            reason: format!("{kind} items are not held in a collection"),
        })
}

fn freeform_id(step: StepId, name: &str) -> Result<String, CompileError> {
    let id = slug(name);
    if id.is_empty() {
        return Err(CompileError::MalformedSelections {
            step,
            reason: format!("freeform name '{name}' has no usable characters"),
        });
    }
    Ok(id)
}

fn single_set<T: Serialize>(field: &FieldPath, value: &T) -> Result<MutationPlan, CompileError> {
    let value = serde_json::to_value(value).map_err(|source| CompileError::Encode {
        path: field.to_string(),
        source,
    })?;
    let mut plan = MutationPlan::new();
    plan.set_field(field, value);
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use saga_core::character::BaseAttackProgression;

    fn compiler() -> ProgressionCompiler {
        let catalog = StaticCatalog::from_items([
            CatalogItem::new("power-attack", "Power Attack", ItemKind::Feat)
                .with_prerequisites("Str 13"),
            CatalogItem::new("dodge", "Dodge", ItemKind::Feat),
            CatalogItem::new("toughness", "Toughness", ItemKind::Feat),
            CatalogItem::new("block", "Block", ItemKind::Talent).with_tree("Lightsaber Combat"),
            CatalogItem::new("deflect", "Deflect", ItemKind::Talent)
                .with_tree("Lightsaber Combat")
                .with_prerequisites("Block"),
            CatalogItem::new("perception", "Perception", ItemKind::Skill),
            CatalogItem::new("stealth", "Stealth", ItemKind::Skill),
            CatalogItem::new("wookiee", "Wookiee", ItemKind::Species)
                .with_ability_adjustment(Ability::Str, 4),
            CatalogItem::new("scoundrel", "Scoundrel", ItemKind::Class).with_class(ClassData {
                base_attack: BaseAttackProgression::ThreeQuarters,
                ..ClassData::default()
            }),
            CatalogItem::new("crime-lord", "Crime Lord", ItemKind::Class)
                .with_prerequisites("Character Level 7"),
            CatalogItem::new("spacer", "Spacer", ItemKind::Background),
        ])
        .unwrap();
        ProgressionCompiler::new(Arc::new(catalog), CompilerConfig::default())
    }

    fn snapshot_of(character: &Character) -> Snapshot {
        SnapshotBuilder::new(character).build()
    }

    fn blank() -> Snapshot {
        snapshot_of(&Character::builder("c1").build().unwrap())
    }

    fn validation(err: CompileError) -> ValidationFailure {
        match err {
            CompileError::Validation(failure) => failure,
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    // -- steps and selections -----------------------------------------------

    #[test]
    fn step_ids_round_trip_through_strings() {
        for step in StepId::ALL {
            assert_eq!(step.as_str().parse::<StepId>().unwrap(), step);
        }
        assert!(matches!(
            "prestige".parse::<StepId>(),
            Err(CompileError::UnknownStep { .. })
        ));
    }

    #[test]
    fn selections_deserialize_from_camel_case() {
        let selections: Selections = serde_json::from_str(
            r#"{ "featIds": ["dodge", { "name": "Sabacc Ace", "freeform": true }],
                 "abilityIncreases": { "wis": 1 } }"#,
        )
        .unwrap();
        assert_eq!(selections.feat_ids[0], ItemRef::Id("dodge".to_owned()));
        assert_eq!(selections.feat_ids[1], ItemRef::freeform("Sabacc Ace"));
        assert_eq!(selections.ability_increases[&Ability::Wis], 1);
    }

    #[test]
    fn single_choice_without_id_or_name_is_malformed() {
        let err = compiler()
            .compile_step(&blank(), StepId::Species, &Selections::default(), CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::MalformedSelections { step: StepId::Species, .. }));
    }

    // -- multi-item steps ---------------------------------------------------

    #[test]
    fn unmet_feat_rejects_the_whole_step() {
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::Feats,
                &Selections::feats(["dodge", "power-attack"]),
                CompileOptions::default(),
            )
            .unwrap_err();
        let failure = validation(err);
        assert_eq!(failure.step, StepId::Feats);
        assert_eq!(failure.failed_ids(), vec!["power-attack"]);
        assert_eq!(failure.items[0].missing[0].requirement, "Strength 13");
    }

    #[test]
    fn every_failing_item_is_listed() {
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::Feats,
                &Selections::feats(["power-attack", "no-such-feat", "dodge", "dodge"]),
                CompileOptions::default(),
            )
            .unwrap_err();
        let failure = validation(err);
        assert_eq!(failure.failed_ids(), vec!["power-attack", "no-such-feat", "dodge"]);
    }

    #[test]
    fn siblings_do_not_satisfy_each_other() {
        // Deflect needs Block; choosing both at once validates Deflect against
        // the snapshot, which has no Block yet.
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::Talents,
                &Selections::talents(["block", "deflect"]),
                CompileOptions::default(),
            )
            .unwrap_err();
        assert_eq!(validation(err).failed_ids(), vec!["deflect"]);
    }

    #[test]
    fn freebuild_bypasses_prerequisites_but_not_duplicates() {
        let compiler = compiler();
        let plan = compiler
            .compile_step(
                &blank(),
                StepId::Feats,
                &Selections::feats(["power-attack"]),
                CompileOptions::freebuild(),
            )
            .unwrap();
        assert_eq!(plan.added_ids(Collection::Feats), vec!["power-attack"]);

        let err = compiler
            .compile_step(
                &blank(),
                StepId::Feats,
                &Selections::feats(["dodge", "Dodge"]),
                CompileOptions::freebuild(),
            )
            .unwrap_err();
        assert_eq!(validation(err).failed_ids(), vec!["dodge"]);
    }

    #[test]
    fn held_items_cannot_be_taken_again() {
        let character = Character::builder("c1")
            .entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"))
            .build()
            .unwrap();
        let err = compiler()
            .compile_step(
                &snapshot_of(&character),
                StepId::Feats,
                &Selections::feats(["dodge"]),
                CompileOptions::freebuild(),
            )
            .unwrap_err();
        assert_eq!(validation(err).items[0].missing[0].current, "already acquired");
    }

    #[test]
    fn freeform_items_skip_prerequisites_and_are_recorded() {
        let plan = compiler()
            .compile_step(
                &blank(),
                StepId::Feats,
                &Selections::feats([ItemRef::freeform("Sabacc Ace")]),
                CompileOptions::default(),
            )
            .unwrap();
        let added = &plan.add[&Collection::Feats][0];
        assert_eq!(added.id, "sabacc-ace");
        assert!(added.freeform);
    }

    #[test]
    fn skills_step_trains_and_untrains() {
        let character = Character::builder("c1")
            .entry(Collection::Skills, CollectionEntry::new("perception", "Perception"))
            .build()
            .unwrap();
        let plan = compiler()
            .compile_step(
                &snapshot_of(&character),
                StepId::Skills,
                &Selections::skills(["Stealth"]),
                CompileOptions::default(),
            )
            .unwrap();
        assert_eq!(plan.added_ids(Collection::Skills), vec!["stealth"]);
        assert_eq!(plan.delete[&Collection::Skills], vec!["perception".to_owned()]);
    }

    #[test]
    fn empty_selection_compiles_to_an_empty_plan() {
        let plan = compiler()
            .compile_step(&blank(), StepId::Talents, &Selections::default(), CompileOptions::default())
            .unwrap();
        assert!(plan.is_empty());
    }

    // -- ability steps ------------------------------------------------------

    #[test]
    fn ability_scores_need_all_six_in_range() {
        let compiler = compiler();
        let err = compiler
            .compile_step(
                &blank(),
                StepId::Abilities,
                &Selections::ability_scores([(Ability::Str, 20), (Ability::Dex, 12)]),
                CompileOptions::default(),
            )
            .unwrap_err();
        let failure = validation(err);
        assert_eq!(failure.failed_ids(), vec!["str", "con", "int", "wis", "cha"]);

        let plan = compiler
            .compile_step(
                &blank(),
                StepId::Abilities,
                &Selections::ability_scores(Ability::ALL.map(|a| (a, 12))),
                CompileOptions::default(),
            )
            .unwrap();
        assert_eq!(plan.set.len(), 6);
        assert_eq!(plan.set["abilities.cha.base"], json!(12));
    }

    #[test]
    fn freebuild_accepts_out_of_range_scores() {
        let mut scores: Vec<_> = Ability::ALL.map(|a| (a, 10)).into();
        scores[0].1 = 20;
        let plan = compiler()
            .compile_step(
                &blank(),
                StepId::Abilities,
                &Selections::ability_scores(scores),
                CompileOptions::freebuild(),
            )
            .unwrap();
        assert_eq!(plan.set["abilities.str.base"], json!(20));
    }

    #[test]
    fn freebuild_still_bounds_ability_scores() {
        let mut scores: Vec<_> = Ability::ALL.map(|a| (a, 10)).into();
        scores[0].1 = i32::MAX;
        scores[1].1 = -ABILITY_BASE_LIMIT - 1;
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::Abilities,
                &Selections::ability_scores(scores),
                CompileOptions::freebuild(),
            )
            .unwrap_err();
        assert_eq!(validation(err).failed_ids(), vec!["str", "dex"]);
    }

    #[test]
    fn ability_increase_requires_exact_points() {
        let compiler = compiler();
        let err = compiler
            .compile_step(
                &blank(),
                StepId::AbilityIncrease,
                &Selections::ability_increases([(Ability::Wis, 1)]),
                CompileOptions::freebuild(),
            )
            .unwrap_err();
        assert_eq!(validation(err).items[0].missing[0].current, "1");

        let err = compiler
            .compile_step(
                &blank(),
                StepId::AbilityIncrease,
                &Selections::ability_increases([(Ability::Wis, 2)]),
                CompileOptions::default(),
            )
            .unwrap_err();
        assert_eq!(validation(err).failed_ids(), vec!["wis"]);
    }

    #[test]
    fn oversized_increases_are_rejected_not_summed_past_overflow() {
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::AbilityIncrease,
                &Selections::ability_increases([(Ability::Str, u32::MAX), (Ability::Dex, 1)]),
                CompileOptions::default(),
            )
            .unwrap_err();
        let failure = validation(err);
        assert_eq!(failure.failed_ids(), vec!["str", "ability-increase"]);
        assert_eq!(failure.items[1].missing[0].current, u32::MAX.to_string());
    }

    // -- single-choice steps ------------------------------------------------

    #[test]
    fn species_carries_ability_adjustments() {
        let plan = compiler()
            .compile_step(&blank(), StepId::Species, &Selections::catalog("Wookiee"), CompileOptions::default())
            .unwrap();
        assert_eq!(plan.set["species"]["ability_adjustments"]["str"], json!(4));
    }

    #[test]
    fn freeform_background_is_recorded_without_catalog() {
        let plan = compiler()
            .compile_step(
                &blank(),
                StepId::Background,
                &Selections::freeform("Moisture Farmer"),
                CompileOptions::default(),
            )
            .unwrap();
        assert_eq!(plan.set["background"]["freeform"], json!(true));
        assert_eq!(plan.set["background"]["name"], json!("Moisture Farmer"));
    }

    #[test]
    fn class_step_adds_one_level() {
        let plan = compiler()
            .compile_step(&blank(), StepId::Class, &Selections::catalog("scoundrel"), CompileOptions::default())
            .unwrap();
        assert_eq!(plan.set["classes.scoundrel"]["levels"], json!(1));
        assert_eq!(plan.set["classes.scoundrel"]["base_attack"], json!("three_quarters"));
    }

    #[test]
    fn freeform_class_cannot_shadow_a_catalog_class() {
        let err = compiler()
            .compile_step(&blank(), StepId::Class, &Selections::freeform("Scoundrel"), CompileOptions::freebuild())
            .unwrap_err();
        assert!(matches!(err, CompileError::MalformedSelections { step: StepId::Class, .. }));
    }

    #[test]
    fn freeform_class_cannot_replace_a_held_class() {
        let held = |freeform| ClassEntry {
            id: "mercenary".to_owned(),
            name: "Mercenary".to_owned(),
            levels: 2,
            freeform,
            base_attack: BaseAttackProgression::Full,
            defense_bonuses: BTreeMap::new(),
            grants_force_sensitivity: false,
        };

        let veteran = Character::builder("c1").class(held(false)).build().unwrap();
        let err = compiler()
            .compile_step(
                &snapshot_of(&veteran),
                StepId::Class,
                &Selections::freeform("Mercenary"),
                CompileOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::MalformedSelections { .. }));

        let homebrew = Character::builder("c1").class(held(true)).build().unwrap();
        let plan = compiler()
            .compile_step(
                &snapshot_of(&homebrew),
                StepId::Class,
                &Selections::freeform("Mercenary"),
                CompileOptions::default(),
            )
            .unwrap();
        assert_eq!(plan.set["classes.mercenary"]["levels"], json!(3));
        assert_eq!(plan.set["classes.mercenary"]["freeform"], json!(true));
    }

    #[test]
    fn prestige_class_prerequisites_are_enforced() {
        let err = compiler()
            .compile_step(&blank(), StepId::Class, &Selections::catalog("crime-lord"), CompileOptions::default())
            .unwrap_err();
        let failure = validation(err);
        assert_eq!(failure.items[0].missing[0].description, "Character Level 7 (current 0)");
    }

    #[test]
    fn unknown_catalog_background_is_a_validation_failure() {
        let err = compiler()
            .compile_step(
                &blank(),
                StepId::Background,
                &Selections::catalog("bounty-hunter"),
                CompileOptions::freebuild(),
            )
            .unwrap_err();
        assert_eq!(validation(err).failed_ids(), vec!["bounty-hunter"]);
    }
}
