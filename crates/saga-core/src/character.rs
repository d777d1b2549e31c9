//! The live character document.
//!
//! [`Character`] is the single shared mutable resource of the progression
//! core. Reading it is open to everyone, but every write method is
//! crate-private: the only code that calls them is the
//! [`MutationAuthority`](crate::authority::MutationAuthority). Callers that
//! need to create a fresh record (initial setup, tests) use
//! [`CharacterBuilder`], which produces a new document rather than mutating an
//! existing one.
//!
//! # Field paths
//!
//! Direct field assignments in a [`MutationPlan`](crate::plan::MutationPlan)
//! address the document through string paths parsed into [`FieldPath`]:
//!
//! | Path | Value |
//! |---|---|
//! | `name` | string |
//! | `species` | [`SpeciesEntry`] or `null` |
//! | `background` | [`BackgroundEntry`] or `null` |
//! | `abilities.<abbr>.base` | integer |
//! | `classes.<id>` | [`ClassEntry`] |
//!
//! # Derived values
//!
//! Ability totals and modifiers, heroic level, base attack bonus, defenses and
//! force sensitivity are derived. They are recomputed by
//! [`Character::recompute_derived`] once per transaction, after all raw
//! writes, and never interleaved with them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ability::Ability;
use crate::plan::StructuralFailure;
use crate::CoreError;

/// The feat id whose presence marks a character as Force-sensitive.
pub const FORCE_SENSITIVITY_FEAT: &str = "force-sensitivity";

/// Largest magnitude accepted for an ability base written through a plan.
/// Freebuild may leave the creation range, but not this bound.
pub const ABILITY_BASE_LIMIT: i32 = 1_000;

// ---------------------------------------------------------------------------
// Identifiers and enums
// ---------------------------------------------------------------------------

/// Host-assigned identifier of a character record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named collection of acquired entries on a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Feats,
    Talents,
    Skills,
    ForcePowers,
    ForceTechniques,
    ForceSecrets,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Feats,
        Collection::Talents,
        Collection::Skills,
        Collection::ForcePowers,
        Collection::ForceTechniques,
        Collection::ForceSecrets,
    ];

    /// Serialized name (`"force_powers"`).
    pub fn name(self) -> &'static str {
        match self {
            Collection::Feats => "feats",
            Collection::Talents => "talents",
            Collection::Skills => "skills",
            Collection::ForcePowers => "force_powers",
            Collection::ForceTechniques => "force_techniques",
            Collection::ForceSecrets => "force_secrets",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| CoreError::UnknownCollection { name: s.to_owned() })
    }
}

/// The three defenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Defense {
    Reflex,
    Fortitude,
    Will,
}

impl Defense {
    pub const ALL: [Defense; 3] = [Defense::Reflex, Defense::Fortitude, Defense::Will];

    /// The ability whose modifier feeds this defense.
    pub fn key_ability(self) -> Ability {
        match self {
            Defense::Reflex => Ability::Dex,
            Defense::Fortitude => Ability::Con,
            Defense::Will => Ability::Wis,
        }
    }
}

/// How fast a class accrues base attack bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseAttackProgression {
    /// +1 per level.
    Full,
    /// +3 per 4 levels, rounded down.
    ThreeQuarters,
}

impl BaseAttackProgression {
    pub fn bonus_at(self, levels: u32) -> i32 {
        match self {
            BaseAttackProgression::Full => i32::try_from(levels).unwrap_or(i32::MAX),
            BaseAttackProgression::ThreeQuarters => {
                i32::try_from(u64::from(levels) * 3 / 4).unwrap_or(i32::MAX)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Modifiers and entries
// ---------------------------------------------------------------------------

/// What a modifier adjusts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum ModifierTarget {
    Ability(Ability),
    Defense(Defense),
    Skill(String),
    BaseAttack,
}

/// A modifier declared by a catalog item, before it is attributed to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierSpec {
    pub target: ModifierTarget,
    pub value: i32,
}

/// Reference to one entry of one collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryRef {
    pub collection: Collection,
    pub id: String,
}

/// A modifier registered on the character, attributed to the entry that
/// granted it. Removing the entry removes the modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub source: EntryRef,
    pub target: ModifierTarget,
    pub value: i32,
}

/// One acquired feat, talent, trained skill or Force option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub id: String,
    pub name: String,
    /// User-typed content with no catalog backing.
    #[serde(default)]
    pub freeform: bool,
    /// Talent tree, for talents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    /// Modifiers this entry grants while it is held.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<ModifierSpec>,
}

impl CollectionEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            freeform: false,
            tree: None,
            modifiers: Vec::new(),
        }
    }

    pub fn with_tree(mut self, tree: impl Into<String>) -> Self {
        self.tree = Some(tree.into());
        self
    }

    pub fn with_modifier(mut self, target: ModifierTarget, value: i32) -> Self {
        self.modifiers.push(ModifierSpec { target, value });
        self
    }
}

/// Levels held in one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub id: String,
    pub name: String,
    pub levels: u32,
    #[serde(default)]
    pub freeform: bool,
    pub base_attack: BaseAttackProgression,
    #[serde(default)]
    pub defense_bonuses: BTreeMap<Defense, i32>,
    #[serde(default)]
    pub grants_force_sensitivity: bool,
}

/// The character's species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ability_adjustments: BTreeMap<Ability, i32>,
}

/// The character's background, from the catalog or typed by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub freeform: bool,
}

/// Base and derived values of one ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScore {
    pub base: i32,
    pub total: i32,
    pub modifier: i32,
}

impl AbilityScore {
    fn from_base(base: i32) -> Self {
        Self {
            base,
            total: base,
            modifier: ability_modifier(base),
        }
    }
}

/// `floor((total - 10) / 2)`.
pub fn ability_modifier(total: i32) -> i32 {
    total.saturating_sub(10).div_euclid(2)
}

/// Values computed from the raw document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derived {
    pub heroic_level: u32,
    pub base_attack_bonus: i32,
    pub defenses: BTreeMap<Defense, i32>,
    pub force_sensitive: bool,
    #[serde(default)]
    pub skill_bonuses: BTreeMap<String, i32>,
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// A settable field of the document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldPath {
    Name,
    Species,
    Background,
    AbilityBase(Ability),
    Class(String),
}

impl FieldPath {
    /// Parse a dotted path. Unknown paths fail the field-existence check.
    pub fn parse(path: &str) -> Result<FieldPath, CoreError> {
        let unknown = || CoreError::UnknownField {
            path: path.to_owned(),
        };
        let segments: Vec<&str> = path.split('.').collect();
        match segments.as_slice() {
            ["name"] => Ok(FieldPath::Name),
            ["species"] => Ok(FieldPath::Species),
            ["background"] => Ok(FieldPath::Background),
            ["abilities", ability, "base"] => {
                Ability::parse(ability).map(FieldPath::AbilityBase).ok_or_else(unknown)
            }
            ["classes", id] if !id.is_empty() => Ok(FieldPath::Class((*id).to_owned())),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Name => f.write_str("name"),
            FieldPath::Species => f.write_str("species"),
            FieldPath::Background => f.write_str("background"),
            FieldPath::AbilityBase(a) => write!(f, "abilities.{}.base", a.abbreviation()),
            FieldPath::Class(id) => write!(f, "classes.{id}"),
        }
    }
}

/// A decoded field write, ready to apply without further failure.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldWrite {
    Name(String),
    Species(Option<SpeciesEntry>),
    Background(Option<BackgroundEntry>),
    AbilityBase(Ability, i32),
    Class(ClassEntry),
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// A persisted character record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    id: CharacterId,
    name: String,
    abilities: BTreeMap<Ability, AbilityScore>,
    #[serde(default)]
    species: Option<SpeciesEntry>,
    #[serde(default)]
    background: Option<BackgroundEntry>,
    #[serde(default)]
    classes: BTreeMap<String, ClassEntry>,
    #[serde(default)]
    collections: BTreeMap<Collection, Vec<CollectionEntry>>,
    #[serde(default)]
    modifiers: Vec<Modifier>,
    #[serde(default)]
    derived: Derived,
}

impl Character {
    /// Start building a fresh record. All abilities start at base 10.
    pub fn builder(id: impl Into<String>) -> CharacterBuilder {
        CharacterBuilder::new(id)
    }

    pub fn id(&self) -> &CharacterId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ability(&self, ability: Ability) -> AbilityScore {
        self.abilities
            .get(&ability)
            .copied()
            .unwrap_or_else(|| AbilityScore::from_base(10))
    }

    pub fn species(&self) -> Option<&SpeciesEntry> {
        self.species.as_ref()
    }

    pub fn background(&self) -> Option<&BackgroundEntry> {
        self.background.as_ref()
    }

    pub fn classes(&self) -> &BTreeMap<String, ClassEntry> {
        &self.classes
    }

    /// Entries of one collection in acquisition order.
    pub fn entries(&self, collection: Collection) -> &[CollectionEntry] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_entry(&self, collection: Collection, id: &str) -> bool {
        self.entries(collection).iter().any(|e| e.id == id)
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn derived(&self) -> &Derived {
        &self.derived
    }

    /// Modifiers whose source entry no longer exists. Always empty for a
    /// document written only through the authority.
    pub fn orphaned_modifiers(&self) -> Vec<&Modifier> {
        self.modifiers
            .iter()
            .filter(|m| !self.has_entry(m.source.collection, &m.source.id))
            .collect()
    }

    /// Ids that appear more than once within a collection.
    pub fn duplicate_ids(&self) -> Vec<EntryRef> {
        let mut duplicates = Vec::new();
        for (collection, entries) in &self.collections {
            let mut seen = BTreeSet::new();
            for entry in entries {
                if !seen.insert(entry.id.as_str()) {
                    duplicates.push(EntryRef {
                        collection: *collection,
                        id: entry.id.clone(),
                    });
                }
            }
        }
        duplicates
    }

    /// BLAKE3 hex digest of the JSON-serialized document.
    ///
    /// All maps are `BTreeMap`s, so equal documents always hash equally.
    pub fn state_hash(&self) -> String {
        let json_bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json_bytes).to_hex().to_string()
    }

    // -- crate-private write path -------------------------------------------

    /// Decode a field value against its path without touching the document.
    pub(crate) fn decode_field(
        &self,
        path: &str,
        value: &serde_json::Value,
    ) -> Result<FieldWrite, StructuralFailure> {
        let field = FieldPath::parse(path).map_err(|_| StructuralFailure::UnknownField {
            path: path.to_owned(),
        })?;
        let invalid = |details: String| StructuralFailure::InvalidValue {
            path: path.to_owned(),
            details,
        };
        match field {
            FieldPath::Name => match value.as_str() {
                Some(name) if !name.trim().is_empty() => Ok(FieldWrite::Name(name.to_owned())),
                _ => Err(invalid("expected a non-empty string".to_owned())),
            },
            FieldPath::Species => serde_json::from_value(value.clone())
                .map(FieldWrite::Species)
                .map_err(|e| invalid(e.to_string())),
            FieldPath::Background => serde_json::from_value(value.clone())
                .map(FieldWrite::Background)
                .map_err(|e| invalid(e.to_string())),
            FieldPath::AbilityBase(ability) => {
                let base = value
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| invalid("expected an integer".to_owned()))?;
                if !(-ABILITY_BASE_LIMIT..=ABILITY_BASE_LIMIT).contains(&base) {
                    return Err(invalid(format!(
                        "ability base {base} is outside -{ABILITY_BASE_LIMIT}..={ABILITY_BASE_LIMIT}"
                    )));
                }
                Ok(FieldWrite::AbilityBase(ability, base))
            }
            FieldPath::Class(id) => {
                let entry: ClassEntry =
                    serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;
                if entry.id != id {
                    return Err(invalid(format!(
                        "class entry id '{}' does not match path id '{id}'",
                        entry.id
                    )));
                }
                if entry.levels == 0 {
                    return Err(invalid("class levels must be at least 1".to_owned()));
                }
                Ok(FieldWrite::Class(entry))
            }
        }
    }

    pub(crate) fn write_field(&mut self, write: FieldWrite) {
        match write {
            FieldWrite::Name(name) => self.name = name,
            FieldWrite::Species(species) => self.species = species,
            FieldWrite::Background(background) => self.background = background,
            FieldWrite::AbilityBase(ability, base) => {
                self.abilities
                    .entry(ability)
                    .or_insert_with(|| AbilityScore::from_base(base))
                    .base = base;
            }
            FieldWrite::Class(entry) => {
                self.classes.insert(entry.id.clone(), entry);
            }
        }
    }

    /// Append an entry and register its modifiers.
    pub(crate) fn insert_entry(
        &mut self,
        collection: Collection,
        entry: CollectionEntry,
    ) -> Result<(), StructuralFailure> {
        if self.has_entry(collection, &entry.id) {
            return Err(StructuralFailure::DuplicateEntry {
                collection,
                id: entry.id,
            });
        }
        for spec in &entry.modifiers {
            self.modifiers.push(Modifier {
                source: EntryRef {
                    collection,
                    id: entry.id.clone(),
                },
                target: spec.target.clone(),
                value: spec.value,
            });
        }
        self.collections.entry(collection).or_default().push(entry);
        Ok(())
    }

    /// Remove an entry and every modifier attributed to it. Returns the number
    /// of modifiers removed.
    pub(crate) fn remove_entry(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> Result<usize, StructuralFailure> {
        let entries = self.collections.entry(collection).or_default();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Err(StructuralFailure::MissingEntry {
                collection,
                id: id.to_owned(),
            });
        }
        if entries.is_empty() {
            self.collections.remove(&collection);
        }
        let modifiers_before = self.modifiers.len();
        self.modifiers
            .retain(|m| !(m.source.collection == collection && m.source.id == id));
        Ok(modifiers_before - self.modifiers.len())
    }

    /// Recompute every derived value from the raw document.
    pub(crate) fn recompute_derived(&mut self) {
        let mut ability_bonus: BTreeMap<Ability, i32> = BTreeMap::new();
        let mut defense_bonus: BTreeMap<Defense, i32> = BTreeMap::new();
        let mut skill_bonuses: BTreeMap<String, i32> = BTreeMap::new();
        let mut attack_bonus = 0i32;
        for m in &self.modifiers {
            match &m.target {
                ModifierTarget::Ability(a) => {
                    saturating_accumulate(ability_bonus.entry(*a).or_default(), m.value)
                }
                ModifierTarget::Defense(d) => {
                    saturating_accumulate(defense_bonus.entry(*d).or_default(), m.value)
                }
                ModifierTarget::Skill(s) => {
                    saturating_accumulate(skill_bonuses.entry(s.clone()).or_default(), m.value)
                }
                ModifierTarget::BaseAttack => saturating_accumulate(&mut attack_bonus, m.value),
            }
        }

        for ability in Ability::ALL {
            let base = self.ability(ability).base;
            let species = self
                .species
                .as_ref()
                .and_then(|s| s.ability_adjustments.get(&ability))
                .copied()
                .unwrap_or(0);
            let total = base
                .saturating_add(species)
                .saturating_add(ability_bonus.get(&ability).copied().unwrap_or(0));
            self.abilities.insert(
                ability,
                AbilityScore {
                    base,
                    total,
                    modifier: ability_modifier(total),
                },
            );
        }

        let heroic_level = self
            .classes
            .values()
            .fold(0u32, |acc, c| acc.saturating_add(c.levels));
        let base_attack_bonus = self
            .classes
            .values()
            .fold(attack_bonus, |acc, c| acc.saturating_add(c.base_attack.bonus_at(c.levels)));

        let mut defenses = BTreeMap::new();
        for defense in Defense::ALL {
            let class_bonus = self
                .classes
                .values()
                .filter_map(|c| c.defense_bonuses.get(&defense).copied())
                .max()
                .unwrap_or(0);
            let value = 10i32
                .saturating_add(i32::try_from(heroic_level).unwrap_or(i32::MAX))
                .saturating_add(self.ability(defense.key_ability()).modifier)
                .saturating_add(class_bonus)
                .saturating_add(defense_bonus.get(&defense).copied().unwrap_or(0));
            defenses.insert(defense, value);
        }

        let force_sensitive = self.has_entry(Collection::Feats, FORCE_SENSITIVITY_FEAT)
            || self.classes.values().any(|c| c.grants_force_sensitivity);

        self.derived = Derived {
            heroic_level,
            base_attack_bonus,
            defenses,
            force_sensitive,
            skill_bonuses,
        };
    }
}

fn saturating_accumulate(slot: &mut i32, value: i32) {
    *slot = slot.saturating_add(value);
}

// ---------------------------------------------------------------------------
// CharacterBuilder
// ---------------------------------------------------------------------------

/// Builds a fresh [`Character`] for initial setup and tests.
pub struct CharacterBuilder {
    character: Character,
    entries: Vec<(Collection, CollectionEntry)>,
}

impl CharacterBuilder {
    fn new(id: impl Into<String>) -> Self {
        let abilities = Ability::ALL
            .into_iter()
            .map(|a| (a, AbilityScore::from_base(10)))
            .collect();
        Self {
            character: Character {
                id: CharacterId::new(id),
                name: String::new(),
                abilities,
                species: None,
                background: None,
                classes: BTreeMap::new(),
                collections: BTreeMap::new(),
                modifiers: Vec::new(),
                derived: Derived::default(),
            },
            entries: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.character.name = name.into();
        self
    }

    pub fn ability(mut self, ability: Ability, base: i32) -> Self {
        self.character
            .write_field(FieldWrite::AbilityBase(ability, base));
        self
    }

    pub fn species(mut self, species: SpeciesEntry) -> Self {
        self.character.species = Some(species);
        self
    }

    pub fn background(mut self, background: BackgroundEntry) -> Self {
        self.character.background = Some(background);
        self
    }

    pub fn class(mut self, class: ClassEntry) -> Self {
        self.character.classes.insert(class.id.clone(), class);
        self
    }

    pub fn entry(mut self, collection: Collection, entry: CollectionEntry) -> Self {
        self.entries.push((collection, entry));
        self
    }

    /// Finish the record and compute its derived values.
    ///
    /// # Errors
    ///
    /// Returns [`StructuralFailure::DuplicateEntry`] if two entries of one
    /// collection share an id.
    pub fn build(self) -> Result<Character, StructuralFailure> {
        let mut character = self.character;
        for (collection, entry) in self.entries {
            character.insert_entry(collection, entry)?;
        }
        character.recompute_derived();
        Ok(character)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
