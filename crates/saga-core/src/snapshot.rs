//! Immutable point-in-time views of a character.
//!
//! [`SnapshotBuilder`] is the only reader of live state in the progression
//! core. It copies everything rule evaluation needs out of a [`Character`]
//! into a [`Snapshot`], which owns its data and exposes no mutators. A
//! snapshot is built fresh for each compile call and discarded afterwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ability::Ability;
use crate::character::{AbilityScore, Character, CharacterId, Collection};

/// One acquired item as rule evaluation sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(default)]
    pub freeform: bool,
}

impl AcquiredItem {
    fn matches(&self, key: &str) -> bool {
        self.id.eq_ignore_ascii_case(key) || self.name.eq_ignore_ascii_case(key)
    }
}

/// Levels held in one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLevel {
    pub name: String,
    pub levels: u32,
    /// True when the class was entered as free text rather than from the
    /// catalog.
    pub freeform: bool,
}

/// A frozen copy of the rule-relevant parts of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    character_id: CharacterId,
    abilities: BTreeMap<Ability, AbilityScore>,
    heroic_level: u32,
    class_levels: BTreeMap<String, ClassLevel>,
    base_attack_bonus: i32,
    force_sensitive: bool,
    acquired: BTreeMap<Collection, Vec<AcquiredItem>>,
    freebuild: bool,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn character_id(&self) -> &CharacterId {
        &self.character_id
    }

    pub fn ability(&self, ability: Ability) -> AbilityScore {
        self.abilities.get(&ability).copied().unwrap_or(AbilityScore {
            base: 10,
            total: 10,
            modifier: 0,
        })
    }

    pub fn heroic_level(&self) -> u32 {
        self.heroic_level
    }

    pub fn base_attack_bonus(&self) -> i32 {
        self.base_attack_bonus
    }

    pub fn force_sensitive(&self) -> bool {
        self.force_sensitive
    }

    pub fn freebuild(&self) -> bool {
        self.freebuild
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn class_levels(&self) -> &BTreeMap<String, ClassLevel> {
        &self.class_levels
    }

    /// Levels in a class looked up by id or name; 0 if the class is not held.
    pub fn class_level(&self, key: &str) -> u32 {
        self.class_levels
            .iter()
            .find(|(id, c)| id.eq_ignore_ascii_case(key) || c.name.eq_ignore_ascii_case(key))
            .map(|(_, c)| c.levels)
            .unwrap_or(0)
    }

    pub fn items(&self, collection: Collection) -> &[AcquiredItem] {
        self.acquired
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether an item is held, looked up by id or name.
    pub fn has_item(&self, collection: Collection, key: &str) -> bool {
        self.items(collection).iter().any(|i| i.matches(key))
    }

    pub fn is_trained(&self, skill: &str) -> bool {
        self.has_item(Collection::Skills, skill)
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.items(collection).len()
    }

    /// Talents held from any of the named trees.
    pub fn talents_in_trees(&self, trees: &[&str]) -> usize {
        self.items(Collection::Talents)
            .iter()
            .filter(|t| {
                t.tree
                    .as_deref()
                    .is_some_and(|tree| trees.iter().any(|want| want.eq_ignore_ascii_case(tree)))
            })
            .count()
    }
}

/// Builds a [`Snapshot`] from a live [`Character`].
///
/// ```
/// use saga_core::prelude::*;
///
/// let character = Character::builder("c1").ability(Ability::Str, 12).build().unwrap();
/// let snapshot = SnapshotBuilder::new(&character).freebuild(true).build();
/// assert_eq!(snapshot.ability(Ability::Str).modifier, 1);
/// assert!(snapshot.freebuild());
/// ```
pub struct SnapshotBuilder<'a> {
    character: &'a Character,
    freebuild: bool,
    captured_at: Option<DateTime<Utc>>,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(character: &'a Character) -> Self {
        Self {
            character,
            freebuild: false,
            captured_at: None,
        }
    }

    /// Caller-declared freebuild mode flag.
    pub fn freebuild(mut self, freebuild: bool) -> Self {
        self.freebuild = freebuild;
        self
    }

    /// Pin the capture timestamp (defaults to now).
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = Some(at);
        self
    }

    pub fn build(self) -> Snapshot {
        let character = self.character;
        let abilities = Ability::ALL
            .into_iter()
            .map(|a| (a, character.ability(a)))
            .collect();
        let class_levels = character
            .classes()
            .iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    ClassLevel {
                        name: c.name.clone(),
                        levels: c.levels,
                        freeform: c.freeform,
                    },
                )
            })
            .collect();
        let acquired = Collection::ALL
            .into_iter()
            .filter(|c| !character.entries(*c).is_empty())
            .map(|c| {
                let items = character
                    .entries(c)
                    .iter()
                    .map(|e| AcquiredItem {
                        id: e.id.clone(),
                        name: e.name.clone(),
                        tree: e.tree.clone(),
                        freeform: e.freeform,
                    })
                    .collect();
                (c, items)
            })
            .collect();
        let derived = character.derived();

        Snapshot {
            character_id: character.id().clone(),
            abilities,
            heroic_level: derived.heroic_level,
            class_levels,
            base_attack_bonus: derived.base_attack_bonus,
            force_sensitive: derived.force_sensitive,
            acquired,
            freebuild: self.freebuild,
            captured_at: self.captured_at.unwrap_or_else(Utc::now),
        }
    }
}
