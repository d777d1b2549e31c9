//! The content catalog contract and an in-memory implementation.
//!
//! Loading compendium content is someone else's job. The progression core
//! only needs to look items up, so it depends on the [`Catalog`] trait.
//! [`StaticCatalog`] is a plain in-memory catalog, loadable from a JSON array
//! of [`CatalogItem`]s.
//!
//! # Example
//!
//! ```
//! use saga_progression::catalog::{Catalog, ItemKind, StaticCatalog};
//!
//! let catalog = StaticCatalog::from_json_str(r#"[
//!     { "id": "power-attack", "name": "Power Attack", "kind": "feat", "prerequisites": "Str 13" }
//! ]"#).unwrap();
//!
//! let by_name = catalog.lookup(ItemKind::Feat, "power attack").unwrap();
//! assert_eq!(by_name.id, "power-attack");
//! assert!(catalog.lookup(ItemKind::Talent, "power-attack").is_none());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use saga_core::ability::Ability;
use saga_core::character::{
    BaseAttackProgression, Collection, CollectionEntry, Defense, ModifierSpec, ModifierTarget,
};

// ---------------------------------------------------------------------------
// ItemKind
// ---------------------------------------------------------------------------

/// What sort of content an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Feat,
    Talent,
    Skill,
    ForcePower,
    ForceTechnique,
    ForceSecret,
    Class,
    Species,
    Background,
}

impl ItemKind {
    pub const ALL: [ItemKind; 9] = [
        ItemKind::Feat,
        ItemKind::Talent,
        ItemKind::Skill,
        ItemKind::ForcePower,
        ItemKind::ForceTechnique,
        ItemKind::ForceSecret,
        ItemKind::Class,
        ItemKind::Species,
        ItemKind::Background,
    ];

    /// The character collection items of this kind are stored in, if any.
    pub fn collection(self) -> Option<Collection> {
        match self {
            ItemKind::Feat => Some(Collection::Feats),
            ItemKind::Talent => Some(Collection::Talents),
            ItemKind::Skill => Some(Collection::Skills),
            ItemKind::ForcePower => Some(Collection::ForcePowers),
            ItemKind::ForceTechnique => Some(Collection::ForceTechniques),
            ItemKind::ForceSecret => Some(Collection::ForceSecrets),
            ItemKind::Class | ItemKind::Species | ItemKind::Background => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Feat => "feat",
            ItemKind::Talent => "talent",
            ItemKind::Skill => "skill",
            ItemKind::ForcePower => "force power",
            ItemKind::ForceTechnique => "force technique",
            ItemKind::ForceSecret => "force secret",
            ItemKind::Class => "class",
            ItemKind::Species => "species",
            ItemKind::Background => "background",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ItemKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['_', '-'], " ");
        ItemKind::ALL
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| CatalogError::UnknownKind {
                kind: s.to_owned(),
            })
    }
}

// ---------------------------------------------------------------------------
// CatalogItem
// ---------------------------------------------------------------------------

/// Progression data carried by class items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassData {
    pub base_attack: BaseAttackProgression,
    #[serde(default)]
    pub defense_bonuses: BTreeMap<Defense, i32>,
    #[serde(default)]
    pub grants_force_sensitivity: bool,
    #[serde(default)]
    pub prestige: bool,
}

impl Default for ClassData {
    fn default() -> Self {
        Self {
            base_attack: BaseAttackProgression::ThreeQuarters,
            defense_bonuses: BTreeMap::new(),
            grants_force_sensitivity: false,
            prestige: false,
        }
    }
}

/// One piece of catalog content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    /// Compound requirement text, e.g. `"Str 13, Base Attack Bonus +1"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerequisites: Option<String>,
    /// Talent tree, for talents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<ModifierSpec>,
    /// Species ability adjustments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ability_adjustments: BTreeMap<Ability, i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ClassData>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            prerequisites: None,
            tree: None,
            modifiers: Vec::new(),
            ability_adjustments: BTreeMap::new(),
            class: None,
        }
    }

    pub fn with_prerequisites(mut self, text: impl Into<String>) -> Self {
        self.prerequisites = Some(text.into());
        self
    }

    pub fn with_tree(mut self, tree: impl Into<String>) -> Self {
        self.tree = Some(tree.into());
        self
    }

    pub fn with_modifier(mut self, target: ModifierTarget, value: i32) -> Self {
        self.modifiers.push(ModifierSpec { target, value });
        self
    }

    pub fn with_ability_adjustment(mut self, ability: Ability, value: i32) -> Self {
        self.ability_adjustments.insert(ability, value);
        self
    }

    pub fn with_class(mut self, class: ClassData) -> Self {
        self.class = Some(class);
        self
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }

    /// The document entry acquiring this item creates.
    pub fn to_entry(&self) -> CollectionEntry {
        CollectionEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            freeform: false,
            tree: self.tree.clone(),
            modifiers: self.modifiers.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog trait
// ---------------------------------------------------------------------------

/// Read-only access to game content.
pub trait Catalog: Send + Sync {
    /// Exact id lookup.
    fn get(&self, kind: ItemKind, id: &str) -> Option<&CatalogItem>;

    /// Case-insensitive name lookup.
    fn find_by_name(&self, kind: ItemKind, name: &str) -> Option<&CatalogItem>;

    /// Every item of a kind, in id order.
    fn items(&self, kind: ItemKind) -> Vec<&CatalogItem>;

    /// Id lookup, falling back to name lookup.
    fn lookup(&self, kind: ItemKind, key: &str) -> Option<&CatalogItem> {
        self.get(kind, key).or_else(|| self.find_by_name(kind, key))
    }
}

/// Errors loading catalog content.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("duplicate {kind} id '{id}'")]
    DuplicateItem { kind: ItemKind, id: String },

    #[error("unknown item kind '{kind}'")]
    UnknownKind { kind: String },
}

// ---------------------------------------------------------------------------
// StaticCatalog
// ---------------------------------------------------------------------------

/// An in-memory catalog keyed by kind and id.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    items: BTreeMap<ItemKind, BTreeMap<String, CatalogItem>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for item in items {
            catalog.insert(item)?;
        }
        Ok(catalog)
    }

    /// Load a JSON array of [`CatalogItem`]s.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let items: Vec<CatalogItem> = serde_json::from_str(json)?;
        Self::from_items(items)
    }

    /// Add one item. Ids are unique per kind.
    pub fn insert(&mut self, item: CatalogItem) -> Result<(), CatalogError> {
        let by_id = self.items.entry(item.kind).or_default();
        if by_id.contains_key(&item.id) {
            return Err(CatalogError::DuplicateItem {
                kind: item.kind,
                id: item.id,
            });
        }
        by_id.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for StaticCatalog {
    fn get(&self, kind: ItemKind, id: &str) -> Option<&CatalogItem> {
        self.items.get(&kind).and_then(|by_id| by_id.get(id))
    }

    fn find_by_name(&self, kind: ItemKind, name: &str) -> Option<&CatalogItem> {
        self.items
            .get(&kind)?
            .values()
            .find(|item| item.matches_name(name))
    }

    fn items(&self, kind: ItemKind) -> Vec<&CatalogItem> {
        self.items
            .get(&kind)
            .map(|by_id| by_id.values().collect())
            .unwrap_or_default()
    }
}

/// A stable id for user-typed content: lowercase ASCII alphanumerics joined
/// by single hyphens.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::from_items([
            CatalogItem::new("block", "Block", ItemKind::Talent).with_tree("Lightsaber Combat"),
            CatalogItem::new("dodge", "Dodge", ItemKind::Feat),
            CatalogItem::new("jedi", "Jedi", ItemKind::Class).with_class(ClassData {
                base_attack: BaseAttackProgression::Full,
                grants_force_sensitivity: true,
                ..ClassData::default()
            }),
        ])
        .unwrap()
    }

    #[test]
    fn lookup_prefers_id_then_name() {
        let c = catalog();
        assert_eq!(c.lookup(ItemKind::Talent, "block").unwrap().name, "Block");
        assert_eq!(c.lookup(ItemKind::Talent, "BLOCK").unwrap().id, "block");
        assert!(c.lookup(ItemKind::Feat, "block").is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected_per_kind() {
        let mut c = catalog();
        let err = c
            .insert(CatalogItem::new("dodge", "Dodge Again", ItemKind::Feat))
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateItem { kind: ItemKind::Feat, .. }));
        // Same id under another kind is fine.
        c.insert(CatalogItem::new("dodge", "Dodge", ItemKind::Talent))
            .unwrap();
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn entry_carries_tree_and_modifiers() {
        let item = CatalogItem::new("toughness", "Toughness", ItemKind::Feat)
            .with_modifier(ModifierTarget::Defense(Defense::Fortitude), 2);
        let entry = item.to_entry();
        assert_eq!(entry.modifiers.len(), 1);
        assert!(!entry.freeform);
    }

    #[test]
    fn kinds_parse_from_labels() {
        assert_eq!("force-power".parse::<ItemKind>().unwrap(), ItemKind::ForcePower);
        assert_eq!("Talent".parse::<ItemKind>().unwrap(), ItemKind::Talent);
        assert!("vehicle".parse::<ItemKind>().is_err());
        assert_eq!(ItemKind::Class.collection(), None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            StaticCatalog::from_json_str("{"),
            Err(CatalogError::Malformed(_))
        ));
    }

    #[test]
    fn slugs_are_stable() {
        assert_eq!(slug("  Sabacc Champion! "), "sabacc-champion");
        assert_eq!(slug("Weapon Focus (Rifles)"), "weapon-focus-rifles");
    }
}
