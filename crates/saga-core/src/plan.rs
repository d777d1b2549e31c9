//! Mutation plans: pure-data descriptions of a state change.
//!
//! A [`MutationPlan`] (also called a delta) has three parts:
//!
//! - `set`: field path → JSON value, applied as direct overwrites.
//! - `add`: collection → entries, appended with a uniqueness check.
//! - `delete`: collection → ids, removed together with every modifier
//!   attributed to the removed entry.
//!
//! A plan has no effect until the
//! [`MutationAuthority`](crate::authority::MutationAuthority) applies it.
//! Values are stored as [`serde_json::Value`] so that plans can cross the
//! boundary to an external persistence layer unchanged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::character::{CharacterId, Collection, CollectionEntry, FieldPath};
use crate::event::TransactionId;

// ---------------------------------------------------------------------------
// StructuralFailure
// ---------------------------------------------------------------------------

/// A plan that cannot be applied as written, or a transaction that cannot be
/// opened. Always fatal to the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralFailure {
    #[error("unknown field path '{path}'")]
    UnknownField { path: String },

    #[error("invalid value for '{path}': {details}")]
    InvalidValue { path: String, details: String },

    #[error("duplicate entry '{id}' in {collection}")]
    DuplicateEntry { collection: Collection, id: String },

    #[error("no entry '{id}' in {collection}")]
    MissingEntry { collection: Collection, id: String },

    #[error("entry '{id}' in {collection} is both added and deleted by one plan")]
    ConflictingOperations { collection: Collection, id: String },

    #[error("nested mutation: transaction {open} is still open for character {character}")]
    NestedTransaction {
        character: CharacterId,
        open: TransactionId,
    },

    #[error("transaction is scoped to character {expected}, not {actual}")]
    CharacterMismatch {
        expected: CharacterId,
        actual: CharacterId,
    },
}

// ---------------------------------------------------------------------------
// MutationPlan
// ---------------------------------------------------------------------------

/// The `{set, add, delete}` delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    #[serde(default)]
    pub set: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub add: BTreeMap<Collection, Vec<CollectionEntry>>,
    #[serde(default)]
    pub delete: BTreeMap<Collection, Vec<String>>,
}

impl MutationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.add.values().all(Vec::is_empty)
            && self.delete.values().all(Vec::is_empty)
    }

    /// Number of raw writes the plan performs (one per set field, added entry
    /// and deleted id).
    pub fn mutation_count(&self) -> usize {
        self.set.len()
            + self.add.values().map(Vec::len).sum::<usize>()
            + self.delete.values().map(Vec::len).sum::<usize>()
    }

    pub fn set_field(&mut self, field: &FieldPath, value: serde_json::Value) -> &mut Self {
        self.set.insert(field.to_string(), value);
        self
    }

    pub fn add_entry(&mut self, collection: Collection, entry: CollectionEntry) -> &mut Self {
        self.add.entry(collection).or_default().push(entry);
        self
    }

    pub fn delete_entry(&mut self, collection: Collection, id: impl Into<String>) -> &mut Self {
        self.delete.entry(collection).or_default().push(id.into());
        self
    }

    /// Ids added to one collection, in plan order.
    pub fn added_ids(&self, collection: Collection) -> Vec<&str> {
        self.add
            .get(&collection)
            .map(|entries| entries.iter().map(|e| e.id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Sort every `add` and `delete` list by id and drop empty lists, so that
    /// plans built from permuted inputs compare equal.
    pub fn canonicalize(&mut self) {
        for entries in self.add.values_mut() {
            entries.sort_by(|a, b| a.id.cmp(&b.id));
        }
        for ids in self.delete.values_mut() {
            ids.sort();
        }
        self.add.retain(|_, entries| !entries.is_empty());
        self.delete.retain(|_, ids| !ids.is_empty());
    }

    /// Shape checks that need no character: no id added twice, no id both
    /// added and deleted.
    pub fn check_shape(&self) -> Result<(), StructuralFailure> {
        for (collection, entries) in &self.add {
            let mut seen = BTreeSet::new();
            for entry in entries {
                if !seen.insert(entry.id.as_str()) {
                    return Err(StructuralFailure::DuplicateEntry {
                        collection: *collection,
                        id: entry.id.clone(),
                    });
                }
            }
            if let Some(deleted) = self.delete.get(collection) {
                if let Some(id) = deleted.iter().find(|id| seen.contains(id.as_str())) {
                    return Err(StructuralFailure::ConflictingOperations {
                        collection: *collection,
                        id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::Ability;

    #[test]
    fn mutation_count_counts_every_write() {
        let mut plan = MutationPlan::new();
        plan.set_field(&FieldPath::AbilityBase(Ability::Wis), serde_json::json!(14))
            .add_entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"))
            .add_entry(Collection::Feats, CollectionEntry::new("toughness", "Toughness"))
            .delete_entry(Collection::Skills, "stealth");
        assert_eq!(plan.mutation_count(), 4);
        assert!(!plan.is_empty());
        assert!(plan.set.contains_key("abilities.wis.base"));
    }

    #[test]
    fn canonicalize_sorts_lists_and_drops_empty_ones() {
        let mut a = MutationPlan::new();
        a.add_entry(Collection::Talents, CollectionEntry::new("lightsaber-combat", "Lightsaber Combat"))
            .add_entry(Collection::Talents, CollectionEntry::new("block", "Block"));
        a.delete.insert(Collection::Feats, Vec::new());

        let mut b = MutationPlan::new();
        b.add_entry(Collection::Talents, CollectionEntry::new("block", "Block"))
            .add_entry(Collection::Talents, CollectionEntry::new("lightsaber-combat", "Lightsaber Combat"));

        a.canonicalize();
        b.canonicalize();
        assert_eq!(a, b);
        assert_eq!(a.added_ids(Collection::Talents), vec!["block", "lightsaber-combat"]);
    }

    #[test]
    fn check_shape_rejects_duplicate_additions() {
        let mut plan = MutationPlan::new();
        plan.add_entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"))
            .add_entry(Collection::Feats, CollectionEntry::new("dodge", "Dodge"));
        assert!(matches!(
            plan.check_shape(),
            Err(StructuralFailure::DuplicateEntry { .. })
        ));
    }

    #[test]
    fn check_shape_rejects_add_and_delete_of_same_id() {
        let mut plan = MutationPlan::new();
        plan.add_entry(Collection::Skills, CollectionEntry::new("stealth", "Stealth"))
            .delete_entry(Collection::Skills, "stealth");
        assert!(matches!(
            plan.check_shape(),
            Err(StructuralFailure::ConflictingOperations { .. })
        ));
    }

    #[test]
    fn empty_plan_is_empty() {
        let plan: MutationPlan = serde_json::from_str("{}").unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.mutation_count(), 0);
    }
}
