//! Frozen rule tables.
//!
//! Some prestige prerequisites are irreducible combinations: "two talents
//! from the Jedi Consular, Jedi Guardian or Jedi Sentinel talent trees"
//! cannot be split on its commas, and "Martial Arts I or Point Blank Shot" is
//! an alternative rather than two conjunctive parts. Such phrases are matched
//! whole against a curated table that is built once, on first use, and is
//! read-only afterwards.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Serialize;

use saga_core::character::Collection;

use crate::prereq::PrerequisiteRule;

/// One term of a prestige combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "term", rename_all = "snake_case")]
pub enum CombinationTerm {
    /// An ordinary atomic rule.
    Rule { rule: PrerequisiteRule },
    /// At least `count` talents drawn from any of the named trees.
    TalentsFromTrees {
        trees: Vec<&'static str>,
        count: usize,
    },
    /// At least `count` entries in a collection.
    CollectionCount {
        collection: Collection,
        count: usize,
    },
    /// Any one of the alternatives.
    AnyOf { terms: Vec<CombinationTerm> },
}

/// A curated compound requirement. All terms must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrestigeCombination {
    /// Normalized requirement text this entry matches.
    pub key: String,
    /// Human-readable form used in failure descriptions.
    pub label: &'static str,
    pub terms: Vec<CombinationTerm>,
}

/// The process-wide table set.
#[derive(Debug)]
pub struct RuleTables {
    combinations: BTreeMap<String, PrestigeCombination>,
}

impl RuleTables {
    /// Exact match of a whole requirement string.
    pub fn combination(&self, text: &str) -> Option<&PrestigeCombination> {
        self.combinations.get(&normalize(text))
    }

    /// Pull every table entry embedded in a longer requirement string out
    /// of it. Longer entries are extracted first so an entry never claims
    /// text that belongs to a longer one containing it. Returns the entries
    /// found and the canonical remainder, with each match replaced by a
    /// separator.
    pub fn extract_embedded(&self, text: &str) -> (Vec<&PrestigeCombination>, String) {
        let mut by_length: Vec<&PrestigeCombination> = self.combinations.values().collect();
        by_length.sort_by(|a, b| b.key.len().cmp(&a.key.len()).then(a.key.cmp(&b.key)));

        let mut remaining = canonical(text);
        let mut found = Vec::new();
        for combination in by_length {
            let mut matched = false;
            while let Some(pos) = remaining.to_ascii_lowercase().find(combination.key.as_str()) {
                remaining.replace_range(pos..pos + combination.key.len(), ",");
                matched = true;
            }
            if matched {
                found.push(combination);
            }
        }
        (found, remaining)
    }

    pub fn combinations(&self) -> impl Iterator<Item = &PrestigeCombination> {
        self.combinations.values()
    }
}

/// Collapse whitespace, drop Oxford commas and a trailing period. Case is
/// kept, so byte offsets line up with [`normalize`].
pub fn canonical(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for joiner in [", or ", ", and "] {
        while let Some(pos) = out.to_ascii_lowercase().find(joiner) {
            out.remove(pos);
        }
    }
    out.trim_end_matches('.').trim_end().to_owned()
}

/// [`canonical`] text, ASCII-lowercased. Table keys are stored in this form.
pub fn normalize(text: &str) -> String {
    canonical(text).to_ascii_lowercase()
}

/// The frozen tables, built on first access.
pub fn rule_tables() -> &'static RuleTables {
    static TABLES: OnceLock<RuleTables> = OnceLock::new();
    TABLES.get_or_init(build_tables)
}

const FORCE_TALENT_TREES: [&str; 4] = ["Alter", "Control", "Sense", "Dark Side"];

fn feat(name: &str) -> CombinationTerm {
    CombinationTerm::Rule {
        rule: PrerequisiteRule::FeatPossession {
            feat: name.to_owned(),
        },
    }
}

fn build_tables() -> RuleTables {
    let entries = [
        PrestigeCombination {
            key: normalize("two talents from the Jedi Consular, Jedi Guardian or Jedi Sentinel talent trees"),
            label: "two Jedi Consular, Guardian or Sentinel talents",
            terms: vec![CombinationTerm::TalentsFromTrees {
                trees: vec!["Jedi Consular", "Jedi Guardian", "Jedi Sentinel"],
                count: 2,
            }],
        },
        PrestigeCombination {
            key: normalize("any three Force talents"),
            label: "three Force talents",
            terms: vec![CombinationTerm::TalentsFromTrees {
                trees: FORCE_TALENT_TREES.to_vec(),
                count: 3,
            }],
        },
        PrestigeCombination {
            key: normalize("any one Dark Side talent"),
            label: "one Dark Side talent",
            terms: vec![CombinationTerm::TalentsFromTrees {
                trees: vec!["Dark Side"],
                count: 1,
            }],
        },
        PrestigeCombination {
            key: normalize("at least one Force Technique"),
            label: "one Force technique",
            terms: vec![CombinationTerm::CollectionCount {
                collection: Collection::ForceTechniques,
                count: 1,
            }],
        },
        PrestigeCombination {
            key: normalize("Martial Arts I or Point Blank Shot"),
            label: "Martial Arts I or Point Blank Shot",
            terms: vec![CombinationTerm::AnyOf {
                terms: vec![feat("Martial Arts I"), feat("Point Blank Shot")],
            }],
        },
        PrestigeCombination {
            key: normalize(
                "Base Attack Bonus +7, Armor Proficiency (Medium), Martial Arts I or Point Blank Shot, \
                 Weapon Proficiency (Heavy Weapons) or Weapon Proficiency (Rifles)",
            ),
            label: "Elite Trooper qualification",
            terms: vec![
                CombinationTerm::Rule {
                    rule: PrerequisiteRule::BaseAttackBonus { minimum: 7 },
                },
                feat("Armor Proficiency (Medium)"),
                CombinationTerm::AnyOf {
                    terms: vec![feat("Martial Arts I"), feat("Point Blank Shot")],
                },
                CombinationTerm::AnyOf {
                    terms: vec![
                        feat("Weapon Proficiency (Heavy Weapons)"),
                        feat("Weapon Proficiency (Rifles)"),
                    ],
                },
            ],
        },
    ];

    RuleTables {
        combinations: entries.into_iter().map(|c| (c.key.clone(), c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_built_once() {
        let a = rule_tables() as *const RuleTables;
        let b = rule_tables() as *const RuleTables;
        assert_eq!(a, b);
    }

    #[test]
    fn whole_string_match_ignores_case_spacing_and_oxford_comma() {
        let found = rule_tables().combination(
            "Two talents from the  Jedi Consular, Jedi Guardian, or Jedi Sentinel talent trees.",
        );
        assert_eq!(found.unwrap().label, "two Jedi Consular, Guardian or Sentinel talents");
    }

    #[test]
    fn embedded_phrases_are_extracted_longest_first() {
        let (found, remaining) = rule_tables().extract_embedded(
            "Character Level 7, Trained in Use the Force, any three Force talents, at least one Force Technique",
        );
        let labels: Vec<_> = found.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["one Force technique", "three Force talents"]);
        assert_eq!(remaining, "Character Level 7, Trained in Use the Force, ,, ,");
    }

    #[test]
    fn shorter_entry_inside_a_longer_one_is_not_double_counted() {
        let (found, _) = rule_tables().extract_embedded(
            "Base Attack Bonus +7, Armor Proficiency (Medium), Martial Arts I or Point Blank Shot, \
             Weapon Proficiency (Heavy Weapons) or Weapon Proficiency (Rifles), Trained in Perception",
        );
        let labels: Vec<_> = found.iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["Elite Trooper qualification"]);
    }

    #[test]
    fn canonical_keeps_case() {
        assert_eq!(canonical("  Dodge,  or  Mobility. "), "Dodge or Mobility");
        assert_eq!(normalize("Dodge, or Mobility"), "dodge or mobility");
    }

    #[test]
    fn unknown_text_has_no_combination() {
        assert!(rule_tables().combination("Str 13").is_none());
        assert!(rule_tables().extract_embedded("Str 13, Dodge").0.is_empty());
    }
}
