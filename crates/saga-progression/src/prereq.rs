//! The Prerequisite Checker.
//!
//! [`PrerequisiteChecker::check`] is the one place prerequisites are
//! evaluated. Feats, talents, Force options, classes and prestige classes all
//! route through it. It is a pure function of a [`Snapshot`] and the catalog:
//! no side effects, no retries.
//!
//! # Requirement text
//!
//! Catalog items carry compound requirement strings such as
//! `"Str 13, Base Attack Bonus +1, Trained in Use the Force"`. Parsing:
//!
//! 1. The whole string is matched against the frozen prestige-combination
//!    table ([`rule_tables`]).
//! 2. Otherwise table phrases embedded in the string are extracted, and the
//!    remainder is split on `,` and `;` into conjunctive parts.
//! 3. Each part becomes one [`PrerequisiteRule`]. Text that matches nothing
//!    becomes [`PrerequisiteRule::Unrecognized`], which is never met.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use saga_core::prelude::*;
//! use saga_progression::catalog::{CatalogItem, ItemKind, StaticCatalog};
//! use saga_progression::prereq::PrerequisiteChecker;
//!
//! let catalog = StaticCatalog::from_items([
//!     CatalogItem::new("power-attack", "Power Attack", ItemKind::Feat).with_prerequisites("Str 13"),
//! ]).unwrap();
//! let checker = PrerequisiteChecker::new(Arc::new(catalog));
//!
//! let character = Character::builder("c1").ability(Ability::Str, 12).build().unwrap();
//! let result = checker.check(&SnapshotBuilder::new(&character).build(), ItemKind::Feat, "power-attack");
//! assert!(!result.met);
//! assert_eq!(result.missing[0].description, "Strength 13 (current 12)");
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use saga_core::ability::Ability;
use saga_core::character::Collection;
use saga_core::snapshot::Snapshot;

use crate::catalog::{Catalog, ItemKind};
use crate::tables::{rule_tables, CombinationTerm, PrestigeCombination};

// ---------------------------------------------------------------------------
// Rules and results
// ---------------------------------------------------------------------------

/// One structured condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PrerequisiteRule {
    Ability { ability: Ability, minimum: i32 },
    BaseAttackBonus { minimum: i32 },
    CharacterLevel { minimum: u32 },
    ClassLevel { class: String, minimum: u32 },
    SkillTrained { skill: String },
    ForceSensitivity,
    FeatPossession { feat: String },
    TalentPossession { talent: String },
    /// A curated prestige-combination table entry, by key.
    PrestigeCombination { key: String },
    /// Text no parser understood. Never met.
    Unrecognized { text: String },
}

impl fmt::Display for PrerequisiteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrerequisiteRule::Ability { ability, minimum } => write!(f, "{ability} {minimum}"),
            PrerequisiteRule::BaseAttackBonus { minimum } => {
                write!(f, "Base Attack Bonus {minimum:+}")
            }
            PrerequisiteRule::CharacterLevel { minimum } => write!(f, "Character Level {minimum}"),
            PrerequisiteRule::ClassLevel { class, minimum } => write!(f, "{class} {minimum}"),
            PrerequisiteRule::SkillTrained { skill } => write!(f, "Trained in {skill}"),
            PrerequisiteRule::ForceSensitivity => f.write_str("Force Sensitivity"),
            PrerequisiteRule::FeatPossession { feat } => f.write_str(feat),
            PrerequisiteRule::TalentPossession { talent } => f.write_str(talent),
            PrerequisiteRule::PrestigeCombination { key } => match rule_tables().combination(key)
            {
                Some(combination) => f.write_str(combination.label),
                None => f.write_str(key),
            },
            PrerequisiteRule::Unrecognized { text } => write!(f, "unrecognized requirement: {text}"),
        }
    }
}

/// One unmet requirement, with enough detail to drive a retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRequirement {
    /// What is required, e.g. `"Strength 13"`.
    pub requirement: String,
    /// What the character has, e.g. `"12"`.
    pub current: String,
    /// `"<requirement> (current <current>)"`.
    pub description: String,
}

impl MissingRequirement {
    pub fn new(requirement: impl Into<String>, current: impl Into<String>) -> Self {
        let requirement = requirement.into();
        let current = current.into();
        let description = format!("{requirement} (current {current})");
        Self {
            requirement,
            current,
            description,
        }
    }
}

/// How one parsed part fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: PrerequisiteRule,
    pub met: bool,
}

/// Aggregate result of a check. Met only if every part is met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteResult {
    pub met: bool,
    pub missing: Vec<MissingRequirement>,
    pub details: Vec<RuleOutcome>,
}

impl PrerequisiteResult {
    fn satisfied() -> Self {
        Self {
            met: true,
            missing: Vec::new(),
            details: Vec::new(),
        }
    }

    fn from_outcomes(outcomes: Vec<(RuleOutcome, Option<MissingRequirement>)>) -> Self {
        let mut result = Self::satisfied();
        for (outcome, missing) in outcomes {
            result.met &= outcome.met;
            result.missing.extend(missing);
            result.details.push(outcome);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// PrerequisiteChecker
// ---------------------------------------------------------------------------

/// Evaluates catalog prerequisites against snapshots.
#[derive(Clone)]
pub struct PrerequisiteChecker {
    catalog: Arc<dyn Catalog>,
}

impl PrerequisiteChecker {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Check whether the snapshot meets the prerequisites of a catalog item.
    ///
    /// An item the catalog does not know is reported as not met.
    pub fn check(&self, snapshot: &Snapshot, kind: ItemKind, target_id: &str) -> PrerequisiteResult {
        let Some(item) = self.catalog.lookup(kind, target_id) else {
            debug!(kind = %kind, target = target_id, "prerequisite target not in catalog");
            return PrerequisiteResult {
                met: false,
                missing: vec![MissingRequirement::new(
                    format!("a {kind} known to the catalog"),
                    format!("unknown {kind} '{target_id}'"),
                )],
                details: Vec::new(),
            };
        };
        let mut rules = item
            .prerequisites
            .as_deref()
            .map(|text| self.parse(text))
            .unwrap_or_default();
        // A prestige class is never a character's first class.
        let prestige = item.class.as_ref().is_some_and(|class| class.prestige);
        if prestige
            && snapshot.heroic_level() == 0
            && !rules
                .iter()
                .any(|rule| matches!(rule, PrerequisiteRule::CharacterLevel { .. }))
        {
            rules.insert(0, PrerequisiteRule::CharacterLevel { minimum: 1 });
        }
        self.evaluate(snapshot, rules)
    }

    /// Check a compound requirement string directly.
    pub fn check_requirements(&self, snapshot: &Snapshot, text: &str) -> PrerequisiteResult {
        self.evaluate(snapshot, self.parse(text))
    }

    fn evaluate(&self, snapshot: &Snapshot, rules: Vec<PrerequisiteRule>) -> PrerequisiteResult {
        let outcomes = rules
            .into_iter()
            .map(|rule| {
                let missing = self.check_rule(snapshot, &rule).err();
                (
                    RuleOutcome {
                        met: missing.is_none(),
                        rule,
                    },
                    missing,
                )
            })
            .collect();
        PrerequisiteResult::from_outcomes(outcomes)
    }

    /// Parse a compound requirement string into conjunctive rules.
    pub fn parse(&self, text: &str) -> Vec<PrerequisiteRule> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let tables = rule_tables();
        if let Some(combination) = tables.combination(text) {
            return vec![PrerequisiteRule::PrestigeCombination {
                key: combination.key.clone(),
            }];
        }

        let (embedded, remaining) = tables.extract_embedded(text);
        let mut rules: Vec<PrerequisiteRule> = remaining
            .split([',', ';'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| self.parse_part(part))
            .collect();
        rules.extend(
            embedded
                .into_iter()
                .map(|combination| PrerequisiteRule::PrestigeCombination {
                    key: combination.key.clone(),
                }),
        );
        rules
    }

    /// Evaluate one rule. `Err` carries the unmet requirement.
    pub fn check_rule(
        &self,
        snapshot: &Snapshot,
        rule: &PrerequisiteRule,
    ) -> Result<(), MissingRequirement> {
        let missing = |current: String| -> Result<(), MissingRequirement> {
            Err(MissingRequirement::new(rule.to_string(), current))
        };
        match rule {
            PrerequisiteRule::Ability { ability, minimum } => {
                let total = snapshot.ability(*ability).total;
                if total >= *minimum {
                    Ok(())
                } else {
                    missing(total.to_string())
                }
            }
            PrerequisiteRule::BaseAttackBonus { minimum } => {
                let bab = snapshot.base_attack_bonus();
                if bab >= *minimum {
                    Ok(())
                } else {
                    missing(format!("{bab:+}"))
                }
            }
            PrerequisiteRule::CharacterLevel { minimum } => {
                let level = snapshot.heroic_level();
                if level >= *minimum {
                    Ok(())
                } else {
                    missing(level.to_string())
                }
            }
            PrerequisiteRule::ClassLevel { class, minimum } => {
                let levels = snapshot.class_level(class);
                if levels >= *minimum {
                    Ok(())
                } else {
                    missing(levels.to_string())
                }
            }
            PrerequisiteRule::SkillTrained { skill } => {
                if snapshot.is_trained(skill) {
                    Ok(())
                } else {
                    missing("untrained".to_owned())
                }
            }
            PrerequisiteRule::ForceSensitivity => {
                if snapshot.force_sensitive() {
                    Ok(())
                } else {
                    missing("not Force-sensitive".to_owned())
                }
            }
            PrerequisiteRule::FeatPossession { feat } => {
                if snapshot.has_item(Collection::Feats, feat) {
                    Ok(())
                } else {
                    missing("not acquired".to_owned())
                }
            }
            PrerequisiteRule::TalentPossession { talent } => {
                if snapshot.has_item(Collection::Talents, talent) {
                    Ok(())
                } else {
                    missing("not acquired".to_owned())
                }
            }
            PrerequisiteRule::PrestigeCombination { key } => {
                match rule_tables().combination(key) {
                    Some(combination) => self.check_combination(snapshot, combination),
                    None => missing("no such combination".to_owned()),
                }
            }
            PrerequisiteRule::Unrecognized { text } => {
                debug!(requirement = %text, "unrecognized requirement treated as not met");
                missing("unmodeled".to_owned())
            }
        }
    }

    // -- parsing ------------------------------------------------------------

    fn parse_part(&self, part: &str) -> PrerequisiteRule {
        if let Some(combination) = rule_tables().combination(part) {
            return PrerequisiteRule::PrestigeCombination {
                key: combination.key.clone(),
            };
        }
        if let Some(name) = strip_prefix_ignore_case(part, "feat:") {
            return PrerequisiteRule::FeatPossession {
                feat: self.canonical_name(ItemKind::Feat, name),
            };
        }
        if let Some(name) = strip_prefix_ignore_case(part, "talent:") {
            return PrerequisiteRule::TalentPossession {
                talent: self.canonical_name(ItemKind::Talent, name),
            };
        }
        if part.eq_ignore_ascii_case("force sensitivity") || part.eq_ignore_ascii_case("force sensitive")
        {
            return PrerequisiteRule::ForceSensitivity;
        }
        if let Some(skill) = strip_prefix_ignore_case(part, "trained in ") {
            return PrerequisiteRule::SkillTrained {
                skill: self.canonical_name(ItemKind::Skill, skill),
            };
        }
        if let Some(rule) = self.parse_threshold(part) {
            return rule;
        }
        if let Some(feat) = self.catalog.lookup(ItemKind::Feat, part) {
            return PrerequisiteRule::FeatPossession {
                feat: feat.name.clone(),
            };
        }
        if let Some(talent) = self.catalog.lookup(ItemKind::Talent, part) {
            return PrerequisiteRule::TalentPossession {
                talent: talent.name.clone(),
            };
        }
        PrerequisiteRule::Unrecognized {
            text: part.to_owned(),
        }
    }

    /// `<subject> <number>`: abilities, base attack bonus, character level
    /// and class levels.
    fn parse_threshold(&self, part: &str) -> Option<PrerequisiteRule> {
        let (subject, number) = part.rsplit_once(' ')?;
        let value: i32 = number.trim_matches('+').parse().ok()?;
        let subject = subject.trim();

        if let Some(ability) = Ability::parse(subject) {
            return Some(PrerequisiteRule::Ability {
                ability,
                minimum: value,
            });
        }
        let lowered = subject.to_ascii_lowercase();
        match lowered.as_str() {
            "base attack bonus" | "bab" => {
                return Some(PrerequisiteRule::BaseAttackBonus { minimum: value })
            }
            "character level" | "heroic level" | "level" => {
                return Some(PrerequisiteRule::CharacterLevel {
                    minimum: u32::try_from(value).ok()?,
                })
            }
            _ => {}
        }
        let class_key = strip_suffix_ignore_case(subject, " level").unwrap_or(subject);
        let class = self.catalog.lookup(ItemKind::Class, class_key)?;
        Some(PrerequisiteRule::ClassLevel {
            class: class.name.clone(),
            minimum: u32::try_from(value).ok()?,
        })
    }

    fn canonical_name(&self, kind: ItemKind, name: &str) -> String {
        let name = name.trim();
        self.catalog
            .lookup(kind, name)
            .map(|item| item.name.clone())
            .unwrap_or_else(|| name.to_owned())
    }

    // -- combinations -------------------------------------------------------

    fn check_combination(
        &self,
        snapshot: &Snapshot,
        combination: &PrestigeCombination,
    ) -> Result<(), MissingRequirement> {
        let shortfalls: Vec<String> = combination
            .terms
            .iter()
            .filter_map(|term| self.check_term(snapshot, term).err())
            .collect();
        if shortfalls.is_empty() {
            Ok(())
        } else {
            Err(MissingRequirement::new(combination.label, shortfalls.join("; ")))
        }
    }

    /// `Err` describes what the snapshot has for the failed term.
    fn check_term(&self, snapshot: &Snapshot, term: &CombinationTerm) -> Result<(), String> {
        match term {
            CombinationTerm::Rule { rule } => self
                .check_rule(snapshot, rule)
                .map_err(|missing| missing.description),
            CombinationTerm::TalentsFromTrees { trees, count } => {
                let held = snapshot.talents_in_trees(trees);
                if held >= *count {
                    Ok(())
                } else {
                    Err(format!(
                        "{held} of {count} talents from {}",
                        trees.join(", ")
                    ))
                }
            }
            CombinationTerm::CollectionCount { collection, count } => {
                let held = snapshot.count(*collection);
                if held >= *count {
                    Ok(())
                } else {
                    Err(format!("{held} of {count} {collection}"))
                }
            }
            CombinationTerm::AnyOf { terms } => {
                let mut failures = Vec::with_capacity(terms.len());
                for alternative in terms {
                    match self.check_term(snapshot, alternative) {
                        Ok(()) => return Ok(()),
                        Err(failure) => failures.push(failure),
                    }
                }
                Err(format!("none of: {}", failures.join(" / ")))
            }
        }
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| text[prefix.len()..].trim())
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    let tail = text.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| text[..split].trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
