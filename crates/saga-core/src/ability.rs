//! The six ability scores and their name aliases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// One of the six ability scores.
///
/// Serialized as the lowercase three-letter abbreviation (`"str"`, `"dex"`,
/// ...), which is also the segment used in field paths such as
/// `abilities.wis.base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Str,
    Dex,
    Con,
    Int,
    Wis,
    Cha,
}

impl Ability {
    /// All abilities in canonical order.
    pub const ALL: [Ability; 6] = [
        Ability::Str,
        Ability::Dex,
        Ability::Con,
        Ability::Int,
        Ability::Wis,
        Ability::Cha,
    ];

    /// Lowercase three-letter abbreviation (`"str"`).
    pub fn abbreviation(self) -> &'static str {
        match self {
            Ability::Str => "str",
            Ability::Dex => "dex",
            Ability::Con => "con",
            Ability::Int => "int",
            Ability::Wis => "wis",
            Ability::Cha => "cha",
        }
    }

    /// Human-readable name (`"Strength"`).
    pub fn full_name(self) -> &'static str {
        match self {
            Ability::Str => "Strength",
            Ability::Dex => "Dexterity",
            Ability::Con => "Constitution",
            Ability::Int => "Intelligence",
            Ability::Wis => "Wisdom",
            Ability::Cha => "Charisma",
        }
    }

    /// Parse an abbreviation or full name, case-insensitively.
    pub fn parse(name: &str) -> Option<Ability> {
        let lowered = name.trim().to_ascii_lowercase();
        Ability::ALL
            .into_iter()
            .find(|a| a.abbreviation() == lowered || a.full_name().eq_ignore_ascii_case(&lowered))
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name())
    }
}

impl FromStr for Ability {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ability::parse(s).ok_or_else(|| CoreError::UnknownAbility {
            name: s.to_owned(),
        })
    }
}
