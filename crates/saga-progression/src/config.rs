//! Configuration for the progression pipeline.
//!
//! Every struct here implements [`Default`] with the documented values and
//! deserializes with `#[serde(default)]`, so a partial JSON document only
//! needs the keys it overrides.

use serde::{Deserialize, Serialize};

use saga_sentinel::sentinel::SentinelConfig;

/// Rule constants used by the Progression Compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Points an ability-increase step must spend, exactly. Default: 2.
    pub ability_increase_points: u32,
    /// Points one ability may receive in a single increase step. Default: 1.
    pub max_increase_per_ability: u32,
    /// Lowest base score accepted by the `abilities` step. Default: 3.
    pub ability_score_min: i32,
    /// Highest base score accepted by the `abilities` step. Default: 18.
    pub ability_score_max: i32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            ability_increase_points: 2,
            max_increase_per_ability: 1,
            ability_score_min: 3,
            ability_score_max: 18,
        }
    }
}

/// Top-level configuration for a [`ProgressionSession`](crate::session::ProgressionSession).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub compiler: CompilerConfig,
    pub sentinel: SentinelConfig,
}

impl ProgressionConfig {
    /// Parse a configuration document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_sentinel::sentinel::SentinelMode;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProgressionConfig::default();
        assert_eq!(config.compiler.ability_increase_points, 2);
        assert_eq!(config.compiler.max_increase_per_ability, 1);
        assert_eq!(config.sentinel.mode, SentinelMode::Development);
        assert_eq!(config.sentinel.expected_derived_recalculations, 1);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = ProgressionConfig::from_json_str(
            r#"{ "compiler": { "ability_increase_points": 3 }, "sentinel": { "mode": "production" } }"#,
        )
        .unwrap();
        assert_eq!(config.compiler.ability_increase_points, 3);
        assert_eq!(config.compiler.ability_score_max, 18);
        assert_eq!(config.sentinel.mode, SentinelMode::Production);
        assert_eq!(config.sentinel.max_reports, 500);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(
            ProgressionConfig::from_json_str("{}").unwrap(),
            ProgressionConfig::default()
        );
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(ProgressionConfig::from_json_str(r#"{ "compiler": 5 }"#).is_err());
    }
}
