//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use saga_core::prelude::*;
use saga_progression::prelude::*;
use saga_sentinel::prelude::*;

const CATALOG_JSON: &str = include_str!("../fixtures/catalog.json");

pub fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::from_json_str(CATALOG_JSON).expect("fixture catalog parses"))
}

pub fn compiler() -> ProgressionCompiler {
    ProgressionCompiler::new(catalog(), CompilerConfig::default())
}

/// Route `tracing` output to the test harness. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn session() -> ProgressionSession {
    init_tracing();
    ProgressionSession::new(catalog(), ProgressionConfig::default())
}

pub fn session_in(mode: SentinelMode) -> ProgressionSession {
    let config = ProgressionConfig {
        sentinel: SentinelConfig {
            mode,
            ..SentinelConfig::default()
        },
        ..ProgressionConfig::default()
    };
    init_tracing();
    ProgressionSession::new(catalog(), config)
}

pub fn class(id: &str, name: &str, levels: u32, base_attack: BaseAttackProgression) -> ClassEntry {
    ClassEntry {
        id: id.to_owned(),
        name: name.to_owned(),
        levels,
        freeform: false,
        base_attack,
        defense_bonuses: Default::default(),
        grants_force_sensitivity: false,
    }
}

/// A fourth-level soldier with middling scores.
pub fn level_four_soldier() -> Character {
    Character::builder("level-four")
        .name("Tarn")
        .ability(Ability::Str, 12)
        .ability(Ability::Dex, 14)
        .ability(Ability::Con, 12)
        .ability(Ability::Int, 10)
        .ability(Ability::Wis, 12)
        .ability(Ability::Cha, 8)
        .class(class("soldier", "Soldier", 4, BaseAttackProgression::Full))
        .build()
        .expect("fixture character builds")
}

/// Every error-or-worse report the sentinel retained.
pub fn hard_findings(session: &ProgressionSession) -> Vec<SentinelReport> {
    session.sentinel().get_reports(None, Some(Severity::Error))
}
