//! Walk one character through creation and a level-up, then print the
//! sentinel diagnostics as JSON.
//!
//! Run with: `cargo run -p saga-progression --example walkthrough [config.json]`
//!
//! The optional argument is a `ProgressionConfig` JSON document. Set
//! `RUST_LOG=debug` to see every compile and transaction.

use std::sync::Arc;

use anyhow::Context;
use saga_core::prelude::*;
use saga_progression::prelude::*;

const CATALOG_JSON: &str = include_str!("../tests/fixtures/catalog.json");

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            ProgressionConfig::from_json_str(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => ProgressionConfig::default(),
    };
    let catalog = StaticCatalog::from_json_str(CATALOG_JSON).context("loading catalog")?;
    let session = ProgressionSession::new(Arc::new(catalog), config);

    let mut kira = Character::builder("kira").name("Kira").build()?;
    let creation = [
        (StepId::Species, Selections::catalog("Twi'lek")),
        (StepId::Background, Selections::catalog("Spacer")),
        (
            StepId::Abilities,
            Selections::ability_scores([
                (Ability::Str, 10),
                (Ability::Dex, 14),
                (Ability::Con, 12),
                (Ability::Int, 13),
                (Ability::Wis, 15),
                (Ability::Cha, 12),
            ]),
        ),
        (StepId::Class, Selections::catalog("Jedi")),
        (StepId::Skills, Selections::skills(["Use the Force", "Perception"])),
        (StepId::Feats, Selections::feats(["Force Training"])),
        (StepId::Talents, Selections::talents(["Block"])),
        (StepId::ForcePowers, Selections::force_powers(["Move Object", "Mind Trick"])),
    ];
    for (step, selections) in &creation {
        session.advance(&mut kira, *step, selections, CompileOptions::default())?;
    }

    // A level-up attempt that fails shows the per-item detail.
    if let Err(err) = session.advance(
        &mut kira,
        StepId::Talents,
        &Selections::talents(["Block", "Deflect"]),
        CompileOptions::default(),
    ) {
        if let Some(failure) = err.validation() {
            for item in &failure.items {
                for missing in &item.missing {
                    println!("{}: {}", item.name, missing.description);
                }
            }
        }
    }
    session.advance(&mut kira, StepId::Class, &Selections::catalog("Jedi"), CompileOptions::default())?;
    session.advance(&mut kira, StepId::Talents, &Selections::talents(["Deflect"]), CompileOptions::default())?;

    println!(
        "{} is level {} with BAB +{} (state {})",
        kira.name(),
        kira.derived().heroic_level,
        kira.derived().base_attack_bonus,
        kira.state_hash()
    );
    println!("{}", serde_json::to_string_pretty(&session.diagnostics())?);
    Ok(())
}
