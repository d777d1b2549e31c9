//! Acceptance scenarios for the compile-then-apply pipeline.

mod common;

use saga_core::prelude::*;
use saga_progression::prelude::*;
use saga_sentinel::prelude::*;
use serde_json::json;

use common::{compiler, level_four_soldier, session};

fn validation(err: CompileError) -> ValidationFailure {
    match err {
        CompileError::Validation(failure) => failure,
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

// -- A: unmet ability prerequisite ----------------------------------------

#[test]
fn power_attack_with_strength_12_lists_strength_13() {
    let character = Character::builder("scenario-a")
        .ability(Ability::Str, 12)
        .build()
        .unwrap();
    let snapshot = SnapshotBuilder::new(&character).build();
    assert_eq!(snapshot.ability(Ability::Str).total, 12);
    assert_eq!(snapshot.ability(Ability::Str).modifier, 1);

    let err = compiler()
        .compile_step(
            &snapshot,
            StepId::Feats,
            &Selections::feats(["power-attack"]),
            CompileOptions::default(),
        )
        .unwrap_err();

    let failure = validation(err);
    assert_eq!(failure.step, StepId::Feats);
    assert_eq!(failure.failed_ids(), vec!["power-attack"]);
    let missing = &failure.items[0].missing;
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].requirement, "Strength 13");
    assert_eq!(missing[0].current, "12");
}

// -- B: ability increase at level 4 ---------------------------------------

#[test]
fn level_four_increase_updates_scores_and_recompiles_identically() {
    let character = level_four_soldier();
    let snapshot = SnapshotBuilder::new(&character).build();
    let selections = Selections::ability_increases([(Ability::Wis, 1), (Ability::Dex, 1)]);
    let compiler = compiler();

    let first = compiler
        .compile_step(&snapshot, StepId::AbilityIncrease, &selections, CompileOptions::default())
        .unwrap();
    let second = compiler
        .compile_step(&snapshot, StepId::AbilityIncrease, &selections, CompileOptions::default())
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.set.len(), 2);
    assert_eq!(first.set["abilities.dex.base"], json!(15));
    assert_eq!(first.set["abilities.wis.base"], json!(13));

    let mut applied = character.clone();
    let summary = MutationAuthority::new()
        .apply_mutation_plan(&mut applied, &first, &ApplyOptions::default())
        .unwrap();
    assert_eq!(summary.derived_recalculations, 1);
    assert_eq!(applied.ability(Ability::Dex).total, 15);
    assert_eq!(applied.ability(Ability::Dex).modifier, 2);
    assert_eq!(applied.ability(Ability::Wis).total, 13);
    assert_eq!(applied.ability(Ability::Wis).modifier, 1);
}

#[test]
fn applying_the_same_step_twice_from_the_same_start_is_byte_identical() {
    let start = level_four_soldier();
    let session = session();
    let selections = Selections::ability_increases([(Ability::Wis, 1), (Ability::Dex, 1)]);

    let mut first = start.clone();
    let mut second = start.clone();
    session
        .advance(&mut first, StepId::AbilityIncrease, &selections, CompileOptions::default())
        .unwrap();
    session
        .advance(&mut second, StepId::AbilityIncrease, &selections, CompileOptions::default())
        .unwrap();

    assert_eq!(first.state_hash(), second.state_hash());
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

// -- C: order independence ------------------------------------------------

#[test]
fn talent_order_does_not_change_the_delta() {
    let character = Character::builder("scenario-c").build().unwrap();
    let snapshot = SnapshotBuilder::new(&character).build();
    let compiler = compiler();

    let forward = compiler
        .compile_step(
            &snapshot,
            StepId::Talents,
            &Selections::talents(["Block", "Lightsaber Combat"]),
            CompileOptions::default(),
        )
        .unwrap();
    let reversed = compiler
        .compile_step(
            &snapshot,
            StepId::Talents,
            &Selections::talents(["Lightsaber Combat", "Block"]),
            CompileOptions::default(),
        )
        .unwrap();

    assert_eq!(forward.add[&Collection::Talents], reversed.add[&Collection::Talents]);
    assert_eq!(forward, reversed);
    assert_eq!(
        forward.added_ids(Collection::Talents),
        vec!["block", "lightsaber-combat"]
    );
}

// -- D: nested mutation ---------------------------------------------------

#[test]
fn second_transaction_on_the_same_character_is_rejected_and_critical() {
    let session = session();
    let mut character = level_four_soldier();
    let before = character.state_hash();

    let held = session
        .authority()
        .open_transaction(character.id(), MutationOrigin::LevelUp)
        .unwrap();

    let err = session
        .advance(
            &mut character,
            StepId::Feats,
            &Selections::feats(["dodge"]),
            CompileOptions::default(),
        )
        .unwrap_err();
    match err {
        SessionError::Authority(AuthorityError::Structural(StructuralFailure::NestedTransaction {
            open,
            ..
        })) => assert_eq!(open, held.id()),
        other => panic!("expected a nested-transaction failure, got {other:?}"),
    }
    assert_eq!(character.state_hash(), before);

    let critical = session
        .sentinel()
        .get_reports(Some(Layer::Authority), Some(Severity::Critical));
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].message, "nested mutation");
    assert_eq!(critical[0].correlation_id, held.id().0);

    drop(held);
    assert!(!session.authority().is_open(character.id()));
    session
        .advance(
            &mut character,
            StepId::Feats,
            &Selections::feats(["dodge"]),
            CompileOptions::default(),
        )
        .unwrap();
    assert!(character.has_entry(Collection::Feats, "dodge"));
}
