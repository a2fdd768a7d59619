//! End-to-end scenarios from spec.md §8, exercised directly against
//! `StateStore` (no device/emulator involved — these are pure persistence
//! and selection-algorithm properties), using only the public API.

use chrono::{Duration, Utc};
use emufleet_core::config::schema::EvolutionPlanConfig;
use emufleet_core::store::models::{Building, BuildingAction, BuildingStatus, BuildingType};
use emufleet_core::store::StateStore;

const EMU: i64 = 1;

fn lord(level: i64) -> Building {
    Building {
        id: 0,
        emulator_id: EMU,
        building_name: "Лорд".to_string(),
        building_type: BuildingType::Unique,
        building_index: None,
        current_level: level,
        upgrading_to_level: None,
        target_level: 99,
        status: BuildingStatus::Idle,
        action: BuildingAction::Upgrade,
        timer_finish: None,
        last_updated: Utc::now(),
    }
}

fn seeded_building(name: &str, level: i64) -> Building {
    Building {
        id: 0,
        emulator_id: EMU,
        building_name: name.to_string(),
        building_type: BuildingType::Unique,
        building_index: None,
        current_level: level,
        upgrading_to_level: None,
        target_level: 10,
        status: BuildingStatus::Idle,
        action: BuildingAction::Upgrade,
        timer_finish: None,
        last_updated: Utc::now(),
    }
}

#[test]
fn initialize_records_is_idempotent() {
    let store = StateStore::open_in_memory().unwrap();
    store.initialize_records(EMU, 3, &[lord(5)], &[]).unwrap();
    assert!(store.has_records(EMU).unwrap());
    // Second call must be a no-op: it must not error and must not duplicate rows.
    store.initialize_records(EMU, 3, &[lord(5)], &[]).unwrap();
    assert!(store.has_records(EMU).unwrap());
    let id = store.find_building_id(EMU, "Лорд").unwrap();
    assert!(id.is_some());
}

#[test]
fn builder_completion_releases_and_promotes_then_returns_lowest_idle_slot() {
    let store = StateStore::open_in_memory().unwrap();
    store
        .initialize_records(EMU, 3, &[lord(10), seeded_building("Farm", 3), seeded_building("Mine", 2)], &[])
        .unwrap();

    let farm_id = store.find_building_id(EMU, "Farm").unwrap().unwrap();
    let mine_id = store.find_building_id(EMU, "Mine").unwrap().unwrap();

    let slot1 = store.get_free_builder(EMU).unwrap().unwrap();
    store
        .start_upgrade(farm_id, slot1.builder_slot, Utc::now() - Duration::minutes(5))
        .unwrap();
    let slot2 = store.get_free_builder(EMU).unwrap().unwrap();
    assert_ne!(slot1.builder_slot, slot2.builder_slot);
    store
        .start_upgrade(mine_id, slot2.builder_slot, Utc::now() - Duration::minutes(5))
        .unwrap();

    assert_eq!(store.get_busy_builders_count(EMU).unwrap(), 2);

    // Both builders are already expired; the next call must release both,
    // promote both buildings, and return the lowest-numbered now-idle slot.
    let freed = store.get_free_builder(EMU).unwrap().unwrap();
    assert_eq!(freed.builder_slot, slot1.builder_slot.min(slot2.builder_slot));
    assert_eq!(store.get_busy_builders_count(EMU).unwrap(), 0);
}

#[test]
fn building_invariant_status_upgrading_implies_timer_and_next_level() {
    let mut b = seeded_building("Farm", 3);
    b.status = BuildingStatus::Upgrading;
    b.upgrading_to_level = Some(4);
    b.timer_finish = Some(Utc::now());
    assert!(b.invariant_holds());
}

#[test]
fn research_slot_excludes_currently_researching_tech() {
    // Start research on a freshly-initialized tech and confirm the slot is
    // occupied, so a second selection call does not pick the same tech.
    let techs = vec![emufleet_core::store::models::Evolution {
        id: 0,
        emulator_id: EMU,
        tech_name: "Metallurgy".to_string(),
        section_name: "default".to_string(),
        lord_level: 1,
        current_level: 0,
        target_level: 5,
        max_level: 99,
        status: emufleet_core::store::models::TechStatus::Idle,
        timer_finish: None,
        order_index: 1,
        swipe_group: None,
        scanned: false,
    }];
    let store2 = StateStore::open_in_memory().unwrap();
    store2.initialize_records(EMU, 3, &[lord(5)], &techs).unwrap();

    let plan = EvolutionPlanConfig::default();
    let (tech, _) = store2.next_tech_to_research(EMU, &plan).unwrap().unwrap();
    store2.start_research(tech.id, Utc::now() + Duration::hours(1)).unwrap();

    let next = store2.next_tech_to_research(EMU, &plan).unwrap();
    assert!(next.is_none(), "currently-researching tech must not be re-selected");
}
