//! Building selection and builder-slot management (spec.md §4.A.1, §4.A.3).
//!
//! Grounded on `original_source/functions/building/building_database.py`
//! (`get_next_building_to_upgrade`, `get_free_builder`, the re-index pass
//! inside the completion path). Algorithm semantics are copied exactly;
//! expression is idiomatic Rust (iterator chains over a `Vec<Building>`
//! loaded once per call, not per-row cursor mutation).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Building, BuildingAction, BuildingStatus, BuildingType};
use super::StateStore;
use crate::config::schema::{BuildingPlanConfig, BuildingPlanEntry, PlanAction, PlanBuildingType};
use crate::error::{FleetError, FleetResult};

const LORD_BUILDING_NAME: &str = "Лорд";

fn row_to_building(row: &Row<'_>) -> rusqlite::Result<Building> {
    let building_type: String = row.get("building_type")?;
    let status: String = row.get("status")?;
    let action: String = row.get("action")?;
    let timer_finish: Option<String> = row.get("timer_finish")?;
    let last_updated: String = row.get("last_updated")?;
    Ok(Building {
        id: row.get("id")?,
        emulator_id: row.get("emulator_id")?,
        building_name: row.get("building_name")?,
        building_type: BuildingType::from_str(&building_type).unwrap_or(BuildingType::Unique),
        building_index: row.get("building_index")?,
        current_level: row.get("current_level")?,
        upgrading_to_level: row.get("upgrading_to_level")?,
        target_level: row.get("target_level")?,
        status: BuildingStatus::from_str(&status).unwrap_or(BuildingStatus::Idle),
        action: BuildingAction::from_str(&action).unwrap_or(BuildingAction::Upgrade),
        timer_finish: timer_finish
            .map(|s| parse_rfc3339(&s))
            .transpose()?,
        last_updated: parse_rfc3339(&last_updated)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Promotes every `buildings` row in the connection whose `timer_finish` has
/// passed to `status=idle, current_level=upgrading_to_level`, clearing timer
/// fields. Mandatory before any selection read (spec.md §3 lazy completion).
fn complete_expired_buildings(conn: &Connection, emulator_id: i64) -> FleetResult<Vec<String>> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT building_name FROM buildings
         WHERE emulator_id = ?1 AND status = 'upgrading' AND timer_finish <= ?2",
    )?;
    let names: Vec<String> = stmt
        .query_map(params![emulator_id, now], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    conn.execute(
        "UPDATE buildings
         SET current_level = upgrading_to_level,
             upgrading_to_level = NULL,
             status = 'idle',
             action = 'upgrade',
             timer_finish = NULL
         WHERE emulator_id = ?1 AND status = 'upgrading' AND timer_finish <= ?2",
        params![emulator_id, now],
    )?;
    Ok(names)
}

/// Promotes expired busy builder slots, freeing them and returning the
/// affected building names so callers can re-index.
fn complete_expired_builders(conn: &Connection, emulator_id: i64) -> FleetResult<Vec<String>> {
    let building_names = complete_expired_buildings(conn, emulator_id)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE builders
         SET is_busy = 0, building_id = NULL, finish_time = NULL
         WHERE emulator_id = ?1 AND is_busy = 1 AND finish_time <= ?2",
        params![emulator_id, now],
    )?;
    Ok(building_names)
}

impl StateStore {
    /// Looks up a building's id by name (and, for `multiple` buildings, the
    /// lowest index). Useful for callers that already ran
    /// `next_building_to_upgrade` against a stale snapshot and need to
    /// re-resolve a row, and for test seeding via the public API only.
    pub fn find_building_id(&self, emulator_id: i64, name: &str) -> FleetResult<Option<i64>> {
        let conn = self.conn.lock();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM buildings WHERE emulator_id = ?1 AND building_name = ?2
                 ORDER BY COALESCE(building_index, 0) LIMIT 1",
                params![emulator_id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn load_buildings(&self, conn: &Connection, emulator_id: i64, name: &str) -> FleetResult<Vec<Building>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM buildings WHERE emulator_id = ?1 AND building_name = ?2
             ORDER BY COALESCE(building_index, 0)",
        )?;
        let rows = stmt
            .query_map(params![emulator_id, name], row_to_building)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn lord_level(&self, conn: &Connection, emulator_id: i64) -> FleetResult<i64> {
        let level: Option<i64> = conn
            .query_row(
                "SELECT current_level FROM buildings
                 WHERE emulator_id = ?1 AND building_name = ?2",
                params![emulator_id, LORD_BUILDING_NAME],
                |row| row.get(0),
            )
            .optional()?;
        Ok(level.unwrap_or(0))
    }

    /// Public wrapper so feature modules can re-derive the plan entries for
    /// the emulator's *current* lord level (`BuildingPlanConfig::entries_for_lord_level`)
    /// instead of freezing a flat plan slice at construction time.
    pub fn current_lord_level(&self, emulator_id: i64) -> FleetResult<i64> {
        let conn = self.conn.lock();
        self.lord_level(&conn, emulator_id)
    }

    /// True once every instance of `entry.name` has reached `entry.target_level`.
    /// An entry with no instances at all has not been reached yet. Used by
    /// the `"Лорд"` prerequisite-gating rule (spec.md §4.A.1 step 1).
    fn entry_at_target(
        &self,
        conn: &Connection,
        emulator_id: i64,
        entry: &BuildingPlanEntry,
    ) -> FleetResult<bool> {
        let instances = self.load_buildings(conn, emulator_id, &entry.name)?;
        if instances.is_empty() {
            return Ok(false);
        }
        Ok(instances
            .iter()
            .all(|b| b.current_level >= entry.target_level))
    }

    /// The building-selection algorithm, spec.md §4.A.1. Walks the plan
    /// entries for the current lord level in declared order and returns the
    /// first eligible candidate, or `None`.
    pub fn next_building_to_upgrade(
        &self,
        emulator_id: i64,
        plan: &[BuildingPlanEntry],
    ) -> FleetResult<Option<Building>> {
        let conn = self.conn.lock();
        complete_expired_buildings(&conn, emulator_id)?;
        let lord_level = self.lord_level(&conn, emulator_id)?;

        for entry in plan {
            if entry.name == LORD_BUILDING_NAME {
                let prereqs_ready = plan
                    .iter()
                    .filter(|other| other.name != LORD_BUILDING_NAME)
                    .map(|other| self.entry_at_target(&conn, emulator_id, other))
                    .collect::<FleetResult<Vec<bool>>>()?
                    .into_iter()
                    .all(|ready| ready);
                if !prereqs_ready {
                    continue;
                }
            }

            let instances = self.load_buildings(&conn, emulator_id, &entry.name)?;
            match entry.building_type {
                PlanBuildingType::Multiple if entry.count > 1 => {
                    let instances: Vec<&Building> = instances
                        .iter()
                        .filter(|b| {
                            b.building_index
                                .map(|idx| (1..=entry.count).contains(&idx))
                                .unwrap_or(false)
                        })
                        .collect();
                    if let Some(b) = instances
                        .iter()
                        .find(|b| b.action == BuildingAction::Build && b.current_level == 0)
                    {
                        return Ok(Some((*b).clone()));
                    }
                    let eligible: Vec<&&Building> = instances
                        .iter()
                        .filter(|b| {
                            b.status != BuildingStatus::Upgrading
                                && b.current_level < b.target_level
                                && b.current_level + 1 <= lord_level
                        })
                        .collect();
                    if let Some(b) = eligible.into_iter().min_by_key(|b| {
                        (b.current_level, b.building_index.unwrap_or(i64::MAX))
                    }) {
                        return Ok(Some((*b).clone()));
                    }
                }
                PlanBuildingType::Multiple => {
                    // count == 1: "grow only one of several identical instances".
                    let any_blocking = instances.iter().any(|b| {
                        b.status == BuildingStatus::Upgrading || b.current_level >= entry.target_level
                    });
                    if any_blocking {
                        continue;
                    }
                    let eligible: Vec<&Building> = instances
                        .iter()
                        .filter(|b| {
                            b.status != BuildingStatus::Upgrading
                                && b.current_level < b.target_level
                                && b.current_level + 1 <= lord_level
                        })
                        .collect();
                    if let Some(b) = eligible.into_iter().max_by_key(|b| b.current_level) {
                        return Ok(Some(b.clone()));
                    }
                }
                PlanBuildingType::Unique => {
                    if instances.is_empty() {
                        if entry.action == PlanAction::Build && lord_level >= 1 {
                            return Ok(Some(Building {
                                id: -1,
                                emulator_id,
                                building_name: entry.name.clone(),
                                building_type: BuildingType::Unique,
                                building_index: None,
                                current_level: 0,
                                upgrading_to_level: None,
                                target_level: entry.target_level,
                                status: BuildingStatus::Idle,
                                action: BuildingAction::Build,
                                timer_finish: None,
                                last_updated: Utc::now(),
                            }));
                        }
                        continue;
                    }
                    let b = &instances[0];
                    if b.status != BuildingStatus::Upgrading
                        && b.current_level < b.target_level
                        && b.current_level + 1 <= lord_level
                    {
                        return Ok(Some(b.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    /// `get_free_builder`: lazily completes expired builders (and the
    /// buildings they were timing), re-indexes any affected `multiple`
    /// buildings, then returns the lowest-numbered idle slot.
    pub fn get_free_builder(
        &self,
        emulator_id: i64,
    ) -> FleetResult<Option<super::models::BuilderSlot>> {
        let conn = self.conn.lock();
        let affected = complete_expired_builders(&conn, emulator_id)?;
        drop(conn);
        let mut seen = std::collections::HashSet::new();
        for name in affected {
            if seen.insert(name.clone()) {
                self.reindex_multiple_building(emulator_id, &name)?;
            }
        }
        let conn = self.conn.lock();
        let slot = conn
            .query_row(
                "SELECT emulator_id, builder_slot, is_busy, building_id, finish_time
                 FROM builders
                 WHERE emulator_id = ?1 AND is_busy = 0
                 ORDER BY builder_slot ASC LIMIT 1",
                [emulator_id],
                |row| {
                    Ok(super::models::BuilderSlot {
                        emulator_id: row.get(0)?,
                        builder_slot: row.get(1)?,
                        is_busy: row.get::<_, i64>(2)? != 0,
                        building_id: row.get(3)?,
                        finish_time: None,
                    })
                },
            )
            .optional()?;
        Ok(slot)
    }

    pub fn get_busy_builders_count(&self, emulator_id: i64) -> FleetResult<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM builders WHERE emulator_id = ?1 AND is_busy = 1",
            [emulator_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn nearest_builder_finish(&self, emulator_id: i64) -> FleetResult<Option<DateTime<Utc>>> {
        let times = self.all_builder_finish_times(emulator_id)?;
        Ok(times.into_iter().min())
    }

    pub fn all_builder_finish_times(&self, emulator_id: i64) -> FleetResult<Vec<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT finish_time FROM builders WHERE emulator_id = ?1 AND is_busy = 1 AND finish_time IS NOT NULL",
        )?;
        let rows: Vec<String> = stmt
            .query_map([emulator_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        rows.iter()
            .map(|s| parse_rfc3339(s).map_err(FleetError::from))
            .collect()
    }

    /// Atomic: mutate the building to `upgrading`, occupy the slot, set the
    /// timer. Used for both "upgrade" and "build" (construction) actions,
    /// since both occupy a builder and a timer identically.
    pub fn start_upgrade(
        &self,
        building_id: i64,
        builder_slot: i64,
        finish_time: DateTime<Utc>,
    ) -> FleetResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let emulator_id: i64 = tx.query_row(
            "SELECT emulator_id FROM buildings WHERE id = ?1",
            [building_id],
            |row| row.get(0),
        )?;
        let current_level: i64 = tx.query_row(
            "SELECT current_level FROM buildings WHERE id = ?1",
            [building_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE buildings
             SET status = 'upgrading', upgrading_to_level = ?2,
                 timer_finish = ?3, last_updated = ?4
             WHERE id = ?1",
            params![
                building_id,
                current_level + 1,
                finish_time.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE builders
             SET is_busy = 1, building_id = ?3, finish_time = ?4
             WHERE emulator_id = ?1 AND builder_slot = ?2",
            params![emulator_id, builder_slot, building_id, finish_time.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Construction of a not-yet-placed `multiple` instance: inserts the row
    /// (it did not previously exist at `current_level=0`) then occupies the
    /// slot exactly like `start_upgrade`.
    pub fn start_construction(
        &self,
        emulator_id: i64,
        building_name: &str,
        building_type: BuildingType,
        target_level: i64,
        builder_slot: i64,
        finish_time: DateTime<Utc>,
    ) -> FleetResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let next_index: Option<i64> = tx
            .query_row(
                "SELECT MAX(building_index) FROM buildings
                 WHERE emulator_id = ?1 AND building_name = ?2",
                params![emulator_id, building_name],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let building_index = next_index.map(|i| i + 1).unwrap_or(1);
        tx.execute(
            "INSERT INTO buildings
             (emulator_id, building_name, building_type, building_index,
              current_level, upgrading_to_level, target_level, status, action,
              timer_finish, last_updated)
             VALUES (?1, ?2, ?3, ?4, 0, 1, ?5, 'upgrading', 'build', ?6, ?7)",
            params![
                emulator_id,
                building_name,
                building_type.as_str(),
                building_index,
                target_level,
                finish_time.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let building_id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE builders
             SET is_busy = 1, building_id = ?3, finish_time = ?4
             WHERE emulator_id = ?1 AND builder_slot = ?2",
            params![emulator_id, builder_slot, building_id, finish_time.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(building_id)
    }

    /// Two-phase re-indexing (spec.md §4.A.3): order instances by
    /// `(current_level ASC, last_updated ASC)`, assign `-1..-N` then `1..N`
    /// to avoid a `UNIQUE(emulator_id, building_name, building_index)`
    /// conflict mid-rewrite.
    pub fn reindex_multiple_building(&self, emulator_id: i64, building_name: &str) -> FleetResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut stmt = tx.prepare(
            "SELECT id, current_level, last_updated FROM buildings
             WHERE emulator_id = ?1 AND building_name = ?2
             ORDER BY current_level ASC, last_updated ASC",
        )?;
        let ids: Vec<i64> = stmt
            .query_map(params![emulator_id, building_name], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        if ids.len() <= 1 {
            tx.commit()?;
            return Ok(());
        }
        for (i, id) in ids.iter().enumerate() {
            let neg = -(i as i64 + 1);
            tx.execute(
                "UPDATE buildings SET building_index = ?2 WHERE id = ?1",
                params![id, neg],
            )?;
        }
        for (i, id) in ids.iter().enumerate() {
            let pos = i as i64 + 1;
            tx.execute(
                "UPDATE buildings SET building_index = ?2 WHERE id = ?1",
                params![id, pos],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Converts the YAML building plan into level-0 seed rows for a brand-new
/// emulator (spec.md §4.A "populates building/tech tables from the YAML
/// plan"). Grounded on `building_database.py::_extract_unique_buildings` /
/// `initialize_buildings_for_emulator`: walks lord levels ascending and
/// folds each building name into one row (`unique`) or `count` rows
/// (`multiple`); the entry from the highest lord level that mentions a given
/// name/index wins, since later entries describe that instance's current
/// target and action more precisely than earlier ones.
pub fn seed_buildings_from_plan(emulator_id: i64, plan: &BuildingPlanConfig) -> Vec<Building> {
    use std::collections::BTreeMap;

    let mut levels: Vec<i64> = plan
        .lord_levels
        .keys()
        .filter_map(|k| k.strip_prefix("lord_").and_then(|s| s.parse::<i64>().ok()))
        .collect();
    levels.sort_unstable();

    // name -> (building_type, index -> (target_level, action))
    let mut tracked: BTreeMap<String, (PlanBuildingType, BTreeMap<i64, (i64, PlanAction)>)> =
        BTreeMap::new();

    for level in levels {
        for entry in plan.entries_for_lord_level(level) {
            let (_, instances) = tracked
                .entry(entry.name.clone())
                .or_insert_with(|| (entry.building_type, BTreeMap::new()));
            match entry.building_type {
                PlanBuildingType::Unique => {
                    instances.insert(1, (entry.target_level, entry.action));
                }
                PlanBuildingType::Multiple => {
                    for index in 1..=entry.count {
                        instances.insert(index, (entry.target_level, entry.action));
                    }
                }
            }
        }
    }

    let now = Utc::now();
    let mut out = Vec::new();
    for (name, (building_type, instances)) in tracked {
        for (index, (target_level, action)) in instances {
            out.push(Building {
                id: 0,
                emulator_id,
                building_name: name.clone(),
                building_type: match building_type {
                    PlanBuildingType::Unique => BuildingType::Unique,
                    PlanBuildingType::Multiple => BuildingType::Multiple,
                },
                building_index: match building_type {
                    PlanBuildingType::Unique => None,
                    PlanBuildingType::Multiple => Some(index),
                },
                current_level: 0,
                upgrading_to_level: None,
                target_level,
                status: BuildingStatus::Idle,
                action: match action {
                    PlanAction::Build => BuildingAction::Build,
                    PlanAction::Upgrade => BuildingAction::Upgrade,
                },
                timer_finish: None,
                last_updated: now,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{BuildingPlanEntry, PlanAction, PlanBuildingType};

    fn plan_entry(name: &str, count: i64, target: i64, ty: PlanBuildingType) -> BuildingPlanEntry {
        BuildingPlanEntry {
            name: name.to_string(),
            count,
            target_level: target,
            building_type: ty,
            action: PlanAction::Upgrade,
        }
    }

    fn seed_lord(store: &StateStore, emulator_id: i64, level: i64) {
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO buildings
             (emulator_id, building_name, building_type, building_index,
              current_level, target_level, status, action, last_updated)
             VALUES (?1, ?2, 'unique', NULL, ?3, 99, 'idle', 'upgrade', ?4)",
            params![emulator_id, LORD_BUILDING_NAME, level, Utc::now().to_rfc3339()],
        )
        .unwrap();
    }

    fn seed_multiple(store: &StateStore, emulator_id: i64, name: &str, levels: &[i64]) {
        let conn = store.conn.lock();
        for (i, lvl) in levels.iter().enumerate() {
            conn.execute(
                "INSERT INTO buildings
                 (emulator_id, building_name, building_type, building_index,
                  current_level, target_level, status, action, last_updated)
                 VALUES (?1, ?2, 'multiple', ?3, ?4, 10, 'idle', 'upgrade', ?5)",
                params![
                    emulator_id,
                    name,
                    (i as i64) + 1,
                    lvl,
                    Utc::now().to_rfc3339()
                ],
            )
            .unwrap();
        }
    }

    #[test]
    fn count1_picks_max_level_and_skips_when_any_at_target() {
        let store = StateStore::open_in_memory().unwrap();
        seed_lord(&store, 1, 20);
        seed_multiple(&store, 1, "Warehouse", &[8, 5, 5]);
        let plan = vec![plan_entry("Warehouse", 1, 10, PlanBuildingType::Multiple)];
        let chosen = store.next_building_to_upgrade(1, &plan).unwrap().unwrap();
        assert_eq!(chosen.current_level, 8);

        // Once the max instance reaches target, the whole entry is skipped.
        let conn = store.conn.lock();
        conn.execute(
            "UPDATE buildings SET current_level = 10 WHERE emulator_id = 1 AND current_level = 8",
            [],
        )
        .unwrap();
        drop(conn);
        let chosen2 = store.next_building_to_upgrade(1, &plan).unwrap();
        assert!(chosen2.is_none());
    }

    #[test]
    fn count_gt1_picks_minimum_level() {
        let store = StateStore::open_in_memory().unwrap();
        seed_lord(&store, 1, 20);
        seed_multiple(&store, 1, "Farm", &[3, 7, 1]);
        let plan = vec![plan_entry("Farm", 3, 10, PlanBuildingType::Multiple)];
        let chosen = store.next_building_to_upgrade(1, &plan).unwrap().unwrap();
        assert_eq!(chosen.current_level, 1);
    }

    #[test]
    fn reindex_is_idempotent_and_contiguous() {
        let store = StateStore::open_in_memory().unwrap();
        seed_multiple(&store, 1, "Farm", &[3, 7, 1]);
        store.reindex_multiple_building(1, "Farm").unwrap();
        let first = store.load_buildings(&store.conn.lock(), 1, "Farm").unwrap();
        store.reindex_multiple_building(1, "Farm").unwrap();
        let second = store.load_buildings(&store.conn.lock(), 1, "Farm").unwrap();
        let levels_first: Vec<i64> = first.iter().map(|b| b.current_level).collect();
        let levels_second: Vec<i64> = second.iter().map(|b| b.current_level).collect();
        assert_eq!(levels_first, levels_second);
        assert_eq!(levels_first, vec![1, 3, 7]);
        let indices: Vec<i64> = second.iter().filter_map(|b| b.building_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
