//! Tech (evolution) selection and research-slot management (spec.md §4.A.2).
//!
//! Algorithm grounded on spec.md §4.A.2, itself distilled from
//! `original_source/functions/research/evolution_database.py` and
//! `evolution_upgrade.py`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Evolution, TechStatus};
use super::StateStore;
use crate::config::schema::EvolutionPlanConfig;
use crate::error::FleetResult;

fn row_to_evolution(row: &Row<'_>) -> rusqlite::Result<Evolution> {
    let status: String = row.get("status")?;
    let timer_finish: Option<String> = row.get("timer_finish")?;
    Ok(Evolution {
        id: row.get("id")?,
        emulator_id: row.get("emulator_id")?,
        tech_name: row.get("tech_name")?,
        section_name: row.get("section_name")?,
        lord_level: row.get("lord_level")?,
        current_level: row.get("current_level")?,
        target_level: row.get("target_level")?,
        max_level: row.get("max_level")?,
        status: TechStatus::from_str(&status).unwrap_or(TechStatus::Idle),
        timer_finish: timer_finish.map(|s| parse_rfc3339(&s)).transpose()?,
        order_index: row.get("order_index")?,
        swipe_group: row.get("swipe_group")?,
        scanned: row.get::<_, i64>("scanned")? != 0,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// Lazy completion: promote the research slot and its tech to completed/idle
/// if the timer has passed. Returns the completed tech's `section_name` so
/// the caller can re-evaluate deferred-section gating.
fn complete_expired_research(conn: &Connection, emulator_id: i64) -> FleetResult<Option<String>> {
    let now = Utc::now().to_rfc3339();
    let expired: Option<i64> = conn
        .query_row(
            "SELECT tech_id FROM research_slot
             WHERE emulator_id = ?1 AND is_busy = 1 AND finish_time <= ?2",
            params![emulator_id, now],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let Some(tech_id) = expired else {
        return Ok(None);
    };
    let section: String = conn.query_row(
        "SELECT section_name FROM evolutions WHERE id = ?1",
        [tech_id],
        |row| row.get(0),
    )?;
    conn.execute(
        "UPDATE evolutions
         SET current_level = current_level + 1, status = 'idle', timer_finish = NULL
         WHERE id = ?1",
        [tech_id],
    )?;
    conn.execute(
        "UPDATE research_slot
         SET is_busy = 0, tech_id = NULL, finish_time = NULL
         WHERE emulator_id = ?1",
        [emulator_id],
    )?;
    Ok(Some(section))
}

impl StateStore {
    fn lord_level(&self, conn: &Connection, emulator_id: i64) -> FleetResult<i64> {
        let level: Option<i64> = conn
            .query_row(
                "SELECT current_level FROM buildings WHERE emulator_id = ?1 AND building_name = 'Лорд'",
                [emulator_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(level.unwrap_or(0))
    }

    /// spec.md §4.A.2: first tech in ascending `order_index` with
    /// `lord_level ≤ current lord level`, not researching, below target.
    /// If its section is deferred and nothing in that section has progress,
    /// the caller (Worker) is told to request a scan first via the returned
    /// `needs_scan` flag rather than this function guessing at a scan
    /// mechanism it does not own.
    pub fn next_tech_to_research(
        &self,
        emulator_id: i64,
        plan: &EvolutionPlanConfig,
    ) -> FleetResult<Option<(Evolution, bool)>> {
        let conn = self.conn.lock();
        complete_expired_research(&conn, emulator_id)?;
        let lord_level = self.lord_level(&conn, emulator_id)?;

        let mut stmt = conn.prepare(
            "SELECT * FROM evolutions WHERE emulator_id = ?1 ORDER BY order_index ASC",
        )?;
        let all: Vec<Evolution> = stmt
            .query_map([emulator_id], row_to_evolution)?
            .collect::<Result<_, _>>()?;

        for tech in &all {
            if tech.lord_level > lord_level {
                continue;
            }
            if tech.status == TechStatus::Researching {
                continue;
            }
            if tech.current_level >= tech.target_level {
                continue;
            }
            let needs_scan = plan.is_deferred(&tech.section_name)
                && !all
                    .iter()
                    .any(|t| t.section_name == tech.section_name && t.current_level > 0);
            return Ok(Some((tech.clone(), needs_scan)));
        }
        Ok(None)
    }

    pub fn start_research(
        &self,
        tech_id: i64,
        finish_time: DateTime<Utc>,
    ) -> FleetResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let emulator_id: i64 = tx.query_row(
            "SELECT emulator_id FROM evolutions WHERE id = ?1",
            [tech_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE evolutions SET status = 'researching', timer_finish = ?2 WHERE id = ?1",
            params![tech_id, finish_time.to_rfc3339()],
        )?;
        tx.execute(
            "UPDATE research_slot SET is_busy = 1, tech_id = ?2, finish_time = ?3 WHERE emulator_id = ?1",
            params![emulator_id, tech_id, finish_time.to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn research_finish(&self, emulator_id: i64) -> FleetResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let finish: Option<String> = conn
            .query_row(
                "SELECT finish_time FROM research_slot WHERE emulator_id = ?1 AND is_busy = 1",
                [emulator_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        finish.map(|s| parse_rfc3339(&s).map_err(Into::into)).transpose()
    }
}

/// Converts the YAML evolution plan into level-0 seed rows for a brand-new
/// emulator (spec.md §4.A "populates building/tech tables from the YAML
/// plan"). Walks lord levels ascending; a tech's `lord_level` is the first
/// level at which it is mentioned (the level it unlocks at), while its
/// `target_level`/`max_level`/`swipe_group` take the values from the highest
/// level that still mentions it. `order_index` follows first-appearance
/// order across the whole walk, matching research priority.
pub fn seed_techs_from_plan(
    emulator_id: i64,
    plan: &EvolutionPlanConfig,
) -> Vec<Evolution> {
    use std::collections::HashMap;

    struct Tracked {
        section_name: String,
        lord_level: i64,
        target_level: i64,
        max_level: i64,
        swipe_group: Option<String>,
    }

    let mut levels: Vec<i64> = plan
        .lord_levels
        .keys()
        .filter_map(|k| k.strip_prefix("lord_").and_then(|s| s.parse::<i64>().ok()))
        .collect();
    levels.sort_unstable();

    let mut order: Vec<String> = Vec::new();
    let mut tracked: HashMap<String, Tracked> = HashMap::new();

    for level in levels {
        for entry in plan.entries_for_lord_level(level) {
            match tracked.get_mut(&entry.name) {
                Some(t) => {
                    t.section_name = entry.section.clone();
                    t.target_level = entry.target_level;
                    t.max_level = entry.max_level;
                    t.swipe_group = entry.swipe_group.clone();
                }
                None => {
                    order.push(entry.name.clone());
                    tracked.insert(
                        entry.name.clone(),
                        Tracked {
                            section_name: entry.section.clone(),
                            lord_level: level,
                            target_level: entry.target_level,
                            max_level: entry.max_level,
                            swipe_group: entry.swipe_group.clone(),
                        },
                    );
                }
            }
        }
    }

    order
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let t = tracked.remove(&name).expect("tracked during first pass");
            Evolution {
                id: 0,
                emulator_id,
                tech_name: name,
                section_name: t.section_name,
                lord_level: t.lord_level,
                current_level: 0,
                target_level: t.target_level,
                max_level: t.max_level,
                status: TechStatus::Idle,
                timer_finish: None,
                order_index: i as i64 + 1,
                swipe_group: t.swipe_group,
                scanned: false,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn seed_tech(store: &StateStore, emu: i64, name: &str, order: i64, lord: i64, cur: i64, target: i64) {
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO evolutions
             (emulator_id, tech_name, section_name, lord_level, current_level,
              target_level, max_level, status, order_index)
             VALUES (?1, ?2, 'default', ?3, ?4, ?5, 99, 'idle', ?6)",
            params![emu, name, lord, cur, target, order],
        )
        .unwrap();
    }

    #[test]
    fn picks_first_eligible_by_order_index() {
        let store = StateStore::open_in_memory().unwrap();
        seed_tech(&store, 1, "Metallurgy", 2, 1, 0, 5);
        seed_tech(&store, 1, "Masonry", 1, 1, 0, 5);
        let plan = EvolutionPlanConfig::default();
        let (tech, needs_scan) = store.next_tech_to_research(1, &plan).unwrap().unwrap();
        assert_eq!(tech.tech_name, "Masonry");
        assert!(!needs_scan);
    }

    #[test]
    fn skips_tech_above_lord_level() {
        let store = StateStore::open_in_memory().unwrap();
        seed_tech(&store, 1, "Advanced", 1, 10, 0, 5);
        seed_tech(&store, 1, "Basic", 2, 1, 0, 5);
        let plan = EvolutionPlanConfig::default();
        let (tech, _) = store.next_tech_to_research(1, &plan).unwrap().unwrap();
        assert_eq!(tech.tech_name, "Basic");
    }
}
