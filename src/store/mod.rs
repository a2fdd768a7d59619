//! SQLite-backed state store (spec.md §4.A).
//!
//! A single-writer discipline is enforced by one reentrant-in-spirit lock per
//! store instance: `parking_lot::Mutex<rusqlite::Connection>`. Reads used only
//! as scheduling hints may be taken without holding up a writer for long, but
//! for simplicity (and because SQLite itself serialises at the file level
//! under WAL) every operation here goes through the same mutex — the
//! distinction from spec.md §4.A is about *correctness dependence*, not lock
//! acquisition, and `StateStore::snapshot_*` methods are simply short-lived
//! lock holds the Scheduler can call frequently without contention.

pub mod building;
pub mod models;
pub mod refill;
pub mod research;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::schema::{BuildingPlanConfig, EvolutionPlanConfig};
use crate::error::{FleetError, FleetResult};

pub struct StateStore {
    pub(crate) conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &str) -> FleetResult<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> FleetResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn configure(conn: &Connection) -> FleetResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn create_schema(&self) -> FleetResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS buildings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                emulator_id INTEGER NOT NULL,
                building_name TEXT NOT NULL,
                building_type TEXT NOT NULL,
                building_index INTEGER,
                current_level INTEGER NOT NULL DEFAULT 0,
                upgrading_to_level INTEGER,
                target_level INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'idle',
                action TEXT NOT NULL,
                timer_finish TEXT,
                last_updated TEXT NOT NULL,
                UNIQUE(emulator_id, building_name, building_index)
            );

            CREATE TABLE IF NOT EXISTS builders (
                emulator_id INTEGER NOT NULL,
                builder_slot INTEGER NOT NULL,
                is_busy INTEGER NOT NULL DEFAULT 0,
                building_id INTEGER,
                finish_time TEXT,
                PRIMARY KEY (emulator_id, builder_slot)
            );

            CREATE TABLE IF NOT EXISTS evolutions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                emulator_id INTEGER NOT NULL,
                tech_name TEXT NOT NULL,
                section_name TEXT NOT NULL,
                lord_level INTEGER NOT NULL,
                current_level INTEGER NOT NULL DEFAULT 0,
                target_level INTEGER NOT NULL,
                max_level INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'idle',
                timer_finish TEXT,
                order_index INTEGER NOT NULL,
                swipe_group TEXT,
                scanned INTEGER NOT NULL DEFAULT 0,
                UNIQUE(emulator_id, tech_name, section_name)
            );

            CREATE TABLE IF NOT EXISTS research_slot (
                emulator_id INTEGER PRIMARY KEY,
                is_busy INTEGER NOT NULL DEFAULT 0,
                tech_id INTEGER,
                finish_time TEXT
            );

            CREATE TABLE IF NOT EXISTS refills (
                emulator_id INTEGER NOT NULL,
                feature_name TEXT NOT NULL,
                last_refill_time TEXT NOT NULL,
                resource_level INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (emulator_id, feature_name)
            );

            CREATE TABLE IF NOT EXISTS function_freeze (
                emulator_id INTEGER NOT NULL,
                function_name TEXT NOT NULL,
                unfreeze_at TEXT NOT NULL,
                reason TEXT,
                PRIMARY KEY (emulator_id, function_name)
            );

            CREATE TABLE IF NOT EXISTS init_state (
                emulator_id INTEGER PRIMARY KEY,
                records_created INTEGER NOT NULL DEFAULT 0,
                initial_scan_complete INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(())
    }

    /// Scheduler hint: has this emulator ever been initialised?
    pub fn has_records(&self, emulator_id: i64) -> FleetResult<bool> {
        let conn = self.conn.lock();
        let created: Option<i64> = conn
            .query_row(
                "SELECT records_created FROM init_state WHERE emulator_id = ?1",
                [emulator_id],
                |row| row.get(0),
            )
            .ok();
        Ok(matches!(created, Some(1)))
    }

    /// Idempotent: populates building/tech tables and slot rows from the
    /// feature plans. Skips entirely if already populated (spec.md §4.A).
    pub fn initialize_records(
        &self,
        emulator_id: i64,
        total_builders: i64,
        buildings: &[models::Building],
        techs: &[models::Evolution],
    ) -> FleetResult<()> {
        if self.has_records(emulator_id)? {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for b in buildings {
            tx.execute(
                "INSERT INTO buildings
                 (emulator_id, building_name, building_type, building_index,
                  current_level, upgrading_to_level, target_level, status,
                  action, timer_finish, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    emulator_id,
                    b.building_name,
                    b.building_type.as_str(),
                    b.building_index,
                    b.current_level,
                    b.upgrading_to_level,
                    b.target_level,
                    b.status.as_str(),
                    b.action.as_str(),
                    b.timer_finish.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        for t in techs {
            tx.execute(
                "INSERT INTO evolutions
                 (emulator_id, tech_name, section_name, lord_level, current_level,
                  target_level, max_level, status, timer_finish, order_index,
                  swipe_group, scanned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    emulator_id,
                    t.tech_name,
                    t.section_name,
                    t.lord_level,
                    t.current_level,
                    t.target_level,
                    t.max_level,
                    t.status.as_str(),
                    t.timer_finish.map(|v| v.to_rfc3339()),
                    t.order_index,
                    t.swipe_group,
                    t.scanned as i64,
                ],
            )?;
        }
        for slot in 1..=total_builders {
            tx.execute(
                "INSERT INTO builders (emulator_id, builder_slot, is_busy)
                 VALUES (?1, ?2, 0)",
                rusqlite::params![emulator_id, slot],
            )?;
        }
        tx.execute(
            "INSERT INTO research_slot (emulator_id, is_busy) VALUES (?1, 0)",
            [emulator_id],
        )?;
        tx.execute(
            "INSERT INTO init_state (emulator_id, records_created, initial_scan_complete)
             VALUES (?1, 1, 0)
             ON CONFLICT(emulator_id) DO UPDATE SET records_created = 1",
            [emulator_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The production first-run bootstrap path: derives seed rows from the
    /// YAML plans and hands them to `initialize_records`. This is what the
    /// Worker calls once `has_records` reports false for an emulator
    /// (spec.md §8 scenario "First-run bootstrap").
    pub fn bootstrap_from_plan(
        &self,
        emulator_id: i64,
        total_builders: i64,
        buildings: &BuildingPlanConfig,
        techs: &EvolutionPlanConfig,
    ) -> FleetResult<()> {
        let building_rows = building::seed_buildings_from_plan(emulator_id, buildings);
        let tech_rows = research::seed_techs_from_plan(emulator_id, techs);
        self.initialize_records(emulator_id, total_builders, &building_rows, &tech_rows)
    }

    pub fn mark_initial_scan_complete(&self, emulator_id: i64) -> FleetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE init_state SET initial_scan_complete = 1 WHERE emulator_id = ?1",
            [emulator_id],
        )?;
        Ok(())
    }

    /// Freeze mirror write-through. Authoritative decision already lives in
    /// `FreezeRegistry`; this persists a best-effort copy for restart
    /// recovery (spec.md §9 "two-writer risk").
    pub fn mirror_freeze(
        &self,
        emulator_id: i64,
        function_name: &str,
        unfreeze_at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> FleetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO function_freeze (emulator_id, function_name, unfreeze_at, reason)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(emulator_id, function_name)
             DO UPDATE SET unfreeze_at = excluded.unfreeze_at, reason = excluded.reason",
            rusqlite::params![emulator_id, function_name, unfreeze_at.to_rfc3339(), reason],
        )?;
        Ok(())
    }

    pub fn mirror_unfreeze(&self, emulator_id: i64, function_name: &str) -> FleetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM function_freeze WHERE emulator_id = ?1 AND function_name = ?2",
            rusqlite::params![emulator_id, function_name],
        )?;
        Ok(())
    }

    /// Loads all non-expired mirror rows, for `FreezeRegistry::load_from_mirror`
    /// at process start. Expired rows are dropped here rather than returned.
    pub fn load_freeze_mirror(
        &self,
    ) -> FleetResult<Vec<(i64, String, DateTime<Utc>, Option<String>)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT emulator_id, function_name, unfreeze_at, reason FROM function_freeze")?;
        let now = Utc::now();
        let rows = stmt
            .query_map([], |row| {
                let emulator_id: i64 = row.get(0)?;
                let function_name: String = row.get(1)?;
                let unfreeze_at: String = row.get(2)?;
                let reason: Option<String> = row.get(3)?;
                Ok((emulator_id, function_name, unfreeze_at, reason))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::new();
        for (emulator_id, function_name, unfreeze_at, reason) in rows {
            let parsed = DateTime::parse_from_rfc3339(&unfreeze_at)
                .map_err(|e| FleetError::Internal(format!("bad unfreeze_at: {e}")))?
                .with_timezone(&Utc);
            if parsed > now {
                out.push((emulator_id, function_name, parsed, reason));
            }
        }
        Ok(out)
    }
}
