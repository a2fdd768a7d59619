//! Periodic-resource refill rhythm (spec.md §3 Refill record), e.g. ponds.
//!
//! Grounded on spec.md's refill description; the original's
//! `functions/ponds/ponds.py` names the same min/max interval rhythm.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::models::Refill;
use super::StateStore;
use crate::error::FleetResult;

impl StateStore {
    pub fn get_refill(&self, emulator_id: i64, feature_name: &str) -> FleetResult<Option<Refill>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT last_refill_time, resource_level FROM refills
                 WHERE emulator_id = ?1 AND feature_name = ?2",
                params![emulator_id, feature_name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(t, level)| -> FleetResult<Refill> {
            Ok(Refill {
                emulator_id,
                last_refill_time: DateTime::parse_from_rfc3339(&t)
                    .map_err(|e| crate::error::FleetError::Internal(e.to_string()))?
                    .with_timezone(&Utc),
                resource_level: level,
            })
        })
        .transpose()
    }

    pub fn record_refill(&self, emulator_id: i64, feature_name: &str, resource_level: i64) -> FleetResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO refills (emulator_id, feature_name, last_refill_time, resource_level)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(emulator_id, feature_name)
             DO UPDATE SET last_refill_time = excluded.last_refill_time,
                           resource_level = excluded.resource_level",
            params![emulator_id, feature_name, Utc::now().to_rfc3339(), resource_level],
        )?;
        Ok(())
    }

    /// Next time this refill feature should be visited: `last + min_interval`
    /// if it's merely allowed, but the scheduler-facing contract only needs
    /// the "must refill now" deadline, `last + max_interval` — May-refill
    /// windows are consulted by `can_execute`, not by `next_event_time`
    /// (spec.md §4.C: `next_event_time` reports *a* time, not a range).
    pub fn refill_due_at(
        &self,
        emulator_id: i64,
        feature_name: &str,
        max_interval: Duration,
    ) -> FleetResult<Option<DateTime<Utc>>> {
        Ok(self
            .get_refill(emulator_id, feature_name)?
            .map(|r| r.last_refill_time + max_interval))
    }

    /// True once `min_interval` has elapsed since the last refill — the
    /// "may refill if visiting anyway" threshold.
    pub fn refill_allowed(
        &self,
        emulator_id: i64,
        feature_name: &str,
        min_interval: Duration,
    ) -> FleetResult<bool> {
        Ok(match self.get_refill(emulator_id, feature_name)? {
            Some(r) => Utc::now() - r.last_refill_time >= min_interval,
            None => true,
        })
    }
}
