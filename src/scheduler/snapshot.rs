//! GUI-facing schedule snapshot (spec.md §6 "Exposed snapshot").
//!
//! Published under its own `parking_lot::RwLock` so GUI reads never block
//! scheduling, grounded on spec.md §4.E step 7 and §5's separate-mutex rule.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Processing,
    New,
    Ready,
    Waiting,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveEntry {
    pub id: i64,
    pub name: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub name: String,
    /// `"HH:MM"`, `"NOW"`, or `"READY"` per spec.md §6.
    pub launch_time: String,
    pub wait_minutes: i64,
    pub reasons: Vec<String>,
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub active: Vec<ActiveEntry>,
    pub queue: Vec<QueueEntry>,
    pub idle_count: i64,
    pub total_enabled: i64,
    pub max_concurrent: i64,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSnapshot {
    pub fn empty() -> Self {
        Self {
            active: Vec::new(),
            queue: Vec::new(),
            idle_count: 0,
            total_enabled: 0,
            max_concurrent: 0,
            updated_at: Utc::now(),
        }
    }
}

pub struct SnapshotPublisher {
    inner: RwLock<ScheduleSnapshot>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ScheduleSnapshot::empty()),
        }
    }

    pub fn publish(&self, snapshot: ScheduleSnapshot) {
        *self.inner.write() = snapshot;
    }

    pub fn current(&self) -> ScheduleSnapshot {
        self.inner.read().clone()
    }

    pub fn clear(&self) {
        *self.inner.write() = ScheduleSnapshot::empty();
    }
}
