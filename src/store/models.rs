//! Row types for the state store (spec.md §3).
//!
//! Nullable columns are modeled as `Option<T>` rather than sentinel values,
//! per the Design Note in spec.md §9.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `chrono::DateTime::<Utc>::MIN_UTC` — the "needs emulator immediately,
/// first-run initialisation pending" sentinel of spec.md §4.C.
pub fn epoch_min() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

pub fn is_epoch_min(t: DateTime<Utc>) -> bool {
    t == epoch_min()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingType {
    Unique,
    Multiple,
}

impl BuildingType {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildingType::Unique => "unique",
            BuildingType::Multiple => "multiple",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unique" => Some(BuildingType::Unique),
            "multiple" => Some(BuildingType::Multiple),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingStatus {
    Idle,
    Upgrading,
}

impl BuildingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildingStatus::Idle => "idle",
            BuildingStatus::Upgrading => "upgrading",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(BuildingStatus::Idle),
            "upgrading" => Some(BuildingStatus::Upgrading),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingAction {
    Build,
    Upgrade,
}

impl BuildingAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildingAction::Build => "build",
            BuildingAction::Upgrade => "upgrade",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "build" => Some(BuildingAction::Build),
            "upgrade" => Some(BuildingAction::Upgrade),
            _ => None,
        }
    }
}

/// `(emulator_id, building_name, building_index?)` is unique (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub id: i64,
    pub emulator_id: i64,
    pub building_name: String,
    pub building_type: BuildingType,
    pub building_index: Option<i64>,
    pub current_level: i64,
    pub upgrading_to_level: Option<i64>,
    pub target_level: i64,
    pub status: BuildingStatus,
    pub action: BuildingAction,
    pub timer_finish: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Building {
    /// spec.md §3 invariant: `status=upgrading ⟺ timer_finish ≠ ∅ ∧
    /// upgrading_to_level = current_level+1`.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            BuildingStatus::Upgrading => {
                self.timer_finish.is_some()
                    && self.upgrading_to_level == Some(self.current_level + 1)
            }
            BuildingStatus::Idle => self.timer_finish.is_none(),
        }
    }

    /// `action=build ∧ current_level=0` means "not yet physically placed";
    /// scanning routines must skip it (spec.md §3).
    pub fn is_unplaced(&self) -> bool {
        self.action == BuildingAction::Build && self.current_level == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderSlot {
    pub emulator_id: i64,
    pub builder_slot: i64,
    pub is_busy: bool,
    pub building_id: Option<i64>,
    pub finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TechStatus {
    Idle,
    Researching,
    Completed,
}

impl TechStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TechStatus::Idle => "idle",
            TechStatus::Researching => "researching",
            TechStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(TechStatus::Idle),
            "researching" => Some(TechStatus::Researching),
            "completed" => Some(TechStatus::Completed),
            _ => None,
        }
    }
}

/// `(emulator_id, tech_name, section_name)` is unique (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evolution {
    pub id: i64,
    pub emulator_id: i64,
    pub tech_name: String,
    pub section_name: String,
    pub lord_level: i64,
    pub current_level: i64,
    pub target_level: i64,
    pub max_level: i64,
    pub status: TechStatus,
    pub timer_finish: Option<DateTime<Utc>>,
    pub order_index: i64,
    pub swipe_group: Option<String>,
    pub scanned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSlot {
    pub emulator_id: i64,
    pub is_busy: bool,
    pub tech_id: Option<i64>,
    pub finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refill {
    pub emulator_id: i64,
    pub last_refill_time: DateTime<Utc>,
    pub resource_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionFreeze {
    pub emulator_id: i64,
    pub function_name: String,
    pub unfreeze_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitState {
    pub emulator_id: i64,
    pub records_created: bool,
    pub initial_scan_complete: bool,
}

/// Loaded from config; never mutated at runtime (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emulator {
    pub id: i64,
    pub port: i64,
}

impl Emulator {
    pub fn port_for_id(id: i64) -> i64 {
        5554 + 2 * id
    }
}
