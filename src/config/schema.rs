//! Config file shapes (spec.md §6). Three logical YAML files plus per-feature
//! plans, mirroring `knhk-sidecar/src/config.rs`'s section-struct composition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SquadSetting {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub wild_level: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorSettings {
    #[serde(default)]
    pub squads: HashMap<String, SquadSetting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuiSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: i64,
}

fn default_max_concurrent() -> i64 {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorsSection {
    #[serde(default)]
    pub enabled: Vec<i64>,
}

/// GUI config: enabled emulators/functions, concurrency cap, per-emulator
/// squad settings. `functions` maps feature name to enabled/disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuiConfig {
    #[serde(default)]
    pub emulators: EmulatorsSection,
    #[serde(default)]
    pub functions: HashMap<String, bool>,
    #[serde(default)]
    pub settings: GuiSettings,
    #[serde(default)]
    pub notifications: Vec<String>,
    #[serde(default)]
    pub emulator_settings: HashMap<String, EmulatorSettings>,
}

impl GuiConfig {
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.functions.get(name).copied().unwrap_or(false)
    }
}

/// Emulator list, autogenerated by scanning `ldconsole list2` externally and
/// loaded here as plain data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorListConfig {
    #[serde(default)]
    pub emulators: Vec<EmulatorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorEntry {
    pub id: i64,
    pub name: String,
    pub port: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_batch_window")]
    pub batch_window: i64,
    #[serde(default = "default_check_interval")]
    pub check_interval: i64,
}

fn default_batch_window() -> i64 {
    300
}

fn default_check_interval() -> i64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_window: default_batch_window(),
            check_interval: default_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanBuildingType {
    Unique,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Build,
    Upgrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingPlanEntry {
    pub name: String,
    pub count: i64,
    pub target_level: i64,
    #[serde(rename = "type")]
    pub building_type: PlanBuildingType,
    pub action: PlanAction,
}

/// `lord_<N>.buildings: [...]` loaded as a level → entries map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildingPlanConfig {
    #[serde(flatten)]
    pub lord_levels: HashMap<String, BuildingLordSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildingLordSection {
    #[serde(default)]
    pub buildings: Vec<BuildingPlanEntry>,
}

impl BuildingPlanConfig {
    pub fn entries_for_lord_level(&self, lord_level: i64) -> &[BuildingPlanEntry] {
        self.lord_levels
            .get(&format!("lord_{lord_level}"))
            .map(|s| s.buildings.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechPlanEntry {
    pub name: String,
    pub section: String,
    pub target_level: i64,
    pub max_level: i64,
    #[serde(default)]
    pub swipe_group: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionLordSection {
    #[serde(default)]
    pub techs: Vec<TechPlanEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionPlanConfig {
    #[serde(flatten)]
    pub lord_levels: HashMap<String, EvolutionLordSection>,
    #[serde(default)]
    pub swipe_config: HashMap<String, serde_yaml::Value>,
    /// Sections deferred until at least one tech in them has progress
    /// (spec.md §4.A.2).
    #[serde(default)]
    pub deferred_sections: Vec<String>,
}

impl EvolutionPlanConfig {
    pub fn entries_for_lord_level(&self, lord_level: i64) -> &[TechPlanEntry] {
        self.lord_levels
            .get(&format!("lord_{lord_level}"))
            .map(|s| s.techs.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_deferred(&self, section_name: &str) -> bool {
        self.deferred_sections.iter().any(|s| s == section_name)
    }
}

/// Per-feature operational tuning not covered by the other three files:
/// freeze horizons (spec.md §9 "surface 4h as per-feature config") and
/// refill interval bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePlanConfig {
    #[serde(default = "default_freeze_hours")]
    pub default_freeze_hours: i64,
    #[serde(default = "default_min_refill_interval")]
    pub min_refill_interval_secs: i64,
    #[serde(default = "default_max_refill_interval")]
    pub max_refill_interval_secs: i64,
}

fn default_freeze_hours() -> i64 {
    4
}

fn default_min_refill_interval() -> i64 {
    3600
}

fn default_max_refill_interval() -> i64 {
    8 * 3600
}

impl Default for FeaturePlanConfig {
    fn default() -> Self {
        Self {
            default_freeze_hours: default_freeze_hours(),
            min_refill_interval_secs: default_min_refill_interval(),
            max_refill_interval_secs: default_max_refill_interval(),
        }
    }
}
