//! Config loading: YAML files plus environment-variable overrides.
//!
//! Grounded on `knhk-sidecar/src/config.rs` (`from_file`, section-struct
//! composition) and `knhk-config/src/env.rs` (env > file > defaults,
//! `apply_env_overrides` iterating `env::vars()` for a fixed prefix).

pub mod schema;

use std::env;
use std::path::Path;

use crate::error::{FleetError, FleetResult};
use schema::{
    BuildingPlanConfig, EmulatorListConfig, EvolutionPlanConfig, FeaturePlanConfig, GuiConfig,
    SchedulerConfig,
};

/// Everything the Scheduler/Worker need, loaded once at startup and re-read
/// each scheduling iteration for `gui`/`scheduler` (spec.md §4.E step 1);
/// `buildings`/`techs`/`emulators` are effectively static per process.
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub gui: GuiConfig,
    pub emulators: EmulatorListConfig,
    pub scheduler: SchedulerConfig,
    pub buildings: BuildingPlanConfig,
    pub techs: EvolutionPlanConfig,
    pub features: FeaturePlanConfig,
}

const ENV_PREFIX: &str = "EMUFLEET";

pub struct ConfigPaths<'a> {
    pub gui: &'a Path,
    pub emulators: &'a Path,
    pub scheduler: &'a Path,
    pub buildings: &'a Path,
    pub techs: &'a Path,
}

pub fn load_fleet_config(paths: ConfigPaths<'_>) -> FleetResult<FleetConfig> {
    let gui: GuiConfig = load_yaml(paths.gui)?;
    let emulators: EmulatorListConfig = load_yaml(paths.emulators)?;
    let mut scheduler: SchedulerConfig = load_yaml(paths.scheduler)?;
    let buildings: BuildingPlanConfig = load_yaml(paths.buildings)?;
    let techs: EvolutionPlanConfig = load_yaml(paths.techs)?;
    let features = FeaturePlanConfig::default();

    apply_env_overrides(&mut scheduler);

    Ok(FleetConfig {
        gui,
        emulators,
        scheduler,
        buildings,
        techs,
        features,
    })
}

fn load_yaml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> FleetResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| FleetError::Config(format!("reading {}: {e}", path.display())))?;
    serde_yaml::from_str(&text)
        .map_err(|e| FleetError::Config(format!("parsing {}: {e}", path.display())))
}

/// `EMUFLEET_MAX_CONCURRENT`, `EMUFLEET_CHECK_INTERVAL`, `EMUFLEET_BATCH_WINDOW`
/// override the scheduler tunables loaded from file, mirroring
/// `knhk-config`'s `KNHK_<CONNECTOR>_<SETTING>` override pass.
fn apply_env_overrides(scheduler: &mut SchedulerConfig) {
    if let Some(v) = env_i64("CHECK_INTERVAL") {
        scheduler.check_interval = v;
    }
    if let Some(v) = env_i64("BATCH_WINDOW") {
        scheduler.batch_window = v;
    }
}

fn env_i64(suffix: &str) -> Option<i64> {
    env::var(format!("{ENV_PREFIX}_{suffix}"))
        .ok()
        .and_then(|v| v.parse().ok())
}

/// `EMUFLEET_DB_PATH` overrides the store path independent of the other
/// config files, since it is a deployment concern rather than a gameplay one.
pub fn db_path_override() -> Option<String> {
    env::var(format!("{ENV_PREFIX}_DB_PATH")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let cfg: GuiConfig = load_yaml(&missing).unwrap();
        assert!(cfg.functions.is_empty());
    }
}
