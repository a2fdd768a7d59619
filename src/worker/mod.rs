//! Per-emulator Worker (spec.md §4.D).
//!
//! Grounded on `original_source/core/bot_orchestrator.py::_process_emulator`;
//! the `finally:` block that always stops the emulator is replaced by a
//! `Drop`-based guard (`WorkerSlotGuard`) so every early return still
//! releases the device slot, per the task's "replace try/finally with RAII"
//! instruction.

pub mod boot;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::schema::{BuildingPlanConfig, EvolutionPlanConfig};
use crate::emulator::{DeviceHandle, Emulator, EmulatorControl};
use crate::error::{FleetError, FleetResult};
use crate::feature::{FeatureContext, FeatureRegistry, RunOutcome};
use crate::freeze::FreezeRegistry;
use crate::recovery::{RestartRequest, UiRecovery};
use crate::store::StateStore;

const ADB_WAIT_TIMEOUT: StdDuration = StdDuration::from_secs(90);
const FEATURE_PACING_DELAY: StdDuration = StdDuration::from_secs(1);

/// Builder slot count is "detected at runtime per emulator" (spec.md §3);
/// the actual detection is an OCR concern this crate does not own. Bootstrap
/// uses this default until a real scan overrides it.
const DEFAULT_TOTAL_BUILDERS: i64 = 3;

/// Shared by the Scheduler and every Worker: which emulators currently have
/// a Worker assigned, and any pending restart requests raised by features.
#[derive(Default)]
pub struct WorkerCoordination {
    pub processing_ids: Mutex<std::collections::HashSet<i64>>,
    pub restart_requests: Mutex<HashMap<i64, RestartRequest>>,
}

/// Stops the emulator and frees the processing slot on every exit path,
/// including early `return`/`?`, mirroring the original's `finally:` block.
struct WorkerSlotGuard<'a> {
    control: &'a dyn EmulatorControl,
    emulator: &'a Emulator,
    coordination: &'a WorkerCoordination,
}

impl Drop for WorkerSlotGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.control.stop(self.emulator) {
            warn!(emulator_id = self.emulator.id, error = %e, "failed to stop emulator during release");
        }
        self.coordination
            .processing_ids
            .lock()
            .remove(&self.emulator.id);
    }
}

pub struct Worker {
    pub emulator: Emulator,
    pub control: Arc<dyn EmulatorControl>,
    pub device: Arc<dyn DeviceHandle>,
    pub store: Arc<StateStore>,
    pub freezes: Arc<FreezeRegistry>,
    pub features: Arc<FeatureRegistry>,
    pub coordination: Arc<WorkerCoordination>,
    pub default_freeze_hours: i64,
    pub buildings: BuildingPlanConfig,
    pub techs: EvolutionPlanConfig,
}

impl Worker {
    /// Services the emulator for one cycle. Never panics on a per-feature or
    /// per-phase failure: every fallible step converts to a `Result` the
    /// caller logs, and the guard always stops the emulator on return.
    pub fn service_one_cycle(&self, enabled_features: &[String]) {
        let _guard = WorkerSlotGuard {
            control: self.control.as_ref(),
            emulator: &self.emulator,
            coordination: self.coordination.as_ref(),
        };

        let pending_restart = self
            .coordination
            .restart_requests
            .lock()
            .get(&self.emulator.id)
            .cloned();
        if let Some(req) = pending_restart {
            match self.perform_restart(&req) {
                Ok(()) => {
                    self.coordination.restart_requests.lock().remove(&self.emulator.id);
                }
                Err(e) => {
                    error!(emulator_id = self.emulator.id, error = %e, "restart failed, will retry next cycle");
                    return;
                }
            }
        }

        if let Err(e) = self.boot() {
            warn!(emulator_id = self.emulator.id, error = %e, "boot failed, will retry next tick");
            return;
        }

        match self.store.has_records(self.emulator.id) {
            Ok(false) => {
                if let Err(e) = self.store.bootstrap_from_plan(
                    self.emulator.id,
                    DEFAULT_TOTAL_BUILDERS,
                    &self.buildings,
                    &self.techs,
                ) {
                    warn!(emulator_id = self.emulator.id, error = %e, "bootstrap failed, will retry next tick");
                }
                return;
            }
            Ok(true) => {}
            Err(e) => {
                warn!(emulator_id = self.emulator.id, error = %e, "has_records check failed, will retry next tick");
                return;
            }
        }

        if let Err(e) = self.load_game() {
            warn!(emulator_id = self.emulator.id, error = %e, "game load drift, attempting UI recovery");
            let reason = e.to_string();
            match UiRecovery::handle_stuck_state(self.device.as_ref(), self.emulator.id, &reason) {
                Ok(Some(req)) => {
                    self.coordination.restart_requests.lock().insert(self.emulator.id, req);
                }
                Ok(None) => {
                    info!(emulator_id = self.emulator.id, "UI recovery cleared stuck state, skipping rest of cycle");
                }
                Err(recovery_err) => {
                    error!(emulator_id = self.emulator.id, error = %recovery_err, "UI recovery itself failed, requesting restart");
                    self.coordination.restart_requests.lock().insert(
                        self.emulator.id,
                        RestartRequest {
                            emulator_id: self.emulator.id,
                            reason,
                            requested_at: chrono::Utc::now(),
                        },
                    );
                }
            }
            return;
        }

        self.execute_features(enabled_features);
    }

    fn perform_restart(&self, req: &RestartRequest) -> FleetResult<()> {
        info!(emulator_id = self.emulator.id, reason = %req.reason, "performing requested restart");
        self.control.stop(&self.emulator)?;
        self.control.start(&self.emulator)?;
        if !self.control.wait_for_adb_ready(&self.emulator, ADB_WAIT_TIMEOUT)? {
            return Err(FleetError::DeviceUnreachable(self.emulator.id));
        }
        Ok(())
    }

    fn boot(&self) -> FleetResult<()> {
        self.control.start(&self.emulator)?;
        let ready = self
            .control
            .wait_for_adb_ready(&self.emulator, ADB_WAIT_TIMEOUT)?;
        if !ready {
            self.control.stop(&self.emulator)?;
            return Err(FleetError::DeviceUnreachable(self.emulator.id));
        }
        Ok(())
    }

    fn load_game(&self) -> FleetResult<()> {
        boot::run_game_load_protocol(self.device.as_ref())
    }

    /// Ordered enabled features: `can_execute` false → skip; `run` error or
    /// critical failure → freeze that feature only, remaining features still
    /// run (spec.md §4.D step 5).
    fn execute_features(&self, enabled_features: &[String]) {
        let descriptors = self
            .features
            .enabled(|name| enabled_features.iter().any(|n| n == name));

        for (i, descriptor) in descriptors.iter().enumerate() {
            let ctx = FeatureContext {
                emulator_id: self.emulator.id,
                store: &self.store,
                freezes: &self.freezes,
                device: self.device.as_ref(),
            };

            match descriptor.module.can_execute(&ctx) {
                Ok(false) => {
                    info!(emulator_id = self.emulator.id, feature = descriptor.module.name(), "skip: precondition false");
                    continue;
                }
                Err(e) => {
                    warn!(emulator_id = self.emulator.id, feature = descriptor.module.name(), error = %e, "can_execute failed");
                    continue;
                }
                Ok(true) => {}
            }

            match descriptor.module.run(&ctx) {
                Ok(RunOutcome::Completed) | Ok(RunOutcome::Skipped) => {}
                Err(e) => {
                    let horizon = Duration::hours(descriptor.default_freeze_hours.max(self.default_freeze_hours));
                    self.freezes.freeze(
                        self.emulator.id,
                        descriptor.module.name(),
                        horizon,
                        Some(e.to_string()),
                    );
                    let _ = self.store.mirror_freeze(
                        self.emulator.id,
                        descriptor.module.name(),
                        chrono::Utc::now() + horizon,
                        Some(&e.to_string()),
                    );
                    warn!(emulator_id = self.emulator.id, feature = descriptor.module.name(), error = %e, "feature failed, frozen");
                }
            }

            if i + 1 < descriptors.len() {
                thread::sleep(FEATURE_PACING_DELAY);
            }
        }
    }
}
