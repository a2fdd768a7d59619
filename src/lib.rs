//! `emufleet-core`: the Scheduler–Worker–Persistence triangle for a fleet of
//! automated Android-game emulator instances.
//!
//! This crate is a library; the GUI, ADB/OCR pipeline, and `ldconsole`
//! adapter are external collaborators wired in through the
//! `emulator::EmulatorControl`/`emulator::DeviceHandle` traits.

pub mod config;
pub mod emulator;
pub mod error;
pub mod feature;
pub mod features;
pub mod freeze;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod worker;

use std::sync::Arc;

use error::FleetResult;
use freeze::FreezeRegistry;
use scheduler::{EmulatorFactory, Scheduler};
use store::StateStore;

/// Top-level lifecycle handle embedded in a GUI application with no CLI
/// surface of its own (spec.md §6): `start()`/`stop()`/`is_running()`.
pub struct FleetController {
    scheduler: Arc<Scheduler>,
}

impl FleetController {
    pub fn new(
        config_loader: Arc<dyn Fn() -> FleetResult<config::FleetConfig> + Send + Sync>,
        initial_config: config::FleetConfig,
        store: Arc<StateStore>,
        factory: Arc<dyn EmulatorFactory>,
    ) -> FleetResult<Self> {
        let freezes = Arc::new(FreezeRegistry::new());
        freezes.load_from_mirror(store.load_freeze_mirror()?);

        let features = features::build_registry(&initial_config);
        let scheduler = Arc::new(Scheduler::new(
            config_loader,
            initial_config,
            store,
            freezes,
            Arc::new(features),
            factory,
        ));
        Ok(Self { scheduler })
    }

    /// Returns `true` on successful thread launch (spec.md §6).
    pub fn start(&self) -> bool {
        self.scheduler.start()
    }

    /// Graceful, asynchronous stop.
    pub fn stop(&self) {
        self.scheduler.stop()
    }

    /// Blocks until the scheduler and all workers it joined have exited.
    pub fn join(&self) {
        self.scheduler.join()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn snapshot(&self) -> scheduler::snapshot::ScheduleSnapshot {
        self.scheduler.snapshot()
    }
}
