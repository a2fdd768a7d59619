//! Scheduler main loop (spec.md §4.E).
//!
//! Grounded on `original_source/core/bot_orchestrator.py` in full
//! (`_main_loop`, `_build_schedule`, `_calculate_optimal_launch`,
//! `_calculate_sleep_time`, `_sleep_interruptible`, `_update_schedule_data`).
//! Runs on its own `std::thread`, matching spec.md §5's "preemptive OS
//! threads" requirement and the original's `threading.Thread`-based design —
//! see DESIGN.md for why `tokio` is not used here despite being the rest of
//! the teacher workspace's default.

pub mod batching;
pub mod snapshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::FleetConfig;
use crate::emulator::{DeviceHandle, Emulator, EmulatorControl};
use crate::error::FleetResult;
use crate::feature::{FeatureContext, FeatureRegistry};
use crate::freeze::FreezeRegistry;
use crate::store::StateStore;
use crate::worker::{Worker, WorkerCoordination};
use snapshot::{ActiveEntry, QueueEntry, QueueStatus, ScheduleSnapshot, SnapshotPublisher};

/// Produces the per-emulator control/device adapters. Kept as a trait
/// (rather than bare closures) so a fake can be substituted in tests without
/// a real emulator farm, mirroring `EmulatorControl`/`DeviceHandle`'s own
/// rationale.
pub trait EmulatorFactory: Send + Sync {
    fn control(&self) -> Arc<dyn EmulatorControl>;
    fn device_for(&self, emulator: &Emulator) -> Arc<dyn DeviceHandle>;
}

struct EmulatorEvent {
    emulator: Emulator,
    launch_time: DateTime<Utc>,
    reasons: Vec<String>,
    is_new: bool,
}

pub struct Scheduler {
    config_loader: Arc<dyn Fn() -> FleetResult<FleetConfig> + Send + Sync>,
    config: Mutex<FleetConfig>,
    store: Arc<StateStore>,
    freezes: Arc<FreezeRegistry>,
    features: Arc<FeatureRegistry>,
    factory: Arc<dyn EmulatorFactory>,
    coordination: Arc<WorkerCoordination>,
    snapshot: Arc<SnapshotPublisher>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<(i64, JoinHandle<()>)>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config_loader: Arc<dyn Fn() -> FleetResult<FleetConfig> + Send + Sync>,
        initial_config: FleetConfig,
        store: Arc<StateStore>,
        freezes: Arc<FreezeRegistry>,
        features: Arc<FeatureRegistry>,
        factory: Arc<dyn EmulatorFactory>,
    ) -> Self {
        Self {
            config_loader,
            config: Mutex::new(initial_config),
            store,
            freezes,
            features,
            factory,
            coordination: Arc::new(WorkerCoordination::default()),
            snapshot: Arc::new(SnapshotPublisher::new()),
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        self.snapshot.current()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Launches the coordinator thread. Returns `true` on successful launch
    /// (spec.md §6 lifecycle contract).
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let this = Arc::clone(self);
        let handle = thread::spawn(move || this.run_loop());
        *self.thread.lock() = Some(handle);
        true
    }

    /// Graceful, asynchronous stop: the loop observes the flag within
    /// ~1 s and exits; `stop()` itself does not block on worker completion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Blocks until the coordinator thread (and therefore all workers it
    /// joined) has fully exited. Used by tests and by a caller that wants a
    /// synchronous shutdown rather than the default asynchronous one.
    pub fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn run_loop(&self) {
        info!("scheduler loop starting");
        while self.running.load(Ordering::SeqCst) {
            self.reap_finished_workers();

            let config = self.refresh_config();

            if config.gui.emulators.enabled.is_empty() || config.gui.functions.values().all(|e| !e) {
                info!("no enabled emulators/features, idling");
                self.sleep_interruptible(StdDuration::from_secs(config.scheduler.check_interval.max(1) as u64));
                continue;
            }

            let events = self.build_schedule(&config);
            let mut sorted = events;
            sorted.sort_by_key(|e| e.launch_time);

            self.dispatch(&config, &sorted);
            self.publish_snapshot(&config, &sorted);

            let sleep_secs = self.next_sleep_duration(&config, &sorted);
            self.sleep_interruptible(sleep_secs);
        }
        self.shutdown();
        info!("scheduler loop exited");
    }

    fn refresh_config(&self) -> FleetConfig {
        match (self.config_loader)() {
            Ok(cfg) => {
                *self.config.lock() = cfg.clone();
                cfg
            }
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping previous config");
                self.config.lock().clone()
            }
        }
    }

    fn reap_finished_workers(&self) {
        let mut workers = self.workers.lock();
        workers.retain(|(id, handle)| {
            if handle.is_finished() {
                info!(emulator_id = id, "worker finished, reaped");
                false
            } else {
                true
            }
        });
    }

    fn build_schedule(&self, config: &FleetConfig) -> Vec<EmulatorEvent> {
        let processing = self.coordination.processing_ids.lock().clone();
        let enabled_features: Vec<String> = config
            .gui
            .functions
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect();

        let mut out = Vec::new();
        for entry in &config.emulators.emulators {
            if !config.gui.emulators.enabled.contains(&entry.id) || processing.contains(&entry.id) {
                continue;
            }
            let emulator = Emulator::new(entry.id, entry.name.clone());
            let device = self.factory.device_for(&emulator);
            let ctx = FeatureContext {
                emulator_id: emulator.id,
                store: &self.store,
                freezes: &self.freezes,
                device: device.as_ref(),
            };

            let mut raw_events = Vec::new();
            let mut is_new = false;
            for descriptor in self.features.enabled(|name| enabled_features.iter().any(|n| n == name)) {
                match descriptor.module.next_event_time(&ctx) {
                    Ok(crate::feature::EventTime::EpochMin) => {
                        is_new = true;
                        raw_events.push((DateTime::<Utc>::MIN_UTC, descriptor.module.name().to_string()));
                    }
                    Ok(crate::feature::EventTime::At(t)) => {
                        raw_events.push((t, descriptor.module.name().to_string()));
                    }
                    Ok(crate::feature::EventTime::None) => {}
                    Err(e) => {
                        warn!(emulator_id = emulator.id, feature = descriptor.module.name(), error = %e, "next_event_time failed, skipping");
                    }
                }
            }

            if raw_events.is_empty() {
                continue;
            }
            raw_events.sort_by_key(|(t, _)| *t);

            let (launch_time, reasons) = if is_new {
                (DateTime::<Utc>::MIN_UTC, raw_events.into_iter().map(|(_, f)| f).collect())
            } else {
                let window = Duration::seconds(config.scheduler.batch_window.max(0));
                match batching::compress(&raw_events, window) {
                    Some(v) => v,
                    None => continue,
                }
            };

            out.push(EmulatorEvent {
                emulator,
                launch_time,
                reasons,
                is_new,
            });
        }
        out
    }

    fn dispatch(&self, config: &FleetConfig, events: &[EmulatorEvent]) {
        let now = Utc::now();
        let enabled_features: Vec<String> = config
            .gui
            .functions
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect();

        for event in events {
            if event.launch_time > now {
                break;
            }
            let active = self.workers.lock().len() as i64;
            if active >= config.gui.settings.max_concurrent {
                break;
            }

            self.coordination
                .processing_ids
                .lock()
                .insert(event.emulator.id);

            let worker = Worker {
                emulator: event.emulator.clone(),
                control: self.factory.control(),
                device: self.factory.device_for(&event.emulator),
                store: Arc::clone(&self.store),
                freezes: Arc::clone(&self.freezes),
                features: Arc::clone(&self.features),
                coordination: Arc::clone(&self.coordination),
                default_freeze_hours: config.features.default_freeze_hours,
                buildings: config.buildings.clone(),
                techs: config.techs.clone(),
            };
            let features_for_worker = enabled_features.clone();
            let handle = thread::spawn(move || worker.service_one_cycle(&features_for_worker));
            self.workers.lock().push((event.emulator.id, handle));
            info!(emulator_id = event.emulator.id, "dispatched worker");
        }
    }

    fn publish_snapshot(&self, config: &FleetConfig, events: &[EmulatorEvent]) {
        let now = Utc::now();
        let processing = self.coordination.processing_ids.lock().clone();

        let active = processing
            .iter()
            .filter_map(|id| {
                config
                    .emulators
                    .emulators
                    .iter()
                    .find(|e| e.id == *id)
                    .map(|e| ActiveEntry {
                        id: e.id,
                        name: e.name.clone(),
                        status: "processing",
                    })
            })
            .collect::<Vec<_>>();

        let queue = events
            .iter()
            .filter(|e| !processing.contains(&e.emulator.id))
            .map(|e| {
                let wait_minutes = (e.launch_time - now).num_minutes().max(0);
                let status = if e.is_new {
                    QueueStatus::New
                } else if e.launch_time <= now {
                    QueueStatus::Ready
                } else {
                    QueueStatus::Waiting
                };
                let launch_time = if e.is_new {
                    "NOW".to_string()
                } else if e.launch_time <= now {
                    "READY".to_string()
                } else {
                    e.launch_time.format("%H:%M").to_string()
                };
                QueueEntry {
                    id: e.emulator.id,
                    name: e.emulator.name.clone(),
                    launch_time,
                    wait_minutes,
                    reasons: e.reasons.clone(),
                    status,
                }
            })
            .collect::<Vec<_>>();

        let total_enabled = config.gui.emulators.enabled.len() as i64;
        let idle_count = total_enabled - active.len() as i64 - queue.len() as i64;

        self.snapshot.publish(ScheduleSnapshot {
            active,
            queue,
            idle_count: idle_count.max(0),
            total_enabled,
            max_concurrent: config.gui.settings.max_concurrent,
            updated_at: now,
        });
    }

    /// `clip(time_until_next_future_launch, 1s, check_interval)`.
    fn next_sleep_duration(&self, config: &FleetConfig, events: &[EmulatorEvent]) -> StdDuration {
        let now = Utc::now();
        let check_interval = config.scheduler.check_interval.max(1);
        let next_future = events.iter().map(|e| e.launch_time).find(|t| *t > now);
        let secs = match next_future {
            Some(t) => (t - now).num_seconds().clamp(1, check_interval),
            None => check_interval,
        };
        StdDuration::from_secs(secs as u64)
    }

    /// Sleeps in 1-second increments, aborting immediately on shutdown.
    fn sleep_interruptible(&self, total: StdDuration) {
        let mut remaining = total.as_secs();
        while remaining > 0 && self.running.load(Ordering::SeqCst) {
            thread::sleep(StdDuration::from_secs(1));
            remaining -= 1;
        }
    }

    fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for (id, handle) in workers {
            info!(emulator_id = id, "joining worker on shutdown");
            let _ = handle.join();
        }
        self.snapshot.clear();
    }
}
