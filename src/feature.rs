//! Feature Module contract (spec.md §4.C).
//!
//! `run` returns `Result<RunOutcome, FleetError>` rather than a three-way
//! `{ok, ok-skipped, failed}` enum: `Err` already carries "failed"
//! idiomatically, including the critical-failure classification via
//! `FleetError::is_critical_feature_failure`, so only the non-error half
//! (`Completed` vs `Skipped`) needs its own type. Design choice recorded in
//! DESIGN.md.

use chrono::{DateTime, Utc};

use crate::emulator::DeviceHandle;
use crate::error::FleetResult;
use crate::freeze::FreezeRegistry;
use crate::store::StateStore;

/// One of the four `next_event_time` outcomes of spec.md §4.C.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// "Needs emulator immediately, first-run initialisation pending."
    EpochMin,
    At(DateTime<Utc>),
    /// Nothing to do / feature is a stub.
    None,
}

impl EventTime {
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::EpochMin => Some(DateTime::<Utc>::MIN_UTC),
            EventTime::At(t) => Some(t),
            EventTime::None => None,
        }
    }

    pub fn is_epoch_min(self) -> bool {
        matches!(self, EventTime::EpochMin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Precondition was false; `run` did no device work.
    Skipped,
}

/// Shared context passed to every feature call for one emulator cycle.
pub struct FeatureContext<'a> {
    pub emulator_id: i64,
    pub store: &'a StateStore,
    pub freezes: &'a FreezeRegistry,
    pub device: &'a dyn DeviceHandle,
}

pub trait FeatureModule: Send + Sync {
    /// Stable identifier, also the Freeze Registry key's `function_name`.
    fn name(&self) -> &'static str;

    /// Pure function of the store. Must consult the Freeze Registry first:
    /// a frozen feature returns its unfreeze time (or `None` if there would
    /// be no other work once unfrozen).
    fn next_event_time(&self, ctx: &FeatureContext<'_>) -> FleetResult<EventTime>;

    /// Cheap, side-effect-free precondition.
    fn can_execute(&self, ctx: &FeatureContext<'_>) -> FleetResult<bool>;

    /// Device-touching execution. Errors are treated by the Worker as a
    /// critical failure of this feature only (spec.md §4.D step 5).
    fn run(&self, ctx: &FeatureContext<'_>) -> FleetResult<RunOutcome>;
}

/// A fixed-order registration: short/cheap features first, core gameplay
/// features last (spec.md §4.C), intersected with the user's enabled set at
/// dispatch time by the Worker. Replaces the original's runtime class
/// lookup keyed by feature name (spec.md §9 "Dynamic feature registry").
pub struct FeatureDescriptor {
    pub module: Box<dyn FeatureModule>,
    pub default_freeze_hours: i64,
}

pub struct FeatureRegistry {
    descriptors: Vec<FeatureDescriptor>,
}

impl FeatureRegistry {
    pub fn new(descriptors: Vec<FeatureDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Descriptors in fixed declared order, filtered to the enabled set.
    pub fn enabled<'a>(&'a self, is_enabled: impl Fn(&str) -> bool + 'a) -> Vec<&'a FeatureDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| is_enabled(d.module.name()))
            .collect()
    }

    pub fn all(&self) -> &[FeatureDescriptor] {
        &self.descriptors
    }
}
