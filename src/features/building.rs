//! Building feature module: wires the store's selection algorithm
//! (`store::building::next_building_to_upgrade`) to the Feature Module
//! contract. Grounded on spec.md §4.A.1/§4.C.

use chrono::{Duration, Utc};

use crate::config::schema::BuildingPlanConfig;
use crate::error::{FleetError, FleetResult};
use crate::feature::{EventTime, FeatureContext, FeatureModule, RunOutcome};

pub const FEATURE_NAME: &str = "building";

/// Holds the whole plan (indexed by lord level) rather than a flat slice, so
/// each call re-derives the entries for the emulator's *current* lord level
/// as it progresses, mirroring `ResearchFeature`'s per-row `lord_level` gate.
pub struct BuildingFeature {
    pub plan: BuildingPlanConfig,
}

impl BuildingFeature {
    pub fn new(plan: BuildingPlanConfig) -> Self {
        Self { plan }
    }
}

impl FeatureModule for BuildingFeature {
    fn name(&self) -> &'static str {
        FEATURE_NAME
    }

    fn next_event_time(&self, ctx: &FeatureContext<'_>) -> FleetResult<EventTime> {
        if let Some(unfreeze_at) = ctx.freezes.unfreeze_time(ctx.emulator_id, FEATURE_NAME) {
            return Ok(EventTime::At(unfreeze_at));
        }
        if !ctx.store.has_records(ctx.emulator_id)? {
            return Ok(EventTime::EpochMin);
        }
        if let Some(finish) = ctx.store.nearest_builder_finish(ctx.emulator_id)? {
            return Ok(EventTime::At(finish));
        }
        let lord_level = ctx.store.current_lord_level(ctx.emulator_id)?;
        let entries = self.plan.entries_for_lord_level(lord_level);
        match ctx.store.next_building_to_upgrade(ctx.emulator_id, entries)? {
            Some(_) => Ok(EventTime::At(Utc::now())),
            None => Ok(EventTime::None),
        }
    }

    fn can_execute(&self, ctx: &FeatureContext<'_>) -> FleetResult<bool> {
        if ctx.freezes.is_frozen(ctx.emulator_id, FEATURE_NAME) {
            return Ok(false);
        }
        let lord_level = ctx.store.current_lord_level(ctx.emulator_id)?;
        let entries = self.plan.entries_for_lord_level(lord_level);
        Ok(ctx.store.next_building_to_upgrade(ctx.emulator_id, entries)?.is_some())
    }

    fn run(&self, ctx: &FeatureContext<'_>) -> FleetResult<RunOutcome> {
        let lord_level = ctx.store.current_lord_level(ctx.emulator_id)?;
        let entries = self.plan.entries_for_lord_level(lord_level);
        let Some(candidate) = ctx.store.next_building_to_upgrade(ctx.emulator_id, entries)? else {
            return Ok(RunOutcome::Skipped);
        };
        let Some(slot) = ctx.store.get_free_builder(ctx.emulator_id)? else {
            return Err(FleetError::NoFreeBuilder(ctx.emulator_id));
        };

        // Device-touching half: navigate to the building, tap upgrade.
        // Concrete tap coordinates are a per-building UI detail outside the
        // scope covered here; `device` is the seam a real adapter fills in.
        ctx.device.tap(0, 0)?;

        let seconds = ctx.device.read_timer_seconds()?.unwrap_or(0);
        let finish_time = Utc::now() + Duration::seconds(seconds as i64);

        if candidate.id < 0 {
            ctx.store.start_construction(
                ctx.emulator_id,
                &candidate.building_name,
                candidate.building_type,
                candidate.target_level,
                slot.builder_slot,
                finish_time,
            )?;
        } else {
            ctx.store
                .start_upgrade(candidate.id, slot.builder_slot, finish_time)?;
        }
        Ok(RunOutcome::Completed)
    }
}
