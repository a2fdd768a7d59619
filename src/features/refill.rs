//! Periodic-resource refill feature (e.g. ponds), grounded on spec.md §3's
//! two-threshold (`min_interval`/`max_interval`) rhythm.

use chrono::Duration;

use crate::error::FleetResult;
use crate::feature::{EventTime, FeatureContext, FeatureModule, RunOutcome};

pub struct RefillFeature {
    pub name: &'static str,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl RefillFeature {
    pub fn new(name: &'static str, min_interval_secs: i64, max_interval_secs: i64) -> Self {
        Self {
            name,
            min_interval: Duration::seconds(min_interval_secs),
            max_interval: Duration::seconds(max_interval_secs),
        }
    }
}

impl FeatureModule for RefillFeature {
    fn name(&self) -> &'static str {
        self.name
    }

    fn next_event_time(&self, ctx: &FeatureContext<'_>) -> FleetResult<EventTime> {
        if let Some(unfreeze_at) = ctx.freezes.unfreeze_time(ctx.emulator_id, self.name) {
            return Ok(EventTime::At(unfreeze_at));
        }
        match ctx
            .store
            .refill_due_at(ctx.emulator_id, self.name, self.max_interval)?
        {
            Some(due) => Ok(EventTime::At(due)),
            None => Ok(EventTime::EpochMin),
        }
    }

    fn can_execute(&self, ctx: &FeatureContext<'_>) -> FleetResult<bool> {
        if ctx.freezes.is_frozen(ctx.emulator_id, self.name) {
            return Ok(false);
        }
        ctx.store
            .refill_allowed(ctx.emulator_id, self.name, self.min_interval)
    }

    fn run(&self, ctx: &FeatureContext<'_>) -> FleetResult<RunOutcome> {
        if !self.can_execute(ctx)? {
            return Ok(RunOutcome::Skipped);
        }
        ctx.device.tap(0, 0)?;
        ctx.store.record_refill(ctx.emulator_id, self.name, 0)?;
        Ok(RunOutcome::Completed)
    }
}
