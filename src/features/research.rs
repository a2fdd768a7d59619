//! Research (evolution) feature module, wiring
//! `store::research::next_tech_to_research` to the Feature Module contract.
//! Grounded on spec.md §4.A.2/§4.C.

use chrono::{Duration, Utc};

use crate::config::schema::EvolutionPlanConfig;
use crate::error::FleetResult;
use crate::feature::{EventTime, FeatureContext, FeatureModule, RunOutcome};

pub const FEATURE_NAME: &str = "research";

pub struct ResearchFeature {
    pub plan: EvolutionPlanConfig,
}

impl ResearchFeature {
    pub fn new(plan: EvolutionPlanConfig) -> Self {
        Self { plan }
    }
}

impl FeatureModule for ResearchFeature {
    fn name(&self) -> &'static str {
        FEATURE_NAME
    }

    fn next_event_time(&self, ctx: &FeatureContext<'_>) -> FleetResult<EventTime> {
        if let Some(unfreeze_at) = ctx.freezes.unfreeze_time(ctx.emulator_id, FEATURE_NAME) {
            return Ok(EventTime::At(unfreeze_at));
        }
        if let Some(finish) = ctx.store.research_finish(ctx.emulator_id)? {
            return Ok(EventTime::At(finish));
        }
        match ctx.store.next_tech_to_research(ctx.emulator_id, &self.plan)? {
            Some(_) => Ok(EventTime::At(Utc::now())),
            None => Ok(EventTime::None),
        }
    }

    fn can_execute(&self, ctx: &FeatureContext<'_>) -> FleetResult<bool> {
        if ctx.freezes.is_frozen(ctx.emulator_id, FEATURE_NAME) {
            return Ok(false);
        }
        Ok(ctx
            .store
            .next_tech_to_research(ctx.emulator_id, &self.plan)?
            .is_some())
    }

    fn run(&self, ctx: &FeatureContext<'_>) -> FleetResult<RunOutcome> {
        let Some((tech, needs_scan)) = ctx.store.next_tech_to_research(ctx.emulator_id, &self.plan)? else {
            return Ok(RunOutcome::Skipped);
        };
        if needs_scan && !ctx.device.screen_contains("section-scanned")? {
            // Deferred section without progress: request a scan pass instead
            // of starting research blind (spec.md §4.A.2).
            return Ok(RunOutcome::Skipped);
        }

        ctx.device.tap(0, 0)?;
        let seconds = ctx.device.read_timer_seconds()?.unwrap_or(0);
        let finish_time = Utc::now() + Duration::seconds(seconds as i64);
        ctx.store.start_research(tech.id, finish_time)?;
        Ok(RunOutcome::Completed)
    }
}
