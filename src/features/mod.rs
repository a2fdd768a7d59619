pub mod building;
pub mod refill;
pub mod research;

use crate::config::FleetConfig;
use crate::feature::{FeatureDescriptor, FeatureRegistry};

/// The fixed feature registration DESIGN.md calls for: a declared order
/// (cheap periodic features before the core construction/research loop,
/// spec.md §4.C), built once from loaded config. The Worker intersects this
/// with the user's enabled set at dispatch time.
pub fn build_registry(config: &FleetConfig) -> FeatureRegistry {
    let default_freeze_hours = config.features.default_freeze_hours;
    FeatureRegistry::new(vec![
        FeatureDescriptor {
            module: Box::new(refill::RefillFeature::new(
                "ponds",
                config.features.min_refill_interval_secs,
                config.features.max_refill_interval_secs,
            )),
            default_freeze_hours,
        },
        FeatureDescriptor {
            module: Box::new(building::BuildingFeature::new(config.buildings.clone())),
            default_freeze_hours,
        },
        FeatureDescriptor {
            module: Box::new(research::ResearchFeature::new(config.techs.clone())),
            default_freeze_hours,
        },
    ])
}
