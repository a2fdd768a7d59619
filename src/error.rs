//! Crate-wide error type.
//!
//! Grounded on `knhk-sidecar/src/error.rs`: one flat `thiserror` enum plus a
//! free `is_retryable`/`is_critical` classifier, rather than per-module error
//! types. Section 7 of the spec draws a line between failures that should be
//! retried later (device unreachable, game-load drift) and failures that
//! should freeze a single feature; `FleetError` carries that distinction.

use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("emulator {0} unreachable")]
    DeviceUnreachable(i64),

    #[error("game failed to load on emulator {0}: {1}")]
    GameLoadDrift(i64, String),

    #[error("feature '{feature}' failed on emulator {emu}: {reason}")]
    FeatureFailed {
        emu: i64,
        feature: String,
        reason: String,
    },

    #[error("no free builder slot on emulator {0}")]
    NoFreeBuilder(i64),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Transient, worth a retry on the next scheduler tick or within a
    /// retry-with-recovery decorator (spec.md §7, §4.F).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::DeviceUnreachable(_) | FleetError::GameLoadDrift(_, _)
        )
    }

    /// Critical from the perspective of a single feature's `run`: the Worker
    /// converts this into a freeze of that feature only (spec.md §4.D step 5).
    pub fn is_critical_feature_failure(&self) -> bool {
        matches!(self, FleetError::FeatureFailed { .. })
    }
}
