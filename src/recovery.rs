//! UI-reset helper (spec.md §4.F).
//!
//! Grounded on `original_source/utils/recovery_manager.py`
//! (`clear_ui_state`, `is_in_exit_dialog`, `handle_stuck_state`) for
//! semantics; the retry-with-recovery decorator's shape is grounded on
//! `knhk-sidecar/src/retry.rs`'s `RetryExecutor` (`execute_sync` taking an
//! `FnMut`, a small config struct), generalized from network backoff to
//! UI-clear-between-attempts.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::emulator::DeviceHandle;
use crate::error::{FleetError, FleetResult};

const MAX_ESC_ATTEMPTS: u32 = 10;
const ESC_DELAY: Duration = Duration::from_millis(800);
const KEYEVENT_ESCAPE: i32 = 4;
const EXIT_DIALOG_MARKER: &str = "exit-the-game-dialog";

/// A restart request recorded by the stuck-state handler, consumed by the
/// Worker on its next cycle (spec.md §4.D step 2).
#[derive(Debug, Clone)]
pub struct RestartRequest {
    pub emulator_id: i64,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

pub struct UiRecovery;

impl UiRecovery {
    /// Presses ESC up to `MAX_ESC_ATTEMPTS` times, 0.8 s apart, dismissing
    /// the "Exit the game?" dialog with one extra ESC press if it appears.
    /// Returns `true` once the UI is guaranteed to be at the main screen.
    pub fn clear_ui_state(device: &dyn DeviceHandle) -> FleetResult<bool> {
        for _ in 0..MAX_ESC_ATTEMPTS {
            device.key_event(KEYEVENT_ESCAPE)?;
            thread::sleep(ESC_DELAY);
            if Self::is_in_exit_dialog(device)? {
                device.key_event(KEYEVENT_ESCAPE)?;
                return Ok(true);
            }
        }
        warn!("exhausted ESC attempts without reaching a known screen");
        Ok(false)
    }

    pub fn is_in_exit_dialog(device: &dyn DeviceHandle) -> FleetResult<bool> {
        device.screen_contains(EXIT_DIALOG_MARKER)
    }

    /// Invoked by features on unrecoverable drift. Runs the clear loop; on
    /// failure records a restart request for the Worker to consume.
    pub fn handle_stuck_state(
        device: &dyn DeviceHandle,
        emulator_id: i64,
        reason: &str,
    ) -> FleetResult<Option<RestartRequest>> {
        match Self::clear_ui_state(device) {
            Ok(true) => Ok(None),
            Ok(false) | Err(_) => {
                warn!(emulator_id, reason, "stuck state unresolved, requesting restart");
                Ok(Some(RestartRequest {
                    emulator_id,
                    reason: reason.to_string(),
                    requested_at: Utc::now(),
                }))
            }
        }
    }
}

/// Wraps an operation with up to `max_attempts` tries, each preceded (after
/// the first) by a UI clear. Used for navigation-panel operations where
/// transient popups corrupt state.
pub struct RetryWithRecovery {
    pub max_attempts: u32,
}

impl Default for RetryWithRecovery {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryWithRecovery {
    pub fn execute<F, T>(&self, device: &dyn DeviceHandle, mut op: F) -> FleetResult<T>
    where
        F: FnMut() -> FleetResult<T>,
    {
        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                UiRecovery::clear_ui_state(device)?;
            }
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => last_error = Some(e),
            }
        }
        Err(FleetError::RetryExhausted {
            attempts: self.max_attempts,
            last: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeDevice {
        exit_dialog_after: RefCell<i32>,
    }

    impl DeviceHandle for FakeDevice {
        fn tap(&self, _x: i32, _y: i32) -> FleetResult<()> {
            Ok(())
        }
        fn swipe(&self, _x1: i32, _y1: i32, _x2: i32, _y2: i32, _duration_ms: u64) -> FleetResult<()> {
            Ok(())
        }
        fn key_event(&self, _code: i32) -> FleetResult<()> {
            Ok(())
        }
        fn launch_activity(&self, _package: &str, _activity: &str) -> FleetResult<()> {
            Ok(())
        }
        fn screen_contains(&self, marker: &str) -> FleetResult<bool> {
            if marker != EXIT_DIALOG_MARKER {
                return Ok(false);
            }
            let mut n = self.exit_dialog_after.borrow_mut();
            *n -= 1;
            Ok(*n <= 0)
        }
        fn read_timer_seconds(&self) -> FleetResult<Option<u64>> {
            Ok(None)
        }
    }

    #[test]
    fn retry_succeeds_after_failures() {
        let device = FakeDevice {
            exit_dialog_after: RefCell::new(100),
        };
        let retry = RetryWithRecovery { max_attempts: 3 };
        let mut calls = 0;
        let result = retry.execute(&device, || {
            calls += 1;
            if calls < 3 {
                Err(FleetError::Internal("transient".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retry_exhausted_surfaces_last_error() {
        let device = FakeDevice {
            exit_dialog_after: RefCell::new(100),
        };
        let retry = RetryWithRecovery { max_attempts: 2 };
        let result: FleetResult<()> =
            retry.execute(&device, || Err(FleetError::Internal("still failing".into())));
        assert!(matches!(result, Err(FleetError::RetryExhausted { attempts: 2, .. })));
    }
}
