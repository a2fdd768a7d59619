//! Emulator descriptor and the external-collaborator boundary traits
//! (spec.md §3, §6).
//!
//! `EmulatorControl`/`DeviceHandle` wrap the `ldconsole`/ADB/OCR surface that
//! is explicitly out of scope (spec.md §1), grounded on `knhk-sidecar`'s
//! pattern of wrapping an external dependency (`knhk_connectors::CircuitBreaker`)
//! behind a local adapter trait so the rest of the crate is testable against
//! fakes without a real emulator farm.

use std::time::Duration;

use crate::error::FleetResult;

/// Identity `{id, name, port}`, `port = 5554 + 2*id`. Loaded from config,
/// never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emulator {
    pub id: i64,
    pub name: String,
    pub port: i64,
}

impl Emulator {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            port: 5554 + 2 * id,
        }
    }
}

/// The `ldconsole.exe`-equivalent controller: start/stop/discover instances.
pub trait EmulatorControl: Send + Sync {
    fn start(&self, emulator: &Emulator) -> FleetResult<()>;
    fn stop(&self, emulator: &Emulator) -> FleetResult<()>;
    fn wait_for_adb_ready(&self, emulator: &Emulator, timeout: Duration) -> FleetResult<bool>;
}

/// The ADB/screen surface a running emulator exposes: tap/swipe/keyevent,
/// screen capture, activity launch, and OCR/template-match reads. All
/// concrete image/OCR work is out of scope (spec.md §1); this trait is the
/// seam a real implementation plugs into.
pub trait DeviceHandle: Send + Sync {
    fn tap(&self, x: i32, y: i32) -> FleetResult<()>;
    fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> FleetResult<()>;
    fn key_event(&self, code: i32) -> FleetResult<()>;
    fn launch_activity(&self, package: &str, activity: &str) -> FleetResult<()>;
    fn screen_contains(&self, marker: &str) -> FleetResult<bool>;

    /// OCR-backed read of an in-progress timer (construction/research clock)
    /// after a feature has initiated an action. The OCR pipeline itself is
    /// out of scope (spec.md §1); this is the seam a real implementation
    /// plugs an OCR reader into.
    fn read_timer_seconds(&self) -> FleetResult<Option<u64>>;
}
