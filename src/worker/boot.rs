//! Game-load three-phase ready protocol (spec.md §4.D step 4).

use std::thread;
use std::time::{Duration, Instant};

use crate::emulator::DeviceHandle;
use crate::error::{FleetError, FleetResult};

const PHASE_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const PHASE3_MAX_ATTEMPTS: u32 = 10;

const LOADING_SCREEN_MARKER: &str = "loading-screen";
const POPUP_CLOSE_MARKER: &str = "popup-close";
const WORLD_MAP_MARKER: &str = "world-map";
const GAME_PACKAGE: &str = "com.beastlord.game";
const GAME_ACTIVITY: &str = ".MainActivity";

pub fn run_game_load_protocol(device: &dyn DeviceHandle) -> FleetResult<()> {
    device.launch_activity(GAME_PACKAGE, GAME_ACTIVITY)?;

    wait_until(
        || device.screen_contains(LOADING_SCREEN_MARKER),
        "loading screen never appeared",
    )?;

    wait_until(
        || Ok(!device.screen_contains(LOADING_SCREEN_MARKER)?),
        "loading screen never disappeared",
    )?;

    for _ in 0..PHASE3_MAX_ATTEMPTS {
        if device.screen_contains(WORLD_MAP_MARKER)? {
            return Ok(());
        }
        if device.screen_contains(POPUP_CLOSE_MARKER)? {
            device.key_event(4)?;
            continue;
        }
        thread::sleep(POLL_INTERVAL);
    }
    Err(FleetError::GameLoadDrift(
        0,
        "world map never appeared after popup dismissal attempts".to_string(),
    ))
}

fn wait_until(
    mut predicate: impl FnMut() -> FleetResult<bool>,
    timeout_message: &str,
) -> FleetResult<()> {
    let start = Instant::now();
    loop {
        if predicate()? {
            return Ok(());
        }
        if start.elapsed() >= PHASE_TIMEOUT {
            return Err(FleetError::GameLoadDrift(0, timeout_message.to_string()));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
