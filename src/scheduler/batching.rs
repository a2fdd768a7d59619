//! Event batching / compression (spec.md §4.E.1).
//!
//! Grounded on `original_source/core/bot_orchestrator.py::_calculate_optimal_launch`.

use chrono::{DateTime, Duration, Utc};

/// Compresses a time-sorted list of `(time, feature_name)` events for one
/// emulator into a single `(launch_time, reasons)` pair, amortising the
/// fixed cost of visiting an emulator (boot, load) across nearby events.
/// Events farther than `window` from the running `optimal` are left out —
/// they remain in the store and will be picked up by a later scheduling
/// iteration once they are closer.
pub fn compress(events: &[(DateTime<Utc>, String)], window: Duration) -> Option<(DateTime<Utc>, Vec<String>)> {
    let (first_time, first_reason) = events.first()?;
    let mut optimal = *first_time;
    let mut reasons = vec![first_reason.clone()];

    for (t, reason) in &events[1..] {
        let delta = *t - optimal;
        if delta <= Duration::zero() {
            reasons.push(reason.clone());
        } else if delta <= window {
            optimal = *t;
            reasons.push(reason.clone());
        } else {
            break;
        }
    }
    Some((optimal, reasons))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + Duration::seconds(secs)
    }

    #[test]
    fn merges_events_within_window() {
        let events = vec![
            (t(0), "A".to_string()),
            (t(180), "B".to_string()),
        ];
        let (launch, reasons) = compress(&events, Duration::seconds(300)).unwrap();
        assert_eq!(launch, t(180));
        assert_eq!(reasons, vec!["A", "B"]);
    }

    #[test]
    fn stops_at_events_beyond_window() {
        let events = vec![
            (t(0), "A".to_string()),
            (t(1000), "B".to_string()),
        ];
        let (launch, reasons) = compress(&events, Duration::seconds(300)).unwrap();
        assert_eq!(launch, t(0));
        assert_eq!(reasons, vec!["A"]);
    }

    #[test]
    fn zero_window_disables_batching() {
        let events = vec![
            (t(0), "A".to_string()),
            (t(1), "B".to_string()),
        ];
        let (launch, reasons) = compress(&events, Duration::zero()).unwrap();
        assert_eq!(launch, t(0));
        assert_eq!(reasons, vec!["A"]);
    }

    #[test]
    fn already_past_events_all_merge() {
        let events = vec![
            (t(100), "A".to_string()),
            (t(50), "B".to_string()),
            (t(90), "C".to_string()),
        ];
        let (launch, reasons) = compress(&events, Duration::seconds(300)).unwrap();
        assert_eq!(launch, t(100));
        assert_eq!(reasons, vec!["A", "B", "C"]);
    }
}
