//! In-memory freeze registry (spec.md §4.B).
//!
//! Grounded on `knhk-sidecar/src/circuit_breaker.rs`'s `CircuitBreakerRegistry`:
//! per-key independent state behind one mutex, accessed only through owning
//! methods. Semantics follow `original_source/utils/function_freeze_manager.py`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct FreezeKey {
    emulator_id: i64,
    function_name: String,
}

#[derive(Debug, Clone)]
struct FreezeEntry {
    unfreeze_at: DateTime<Utc>,
    reason: Option<String>,
}

/// Authoritative source of freeze decisions. The state store's
/// `function_freeze` table is a best-effort mirror, written after a
/// successful call here, used only to rebuild this registry on restart.
#[derive(Debug, Default)]
pub struct FreezeRegistry {
    entries: Mutex<HashMap<FreezeKey, FreezeEntry>>,
}

impl FreezeRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrites any existing freeze for this key (later failure supersedes
    /// earlier, spec.md §4.B).
    pub fn freeze(
        &self,
        emulator_id: i64,
        function_name: &str,
        horizon: Duration,
        reason: Option<String>,
    ) -> DateTime<Utc> {
        let unfreeze_at = Utc::now() + horizon;
        let key = FreezeKey {
            emulator_id,
            function_name: function_name.to_string(),
        };
        self.entries.lock().insert(
            key,
            FreezeEntry {
                unfreeze_at,
                reason,
            },
        );
        unfreeze_at
    }

    /// Lazily evicts the entry if it has expired, then answers.
    pub fn is_frozen(&self, emulator_id: i64, function_name: &str) -> bool {
        self.unfreeze_time(emulator_id, function_name).is_some()
    }

    /// `None` if not frozen (or the freeze already expired, in which case it
    /// is evicted as a side effect of this call).
    pub fn unfreeze_time(&self, emulator_id: i64, function_name: &str) -> Option<DateTime<Utc>> {
        let key = FreezeKey {
            emulator_id,
            function_name: function_name.to_string(),
        };
        let mut entries = self.entries.lock();
        let now = Utc::now();
        match entries.get(&key) {
            Some(entry) if entry.unfreeze_at > now => Some(entry.unfreeze_at),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn unfreeze(&self, emulator_id: i64, function_name: &str) {
        let key = FreezeKey {
            emulator_id,
            function_name: function_name.to_string(),
        };
        self.entries.lock().remove(&key);
    }

    pub fn unfreeze_all(&self, emulator_id: i64) {
        self.entries
            .lock()
            .retain(|k, _| k.emulator_id != emulator_id);
    }

    /// Live, non-expired freezes for one emulator: `(function_name, unfreeze_at)`.
    pub fn frozen_functions(&self, emulator_id: i64) -> Vec<(String, DateTime<Utc>)> {
        let now = Utc::now();
        self.entries
            .lock()
            .iter()
            .filter(|(k, e)| k.emulator_id == emulator_id && e.unfreeze_at > now)
            .map(|(k, e)| (k.function_name.clone(), e.unfreeze_at))
            .collect()
    }

    /// All live freezes across every emulator, used to rebuild the store
    /// mirror and for restart recovery seeding.
    pub fn all_freezes(&self) -> Vec<(i64, String, DateTime<Utc>, Option<String>)> {
        let now = Utc::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.unfreeze_at > now)
            .map(|(k, e)| (k.emulator_id, k.function_name.clone(), e.unfreeze_at, e.reason.clone()))
            .collect()
    }

    /// Seeds the registry from persisted mirror rows on process start.
    /// Rows whose deadline has already passed are dropped, per spec.md §9.
    pub fn load_from_mirror(&self, rows: Vec<(i64, String, DateTime<Utc>, Option<String>)>) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        for (emulator_id, function_name, unfreeze_at, reason) in rows {
            if unfreeze_at > now {
                entries.insert(
                    FreezeKey {
                        emulator_id,
                        function_name,
                    },
                    FreezeEntry { unfreeze_at, reason },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_shortens_not_lengthens() {
        let reg = FreezeRegistry::new();
        reg.freeze(1, "building", Duration::hours(4), None);
        let t2 = reg.freeze(1, "building", Duration::hours(2), None);
        let got = reg.unfreeze_time(1, "building").unwrap();
        assert_eq!(got, t2);
        assert!(got < Utc::now() + Duration::hours(3));
    }

    #[test]
    fn independent_keys() {
        let reg = FreezeRegistry::new();
        reg.freeze(1, "building", Duration::hours(1), None);
        assert!(reg.is_frozen(1, "building"));
        assert!(!reg.is_frozen(1, "research"));
        assert!(!reg.is_frozen(2, "building"));
    }

    #[test]
    fn expired_entry_evicted_on_read() {
        let reg = FreezeRegistry::new();
        reg.freeze(1, "building", Duration::hours(-1), None);
        assert!(!reg.is_frozen(1, "building"));
        assert!(reg.frozen_functions(1).is_empty());
    }
}
