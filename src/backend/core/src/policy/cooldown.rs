//! Cooldown table: `cooldownKey -> (suggestion id, expiry)`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownEntry {
    pub suggestion_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Suppresses semantically duplicate suggestions within a window.
///
/// All reads and writes of one policy run happen under a single lock
/// acquisition (see [`CooldownTable::with_guard`]), so concurrent runs
/// cannot both claim the same key.
#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: Mutex<HashMap<String, CooldownEntry>>,
}

/// Exclusive access to the table for the duration of one run.
pub struct CooldownGuard<'a> {
    entries: parking_lot::MutexGuard<'a, HashMap<String, CooldownEntry>>,
    now: DateTime<Utc>,
}

impl CooldownGuard<'_> {
    /// Admit `suggestion_id` under `key`, claiming the key if it is free.
    ///
    /// Returns `false` when an unexpired entry names a different suggestion.
    /// Re-admitting the current holder does not extend its window.
    pub fn admit(&mut self, key: &str, suggestion_id: &str, window: chrono::Duration) -> bool {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > self.now {
                return entry.suggestion_id == suggestion_id;
            }
        }
        self.entries.insert(
            key.to_string(),
            CooldownEntry {
                suggestion_id: suggestion_id.to_string(),
                expires_at: self.now + window,
            },
        );
        true
    }
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the table locked.
    pub fn with_guard<R>(&self, now: DateTime<Utc>, f: impl FnOnce(&mut CooldownGuard<'_>) -> R) -> R {
        let entries = self.entries.lock();
        let mut guard = CooldownGuard { entries, now };
        f(&mut guard)
    }

    /// Drop expired entries, returning the suggestion ids that expired.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut entries = self.entries.lock();
        let mut expired = Vec::new();
        entries.retain(|_, e| {
            let live = e.expires_at > now;
            if !live {
                expired.push(e.suggestion_id.clone());
            }
            live
        });
        expired.sort();
        expired
    }

    pub fn get(&self, key: &str) -> Option<CooldownEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_claims_and_suppresses() {
        let table = CooldownTable::new();
        let window = Duration::hours(1);

        assert!(table.with_guard(t0(), |g| g.admit("k", "a", window)));
        assert!(table.with_guard(t0(), |g| g.admit("k", "a", window)));
        assert!(!table.with_guard(t0(), |g| g.admit("k", "b", window)));
    }

    #[test]
    fn test_same_id_does_not_extend() {
        let table = CooldownTable::new();
        let window = Duration::hours(1);

        table.with_guard(t0(), |g| g.admit("k", "a", window));
        table.with_guard(t0() + Duration::minutes(50), |g| g.admit("k", "a", window));

        assert_eq!(table.get("k").unwrap().expires_at, t0() + window);
    }

    #[test]
    fn test_expiry_frees_key() {
        let table = CooldownTable::new();
        let window = Duration::hours(1);
        table.with_guard(t0(), |g| g.admit("k", "a", window));

        let later = t0() + Duration::hours(2);
        assert!(table.with_guard(later, |g| g.admit("k", "b", window)));
        assert_eq!(table.get("k").unwrap().suggestion_id, "b");
    }

    #[test]
    fn test_sweep_reports_expired() {
        let table = CooldownTable::new();
        table.with_guard(t0(), |g| {
            g.admit("short", "s", Duration::minutes(5));
            g.admit("long", "l", Duration::hours(5));
        });

        assert_eq!(table.sweep(t0() + Duration::minutes(10)), vec!["s".to_string()]);
        assert_eq!(table.len(), 1);
    }
}
