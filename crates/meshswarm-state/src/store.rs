//! The local view of the replicated key-value store.

use std::collections::{BTreeMap, HashMap};

use meshswarm_wire::{NodeId, StateRecord};
use tracing::debug;

use crate::entry::StateEntry;

/// Watcher callback: `(key, new_value, old_value)`. The old value is `""`
/// when the key was absent.
pub type WatchFn = Box<dyn FnMut(&str, &str, &str)>;

/// Watch key that subscribes to every change.
pub const WILDCARD: &str = "*";

/// Outcome of a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalWrite {
    /// The value already matched; nothing stored, nothing fired.
    Unchanged,
    /// Stored with the given (bumped) version.
    Changed { version: u32 },
}

/// Versioned KV store with watcher fan-out.
///
/// Owned by the scheduler's single execution context; nothing here is
/// shared or locked.
#[derive(Default)]
pub struct StateStore {
    entries: BTreeMap<String, StateEntry>,
    watchers: HashMap<String, Vec<WatchFn>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("entries", &self.entries)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local write. Equal values are a no-op: no version bump, no watcher
    /// fire, and the caller must not broadcast.
    pub fn set_local(
        &mut self,
        key: &str,
        value: &str,
        origin: NodeId,
        now_ms: u64,
    ) -> LocalWrite {
        let (old_value, version) = match self.entries.get(key) {
            Some(current) if current.value == value => return LocalWrite::Unchanged,
            Some(current) => (current.value.clone(), current.version + 1),
            None => (String::new(), 1),
        };

        self.entries.insert(
            key.to_string(),
            StateEntry {
                value: value.to_string(),
                version,
                origin,
                timestamp_ms: now_ms,
            },
        );
        self.fire(key, value, &old_value);
        LocalWrite::Changed { version }
    }

    /// Merge a record received from the mesh. Returns true when the record
    /// won and was stored.
    ///
    /// An accepted record is always stored, even when the value text is
    /// unchanged, so that two synced stores agree on `(version, origin)`;
    /// watchers only fire when the value actually changed.
    pub fn apply_remote(&mut self, record: &StateRecord, now_ms: u64) -> bool {
        if record.key.is_empty() {
            return false;
        }

        let old_value = match self.entries.get(&record.key) {
            Some(current) if !current.superseded_by(record.version, record.origin) => {
                return false;
            }
            Some(current) => current.value.clone(),
            None => String::new(),
        };

        self.entries.insert(
            record.key.clone(),
            StateEntry {
                value: record.value.clone(),
                version: record.version,
                origin: record.origin,
                timestamp_ms: now_ms,
            },
        );

        if old_value != record.value {
            debug!(
                target: "state",
                key = %record.key,
                value = %record.value,
                version = record.version,
                origin = format_args!("{:x}", record.origin),
                "accepted remote state"
            );
            self.fire(&record.key, &record.value, &old_value);
        }
        true
    }

    /// Current value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    /// Current value of a key, or `default` when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Full entry for a key, version and origin included.
    pub fn entry(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    /// Wire record for a key, ready to broadcast.
    pub fn record(&self, key: &str) -> Option<StateRecord> {
        self.entries.get(key).map(|e| StateRecord {
            key: key.to_string(),
            value: e.value.clone(),
            version: e.version,
            origin: e.origin,
        })
    }

    /// Subscribe to changes of `key`, or of every key via [`WILDCARD`].
    /// Registrations are append-only.
    pub fn watch(&mut self, key: &str, callback: impl FnMut(&str, &str, &str) + 'static) {
        self.watchers
            .entry(key.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    /// Snapshot of every entry for anti-entropy sync, ordered by key.
    pub fn snapshot(&self) -> Vec<StateRecord> {
        self.entries
            .iter()
            .map(|(key, e)| StateRecord {
                key: key.clone(),
                value: e.value.clone(),
                version: e.version,
                origin: e.origin,
            })
            .collect()
    }

    /// Plain key/value view, for telemetry.
    pub fn values(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire watchers for one accepted change: key-specific first, then
    /// wildcard, each exactly once.
    fn fire(&mut self, key: &str, value: &str, old_value: &str) {
        if let Some(watchers) = self.watchers.get_mut(key) {
            for watcher in watchers.iter_mut() {
                watcher(key, value, old_value);
            }
        }
        if key != WILDCARD {
            if let Some(watchers) = self.watchers.get_mut(WILDCARD) {
                for watcher in watchers.iter_mut() {
                    watcher(key, value, old_value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(key: &str, value: &str, version: u32, origin: NodeId) -> StateRecord {
        StateRecord {
            key: key.into(),
            value: value.into(),
            version,
            origin,
        }
    }

    #[test]
    fn local_write_starts_at_version_one() {
        let mut store = StateStore::new();
        assert_eq!(
            store.set_local("mode", "on", 1, 10),
            LocalWrite::Changed { version: 1 }
        );
        let entry = store.entry("mode").unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.origin, 1);
        assert_eq!(entry.timestamp_ms, 10);
    }

    #[test]
    fn equal_value_does_not_bump_version() {
        let mut store = StateStore::new();
        store.set_local("mode", "on", 1, 0);
        assert_eq!(store.set_local("mode", "on", 1, 5), LocalWrite::Unchanged);
        assert_eq!(store.entry("mode").unwrap().version, 1);
    }

    #[test]
    fn local_write_bumps_by_exactly_one() {
        let mut store = StateStore::new();
        store.set_local("mode", "on", 1, 0);
        assert_eq!(
            store.set_local("mode", "off", 1, 1),
            LocalWrite::Changed { version: 2 }
        );
    }

    #[test]
    fn remote_acceptance_rule() {
        let mut store = StateStore::new();
        store.set_local("x", "0", 5, 0);

        // Lower version loses.
        assert!(!store.apply_remote(&record("x", "stale", 0, 1), 1));
        // Same version, higher origin loses.
        assert!(!store.apply_remote(&record("x", "b", 1, 9), 1));
        // Same version, lower origin wins.
        assert!(store.apply_remote(&record("x", "a", 1, 3), 1));
        assert_eq!(store.get("x"), Some("a"));
        // Higher version always wins.
        assert!(store.apply_remote(&record("x", "c", 2, 9), 2));
        assert_eq!(store.get("x"), Some("c"));
    }

    #[test]
    fn reapplying_same_record_is_noop() {
        let mut store = StateStore::new();
        let rec = record("k", "v", 3, 2);
        assert!(store.apply_remote(&rec, 0));
        assert!(!store.apply_remote(&rec, 1));
        assert_eq!(store.entry("k").unwrap().timestamp_ms, 0);
    }

    #[test]
    fn accepted_equal_value_updates_metadata_without_firing() {
        let mut store = StateStore::new();
        let fired = Rc::new(RefCell::new(0u32));
        let counter = Rc::clone(&fired);
        store.watch("k", move |_, _, _| *counter.borrow_mut() += 1);

        store.apply_remote(&record("k", "v", 1, 9), 0);
        assert_eq!(*fired.borrow(), 1);

        // Same value under a winning (version, origin): stored, not fired.
        assert!(store.apply_remote(&record("k", "v", 2, 3), 1));
        assert_eq!(*fired.borrow(), 1);
        let entry = store.entry("k").unwrap();
        assert_eq!((entry.version, entry.origin), (2, 3));
    }

    #[test]
    fn empty_key_ignored() {
        let mut store = StateStore::new();
        assert!(!store.apply_remote(&record("", "v", 1, 1), 0));
        assert!(store.is_empty());
    }

    #[test]
    fn watchers_fire_specific_then_wildcard() {
        let mut store = StateStore::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&order);
        store.watch("k", move |key, value, old| {
            log.borrow_mut().push(format!("k:{key}={value}<{old}"));
        });
        let log = Rc::clone(&order);
        store.watch(WILDCARD, move |key, value, old| {
            log.borrow_mut().push(format!("*:{key}={value}<{old}"));
        });

        store.set_local("k", "1", 1, 0);
        store.set_local("other", "x", 1, 0);

        assert_eq!(
            *order.borrow(),
            vec!["k:k=1<", "*:k=1<", "*:other=x<"]
        );
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let mut store = StateStore::new();
        store.set_local("b", "2", 1, 0);
        store.set_local("a", "1", 1, 0);

        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].key, "a");
        assert_eq!(snap[1].key, "b");
    }

    #[test]
    fn get_or_falls_back() {
        let store = StateStore::new();
        assert_eq!(store.get_or("missing", "default"), "default");
    }
}
