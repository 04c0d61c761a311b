//! Shared context store — how steps hand intermediate results to each other.
//!
//! Values are scoped two levels deep: an outer scope (a step id, or the
//! sentinel `"global"` scope for flow-wide values) and an inner key. Every
//! entry carries the unix timestamp it was written at and expires silently
//! once older than the store's TTL — readers never see a stale value, they
//! just see nothing, exactly as the original `ContextManager` behaves.
//!
//! All access is serialized by a single mutex. Context stores are not
//! expected to be a throughput bottleneck: steps write once on completion
//! and read a handful of keys, so a single lock is simpler than fine-grained
//! per-scope locking and matches the Python original's single
//! `threading.Lock`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone)]
struct ContextEntry {
    value: Value,
    timestamp: u64,
}

impl ContextEntry {
    fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.timestamp) > ttl.as_secs()
    }
}

pub struct ContextStore {
    ttl: Duration,
    scopes: Mutex<HashMap<String, HashMap<String, ContextEntry>>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    fn scope_key(step_id: Option<&str>) -> String {
        step_id.unwrap_or(GLOBAL_SCOPE).to_string()
    }

    /// Writes `key` into `step_id`'s scope (or the global scope if `None`).
    pub fn set(&self, key: &str, value: Value, step_id: Option<&str>) {
        let scope = Self::scope_key(step_id);
        let mut scopes = self.scopes.lock().unwrap();
        scopes.entry(scope).or_default().insert(
            key.to_string(),
            ContextEntry {
                value,
                timestamp: now_secs(),
            },
        );
    }

    /// Reads `key` from the given scope, evicting it first if expired.
    pub fn get(&self, key: &str, step_id: Option<&str>) -> Option<Value> {
        let scope = Self::scope_key(step_id);
        let now = now_secs();
        let mut scopes = self.scopes.lock().unwrap();
        let entries = scopes.get_mut(&scope)?;
        let expired = entries.get(key).map(|e| e.is_expired(now, self.ttl));
        match expired {
            Some(true) => {
                entries.remove(key);
                None
            }
            Some(false) => entries.get(key).map(|e| e.value.clone()),
            None => None,
        }
    }

    /// All non-expired key/value pairs in the given scope. Expired entries
    /// encountered along the way are evicted, same as a `get`.
    pub fn get_all(&self, step_id: Option<&str>) -> HashMap<String, Value> {
        let scope = Self::scope_key(step_id);
        let now = now_secs();
        let mut scopes = self.scopes.lock().unwrap();
        let Some(entries) = scopes.get_mut(&scope) else {
            return HashMap::new();
        };
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now, self.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired_keys {
            entries.remove(key);
        }
        entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Drops an entire scope, or every scope if `step_id` is `None`.
    pub fn clear(&self, step_id: Option<&str>) {
        let mut scopes = self.scopes.lock().unwrap();
        match step_id {
            Some(id) => {
                scopes.remove(id);
            }
            None => scopes.clear(),
        }
    }

    /// Removes every expired entry across all scopes, dropping scopes left
    /// empty as a result. Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_secs();
        let mut scopes = self.scopes.lock().unwrap();
        let mut removed = 0;
        scopes.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now, self.ttl));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_roundtrips_in_scope() {
        let store = ContextStore::new(Duration::from_secs(3600));
        store.set("x", json!(1), Some("step1"));
        assert_eq!(store.get("x", Some("step1")), Some(json!(1)));
        assert_eq!(store.get("x", Some("step2")), None);
    }

    #[test]
    fn defaults_to_global_scope() {
        let store = ContextStore::new(Duration::from_secs(3600));
        store.set("x", json!("v"), None);
        assert_eq!(store.get("x", None), Some(json!("v")));
        assert_eq!(store.get("x", Some(GLOBAL_SCOPE)), Some(json!("v")));
    }

    #[test]
    fn expired_entries_are_evicted_silently() {
        let store = ContextStore::new(Duration::from_secs(0));
        store.set("x", json!(1), None);
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(store.get("x", None), None);
    }

    #[test]
    fn get_all_drops_expired_and_keeps_live() {
        let store = ContextStore::new(Duration::from_secs(3600));
        store.set("a", json!(1), Some("s"));
        store.set("b", json!(2), Some("s"));
        let all = store.get_all(Some("s"));
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("a"), Some(&json!(1)));
    }

    #[test]
    fn clear_specific_scope_leaves_others() {
        let store = ContextStore::new(Duration::from_secs(3600));
        store.set("a", json!(1), Some("s1"));
        store.set("b", json!(2), Some("s2"));
        store.clear(Some("s1"));
        assert_eq!(store.get("a", Some("s1")), None);
        assert_eq!(store.get("b", Some("s2")), Some(json!(2)));
    }

    #[test]
    fn cleanup_expired_counts_and_drops_empty_scopes() {
        let store = ContextStore::new(Duration::from_secs(0));
        store.set("a", json!(1), Some("s1"));
        store.set("b", json!(2), Some("s2"));
        std::thread::sleep(Duration::from_millis(1100));
        let removed = store.cleanup_expired();
        assert_eq!(removed, 2);
        assert_eq!(store.get_all(Some("s1")).len(), 0);
    }
}
