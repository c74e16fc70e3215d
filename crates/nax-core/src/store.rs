// ── State store ──
//
// Owns the merged state document and the two subscription registries
// (path callbacks and connection callbacks). Callbacks are snapshotted
// under the registry lock and invoked after it is released, so a
// callback may subscribe, unsubscribe, or read the store without
// deadlocking.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, error, trace};

use crate::merge::{Document, merge};
use crate::path::{DataPath, PathError, enumerate_paths, resolve};

/// Invoked with the changed path and its value inside the fragment.
pub type DataCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Invoked with `true` once the stream is up, `false` whenever it drops
/// (and again after each failed reconnect attempt).
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by a subscription, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Registration<C> {
    id: SubscriptionId,
    callback: C,
}

pub struct StateStore {
    document: RwLock<Document>,
    subscriptions: Mutex<HashMap<String, Vec<Registration<DataCallback>>>>,
    connection_subscriptions: Mutex<Vec<Registration<ConnectionCallback>>>,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            document: RwLock::new(Document::new()),
            subscriptions: Mutex::new(HashMap::new()),
            connection_subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ── Document ─────────────────────────────────────────────────────

    /// Merge a fragment into the document, then notify every subscriber
    /// whose path appears in the fragment. Returns the number of
    /// callbacks invoked.
    ///
    /// A fragment only triggers subscriptions on paths it contains. A
    /// subscriber on `A.B` is not told about a fragment touching only
    /// `A.C`, but one on `A` is told about both.
    pub fn ingest(&self, fragment: &Value) -> usize {
        let Some(map) = fragment.as_object().filter(|m| !m.is_empty()) else {
            trace!("empty fragment");
            return 0;
        };

        merge(&mut write(&self.document), fragment);

        let pending: Vec<(String, Vec<DataCallback>)> = {
            let subscriptions = lock(&self.subscriptions);
            if subscriptions.is_empty() {
                return 0;
            }
            enumerate_paths(map)
                .into_iter()
                .filter_map(|path| {
                    let callbacks: Vec<DataCallback> = subscriptions
                        .get(&path)?
                        .iter()
                        .map(|r| Arc::clone(&r.callback))
                        .collect();
                    Some((path, callbacks))
                })
                .collect()
        };

        let mut invoked = 0;
        for (path, callbacks) in pending {
            let Some(value) = resolve(map, &path) else {
                continue;
            };
            for callback in callbacks {
                invoke_data(&callback, &path, value);
                invoked += 1;
            }
        }
        invoked
    }

    /// Current value at a dotted path, or `None` if any segment is absent.
    pub fn get(&self, path: &str) -> Option<Value> {
        resolve(&read(&self.document), path).cloned()
    }

    /// Deep copy of the whole document.
    pub fn snapshot(&self) -> Document {
        read(&self.document).clone()
    }

    /// Drop all state. Subscriptions are kept.
    pub fn clear(&self) {
        write(&self.document).clear();
    }

    // ── Path subscriptions ───────────────────────────────────────────

    /// Register `callback` for `path`. With `trigger_current_value`, the
    /// callback fires once immediately if the path already resolves to a
    /// non-null value.
    pub fn subscribe<F>(
        &self,
        path: &str,
        callback: F,
        trigger_current_value: bool,
    ) -> Result<SubscriptionId, PathError>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let key = DataPath::parse(path)?.to_string();
        let callback: DataCallback = Arc::new(callback);
        let id = self.next_id();

        lock(&self.subscriptions)
            .entry(key.clone())
            .or_default()
            .push(Registration {
                id,
                callback: Arc::clone(&callback),
            });
        debug!(path = %key, ?id, "subscribed");

        if trigger_current_value {
            if let Some(value) = self.get(&key).filter(|v| !v.is_null()) {
                invoke_data(&callback, &key, &value);
            }
        }
        Ok(id)
    }

    /// Remove one subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, path: &str, id: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let Some(registrations) = subscriptions.get_mut(path) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            subscriptions.remove(path);
        }
        removed
    }

    /// Number of live subscriptions on `path`.
    pub fn subscription_count(&self, path: &str) -> usize {
        lock(&self.subscriptions).get(path).map_or(0, Vec::len)
    }

    // ── Connection subscriptions ─────────────────────────────────────

    /// Register a connection callback. With `trigger_current_value`, it
    /// fires immediately with the current connected flag.
    pub fn subscribe_connection<F>(&self, callback: F, trigger_current_value: bool) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback: ConnectionCallback = Arc::new(callback);
        let id = self.next_id();
        lock(&self.connection_subscriptions).push(Registration {
            id,
            callback: Arc::clone(&callback),
        });
        if trigger_current_value {
            invoke_connection(&callback, self.is_connected());
        }
        id
    }

    pub fn unsubscribe_connection(&self, id: SubscriptionId) -> bool {
        let mut registrations = lock(&self.connection_subscriptions);
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Record the connected flag and notify every connection callback.
    /// Notifies even when the flag is unchanged.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        let callbacks: Vec<ConnectionCallback> = lock(&self.connection_subscriptions)
            .iter()
            .map(|r| Arc::clone(&r.callback))
            .collect();
        for callback in callbacks {
            invoke_connection(&callback, connected);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

// A panicking callback must not take the reader task down with it.
fn invoke_data(callback: &DataCallback, path: &str, value: &Value) {
    if catch_unwind(AssertUnwindSafe(|| callback(path, value))).is_err() {
        error!(path, "data callback panicked");
    }
}

fn invoke_connection(callback: &ConnectionCallback, connected: bool) {
    if catch_unwind(AssertUnwindSafe(|| callback(connected))).is_err() {
        error!(connected, "connection callback panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read(lock: &RwLock<Document>) -> std::sync::RwLockReadGuard<'_, Document> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &RwLock<Document>) -> std::sync::RwLockWriteGuard<'_, Document> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
