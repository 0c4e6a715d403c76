//! Observers
//!
//! An observer is a dependency-tracking context: `run(fn)` executes a
//! computation while recording exactly which (aggregate, key) pairs it
//! read, and `on_change` fires for precisely the mutations that touch a
//! recorded pair. An observer may track many handles, and a handle may be
//! tracked by many observers - there is no ownership between them.
//!
//! # Notification filtering
//!
//! A mutation notifies an observer when its read-set for that aggregate
//! holds the touched key, holds the synthetic whole-collection key, or when
//! the mutation is one of the batch kinds that reshape the collection and
//! always notify.
//!
//! # Safety valve
//!
//! Recording far more reads than any fine-grained computation should need
//! usually means something serialized a whole object graph inside a tracked
//! run, defeating the point of per-key dependencies. Crossing the threshold
//! raises one advisory per run and keeps going.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::broadcast::ChangeEvent;
use crate::observe::context::TrackingGuard;
use crate::value::{Key, RawId};

/// Read-set size at which an observer raises the over-tracking advisory.
pub const READ_SET_ADVISORY_LIMIT: usize = 512;

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

// Global registry of live observers, and the reverse index from aggregate
// identity to the observers that recorded reads on it. Weak entries so the
// registry never keeps an observer alive.
static OBSERVERS: OnceLock<RwLock<HashMap<ObserverId, Weak<ObserverCore>>>> = OnceLock::new();
static WATCHED: OnceLock<RwLock<HashMap<RawId, Vec<ObserverId>>>> = OnceLock::new();

fn observers() -> &'static RwLock<HashMap<ObserverId, Weak<ObserverCore>>> {
    OBSERVERS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn watched() -> &'static RwLock<HashMap<RawId, Vec<ObserverId>>> {
    WATCHED.get_or_init(|| RwLock::new(HashMap::new()))
}

type ChangeFn = dyn Fn(&ChangeEvent) + Send + Sync;
type TrackFn = dyn Fn(RawId, &Key) + Send + Sync;

pub(crate) struct ObserverCore {
    id: ObserverId,
    /// Per-aggregate read-sets: which keys of which aggregates this
    /// observer's last runs depended on.
    reads: RwLock<HashMap<RawId, HashSet<Key>>>,
    on_change: Box<ChangeFn>,
    on_track: Option<Box<TrackFn>>,
    destroyed: AtomicBool,
    valve_warned: AtomicBool,
}

impl ObserverCore {
    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    /// Record a read, deduplicating repeated reads of the same key.
    pub(crate) fn record(&self, raw: RawId, key: &Key) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let is_new = {
            let mut reads = self.reads.write();
            let entry = reads.entry(raw).or_default();
            entry.insert(key.clone())
        };
        if !is_new {
            return;
        }

        // First read of this aggregate at all: index it for notification.
        let mut index = watched().write();
        let ids = index.entry(raw).or_default();
        if !ids.contains(&self.id) {
            ids.push(self.id);
        }
        drop(index);

        let total: usize = self.reads.read().values().map(HashSet::len).sum();
        if total > READ_SET_ADVISORY_LIMIT && !self.valve_warned.swap(true, Ordering::SeqCst) {
            warn!(
                observer = ?self.id,
                tracked = total,
                "read-set unusually large; a tracked computation may be \
                 serializing a whole object graph"
            );
        }

        if let Some(on_track) = &self.on_track {
            on_track(raw, key);
        }
    }

    pub(crate) fn has_read(&self, raw: RawId, key: &Key) -> bool {
        self.reads
            .read()
            .get(&raw)
            .is_some_and(|keys| keys.contains(key))
    }

    fn matches(&self, raw: RawId, event: &ChangeEvent) -> bool {
        let reads = self.reads.read();
        let Some(keys) = reads.get(&raw) else {
            return false;
        };
        if keys.contains(&Key::Collection) {
            return true;
        }
        if event.kind.is_batch() {
            return true;
        }
        event.key().is_some_and(|key| keys.contains(key))
    }
}

/// Notify every observer whose read-set covers this mutation.
pub(crate) fn notify_observers(raw: RawId, event: &ChangeEvent) {
    let ids = {
        let index = watched().read();
        match index.get(&raw) {
            Some(ids) => ids.clone(),
            None => return,
        }
    };

    // Collect live observers first so no lock is held across callbacks.
    let live: Vec<Arc<ObserverCore>> = {
        let registry = observers().read();
        ids.iter()
            .filter_map(|id| registry.get(id).and_then(Weak::upgrade))
            .collect()
    };

    for observer in live {
        if observer.destroyed.load(Ordering::SeqCst) {
            continue;
        }
        if observer.matches(raw, event) {
            (observer.on_change)(event);
        }
    }
}

/// A dependency-tracking context. See the module docs.
pub struct Observer {
    core: Arc<ObserverCore>,
}

impl Observer {
    /// Create an observer with a change callback.
    pub fn new<F>(on_change: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::build(Box::new(on_change), None)
    }

    /// Create an observer that is also told about every newly tracked
    /// (aggregate, key) pair.
    pub fn with_tracker<F, T>(on_change: F, on_track: T) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
        T: Fn(RawId, &Key) + Send + Sync + 'static,
    {
        Self::build(Box::new(on_change), Some(Box::new(on_track)))
    }

    fn build(on_change: Box<ChangeFn>, on_track: Option<Box<TrackFn>>) -> Self {
        let core = Arc::new(ObserverCore {
            id: ObserverId::new(),
            reads: RwLock::new(HashMap::new()),
            on_change,
            on_track,
            destroyed: AtomicBool::new(false),
            valve_warned: AtomicBool::new(false),
        });
        observers().write().insert(core.id, Arc::downgrade(&core));
        Self { core }
    }

    pub fn id(&self) -> ObserverId {
        self.core.id
    }

    /// Execute `f` with this observer as the ambient tracking context.
    ///
    /// Nested runs compose: the outer observer is restored afterwards. On a
    /// destroyed observer this runs `f` untracked - a no-op for the
    /// tracking system, never a resurrection of stale subscriptions.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.core.destroyed.load(Ordering::SeqCst) {
            return f();
        }
        self.core.valve_warned.store(false, Ordering::SeqCst);
        let _guard = TrackingGuard::enter(&self.core);
        f()
    }

    /// Total (aggregate, key) pairs currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.core.reads.read().values().map(HashSet::len).sum()
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::SeqCst)
    }

    /// Unregister every read-set entry and retire the observer. Idempotent.
    pub fn destroy(&self) {
        if self.core.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let raws: Vec<RawId> = self.core.reads.write().drain().map(|(raw, _)| raw).collect();
        {
            let mut index = watched().write();
            for raw in raws {
                if let Some(ids) = index.get_mut(&raw) {
                    ids.retain(|id| *id != self.core.id);
                    if ids.is_empty() {
                        index.remove(&raw);
                    }
                }
            }
        }
        observers().write().remove(&self.core.id);
        debug!(observer = ?self.core.id, "observer destroyed");
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        // Last strong reference: tear down the registry entries. Clones of
        // the same observer share the core, so only the final drop fires.
        if Arc::strong_count(&self.core) == 1 {
            self.destroy();
        }
    }
}

impl Clone for Observer {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.core.id)
            .field("tracked", &self.tracked_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
