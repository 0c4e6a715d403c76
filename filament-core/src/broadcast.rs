//! Change Broadcasting
//!
//! Two notification paths fan out of every committed mutation:
//!
//! 1. `emit` - observer notification. Observers are filtered by the
//!    read-sets they recorded for the touched aggregate: an exact key
//!    match, the synthetic whole-collection key, or one of the batch
//!    mutation kinds that always notify.
//!
//! 2. `broadcast` - direct subscriber callbacks on the handle's metadata,
//!    invoked with a plain snapshot of the aggregate. Subscribers tagged
//!    with an origin equal to the ambient emitter are skipped; that skip is
//!    the entire mechanism keeping two bound handles from ping-ponging.
//!
//! Both run synchronously on the mutating call stack, after the raw storage
//! is committed, with no locks held across callbacks. Parent bubbling rides
//! the subscriber path: a linked parent holds a relay subscriber in the
//! child, and a thread-local in-flight set keeps self-containing graphs
//! from re-entering their own broadcast.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::state::handle::Handle;
use crate::state::meta::HandleId;
use crate::value::{Key, Value};

// ----------------------------------------------------------------------------
// Emitter identity
// ----------------------------------------------------------------------------

/// Identity of a mutation source, used to suppress echoes between bound
/// handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmitterId(u64);

impl EmitterId {
    /// Generate a new unique emitter ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EmitterId {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT_EMITTER: Cell<Option<EmitterId>> = const { Cell::new(None) };
    static BROADCASTING: RefCell<HashSet<HandleId>> = RefCell::new(HashSet::new());
}

/// Run `f` with `emitter` as the ambient mutation source. Subscribers whose
/// origin tag equals it are skipped for every broadcast inside `f`.
pub fn with_emitter<R>(emitter: EmitterId, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_EMITTER.with(|cell| cell.replace(Some(emitter)));
    let result = f();
    CURRENT_EMITTER.with(|cell| cell.set(previous));
    result
}

pub(crate) fn current_emitter() -> Option<EmitterId> {
    CURRENT_EMITTER.with(|cell| cell.get())
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// What kind of externally observable mutation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Set,
    Delete,
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Sort,
    Reverse,
    Clear,
    Add,
    Remove,
}

impl ChangeKind {
    /// Batch mutations reshape the whole collection (or reshuffle its
    /// indices); they notify every observer of the aggregate regardless of
    /// which keys it tracked. Push and pop touch only the tail and stay
    /// key-filtered.
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            ChangeKind::Shift
                | ChangeKind::Unshift
                | ChangeKind::Splice
                | ChangeKind::Sort
                | ChangeKind::Reverse
                | ChangeKind::Clear
        )
    }
}

/// One externally observable mutation. Produced once per mutation and
/// discarded after delivery.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Key path from the handle the event is delivered on down to the
    /// touched key. Depth one for direct mutations; bubbling prepends.
    pub keys: SmallVec<[Key; 2]>,
    /// Pre-image: the previous value, or for collection mutations whatever
    /// describes what was there before (see the collection mutators).
    pub prev: Option<Value>,
    /// The incoming value(s), shaped per operation.
    pub value: Option<Value>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, key: Key, prev: Option<Value>, value: Option<Value>) -> Self {
        let mut keys = SmallVec::new();
        keys.push(key);
        Self {
            kind,
            keys,
            prev,
            value,
        }
    }

    /// The key this event is about, from the delivered handle's viewpoint.
    pub fn key(&self) -> Option<&Key> {
        self.keys.first()
    }

    /// The event as seen one level up: same mutation, key path extended
    /// with the child's position in the parent.
    pub(crate) fn bubbled(&self, parent_key: Key) -> Self {
        let mut keys = SmallVec::with_capacity(self.keys.len() + 1);
        keys.push(parent_key);
        keys.extend(self.keys.iter().cloned());
        Self {
            kind: self.kind,
            keys,
            prev: self.prev.clone(),
            value: self.value.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Fan-out
// ----------------------------------------------------------------------------

/// Full post-commit pipeline for one mutation on `handle`: observer
/// notification, then direct subscriber broadcast (which carries parent
/// bubbling via relay subscribers). Guarded per handle so a cyclic graph
/// that bubbles back into itself terminates.
pub(crate) fn notify(handle: &Handle, event: &ChangeEvent) {
    let id = handle.id();

    let entered = BROADCASTING.with(|set| set.borrow_mut().insert(id));
    if !entered {
        // Already mid-notify on this handle somewhere up the stack.
        return;
    }

    crate::observe::notify_observers(handle.raw().id(), event);
    broadcast(handle, event);

    BROADCASTING.with(|set| {
        set.borrow_mut().remove(&id);
    });
}

/// Direct subscriber fan-out with echo suppression.
fn broadcast(handle: &Handle, event: &ChangeEvent) {
    let subscribers = handle.core().meta.subscribers_snapshot();
    if subscribers.is_empty() {
        return;
    }

    let emitter = current_emitter();
    let snapshot = handle.snapshot();
    for entry in subscribers {
        if entry.origin.is_some() && entry.origin == emitter {
            continue;
        }
        (entry.callback)(&snapshot, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_ids_are_unique() {
        assert_ne!(EmitterId::new(), EmitterId::new());
    }

    #[test]
    fn with_emitter_nests_and_restores() {
        let a = EmitterId::new();
        let b = EmitterId::new();

        assert_eq!(current_emitter(), None);
        with_emitter(a, || {
            assert_eq!(current_emitter(), Some(a));
            with_emitter(b, || {
                assert_eq!(current_emitter(), Some(b));
            });
            assert_eq!(current_emitter(), Some(a));
        });
        assert_eq!(current_emitter(), None);
    }

    #[test]
    fn batch_kinds() {
        assert!(ChangeKind::Sort.is_batch());
        assert!(ChangeKind::Clear.is_batch());
        assert!(!ChangeKind::Push.is_batch());
        assert!(!ChangeKind::Set.is_batch());
    }

    #[test]
    fn bubbling_prepends_the_parent_key() {
        let event = ChangeEvent::new(
            ChangeKind::Set,
            Key::Field("name".into()),
            Some(Value::Text("old".into())),
            Some(Value::Text("new".into())),
        );
        let up = event.bubbled(Key::Field("user".into()));

        assert_eq!(up.keys.len(), 2);
        assert_eq!(up.keys[0], Key::Field("user".into()));
        assert_eq!(up.keys[1], Key::Field("name".into()));
        assert_eq!(up.kind, ChangeKind::Set);
    }
}
