//! Identity Registry
//!
//! A global weak map correlating each raw aggregate with its handle. This is
//! what makes `wrap` idempotent: wrapping the same raw aggregate twice finds
//! the existing handle, and wrapping an aggregate that already sits behind a
//! handle resolves to that handle.
//!
//! Entries hold weak references so the registry never keeps a handle (or its
//! raw counterpart) alive on its own. A dead entry reads as absent, which
//! also makes address reuse harmless: a new aggregate allocated at a
//! recycled address simply replaces the stale entry.

use std::collections::HashMap;
use std::sync::{OnceLock, Weak};

use parking_lot::RwLock;

use crate::error::StateError;
use crate::state::handle::{Handle, HandleCore};
use crate::value::{RawAggregate, RawId};

static REGISTRY: OnceLock<RwLock<HashMap<RawId, Weak<HandleCore>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<RawId, Weak<HandleCore>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Find the live handle for a raw aggregate, if one exists.
pub fn identify(raw: &RawAggregate) -> Option<Handle> {
    let map = registry().read();
    map.get(&raw.id())
        .and_then(Weak::upgrade)
        .map(Handle::from_core)
}

/// Record a handle for its raw aggregate.
pub(crate) fn register(handle: &Handle) {
    registry()
        .write()
        .insert(handle.raw().id(), handle.downgrade());
}

/// Drop the registry entry for a raw aggregate.
pub(crate) fn unregister(id: RawId) {
    registry().write().remove(&id);
}

/// Resolve a handle back to its raw aggregate.
///
/// A destroyed or never-registered handle is a "state does not exist"
/// condition; callers that want the raw value anyway use
/// [`Handle::raw`] and treat this as an advisory.
pub fn resolve(handle: &Handle) -> Result<RawAggregate, StateError> {
    let map = registry().read();
    match map.get(&handle.raw().id()).and_then(Weak::upgrade) {
        Some(core) if core.id == handle.id() => Ok(core.raw.clone()),
        _ => Err(StateError::StateMissing),
    }
}

/// Drop dead entries. Called opportunistically; correctness never depends
/// on it because dead entries read as absent.
pub fn prune() -> usize {
    let mut map = registry().write();
    let before = map.len();
    map.retain(|_, weak| weak.strong_count() > 0);
    before - map.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use crate::state::wrap;
    use crate::state::WrapOptions;
    use crate::value::Value;

    #[test]
    fn identify_finds_registered_handles() {
        let rec = record! { "x" => 1i64 };
        let raw = RawAggregate::Record(rec.clone());
        assert!(identify(&raw).is_none());

        let handle = wrap(Value::Record(rec), WrapOptions::new()).unwrap();
        let found = identify(&raw).expect("registered");
        assert_eq!(found.id(), handle.id());
    }

    #[test]
    fn resolve_round_trips() {
        let rec = record! { "x" => 1i64 };
        let handle = wrap(Value::Record(rec.clone()), WrapOptions::new()).unwrap();

        let raw = resolve(&handle).unwrap();
        assert_eq!(raw.id(), rec.id());
    }

    #[test]
    fn resolve_after_destroy_reports_missing() {
        let handle = wrap(Value::Record(record! { "x" => 1i64 }), WrapOptions::new()).unwrap();
        handle.controller().destroy();

        assert!(matches!(resolve(&handle), Err(StateError::StateMissing)));
    }

    #[test]
    fn dead_entries_read_as_absent() {
        let raw = {
            let rec = record! { "x" => 1i64 };
            let _handle = wrap(Value::Record(rec.clone()), WrapOptions::new()).unwrap();
            rec
        };
        // The handle is gone; its weak entry can no longer be upgraded, so
        // the raw aggregate reads as unwrapped even though it is still alive.
        let agg = RawAggregate::Record(raw);
        assert!(identify(&agg).is_none());
        prune();
    }
}
