//! Filament Core
//!
//! This crate provides the core engine for Filament, a fine-grained
//! reactive state library. It implements:
//!
//! - Managed handles over arbitrary mutable aggregates (records, ordered
//!   lists, keyed maps, unique-value sets)
//! - Read/write interception with lazy wrapping of nested aggregates
//! - Dependency-tracking observers with per-key change dispatch
//! - Direct subscriber broadcasting with echo suppression
//! - Schema validation and allow-listed write contracts
//! - One-way and two-way handle synchronization (pipe / bind)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: the value tree, raw aggregate cells, identity, and the
//!   cycle-safe structural clone
//! - `state`: registries, the interception layer, collection mutators, and
//!   write contracts
//! - `observe`: dependency-tracking observers and the ambient context
//! - `broadcast`: change events and subscriber fan-out
//! - `derive`: pipe/bind synchronization between handles
//! - `schema`: the tagged-variant validator tree
//!
//! # Example
//!
//! ```rust,ignore
//! use filament_core::{record, list, wrap, Observer, WrapOptions, Value};
//!
//! // Wrap a raw record into a reactive handle.
//! let state = wrap(
//!     Value::Record(record! { "items" => list![1i64, 2i64, 3i64] }),
//!     WrapOptions::new(),
//! )?;
//!
//! // Track a computation's dependencies.
//! let observer = Observer::new(|event| println!("changed: {:?}", event.kind));
//! observer.run(|| state.child("items").unwrap().len());
//!
//! // Mutating a tracked dependency notifies the observer.
//! state.child("items").unwrap().push(4i64)?;
//! ```
//!
//! # Execution model
//!
//! Single-threaded and synchronous: interception, tracking, and broadcast
//! all happen on the calling thread, within the call stack of the
//! triggering read or write. For a single mutation the raw storage is
//! updated before any event is emitted, and every notification completes
//! before the mutating call returns.

pub mod broadcast;
pub mod derive;
pub mod error;
pub mod observe;
pub mod schema;
pub mod state;
pub mod value;

pub use broadcast::{with_emitter, ChangeEvent, ChangeKind, EmitterId};
pub use derive::{bind, pipe, Binding, Pipe, Transform};
pub use error::StateError;
pub use observe::{is_tracking, Observer, ObserverId};
pub use schema::{Schema, SchemaViolation};
pub use state::{
    identify, wrap, writable, AllowList, Controller, Handle, HandleId, Metadata, Recursion,
    SubscriberId, Subscription, WrapOptions, WritableHandle,
};
pub use value::{
    structural_clone, AggregateKind, Key, RawAggregate, RawId, RawList, RawMap, RawRecord,
    RawSet, Scalar, Value,
};

use tracing::warn;

/// Subscribe to a handle's changes. Equivalent to [`Handle::subscribe`];
/// the subscription ends when the guard drops.
pub fn subscribe<F>(handle: &Handle, callback: F) -> Subscription
where
    F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
{
    handle.subscribe(callback)
}

/// A plain, cycle-safe deep copy of a handle's current state.
pub fn snapshot(handle: &Handle) -> Value {
    handle.snapshot()
}

/// Execute `f` with `observer` as the ambient tracking context. Equivalent
/// to [`Observer::run`].
pub fn run_tracked<R>(observer: &Observer, f: impl FnOnce() -> R) -> R {
    observer.run(f)
}

/// The raw aggregate behind a handle.
///
/// A destroyed handle is a "state does not exist" condition; the caller
/// still gets the original value back, with a logged advisory.
pub fn unwrap(handle: &Handle) -> RawAggregate {
    if state::resolve(handle).is_err() {
        warn!(handle = ?handle.id(), "unwrapping a handle whose state no longer exists");
    }
    handle.raw()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    #[test]
    fn free_functions_delegate_to_the_handle() {
        let handle = wrap(
            Value::Record(record! { "n" => 1i64 }),
            WrapOptions::new(),
        )
        .unwrap();

        let copy = snapshot(&handle);
        let Value::Record(rec) = copy else {
            panic!("expected record snapshot");
        };
        assert_eq!(rec.0.read().get("n"), Some(&Value::Int(1)));

        let raw = unwrap(&handle);
        assert_eq!(raw.id(), handle.raw().id());
    }

    #[test]
    fn unwrap_survives_destruction() {
        let handle = wrap(
            Value::Record(record! { "n" => 1i64 }),
            WrapOptions::new(),
        )
        .unwrap();
        let raw_id = handle.raw().id();

        handle.controller().destroy();
        // Advisory only: the raw aggregate still comes back.
        assert_eq!(unwrap(&handle).id(), raw_id);
    }
}
