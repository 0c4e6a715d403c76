//! Tracking Context
//!
//! The tracking context records which observer is currently running. This
//! enables automatic dependency capture: when a handle is read, the
//! interception layer asks the context for the ambient observer and records
//! the (aggregate, key) pair into its read-set.
//!
//! # Implementation
//!
//! A thread-local stack holds the running observers. Entering a tracked run
//! pushes the observer; leaving pops it. Only the top of the stack is
//! ambient - nested runs save and restore the outer observer - but every
//! entry on the stack counts as "running" for the circular-mutation check.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::observe::observer::{ObserverCore, ObserverId};
use crate::value::{Key, RawId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

struct ContextEntry {
    observer_id: ObserverId,
    observer: Weak<ObserverCore>,
}

/// Guard that pops the context when dropped, so the stack stays balanced
/// even if the tracked computation panics.
pub(crate) struct TrackingGuard {
    observer_id: ObserverId,
}

impl TrackingGuard {
    /// Install `observer` as the ambient tracking context.
    pub(crate) fn enter(observer: &Arc<ObserverCore>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                observer_id: observer.id(),
                observer: Arc::downgrade(observer),
            });
        });
        Self {
            observer_id: observer.id(),
        }
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.observer_id, self.observer_id,
                    "tracking context mismatch: expected {:?}, got {:?}",
                    self.observer_id, entry.observer_id
                );
            }
        });
    }
}

/// Whether any observer is currently running on this thread.
pub fn is_tracking() -> bool {
    CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Record a read of (`raw`, `key`) with the ambient observer, if any.
pub(crate) fn track_read(raw: RawId, key: &Key) {
    let ambient = CONTEXT_STACK.with(|stack| {
        stack.borrow().last().map(|entry| entry.observer.clone())
    });
    if let Some(weak) = ambient {
        if let Some(observer) = weak.upgrade() {
            observer.record(raw, key);
        }
    }
}

/// Whether a write to (`raw`, `key`) would mutate a property some running
/// observer depends on - the circular-mutation condition.
pub(crate) fn write_is_circular(raw: RawId, key: &Key) -> bool {
    CONTEXT_STACK.with(|stack| {
        stack.borrow().iter().any(|entry| {
            entry
                .observer
                .upgrade()
                .is_some_and(|observer| observer.has_read(raw, key))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::Observer;
    use crate::record;
    use crate::state::{wrap, WrapOptions};
    use crate::value::Value;

    #[test]
    fn tracking_is_scoped_to_the_run() {
        let observer = Observer::new(|_| {});

        assert!(!is_tracking());
        observer.run(|| {
            assert!(is_tracking());
        });
        assert!(!is_tracking());
    }

    #[test]
    fn nested_runs_save_and_restore() {
        let outer = Observer::new(|_| {});
        let inner = Observer::new(|_| {});
        let handle = wrap(
            Value::Record(record! { "a" => 1i64, "b" => 2i64 }),
            WrapOptions::new(),
        )
        .unwrap();

        outer.run(|| {
            handle.get("a");
            inner.run(|| {
                handle.get("b");
            });
            // Back in the outer context.
            assert!(is_tracking());
        });

        // Each observer recorded only its own reads.
        assert_eq!(outer.tracked_count(), 1);
        assert_eq!(inner.tracked_count(), 1);
    }

    #[test]
    fn circular_check_sees_the_whole_stack() {
        let outer = Observer::new(|_| {});
        let inner = Observer::new(|_| {});
        let handle = wrap(Value::Record(record! { "a" => 1i64 }), WrapOptions::new()).unwrap();
        let raw = handle.raw().id();

        outer.run(|| {
            handle.get("a");
            inner.run(|| {
                // The outer observer is not ambient here, but it is still
                // running: its reads stay protected.
                assert!(write_is_circular(raw, &Key::Field("a".into())));
            });
        });

        assert!(!write_is_circular(raw, &Key::Field("a".into())));
    }
}
