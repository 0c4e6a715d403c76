//! Derivation Utilities
//!
//! One-way (`pipe`) and two-way (`bind`) synchronization between handles
//! through optional transform functions.
//!
//! A pipe subscribes to its source and, on every change, bulk-assigns the
//! (optionally transformed) snapshot onto the target. A binding is two
//! pipes in opposite directions, each guarded by a "currently updating this
//! direction" flag, with each direction's subscriber tagged by the opposite
//! direction's emitter so the broadcaster suppresses the echo. The
//! flag-pair is what keeps left→right propagation from re-triggering
//! right→left, and vice versa.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::broadcast::{with_emitter, EmitterId};
use crate::state::handle::Handle;
use crate::state::meta::Subscription;
use crate::value::Value;

/// A snapshot-to-snapshot transform applied before assignment.
pub type Transform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A one-way synchronization. Dropping it disconnects the pipe.
pub struct Pipe {
    _subscription: Subscription,
}

/// Subscribe to `source`; on every change, assign `transform(snapshot)`
/// (or the raw snapshot) onto `target`.
pub fn pipe(source: &Handle, target: &Handle, transform: Option<Transform>) -> Pipe {
    let emitter = EmitterId::new();
    let subscription = connect(source, target, transform, emitter, None, None);
    Pipe {
        _subscription: subscription,
    }
}

/// A two-way synchronization. Dropping it disconnects both directions.
pub struct Binding {
    _left_to_right: Subscription,
    _right_to_left: Subscription,
}

/// Keep `left` and `right` in sync through optional per-direction
/// transforms. A change on either side updates the other exactly once.
pub fn bind(
    left: &Handle,
    right: &Handle,
    into_right: Option<Transform>,
    into_left: Option<Transform>,
) -> Binding {
    // Each direction writes under its own emitter; the opposite direction's
    // subscriber carries that emitter as its origin tag, so the broadcaster
    // skips it when the echo arrives.
    let to_right = EmitterId::new();
    let to_left = EmitterId::new();

    let updating_lr = Arc::new(AtomicBool::new(false));
    let updating_rl = Arc::new(AtomicBool::new(false));

    let left_to_right = connect_guarded(
        left,
        right,
        into_right,
        to_right,
        Some(to_left),
        updating_lr.clone(),
        updating_rl.clone(),
    );
    let right_to_left = connect_guarded(
        right,
        left,
        into_left,
        to_left,
        Some(to_right),
        updating_rl,
        updating_lr,
    );

    Binding {
        _left_to_right: left_to_right,
        _right_to_left: right_to_left,
    }
}

fn connect(
    source: &Handle,
    target: &Handle,
    transform: Option<Transform>,
    emitter: EmitterId,
    origin: Option<EmitterId>,
    guard: Option<(Arc<AtomicBool>, Arc<AtomicBool>)>,
) -> Subscription {
    let target = target.clone();
    source.subscribe_tagged(origin, move |snapshot, _event| {
        if let Some((own, other)) = &guard {
            if other.load(Ordering::SeqCst) {
                return;
            }
            own.store(true, Ordering::SeqCst);
        }

        let out = match &transform {
            Some(f) => f(snapshot),
            None => snapshot.clone(),
        };
        with_emitter(emitter, || {
            if let Err(err) = target.assign(&out) {
                warn!(target = ?target.id(), %err, "piped assignment failed");
            }
        });

        if let Some((own, _)) = &guard {
            own.store(false, Ordering::SeqCst);
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn connect_guarded(
    source: &Handle,
    target: &Handle,
    transform: Option<Transform>,
    emitter: EmitterId,
    origin: Option<EmitterId>,
    own_flag: Arc<AtomicBool>,
    other_flag: Arc<AtomicBool>,
) -> Subscription {
    connect(
        source,
        target,
        transform,
        emitter,
        origin,
        Some((own_flag, other_flag)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{wrap, WrapOptions};
    use crate::{list, record};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pipe_propagates_changes_one_way() {
        let source = wrap(Value::Record(record! { "n" => 1i64 }), WrapOptions::new()).unwrap();
        let target = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();

        let _pipe = pipe(&source, &target, None);

        source.set("n", 5i64).unwrap();
        assert_eq!(target.get("n"), Some(Value::Int(5)));

        // The reverse direction is not connected.
        target.set("n", 9i64).unwrap();
        assert_eq!(source.get("n"), Some(Value::Int(5)));
    }

    #[test]
    fn pipe_applies_the_transform() {
        let source = wrap(Value::Record(record! { "n" => 1i64 }), WrapOptions::new()).unwrap();
        let target = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();

        let doubler: Transform = Arc::new(|snapshot| {
            let Value::Record(rec) = snapshot else {
                return snapshot.clone();
            };
            let n = rec.0.read().get("n").and_then(Value::as_int).unwrap_or(0);
            Value::Record(record! { "n" => n * 2 })
        });
        let _pipe = pipe(&source, &target, Some(doubler));

        source.set("n", 4i64).unwrap();
        assert_eq!(target.get("n"), Some(Value::Int(8)));
    }

    #[test]
    fn dropping_the_pipe_disconnects() {
        let source = wrap(Value::Record(record! { "n" => 1i64 }), WrapOptions::new()).unwrap();
        let target = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();

        let piping = pipe(&source, &target, None);
        source.set("n", 2i64).unwrap();
        assert_eq!(target.get("n"), Some(Value::Int(2)));

        drop(piping);
        source.set("n", 3i64).unwrap();
        assert_eq!(target.get("n"), Some(Value::Int(2)));
    }

    #[test]
    fn bind_updates_the_other_side_exactly_once() {
        let left = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();
        let right = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();

        let updates = Arc::new(AtomicUsize::new(0));
        let inner = updates.clone();
        let _watch = right.subscribe(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        let _binding = bind(&left, &right, None, None);

        left.set("n", 7i64).unwrap();
        assert_eq!(right.get("n"), Some(Value::Int(7)));
        // One update on the right, and no reciprocal write back into left.
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(left.get("n"), Some(Value::Int(7)));
    }

    #[test]
    fn bind_is_symmetric() {
        let left = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();
        let right = wrap(Value::Record(record! { "n" => 0i64 }), WrapOptions::new()).unwrap();

        let _binding = bind(&left, &right, None, None);

        right.set("n", 3i64).unwrap();
        assert_eq!(left.get("n"), Some(Value::Int(3)));

        left.set("n", 4i64).unwrap();
        assert_eq!(right.get("n"), Some(Value::Int(4)));
    }

    #[test]
    fn bound_lists_stay_in_sync() {
        let left = wrap(Value::List(list![1i64]), WrapOptions::new()).unwrap();
        let right = wrap(Value::List(list![]), WrapOptions::new()).unwrap();

        let _binding = bind(&left, &right, None, None);

        left.push(2i64).unwrap();
        assert_eq!(right.len(), 2);
        assert_eq!(right.get(1usize), Some(Value::Int(2)));
    }
}
