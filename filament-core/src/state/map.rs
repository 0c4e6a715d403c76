//! Keyed-Map Mutators
//!
//! Map entries follow set/delete semantics - `insert` and `remove` route
//! through the generic interception path with an `Entry` key, so no-op
//! suppression, schema gating, and child linkage behave exactly as for
//! record fields. `clear` is the one map-specific batch operation.

use crate::broadcast::{self, ChangeEvent, ChangeKind};
use crate::error::StateError;
use crate::state::handle::{Access, Gate, Handle};
use crate::value::{AggregateKind, Key, RawAggregate, RawMap, Scalar, Value};

impl Handle {
    fn expect_map(&self) -> Result<RawMap, StateError> {
        match &self.raw() {
            RawAggregate::Map(m) => Ok(m.clone()),
            other => Err(StateError::KindMismatch {
                expected: AggregateKind::Map,
                found: other.kind(),
            }),
        }
    }

    /// Insert (or overwrite) an entry.
    pub fn insert(
        &self,
        key: impl Into<Scalar>,
        value: impl Into<Value>,
    ) -> Result<(), StateError> {
        self.expect_map()?;
        self.set_with(Key::Entry(key.into()), value.into(), Access::Direct)
    }

    /// Remove an entry, returning its value if it was present.
    pub fn remove_entry(&self, key: impl Into<Scalar>) -> Result<Option<Value>, StateError> {
        self.expect_map()?;
        self.delete_with(Key::Entry(key.into()), Access::Direct)
    }

    pub(crate) fn clear_map_with(&self, access: Access<'_>) -> Result<(), StateError> {
        let map = self.expect_map()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "clear", access)? {
            return Ok(());
        }
        if map.0.read().is_empty() {
            return Ok(());
        }

        let prev = RawMap::new();
        {
            let mut guard = map.0.write();
            *prev.0.write() = std::mem::take(&mut *guard);
        }
        for value in prev.0.read().values() {
            self.forget_child(value);
        }

        let event = ChangeEvent::new(
            ChangeKind::Clear,
            Key::Collection,
            Some(Value::Map(prev)),
            None,
        );
        broadcast::notify(self, &event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_of;
    use crate::state::{wrap, WrapOptions};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn insert_and_remove_round_trip() {
        let handle = wrap(Value::Map(map_of! { "a" => 1i64 }), WrapOptions::new()).unwrap();

        handle.insert("b", 2i64).unwrap();
        assert_eq!(handle.get(Scalar::from("b")), Some(Value::Int(2)));
        assert_eq!(handle.len(), 2);

        let removed = handle.remove_entry("a").unwrap();
        assert_eq!(removed, Some(Value::Int(1)));
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn insert_same_value_is_silent() {
        let handle = wrap(Value::Map(map_of! { "a" => 1i64 }), WrapOptions::new()).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let inner = events.clone();
        let _sub = handle.subscribe(move |_, event| inner.lock().push(event.kind));

        handle.insert("a", 1i64).unwrap();
        assert!(events.lock().is_empty());

        handle.insert("a", 2i64).unwrap();
        assert_eq!(*events.lock(), vec![ChangeKind::Set]);
    }

    #[test]
    fn clear_reports_the_previous_entries() {
        let handle = wrap(
            Value::Map(map_of! { "a" => 1i64, "b" => 2i64 }),
            WrapOptions::new(),
        )
        .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let inner = events.clone();
        let _sub = handle.subscribe(move |_, event| inner.lock().push(event.clone()));

        handle.clear().unwrap();
        assert_eq!(handle.len(), 0);

        let events = events.lock();
        assert_eq!(events[0].kind, ChangeKind::Clear);
        let Some(Value::Map(prev)) = &events[0].prev else {
            panic!("expected map pre-image");
        };
        assert_eq!(prev.0.read().len(), 2);
    }

    #[test]
    fn map_operations_reject_other_kinds() {
        let handle = wrap(Value::Map(map_of! { "a" => 1i64 }), WrapOptions::new()).unwrap();
        // A record-style field write has no meaning on a map.
        assert!(matches!(
            handle.set("field", 1i64),
            Err(StateError::KindMismatch { .. })
        ));
    }
}
