//! Ordered-List Mutators
//!
//! Native list operations are intercepted individually instead of falling
//! through the generic set path: each has its own "what changed" shape that
//! a key-level diff cannot reconstruct. Every wrapped operation captures a
//! pre-image sufficient to describe `prev`, commits the real mutation, and
//! broadcasts an event tagged with the specific operation.
//!
//! Observers that only care that "this list changed at all" depend on the
//! synthetic [`Key::Collection`] key (recorded by `len()`/`keys()` reads)
//! rather than individual indices.

use std::cmp::Ordering;

use crate::broadcast::{self, ChangeEvent, ChangeKind};
use crate::error::StateError;
use crate::state::handle::{Access, Gate, Handle};
use crate::value::{AggregateKind, Key, RawAggregate, RawList, Value};

impl Handle {
    fn expect_list(&self) -> Result<RawList, StateError> {
        match &self.raw() {
            RawAggregate::List(l) => Ok(l.clone()),
            other => Err(StateError::KindMismatch {
                expected: AggregateKind::List,
                found: other.kind(),
            }),
        }
    }

    /// Validate appended/inserted elements against the element schema.
    fn gate_elements(&self, items: &[Value]) -> Result<Gate, StateError> {
        for item in items {
            if let Gate::Rejected = self.gate_schema_for(&Key::Index(0), item)? {
                return Ok(Gate::Rejected);
            }
        }
        Ok(Gate::Proceed)
    }

    /// Append a value to the end of the list.
    pub fn push(&self, value: impl Into<Value>) -> Result<(), StateError> {
        self.push_with(value.into(), Access::Direct)
    }

    pub(crate) fn push_with(&self, value: Value, access: Access<'_>) -> Result<(), StateError> {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "push", access)? {
            return Ok(());
        }
        if let Gate::Rejected = self.gate_elements(std::slice::from_ref(&value))? {
            return Ok(());
        }

        let prev: Vec<Value> = list.0.read().clone();
        list.0.write().push(value.clone());

        let event = ChangeEvent::new(
            ChangeKind::Push,
            Key::Collection,
            Some(Value::List(RawList::from_vec(prev))),
            Some(Value::List(RawList::from_vec(vec![value]))),
        );
        broadcast::notify(self, &event);
        Ok(())
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Result<Option<Value>, StateError> {
        self.pop_with(Access::Direct)
    }

    pub(crate) fn pop_with(&self, access: Access<'_>) -> Result<Option<Value>, StateError> {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "pop", access)? {
            return Ok(None);
        }

        let removed = list.0.write().pop();
        let Some(removed) = removed else {
            return Ok(None);
        };
        let index = list.0.read().len();
        self.forget_child(&removed);

        let event = ChangeEvent::new(
            ChangeKind::Pop,
            Key::Index(index),
            Some(removed.clone()),
            None,
        );
        broadcast::notify(self, &event);
        Ok(Some(removed))
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Option<Value>, StateError> {
        self.shift_with(Access::Direct)
    }

    pub(crate) fn shift_with(&self, access: Access<'_>) -> Result<Option<Value>, StateError> {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "shift", access)? {
            return Ok(None);
        }

        let removed = {
            let mut guard = list.0.write();
            if guard.is_empty() {
                None
            } else {
                Some(guard.remove(0))
            }
        };
        let Some(removed) = removed else {
            return Ok(None);
        };
        self.forget_child(&removed);

        let event = ChangeEvent::new(
            ChangeKind::Shift,
            Key::Index(0),
            Some(removed.clone()),
            None,
        );
        broadcast::notify(self, &event);
        Ok(Some(removed))
    }

    /// Prepend a value to the front of the list.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<(), StateError> {
        self.unshift_with(value.into(), Access::Direct)
    }

    pub(crate) fn unshift_with(&self, value: Value, access: Access<'_>) -> Result<(), StateError> {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "unshift", access)? {
            return Ok(());
        }
        if let Gate::Rejected = self.gate_elements(std::slice::from_ref(&value))? {
            return Ok(());
        }

        let prev: Vec<Value> = list.0.read().clone();
        list.0.write().insert(0, value.clone());

        let event = ChangeEvent::new(
            ChangeKind::Unshift,
            Key::Collection,
            Some(Value::List(RawList::from_vec(prev))),
            Some(Value::List(RawList::from_vec(vec![value]))),
        );
        broadcast::notify(self, &event);
        Ok(())
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `items` in their place. Returns the removed range.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StateError> {
        self.splice_with(start, delete_count, items, Access::Direct)
    }

    pub(crate) fn splice_with(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
        access: Access<'_>,
    ) -> Result<Vec<Value>, StateError> {
        let list = self.expect_list()?;
        let len = list.0.read().len();
        if start > len {
            return Err(StateError::IndexOutOfBounds { index: start, len });
        }
        if let Gate::Rejected = self.gate_write(&Key::Collection, "splice", access)? {
            return Ok(Vec::new());
        }
        if let Gate::Rejected = self.gate_elements(&items)? {
            return Ok(Vec::new());
        }

        let removed: Vec<Value> = {
            let mut guard = list.0.write();
            let end = (start + delete_count).min(guard.len());
            guard.splice(start..end, items.clone()).collect()
        };
        for value in &removed {
            self.forget_child(value);
        }

        let event = ChangeEvent::new(
            ChangeKind::Splice,
            Key::Index(start),
            Some(Value::List(RawList::from_vec(removed.clone()))),
            Some(Value::List(RawList::from_vec(items))),
        );
        broadcast::notify(self, &event);
        Ok(removed)
    }

    /// Sort the list in the engine's natural order.
    pub fn sort(&self) -> Result<(), StateError> {
        self.sort_by(|a, b| a.sort_cmp(b))
    }

    /// Sort the list with a caller-supplied comparator.
    pub fn sort_by<F>(&self, compare: F) -> Result<(), StateError>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.sort_by_with(compare, Access::Direct)
    }

    pub(crate) fn sort_by_with<F>(&self, mut compare: F, access: Access<'_>) -> Result<(), StateError>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "sort", access)? {
            return Ok(());
        }

        let prev: Vec<Value> = list.0.read().clone();
        {
            let mut guard = list.0.write();
            guard.sort_by(&mut compare);
        }
        let next: Vec<Value> = list.0.read().clone();
        if prev == next {
            return Ok(());
        }

        let event = ChangeEvent::new(
            ChangeKind::Sort,
            Key::Collection,
            Some(Value::List(RawList::from_vec(prev))),
            Some(Value::List(RawList::from_vec(next))),
        );
        broadcast::notify(self, &event);
        Ok(())
    }

    /// Reverse the list in place.
    pub fn reverse(&self) -> Result<(), StateError> {
        self.reverse_with(Access::Direct)
    }

    pub(crate) fn reverse_with(&self, access: Access<'_>) -> Result<(), StateError> {
        let list = self.expect_list()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "reverse", access)? {
            return Ok(());
        }
        if list.0.read().len() < 2 {
            return Ok(());
        }

        let prev: Vec<Value> = list.0.read().clone();
        list.0.write().reverse();
        let next: Vec<Value> = list.0.read().clone();

        let event = ChangeEvent::new(
            ChangeKind::Reverse,
            Key::Collection,
            Some(Value::List(RawList::from_vec(prev))),
            Some(Value::List(RawList::from_vec(next))),
        );
        broadcast::notify(self, &event);
        Ok(())
    }

    /// Remove every element.
    pub fn clear(&self) -> Result<(), StateError> {
        self.clear_with(Access::Direct)
    }

    pub(crate) fn clear_with(&self, access: Access<'_>) -> Result<(), StateError> {
        match &self.raw() {
            RawAggregate::List(list) => {
                if let Gate::Rejected = self.gate_write(&Key::Collection, "clear", access)? {
                    return Ok(());
                }
                if list.0.read().is_empty() {
                    return Ok(());
                }
                let prev: Vec<Value> = std::mem::take(&mut *list.0.write());
                for value in &prev {
                    self.forget_child(value);
                }
                let event = ChangeEvent::new(
                    ChangeKind::Clear,
                    Key::Collection,
                    Some(Value::List(RawList::from_vec(prev))),
                    None,
                );
                broadcast::notify(self, &event);
                Ok(())
            }
            RawAggregate::Map(_) => self.clear_map_with(access),
            RawAggregate::Set(_) => self.clear_set_with(access),
            other => Err(StateError::KindMismatch {
                expected: AggregateKind::List,
                found: other.kind(),
            }),
        }
    }

    /// Drop the cached child handle (and any link) for a removed value.
    pub(crate) fn forget_child(&self, removed: &Value) {
        if let Some(agg) = removed.as_aggregate() {
            self.core().meta.children.write().remove(&agg.id());
            let stale: Vec<Key> = self
                .core()
                .meta
                .links
                .read()
                .iter()
                .filter(|(_, link)| link.child.raw().id() == agg.id())
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                if let Some(link) = self.core().meta.links.write().remove(&key) {
                    link.sever();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list;
    use crate::state::{wrap, WrapOptions};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn collected(handle: &Handle) -> (Arc<Mutex<Vec<ChangeEvent>>>, crate::state::meta::Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let inner = events.clone();
        let sub = handle.subscribe(move |_, event| {
            inner.lock().push(event.clone());
        });
        (events, sub)
    }

    fn ints(value: &Value) -> Vec<i64> {
        let Value::List(list) = value else {
            panic!("expected list payload");
        };
        list.0
            .read()
            .iter()
            .map(|v| v.as_int().expect("int element"))
            .collect()
    }

    #[test]
    fn push_reports_pre_image_and_appended_items() {
        let handle = wrap(Value::List(list![1i64, 2i64, 3i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        handle.push(4i64).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, ChangeKind::Push);
        assert_eq!(ints(event.prev.as_ref().unwrap()), vec![1, 2, 3]);
        assert_eq!(ints(event.value.as_ref().unwrap()), vec![4]);
    }

    #[test]
    fn shift_reports_the_removed_element() {
        let handle = wrap(Value::List(list![10i64, 20i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        let removed = handle.shift().unwrap();
        assert_eq!(removed, Some(Value::Int(10)));

        let events = events.lock();
        assert_eq!(events[0].kind, ChangeKind::Shift);
        assert_eq!(events[0].prev, Some(Value::Int(10)));
        assert_eq!(events[0].value, None);
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn pop_on_empty_is_silent() {
        let handle = wrap(Value::List(list![]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        assert_eq!(handle.pop().unwrap(), None);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn splice_reports_removed_and_inserted() {
        let handle =
            wrap(Value::List(list![1i64, 2i64, 3i64, 4i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        let removed = handle
            .splice(1, 2, vec![Value::Int(9)])
            .unwrap();
        assert_eq!(removed, vec![Value::Int(2), Value::Int(3)]);

        let events = events.lock();
        let event = &events[0];
        assert_eq!(event.kind, ChangeKind::Splice);
        assert_eq!(event.key(), Some(&Key::Index(1)));
        assert_eq!(ints(event.prev.as_ref().unwrap()), vec![2, 3]);
        assert_eq!(ints(event.value.as_ref().unwrap()), vec![9]);

        let snapshot = handle.snapshot();
        assert_eq!(ints(&snapshot), vec![1, 9, 4]);
    }

    #[test]
    fn splice_past_the_end_is_an_error() {
        let handle = wrap(Value::List(list![1i64]), WrapOptions::new()).unwrap();
        assert!(matches!(
            handle.splice(5, 0, Vec::new()),
            Err(StateError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn sort_and_reverse_report_both_orders() {
        let handle = wrap(Value::List(list![3i64, 1i64, 2i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        handle.sort().unwrap();
        handle.reverse().unwrap();

        let events = events.lock();
        assert_eq!(events[0].kind, ChangeKind::Sort);
        assert_eq!(ints(events[0].prev.as_ref().unwrap()), vec![3, 1, 2]);
        assert_eq!(ints(events[0].value.as_ref().unwrap()), vec![1, 2, 3]);

        assert_eq!(events[1].kind, ChangeKind::Reverse);
        assert_eq!(ints(events[1].value.as_ref().unwrap()), vec![3, 2, 1]);
    }

    #[test]
    fn sort_of_sorted_list_is_silent() {
        let handle = wrap(Value::List(list![1i64, 2i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        handle.sort().unwrap();
        assert!(events.lock().is_empty());
    }

    #[test]
    fn clear_reports_the_pre_image() {
        let handle = wrap(Value::List(list![1i64, 2i64]), WrapOptions::new()).unwrap();
        let (events, _sub) = collected(&handle);

        handle.clear().unwrap();
        assert_eq!(handle.len(), 0);

        let events = events.lock();
        assert_eq!(events[0].kind, ChangeKind::Clear);
        assert_eq!(ints(events[0].prev.as_ref().unwrap()), vec![1, 2]);
    }

    #[test]
    fn element_schema_gates_push() {
        let options = WrapOptions::new()
            .strict()
            .with_schema(crate::schema::Schema::List(Box::new(
                crate::schema::Schema::Int,
            )));
        let handle = wrap(Value::List(list![1i64]), options).unwrap();

        assert!(handle.push(2i64).is_ok());
        assert!(matches!(
            handle.push("nope"),
            Err(StateError::Schema { .. })
        ));
        assert_eq!(handle.len(), 2);
    }
}
