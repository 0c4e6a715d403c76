//! Write Contracts
//!
//! A write contract derives a mutable view from an existing (usually
//! immutable) handle with an explicit allow-list of permitted mutations. It
//! is a pure capability restriction: the view shares the original handle's
//! raw storage, metadata, and subscriber set, so changes made through it are
//! visible through the original facade and vice versa, and it creates no
//! new bookkeeping of its own.
//!
//! Allow-list entries are permission tokens: a record field set/delete is
//! checked against the field name; every other mutation against its
//! operation name (`"set"`, `"delete"`, `"push"`, `"splice"`, `"add"`, ...).
//! A view built without a list permits every mutation - that is how an
//! immutable handle's owner mints full write access.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::StateError;
use crate::state::handle::{Access, Handle};
use crate::value::{Key, Scalar, Value};

/// Permission tokens for a write contract.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a mutation with this permission token may proceed.
    pub fn permits(&self, token: &str) -> bool {
        self.entries.contains(token)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// An allow-listed mutable view over another handle's state.
pub struct WritableHandle {
    handle: Handle,
    allow: Option<AllowList>,
}

/// Derive a writable view from `handle`. `allow` of `None` permits every
/// mutation; otherwise only the listed tokens pass.
pub fn writable(handle: &Handle, allow: Option<AllowList>) -> WritableHandle {
    WritableHandle {
        handle: handle.clone(),
        allow,
    }
}

impl WritableHandle {
    fn access(&self) -> Access<'_> {
        Access::Contract(self.allow.as_ref())
    }

    /// The underlying handle (reads, subscriptions, snapshots).
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.handle.get(key)
    }

    pub fn len(&self) -> usize {
        self.handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), StateError> {
        self.handle.set_with(key.into(), value.into(), self.access())
    }

    pub fn delete(&self, key: impl Into<Key>) -> Result<Option<Value>, StateError> {
        self.handle.delete_with(key.into(), self.access())
    }

    pub fn assign(&self, value: &Value) -> Result<(), StateError> {
        self.handle.assign_with(value, self.access())
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), StateError> {
        self.handle.push_with(value.into(), self.access())
    }

    pub fn pop(&self) -> Result<Option<Value>, StateError> {
        self.handle.pop_with(self.access())
    }

    pub fn shift(&self) -> Result<Option<Value>, StateError> {
        self.handle.shift_with(self.access())
    }

    pub fn unshift(&self, value: impl Into<Value>) -> Result<(), StateError> {
        self.handle.unshift_with(value.into(), self.access())
    }

    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StateError> {
        self.handle.splice_with(start, delete_count, items, self.access())
    }

    pub fn sort(&self) -> Result<(), StateError> {
        self.handle.sort_by_with(|a, b| a.sort_cmp(b), self.access())
    }

    pub fn sort_by<F>(&self, compare: F) -> Result<(), StateError>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.handle.sort_by_with(compare, self.access())
    }

    pub fn reverse(&self) -> Result<(), StateError> {
        self.handle.reverse_with(self.access())
    }

    pub fn clear(&self) -> Result<(), StateError> {
        self.handle.clear_with(self.access())
    }

    pub fn add(&self, member: impl Into<Scalar>) -> Result<(), StateError> {
        self.handle.add_with(member.into(), self.access())
    }

    pub fn remove(&self, member: impl Into<Scalar>) -> Result<bool, StateError> {
        self.handle.remove_with(member.into(), self.access())
    }

    pub fn insert(
        &self,
        key: impl Into<Scalar>,
        value: impl Into<Value>,
    ) -> Result<(), StateError> {
        self.handle.set_with(Key::Entry(key.into()), value.into(), self.access())
    }

    pub fn remove_entry(&self, key: impl Into<Scalar>) -> Result<Option<Value>, StateError> {
        self.handle.delete_with(Key::Entry(key.into()), self.access())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{wrap, WrapOptions};
    use crate::{list, record};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn frozen_user() -> Handle {
        wrap(
            Value::Record(record! { "name" => "ada", "age" => 36i64 }),
            WrapOptions::new().strict().immutable(),
        )
        .unwrap()
    }

    #[test]
    fn allow_list_permits_listed_fields_only() {
        let handle = frozen_user();
        let view = writable(&handle, Some(AllowList::new(["name"])));

        view.set("name", "grace").unwrap();
        assert_eq!(handle.get("name"), Some(Value::Text("grace".into())));

        let err = view.set("age", 1i64).unwrap_err();
        assert!(matches!(err, StateError::ContractViolation(_)));
        assert_eq!(handle.get("age"), Some(Value::Int(36)));
    }

    #[test]
    fn lenient_views_log_instead_of_erroring() {
        let handle = wrap(
            Value::Record(record! { "name" => "ada" }),
            WrapOptions::new().immutable(),
        )
        .unwrap();
        let view = writable(&handle, Some(AllowList::new(["name"])));

        // Outside the allow-list: rejected quietly, value unchanged.
        view.set("other", 1i64).unwrap();
        assert_eq!(handle.get("other"), None);
    }

    #[test]
    fn unrestricted_view_unlocks_an_immutable_handle() {
        let handle = frozen_user();
        assert!(handle.set("age", 37i64).is_err());

        let view = writable(&handle, None);
        view.set("age", 37i64).unwrap();
        assert_eq!(handle.get("age"), Some(Value::Int(37)));
    }

    #[test]
    fn changes_through_the_view_reach_the_originals_subscribers() {
        let handle = frozen_user();
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let _sub = handle.subscribe(move |_, _| {
            inner.fetch_add(1, AtomicOrdering::SeqCst);
        });

        let view = writable(&handle, Some(AllowList::new(["name"])));
        view.set("name", "grace").unwrap();

        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        // No new metadata: the view shares the original subscriber set.
        assert_eq!(handle.subscriber_count(), 1);
    }

    #[test]
    fn operation_tokens_gate_collection_mutations() {
        let handle = wrap(
            Value::List(list![1i64, 2i64]),
            WrapOptions::new().strict().immutable(),
        )
        .unwrap();
        let view = writable(&handle, Some(AllowList::new(["push"])));

        view.push(3i64).unwrap();
        assert_eq!(handle.len(), 3);

        assert!(matches!(
            view.pop(),
            Err(StateError::ContractViolation(_))
        ));
        assert_eq!(handle.len(), 3);
    }
}
