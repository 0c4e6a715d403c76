//! Unique-Set Mutators
//!
//! Sets hold scalar members. `add` of a present member and `remove` of an
//! absent one are no-ops; membership reads track the member's entry key so
//! observers depend on exactly the members they asked about.

use crate::broadcast::{self, ChangeEvent, ChangeKind};
use crate::error::StateError;
use crate::observe::context;
use crate::state::handle::{Access, Gate, Handle};
use crate::value::{AggregateKind, Key, RawAggregate, RawSet, Scalar, Value};

impl Handle {
    fn expect_set(&self) -> Result<RawSet, StateError> {
        match &self.raw() {
            RawAggregate::Set(s) => Ok(s.clone()),
            other => Err(StateError::KindMismatch {
                expected: AggregateKind::Set,
                found: other.kind(),
            }),
        }
    }

    /// Whether `member` is in the set. Tracked against that member's key.
    pub fn contains(&self, member: impl Into<Scalar>) -> Result<bool, StateError> {
        let set = self.expect_set()?;
        let member = member.into();
        context::track_read(self.raw().id(), &Key::Entry(member.clone()));
        let contains = set.0.read().contains(&member);
        Ok(contains)
    }

    /// Add a member. No-op if already present.
    pub fn add(&self, member: impl Into<Scalar>) -> Result<(), StateError> {
        self.add_with(member.into(), Access::Direct)
    }

    pub(crate) fn add_with(&self, member: Scalar, access: Access<'_>) -> Result<(), StateError> {
        let set = self.expect_set()?;
        let key = Key::Entry(member.clone());
        if let Gate::Rejected = self.gate_write(&key, "add", access)? {
            return Ok(());
        }
        if set.0.read().contains(&member) {
            return Ok(());
        }
        let value = Value::from(member.clone());
        if let Gate::Rejected = self.gate_schema_for(&key, &value)? {
            return Ok(());
        }

        set.0.write().insert(member);

        let event = ChangeEvent::new(ChangeKind::Add, key, None, Some(value));
        broadcast::notify(self, &event);
        Ok(())
    }

    /// Remove a member. No-op if absent.
    pub fn remove(&self, member: impl Into<Scalar>) -> Result<bool, StateError> {
        self.remove_with(member.into(), Access::Direct)
    }

    pub(crate) fn remove_with(&self, member: Scalar, access: Access<'_>) -> Result<bool, StateError> {
        let set = self.expect_set()?;
        let key = Key::Entry(member.clone());
        if let Gate::Rejected = self.gate_write(&key, "remove", access)? {
            return Ok(false);
        }

        let removed = set.0.write().shift_remove(&member);
        if !removed {
            return Ok(false);
        }

        let event = ChangeEvent::new(
            ChangeKind::Remove,
            key,
            Some(Value::from(member)),
            None,
        );
        broadcast::notify(self, &event);
        Ok(true)
    }

    pub(crate) fn clear_set_with(&self, access: Access<'_>) -> Result<(), StateError> {
        let set = self.expect_set()?;
        if let Gate::Rejected = self.gate_write(&Key::Collection, "clear", access)? {
            return Ok(());
        }
        if set.0.read().is_empty() {
            return Ok(());
        }

        let prev = RawSet::new();
        {
            let mut guard = set.0.write();
            *prev.0.write() = std::mem::take(&mut *guard);
        }

        let event = ChangeEvent::new(
            ChangeKind::Clear,
            Key::Collection,
            Some(Value::Set(prev)),
            None,
        );
        broadcast::notify(self, &event);
        Ok(())
    }
}
