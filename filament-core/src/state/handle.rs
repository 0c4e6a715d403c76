//! Interception Layer
//!
//! A `Handle` is the controlled facade over a raw aggregate: every read and
//! write goes through it. Reads register dependencies with the ambient
//! observer and lazily wrap nested aggregates on first access; writes are
//! gated (contract, reentrancy, schema), committed to the raw storage, and
//! only then fanned out to observers and subscribers.
//!
//! # Write discipline
//!
//! Every mutation is validate-then-commit-then-notify. The raw cell's lock
//! is released before any callback runs, and a rejected mutation leaves the
//! raw aggregate untouched. In strict configuration rejections surface as
//! `Err(StateError)`; otherwise they are logged advisories and the call
//! returns `Ok` with nothing written.
//!
//! # Lazy child wrapping
//!
//! Nested aggregates are not wrapped at creation time (unless `deferred` is
//! switched off). The first read of a nested aggregate wraps it with the
//! parent's inherited configuration and caches the child handle by raw
//! identity, so repeated reads return the same handle. A read that resolves
//! to the aggregate itself returns the existing handle and raises a
//! non-fatal circular-reference advisory instead of recursing.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::broadcast::{self, ChangeEvent, ChangeKind, EmitterId};
use crate::error::StateError;
use crate::observe::context;
use crate::state::contract::AllowList;
use crate::state::meta::{
    ChildLink, Controller, HandleId, Metadata, Recursion, SubscriberFn, Subscription, WrapOptions,
};
use crate::state::registry;
use crate::value::{
    structural_clone, AggregateKind, Key, RawAggregate, RawId, Value,
};

// ----------------------------------------------------------------------------
// Access discipline
// ----------------------------------------------------------------------------

/// How a mutation reaches the interception layer.
#[derive(Clone, Copy)]
pub(crate) enum Access<'a> {
    /// Through the handle itself. Blocked on immutable handles.
    Direct,
    /// Through a write contract. Bypasses the immutable flag; restricted to
    /// the allow-list when one is present.
    Contract(Option<&'a AllowList>),
}

/// Outcome of the pre-commit gates: proceed, or quietly rejected
/// (non-strict configuration logged an advisory and nothing happens).
pub(crate) enum Gate {
    Proceed,
    Rejected,
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

pub(crate) struct HandleCore {
    pub(crate) id: HandleId,
    pub(crate) raw: RawAggregate,
    pub(crate) meta: Metadata,
}

/// The reactive facade over a raw aggregate. Cloning shares the same state;
/// wrapping the same raw aggregate twice returns the same handle.
pub struct Handle {
    core: Arc<HandleCore>,
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.core.id)
            .field("kind", &self.kind())
            .field("subscribers", &self.core.meta.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Wrap
// ----------------------------------------------------------------------------

/// Wrap a value into a reactive handle.
///
/// Idempotent per raw identity: the same aggregate always resolves to the
/// same handle. Non-linkable values come back inside the error so the
/// caller keeps ownership.
pub fn wrap(value: Value, options: WrapOptions) -> Result<Handle, StateError> {
    let Some(aggregate) = value.as_aggregate() else {
        warn!(kind = value.kind_name(), "wrap called with non-linkable value");
        return Err(StateError::NotLinkable { value });
    };

    if options.cloned {
        // The caller keeps the original; wrap a detached deep copy.
        let copy = structural_clone(&value)
            .as_aggregate()
            .expect("clone of an aggregate is an aggregate");
        return Ok(create(copy, options));
    }

    if let Some(existing) = registry::identify(&aggregate) {
        trace!(handle = ?existing.id(), "wrap resolved to existing handle");
        return Ok(existing);
    }

    Ok(create(aggregate, options))
}

fn create(raw: RawAggregate, options: WrapOptions) -> Handle {
    let eager = !options.deferred;
    let handle = Handle {
        core: Arc::new(HandleCore {
            id: HandleId::new(),
            raw,
            meta: Metadata::new(options),
        }),
    };
    registry::register(&handle);
    debug!(handle = ?handle.id(), kind = %handle.kind(), "wrapped aggregate");

    if eager {
        wrap_descendants(&handle);
    }
    handle
}

/// Eagerly wrap every nested aggregate. Registry idempotency breaks cycles;
/// the visited set keeps shared substructure from being walked twice.
fn wrap_descendants(root: &Handle) {
    let mut visited: std::collections::HashSet<RawId> = std::collections::HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(handle) = stack.pop() {
        if !visited.insert(handle.raw().id()) {
            continue;
        }
        for key in handle.raw_keys() {
            if let Some(value) = handle.raw_get(&key) {
                if let Some(agg) = value.as_aggregate() {
                    if agg.id() == handle.raw().id() {
                        continue;
                    }
                    let child = handle.adopt_child(&key, agg);
                    stack.push(child);
                }
            }
        }
    }
}

impl Handle {
    pub(crate) fn from_core(core: Arc<HandleCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<HandleCore> {
        &self.core
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleCore> {
        Arc::downgrade(&self.core)
    }

    pub fn id(&self) -> HandleId {
        self.core.id
    }

    pub fn kind(&self) -> AggregateKind {
        self.core.raw.kind()
    }

    /// The raw aggregate behind this handle. Mutating it directly bypasses
    /// every invariant of the engine; use the handle.
    pub fn raw(&self) -> RawAggregate {
        self.core.raw.clone()
    }

    /// The teardown surface for this handle.
    pub fn controller(&self) -> Controller {
        Controller {
            handle: self.clone(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.meta.is_destroyed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.meta.subscriber_count()
    }

    /// The handle this one was lazily wrapped under, if still alive.
    pub fn parent(&self) -> Option<Handle> {
        self.core
            .meta
            .parent
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Handle::from_core)
    }

    /// The top of the wrapped graph this handle belongs to, if still alive.
    /// A handle wrapped directly is its own root.
    pub fn root(&self) -> Handle {
        self.core
            .meta
            .root
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Handle::from_core)
            .unwrap_or_else(|| self.clone())
    }

    /// Register a subscriber callback, invoked with a plain snapshot and the
    /// event after every mutation of this aggregate (or a bubbled child
    /// mutation). The subscription ends when the guard drops.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe_tagged(None, callback)
    }

    /// Like [`subscribe`](Handle::subscribe), tagged with an originating
    /// emitter: mutations performed under that emitter skip this callback.
    pub fn subscribe_tagged<F>(&self, origin: Option<EmitterId>, callback: F) -> Subscription
    where
        F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.core.meta.add_subscriber(origin, Arc::new(callback));
        Subscription {
            core: Arc::downgrade(&self.core),
            id,
        }
    }

    pub(crate) fn subscribe_relay(
        &self,
        origin: Option<EmitterId>,
        callback: Arc<SubscriberFn>,
    ) -> crate::state::meta::SubscriberId {
        self.core.meta.add_subscriber(origin, callback)
    }

    /// A plain, cycle-safe deep copy of the current state. Untracked.
    pub fn snapshot(&self) -> Value {
        structural_clone(&self.core.raw.as_value())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read the value at `key`, registering the read with the ambient
    /// observer. First reads of nested aggregates wrap them lazily.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        let value = self.raw_get(&key)?;
        context::track_read(self.core.raw.id(), &key);

        if let Some(agg) = value.as_aggregate() {
            if self.core.meta.options.recursive != Recursion::Off {
                let child = self.adopt_child(&key, agg);
                self.maybe_link(&key, &child);
            }
        }
        Some(value)
    }

    /// Read the child handle at `key`. Same path as [`get`](Handle::get),
    /// but hands back the wrapped child for nested aggregates.
    pub fn child(&self, key: impl Into<Key>) -> Option<Handle> {
        let key = key.into();
        let value = self.raw_get(&key)?;
        context::track_read(self.core.raw.id(), &key);

        let agg = value.as_aggregate()?;
        if self.core.meta.options.recursive == Recursion::Off {
            return None;
        }
        let child = self.adopt_child(&key, agg);
        self.maybe_link(&key, &child);
        Some(child)
    }

    /// Whether `key` is present. Tracked like a read of that key.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        context::track_read(self.core.raw.id(), &key);
        self.raw_get(&key).is_some()
    }

    /// Number of fields/elements/entries/members. Tracked as a
    /// whole-collection read.
    pub fn len(&self) -> usize {
        context::track_read(self.core.raw.id(), &Key::Collection);
        self.core.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key currently present. Tracked as a whole-collection read.
    pub fn keys(&self) -> Vec<Key> {
        context::track_read(self.core.raw.id(), &Key::Collection);
        self.raw_keys()
    }

    pub(crate) fn raw_get(&self, key: &Key) -> Option<Value> {
        match (&self.core.raw, key) {
            (RawAggregate::Record(r), Key::Field(name)) => r.0.read().get(name).cloned(),
            (RawAggregate::List(l), Key::Index(i)) => l.0.read().get(*i).cloned(),
            (RawAggregate::Map(m), Key::Entry(k)) => m.0.read().get(k).cloned(),
            (RawAggregate::Set(s), Key::Entry(k)) => {
                s.0.read().get(k).map(|m| Value::from(m.clone()))
            }
            _ => None,
        }
    }

    pub(crate) fn raw_keys(&self) -> Vec<Key> {
        match &self.core.raw {
            RawAggregate::Record(r) => {
                r.0.read().keys().map(|k| Key::Field(k.clone())).collect()
            }
            RawAggregate::List(l) => (0..l.0.read().len()).map(Key::Index).collect(),
            RawAggregate::Map(m) => {
                m.0.read().keys().map(|k| Key::Entry(k.clone())).collect()
            }
            RawAggregate::Set(s) => {
                s.0.read().iter().map(|m| Key::Entry(m.clone())).collect()
            }
        }
    }

    // ------------------------------------------------------------------
    // Child adoption and linking
    // ------------------------------------------------------------------

    /// Wrap (or look up) the child aggregate read at `key`, cache it by raw
    /// identity, and point its parent/root backrefs here.
    pub(crate) fn adopt_child(&self, key: &Key, agg: RawAggregate) -> Handle {
        if agg.id() == self.core.raw.id() {
            // The aggregate contains itself; hand back this handle instead
            // of re-entering wrap.
            warn!(handle = ?self.id(), key = %key, "circular reference read");
            return self.clone();
        }

        if let Some(cached) = self.core.meta.children.read().get(&agg.id()) {
            return cached.clone();
        }

        let options = self
            .core
            .meta
            .options
            .for_child(self.core.meta.schema.as_ref(), key);
        let child = match wrap(agg.as_value(), options) {
            Ok(child) => child,
            Err(_) => unreachable!("aggregates are always linkable"),
        };

        *child.core.meta.parent.write() = Some(Arc::downgrade(&self.core));
        let root = self
            .core
            .meta
            .root
            .read()
            .clone()
            .unwrap_or_else(|| Arc::downgrade(&self.core));
        *child.core.meta.root.write() = Some(root);

        self.core
            .meta
            .children
            .write()
            .insert(agg.id(), child.clone());
        trace!(parent = ?self.id(), child = ?child.id(), key = %key, "lazily wrapped child");
        child
    }

    /// Register the parent↔child subscription link for a tracked read:
    /// only when a tracker is active and this handle has subscribers to
    /// bubble to, and never for list elements in flat recursion.
    fn maybe_link(&self, key: &Key, child: &Handle) {
        if !context::is_tracking() || self.core.meta.subscriber_count() == 0 {
            return;
        }
        if self.core.meta.options.recursive == Recursion::Flat
            && matches!(key, Key::Index(_))
        {
            return;
        }
        self.link_child(key, child);
    }

    pub(crate) fn link_child(&self, key: &Key, child: &Handle) {
        if child.id() == self.id() {
            return;
        }
        {
            let links = self.core.meta.links.read();
            if let Some(existing) = links.get(key) {
                if existing.child.id() == child.id() {
                    return;
                }
            }
        }

        let parent = Arc::downgrade(&self.core);
        let parent_key = key.clone();
        let relay: Arc<SubscriberFn> = Arc::new(move |_snapshot, event| {
            if let Some(core) = parent.upgrade() {
                let handle = Handle::from_core(core);
                if handle.is_destroyed() {
                    return;
                }
                let bubbled = event.bubbled(parent_key.clone());
                broadcast::notify(&handle, &bubbled);
            }
        });

        let relay_id = child.subscribe_relay(None, relay);
        let replaced = self.core.meta.links.write().insert(
            key.clone(),
            ChildLink {
                child: child.clone(),
                relay: relay_id,
            },
        );
        if let Some(old) = replaced {
            old.sever();
        }
        trace!(parent = ?self.id(), child = ?child.id(), key = %key, "linked child");
    }

    fn unlink_child(&self, key: &Key) {
        if let Some(link) = self.core.meta.links.write().remove(key) {
            link.sever();
            trace!(parent = ?self.id(), key = %key, "unlinked child");
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `value` at `key`. No-op (no event, no subscription changes)
    /// when the value is already current; gated by contract, reentrancy,
    /// and schema checks.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), StateError> {
        self.set_with(key.into(), value.into(), Access::Direct)
    }

    /// Remove `key`. Returns the removed value, if any.
    pub fn delete(&self, key: impl Into<Key>) -> Result<Option<Value>, StateError> {
        self.delete_with(key.into(), Access::Direct)
    }

    /// Bulk top-level merge: set every field/element/entry of `value` onto
    /// this handle. The commit path of pipe/bind.
    pub fn assign(&self, value: &Value) -> Result<(), StateError> {
        self.assign_with(value, Access::Direct)
    }

    pub(crate) fn set_with(
        &self,
        key: Key,
        value: Value,
        access: Access<'_>,
    ) -> Result<(), StateError> {
        if self.core.meta.is_destroyed() {
            return Err(StateError::StateMissing);
        }

        let prev = self.raw_get(&key);
        if prev.as_ref() == Some(&value) {
            // Identical value: suppressed entirely, before any other gate.
            return Ok(());
        }

        if let Gate::Rejected = self.gate_write(&key, write_token(&key, "set"), access)? {
            return Ok(());
        }
        if let Gate::Rejected = self.gate_schema_for(&key, &value)? {
            return Ok(());
        }

        // Commit.
        match (&self.core.raw, &key) {
            (RawAggregate::Record(r), Key::Field(name)) => {
                r.0.write().insert(name.clone(), value.clone());
            }
            (RawAggregate::List(l), Key::Index(i)) => {
                let mut guard = l.0.write();
                let len = guard.len();
                if *i < len {
                    guard[*i] = value.clone();
                } else if *i == len {
                    guard.push(value.clone());
                } else {
                    return Err(StateError::IndexOutOfBounds { index: *i, len });
                }
            }
            (RawAggregate::Map(m), Key::Entry(k)) => {
                m.0.write().insert(k.clone(), value.clone());
            }
            (raw, _) => {
                return Err(StateError::KindMismatch {
                    expected: expected_kind(&key),
                    found: raw.kind(),
                });
            }
        }

        // Re-point child linkage at the new value.
        let had_link = {
            let links = self.core.meta.links.read();
            links.contains_key(&key)
        };
        if had_link {
            self.unlink_child(&key);
        }
        if let Some(old) = prev.as_ref().and_then(Value::as_aggregate) {
            self.core.meta.children.write().remove(&old.id());
        }
        if let Some(agg) = value.as_aggregate() {
            if self.core.meta.options.recursive != Recursion::Off
                && (had_link || self.core.meta.subscriber_count() > 0)
            {
                let child = self.adopt_child(&key, agg);
                if child.id() != self.id() {
                    self.link_child(&key, &child);
                }
            }
        }

        let event = ChangeEvent::new(ChangeKind::Set, key, prev, Some(value));
        broadcast::notify(self, &event);
        Ok(())
    }

    pub(crate) fn delete_with(
        &self,
        key: Key,
        access: Access<'_>,
    ) -> Result<Option<Value>, StateError> {
        if let Gate::Rejected = self.gate_write(&key, write_token(&key, "delete"), access)? {
            return Ok(None);
        }

        // Validate the key may become absent before touching storage.
        if let Some(schema) = self.core.meta.schema.as_ref() {
            if !schema.allows_absent(&key) {
                return self
                    .reject_schema(&key, "field is required and cannot be deleted")
                    .map(|_| None);
            }
        }

        let removed = match (&self.core.raw, &key) {
            (RawAggregate::Record(r), Key::Field(name)) => r.0.write().shift_remove(name),
            (RawAggregate::Map(m), Key::Entry(k)) => m.0.write().shift_remove(k),
            (raw, Key::Index(_)) => {
                return Err(StateError::KindMismatch {
                    expected: AggregateKind::Record,
                    found: raw.kind(),
                });
            }
            (raw, _) => {
                return Err(StateError::KindMismatch {
                    expected: expected_kind(&key),
                    found: raw.kind(),
                });
            }
        };

        let Some(prev) = removed else {
            // Deleting an absent key is a no-op.
            return Ok(None);
        };

        self.unlink_child(&key);
        if let Some(old) = prev.as_aggregate() {
            self.core.meta.children.write().remove(&old.id());
        }

        let event = ChangeEvent::new(ChangeKind::Delete, key, Some(prev.clone()), None);
        broadcast::notify(self, &event);
        Ok(Some(prev))
    }

    pub(crate) fn assign_with(&self, value: &Value, access: Access<'_>) -> Result<(), StateError> {
        match (&self.core.raw, value) {
            (RawAggregate::Record(_), Value::Record(src)) => {
                let entries: Vec<(String, Value)> = src
                    .0
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (name, val) in entries {
                    self.set_with(Key::Field(name), val, access)?;
                }
                Ok(())
            }
            (RawAggregate::Map(_), Value::Map(src)) => {
                let entries: Vec<(crate::value::Scalar, Value)> = src
                    .0
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, val) in entries {
                    self.set_with(Key::Entry(k), val, access)?;
                }
                Ok(())
            }
            (RawAggregate::List(_), Value::List(src)) => {
                let items: Vec<Value> = src.0.read().clone();
                let len = self.core.raw.len();
                self.splice_with(0, len, items, access).map(|_| ())
            }
            (RawAggregate::Set(_), Value::Set(src)) => {
                let members: Vec<crate::value::Scalar> =
                    src.0.read().iter().cloned().collect();
                self.clear_with(access)?;
                for m in members {
                    self.add_with(m, access)?;
                }
                Ok(())
            }
            (raw, other) => match other.as_aggregate() {
                Some(agg) => Err(StateError::KindMismatch {
                    expected: raw.kind(),
                    found: agg.kind(),
                }),
                None => Err(StateError::NotLinkable {
                    value: other.clone(),
                }),
            },
        }
    }

    // ------------------------------------------------------------------
    // Gates
    // ------------------------------------------------------------------

    /// Contract and reentrancy gates, shared by every mutator.
    pub(crate) fn gate_write(
        &self,
        key: &Key,
        token: &str,
        access: Access<'_>,
    ) -> Result<Gate, StateError> {
        if self.core.meta.is_destroyed() {
            return Err(StateError::StateMissing);
        }

        match access {
            Access::Direct => {
                if self.core.meta.options.immutable {
                    return self.reject_contract(format!(
                        "handle is immutable; '{token}' requires a write contract"
                    ));
                }
            }
            Access::Contract(allow) => {
                if let Some(list) = allow {
                    if !list.permits(token) {
                        return self.reject_contract(format!(
                            "'{token}' at {key} is outside the allow-list"
                        ));
                    }
                }
            }
        }

        if context::write_is_circular(self.core.raw.id(), key) {
            warn!(handle = ?self.id(), key = %key, "circular mutation inside tracked run");
            if self.core.meta.options.strict {
                return Err(StateError::CircularMutation { key: key.clone() });
            }
            return Ok(Gate::Rejected);
        }

        Ok(Gate::Proceed)
    }

    pub(crate) fn gate_schema_for(&self, key: &Key, value: &Value) -> Result<Gate, StateError> {
        let Some(schema) = self.core.meta.schema.as_ref() else {
            return Ok(Gate::Proceed);
        };
        let Some(sub) = schema.for_key(key) else {
            return Ok(Gate::Proceed);
        };
        match sub.check(value) {
            Ok(()) => Ok(Gate::Proceed),
            Err(violation) => self.reject_schema(key, &violation.reason),
        }
    }

    fn reject_schema(&self, key: &Key, reason: &str) -> Result<Gate, StateError> {
        if self.core.meta.options.strict {
            Err(StateError::Schema {
                key: key.clone(),
                reason: reason.to_string(),
            })
        } else {
            warn!(handle = ?self.id(), key = %key, reason, "schema rejected write");
            Ok(Gate::Rejected)
        }
    }

    fn reject_contract(&self, message: String) -> Result<Gate, StateError> {
        if self.core.meta.options.strict {
            Err(StateError::ContractViolation(message))
        } else {
            warn!(handle = ?self.id(), %message, "contract rejected write");
            Ok(Gate::Rejected)
        }
    }
}

fn write_token<'a>(key: &'a Key, op: &'a str) -> &'a str {
    match key {
        Key::Field(name) => name.as_str(),
        _ => op,
    }
}

fn expected_kind(key: &Key) -> AggregateKind {
    match key {
        Key::Field(_) => AggregateKind::Record,
        Key::Index(_) => AggregateKind::List,
        Key::Entry(_) => AggregateKind::Map,
        Key::Collection => AggregateKind::List,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
