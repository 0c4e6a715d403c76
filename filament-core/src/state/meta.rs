//! Handle Metadata
//!
//! Every handle owns exactly one `Metadata`: its configuration, resolved
//! schema, subscriber list, lazy child cache, and the parent/child link
//! bookkeeping the interception layer maintains. Metadata is created once at
//! wrap time, mutated only by the interception layer, and cleared when the
//! handle's controller destroys it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::broadcast::{ChangeEvent, EmitterId};
use crate::schema::Schema;
use crate::state::handle::{Handle, HandleCore};
use crate::value::{Key, RawId, Value};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Unique identifier for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    /// Generate a new unique handle ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a subscriber callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// How far child wrapping reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recursion {
    /// Children wrap lazily and link to their parent.
    #[default]
    Full,
    /// Children wrap, but list elements do not link to the list - a flat
    /// list tracks top-level mutations only, not element-level changes.
    Flat,
    /// Children are never wrapped; reads return raw values.
    Off,
}

/// Wrap-time configuration for a handle. Children inherit everything except
/// `cloned` (the copy already happened) and receive the sub-schema for
/// their key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapOptions {
    /// Validator tree for this aggregate.
    pub schema: Option<Schema>,
    /// Reject invalid writes with an error instead of a logged advisory.
    pub strict: bool,
    /// Deep-copy the input before wrapping (the caller keeps the original).
    pub cloned: bool,
    /// Wrap nested aggregates on first read rather than at creation.
    pub deferred: bool,
    /// Child wrapping policy.
    pub recursive: Recursion,
    /// Produce a read-only facade; writes require a write contract.
    pub immutable: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            schema: None,
            strict: false,
            cloned: false,
            deferred: true,
            recursive: Recursion::Full,
            immutable: false,
        }
    }
}

impl WrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn cloned(mut self) -> Self {
        self.cloned = true;
        self
    }

    pub fn eager(mut self) -> Self {
        self.deferred = false;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn recursion(mut self, mode: Recursion) -> Self {
        self.recursive = mode;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// The options a child wrapped under `key` inherits.
    pub(crate) fn for_child(&self, schema: Option<&Arc<Schema>>, key: &Key) -> Self {
        Self {
            schema: schema.and_then(|s| s.for_key(key)).cloned(),
            strict: self.strict,
            cloned: false,
            deferred: self.deferred,
            recursive: self.recursive,
            immutable: self.immutable,
        }
    }
}

// ----------------------------------------------------------------------------
// Subscribers
// ----------------------------------------------------------------------------

/// Callback invoked with a plain snapshot of the aggregate and the event.
pub type SubscriberFn = dyn Fn(&Value, &ChangeEvent) + Send + Sync;

pub(crate) struct SubscriberEntry {
    pub(crate) id: SubscriberId,
    /// Origin tag for echo suppression: the entry is skipped when the
    /// ambient emitter of a mutation equals this tag.
    pub(crate) origin: Option<EmitterId>,
    pub(crate) callback: Arc<SubscriberFn>,
}

impl Clone for SubscriberEntry {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            origin: self.origin,
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Guard for a registered subscriber. Dropping it (or calling
/// [`unsubscribe`](Subscription::unsubscribe)) removes the callback.
pub struct Subscription {
    pub(crate) core: Weak<HandleCore>,
    pub(crate) id: SubscriberId,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the subscriber now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.meta.remove_subscriber(self.id);
        }
    }
}

// ----------------------------------------------------------------------------
// Child links
// ----------------------------------------------------------------------------

/// An active parent↔child subscription: the parent holds a relay subscriber
/// inside the child so child changes bubble up with the key prepended.
pub(crate) struct ChildLink {
    pub(crate) child: Handle,
    pub(crate) relay: SubscriberId,
}

impl ChildLink {
    /// Remove the relay from the child's subscriber list.
    pub(crate) fn sever(&self) {
        self.child.core().meta.remove_subscriber(self.relay);
    }
}

// ----------------------------------------------------------------------------
// Metadata
// ----------------------------------------------------------------------------

/// Per-handle bookkeeping. Owned exclusively by its handle.
pub struct Metadata {
    pub(crate) options: WrapOptions,
    pub(crate) schema: Option<Arc<Schema>>,
    pub(crate) subscribers: RwLock<Vec<SubscriberEntry>>,
    /// Lazily wrapped children, cached by raw identity so repeated reads
    /// return the same handle.
    pub(crate) children: RwLock<HashMap<RawId, Handle>>,
    /// Active parent→child links by the key the child lives under.
    pub(crate) links: RwLock<HashMap<Key, ChildLink>>,
    pub(crate) parent: RwLock<Option<Weak<HandleCore>>>,
    pub(crate) root: RwLock<Option<Weak<HandleCore>>>,
    pub(crate) destroyed: AtomicBool,
}

impl Metadata {
    pub(crate) fn new(options: WrapOptions) -> Self {
        let schema = options.schema.clone().map(Arc::new);
        Self {
            options,
            schema,
            subscribers: RwLock::new(Vec::new()),
            children: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            parent: RwLock::new(None),
            root: RwLock::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub(crate) fn add_subscriber(
        &self,
        origin: Option<EmitterId>,
        callback: Arc<SubscriberFn>,
    ) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.write().push(SubscriberEntry {
            id,
            origin,
            callback,
        });
        id
    }

    pub(crate) fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers.write().retain(|entry| entry.id != id);
    }

    /// Snapshot the subscriber list so callbacks run without the lock held.
    pub(crate) fn subscribers_snapshot(&self) -> Vec<SubscriberEntry> {
        self.subscribers.read().clone()
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

/// The teardown surface of a handle: one per handle, and the only object
/// allowed to remove it from the registries and sever its links.
pub struct Controller {
    pub(crate) handle: Handle,
}

impl Controller {
    /// The handle's metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.handle.core().meta
    }

    /// Subscribe to the handle's changes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
    {
        self.handle.subscribe(callback)
    }

    /// Tear the handle down: unregister it, sever every parent/child link,
    /// and clear its subscriber set. Idempotent.
    pub fn destroy(&self) {
        let core = self.handle.core();
        if core.meta.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        crate::state::registry::unregister(core.raw.id());

        let links: Vec<ChildLink> = core.meta.links.write().drain().map(|(_, l)| l).collect();
        for link in &links {
            link.sever();
        }

        core.meta.children.write().clear();
        core.meta.subscribers.write().clear();
        *core.meta.parent.write() = None;
        *core.meta.root.write() = None;

        tracing::debug!(handle = ?self.handle.id(), "handle destroyed");
    }
}
