//! Reactive State
//!
//! This module implements the managed-handle side of the engine: identity
//! registries, the get/set/delete interception layer, the collection
//! mutators, and write contracts.
//!
//! # Concepts
//!
//! ## Handles
//!
//! [`wrap`] turns a raw aggregate into a [`Handle`], the controlled facade
//! every read and write goes through. Wrapping is idempotent: the same raw
//! aggregate always resolves to the same handle, which is what keeps
//! identity stable across a whole object graph.
//!
//! ## Lazy child wrapping
//!
//! Nested aggregates are wrapped on first read, not at creation time, and
//! cached by raw identity. Reads performed under an observer additionally
//! register parent↔child subscription links so child changes bubble up.
//!
//! ## Write contracts
//!
//! [`writable`] derives an allow-listed mutable view from an otherwise
//! immutable handle. The view shares the original's raw storage and
//! subscriber set - it is a capability restriction, not a copy.

mod contract;
mod list;
mod map;
mod set;

pub(crate) mod handle;
pub(crate) mod meta;
pub(crate) mod registry;

pub use contract::{writable, AllowList, WritableHandle};
pub use handle::{wrap, Handle};
pub use meta::{
    Controller, HandleId, Metadata, Recursion, SubscriberId, Subscription, WrapOptions,
};
pub use registry::{identify, prune, resolve};
