//! Dependency Tracking
//!
//! This module implements the observer side of the engine: per-computation
//! read-set capture and change dispatch.
//!
//! # Concepts
//!
//! ## Observers
//!
//! An [`Observer`] runs computations under dependency tracking: every read
//! that goes through a handle while the observer is ambient records the
//! (aggregate, key) pair into the observer's read-set. When a mutation
//! later touches a recorded pair, the observer's change callback fires -
//! and only then. Sibling properties the computation never read do not
//! notify it.
//!
//! ## The ambient context
//!
//! Only one observer is ambient at a time. Nested `run` calls push onto a
//! thread-local stack and restore the outer observer when they finish, so
//! tracked computations compose.
//!
//! ## Reentrancy
//!
//! A write to a property while an observer depending on that property is
//! running is a circular mutation: it is detected and refused rather than
//! executed as an infinite notify loop.

mod observer;

pub(crate) mod context;

pub use context::is_tracking;
pub use observer::{Observer, ObserverId, READ_SET_ADVISORY_LIMIT};

pub(crate) use observer::notify_observers;
