//! Error Taxonomy
//!
//! Every failure the engine can surface is one of four recoverable families:
//! identity violations, schema violations, contract violations, and
//! reentrancy violations. None of them leaves an aggregate partially
//! mutated - every write path is validate-then-commit-then-notify.
//!
//! In non-strict configuration most of these are downgraded to logged
//! advisories and the offending mutation simply does not happen; in strict
//! configuration the same conditions come back as `Err(StateError)`.

use thiserror::Error;

use crate::value::{AggregateKind, Key, Value};

/// Errors surfaced by the state engine.
#[derive(Debug, Error)]
pub enum StateError {
    /// The value is not a record, list, map, or set. Carries the input back
    /// so the caller keeps ownership of what they tried to wrap.
    #[error("cannot wrap non-linkable {} value", value.kind_name())]
    NotLinkable {
        /// The original input, returned unchanged.
        value: Value,
    },

    /// The handle has been destroyed or was never registered.
    #[error("state does not exist for this handle")]
    StateMissing,

    /// A write failed schema validation.
    #[error("schema violation at {key}: {reason}")]
    Schema { key: Key, reason: String },

    /// A mutation outside a writable view's allow-list, or on an immutable
    /// handle.
    #[error("mutation not permitted: {0}")]
    ContractViolation(String),

    /// A write to a property while an observer depending on that property
    /// is running.
    #[error("circular mutation of {key} inside a tracked computation")]
    CircularMutation { key: Key },

    /// An operation that only applies to one aggregate shape was invoked on
    /// another.
    #[error("expected a {expected}, found a {found}")]
    KindMismatch {
        expected: AggregateKind,
        found: AggregateKind,
    },

    /// A list index beyond the current length.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
}
