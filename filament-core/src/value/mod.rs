//! Value Model
//!
//! The engine manages arbitrary mutable aggregates: records (string-keyed
//! fields), ordered lists, keyed maps, and unique-value sets. This module
//! defines the value tree those aggregates form and the identity scheme the
//! rest of the engine is built on.
//!
//! # Identity
//!
//! Aggregates are shared cells (`Arc<RwLock<..>>`). Cloning a `Value` that
//! holds an aggregate clones the reference, not the contents, so the same
//! logical entity can appear in several places - including inside itself.
//! Identity (`RawId`) is the cell's allocation address: unique among live
//! aggregates, and safe to key weak registries with because a stale entry
//! for a freed address can no longer be upgraded.
//!
//! # Equality
//!
//! `Value` equality follows the engine's no-op rule: scalars compare by
//! value (floats by bit pattern, so `NaN == NaN` here), aggregates compare
//! by reference identity. Writing a value that is equal under this relation
//! to the current one is a no-op and emits nothing.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

mod clone;
mod macros;

pub use clone::structural_clone;

// ----------------------------------------------------------------------------
// Scalars
// ----------------------------------------------------------------------------

/// A leaf value: the only kind permitted as a map key or set member.
///
/// Floats hash and compare by bit pattern so scalars can serve as hash keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Scalar::Null => {}
            Scalar::Bool(b) => b.hash(state),
            Scalar::Int(i) => i.hash(state),
            Scalar::Float(f) => f.to_bits().hash(state),
            Scalar::Text(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(t) => write!(f, "{t:?}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Stable identity of a live raw aggregate (its cell's allocation address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawId(usize);

impl RawId {
    fn of<T>(cell: &Arc<T>) -> Self {
        RawId(Arc::as_ptr(cell) as usize)
    }
}

// ----------------------------------------------------------------------------
// Raw aggregates
// ----------------------------------------------------------------------------

/// A record: an ordered, string-keyed collection of fields.
#[derive(Clone)]
pub struct RawRecord(pub(crate) Arc<RwLock<IndexMap<String, Value>>>);

/// An ordered list of values.
#[derive(Clone)]
pub struct RawList(pub(crate) Arc<RwLock<Vec<Value>>>);

/// A keyed map from scalar keys to values.
#[derive(Clone)]
pub struct RawMap(pub(crate) Arc<RwLock<IndexMap<Scalar, Value>>>);

/// A unique-value set of scalars.
#[derive(Clone)]
pub struct RawSet(pub(crate) Arc<RwLock<IndexSet<Scalar>>>);

impl RawRecord {
    pub fn new() -> Self {
        RawRecord(Arc::new(RwLock::new(IndexMap::new())))
    }

    pub fn id(&self) -> RawId {
        RawId::of(&self.0)
    }

    /// Set a field directly on the raw cell. Only valid before the record is
    /// wrapped; afterwards every write must go through the handle.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for RawRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(String, Value)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        RawRecord(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

impl RawList {
    pub fn new() -> Self {
        RawList(Arc::new(RwLock::new(Vec::new())))
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        RawList(Arc::new(RwLock::new(items)))
    }

    pub fn id(&self) -> RawId {
        RawId::of(&self.0)
    }

    /// Append directly on the raw cell. Only valid before the list is wrapped.
    pub fn push(&self, value: impl Into<Value>) {
        self.0.write().push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.read().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for RawList {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for RawList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        RawList(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

impl RawMap {
    pub fn new() -> Self {
        RawMap(Arc::new(RwLock::new(IndexMap::new())))
    }

    pub fn id(&self) -> RawId {
        RawId::of(&self.0)
    }

    /// Insert directly on the raw cell. Only valid before the map is wrapped.
    pub fn insert(&self, key: impl Into<Scalar>, value: impl Into<Value>) {
        self.0.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &Scalar) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for RawMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(Scalar, Value)> for RawMap {
    fn from_iter<I: IntoIterator<Item = (Scalar, Value)>>(iter: I) -> Self {
        RawMap(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

impl RawSet {
    pub fn new() -> Self {
        RawSet(Arc::new(RwLock::new(IndexSet::new())))
    }

    pub fn id(&self) -> RawId {
        RawId::of(&self.0)
    }

    /// Add directly on the raw cell. Only valid before the set is wrapped.
    pub fn add(&self, member: impl Into<Scalar>) {
        self.0.write().insert(member.into());
    }

    pub fn contains(&self, member: &Scalar) -> bool {
        self.0.read().contains(member)
    }

    pub fn members(&self) -> Vec<Scalar> {
        self.0.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl Default for RawSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Scalar> for RawSet {
    fn from_iter<I: IntoIterator<Item = Scalar>>(iter: I) -> Self {
        RawSet(Arc::new(RwLock::new(iter.into_iter().collect())))
    }
}

// ----------------------------------------------------------------------------
// Aggregate kinds
// ----------------------------------------------------------------------------

/// Which of the four linkable shapes an aggregate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Record,
    List,
    Map,
    Set,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Record => "record",
            AggregateKind::List => "list",
            AggregateKind::Map => "map",
            AggregateKind::Set => "set",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to any raw aggregate, erased over the four shapes.
#[derive(Clone)]
pub enum RawAggregate {
    Record(RawRecord),
    List(RawList),
    Map(RawMap),
    Set(RawSet),
}

impl RawAggregate {
    pub fn id(&self) -> RawId {
        match self {
            RawAggregate::Record(r) => r.id(),
            RawAggregate::List(l) => l.id(),
            RawAggregate::Map(m) => m.id(),
            RawAggregate::Set(s) => s.id(),
        }
    }

    pub fn kind(&self) -> AggregateKind {
        match self {
            RawAggregate::Record(_) => AggregateKind::Record,
            RawAggregate::List(_) => AggregateKind::List,
            RawAggregate::Map(_) => AggregateKind::Map,
            RawAggregate::Set(_) => AggregateKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RawAggregate::Record(r) => r.0.read().len(),
            RawAggregate::List(l) => l.0.read().len(),
            RawAggregate::Map(m) => m.0.read().len(),
            RawAggregate::Set(s) => s.0.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_value(&self) -> Value {
        match self {
            RawAggregate::Record(r) => Value::Record(r.clone()),
            RawAggregate::List(l) => Value::List(l.clone()),
            RawAggregate::Map(m) => Value::Map(m.clone()),
            RawAggregate::Set(s) => Value::Set(s.clone()),
        }
    }
}

impl fmt::Debug for RawAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawAggregate::{}({:?})", self.kind(), self.id())
    }
}

// ----------------------------------------------------------------------------
// Values
// ----------------------------------------------------------------------------

/// Any value the engine can store: a scalar leaf or a shared aggregate.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Record(RawRecord),
    List(RawList),
    Map(RawMap),
    Set(RawSet),
}

impl Value {
    /// A short name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }

    /// Whether this value is eligible for wrapping.
    pub fn is_linkable(&self) -> bool {
        matches!(
            self,
            Value::Record(_) | Value::List(_) | Value::Map(_) | Value::Set(_)
        )
    }

    /// The aggregate reference, if this value is linkable.
    pub fn as_aggregate(&self) -> Option<RawAggregate> {
        match self {
            Value::Record(r) => Some(RawAggregate::Record(r.clone())),
            Value::List(l) => Some(RawAggregate::List(l.clone())),
            Value::Map(m) => Some(RawAggregate::Map(m.clone())),
            Value::Set(s) => Some(RawAggregate::Set(s.clone())),
            _ => None,
        }
    }

    /// The scalar, if this value is a leaf.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Int(i) => Some(Scalar::Int(*i)),
            Value::Float(f) => Some(Scalar::Float(*f)),
            Value::Text(t) => Some(Scalar::Text(t.clone())),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Total order used by `sort()` on lists: variant rank, then value;
    /// aggregates order by identity (stable, arbitrary).
    pub(crate) fn sort_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Float(_) => 3,
                Value::Text(_) => 4,
                Value::Record(_) => 5,
                Value::List(_) => 6,
                Value::Map(_) => 7,
                Value::Set(_) => 8,
            }
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) => {
                let by_rank = rank(a).cmp(&rank(b));
                if by_rank != Ordering::Equal {
                    return by_rank;
                }
                // Same aggregate variant: order by identity.
                let ia = a.as_aggregate().map(|x| x.id().0);
                let ib = b.as_aggregate().map(|x| x.id().0);
                ia.cmp(&ib)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(t) => write!(f, "{t:?}"),
            Value::Record(r) => write!(f, "<record {:?}>", r.id()),
            Value::List(l) => write!(f, "<list {:?}>", l.id()),
            Value::Map(m) => write!(f, "<map {:?}>", m.id()),
            Value::Set(s) => write!(f, "<set {:?}>", s.id()),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => Value::Int(i),
            Scalar::Float(f) => Value::Float(f),
            Scalar::Text(t) => Value::Text(t),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<RawRecord> for Value {
    fn from(v: RawRecord) -> Self {
        Value::Record(v)
    }
}

impl From<RawList> for Value {
    fn from(v: RawList) -> Self {
        Value::List(v)
    }
}

impl From<RawMap> for Value {
    fn from(v: RawMap) -> Self {
        Value::Map(v)
    }
}

impl From<RawSet> for Value {
    fn from(v: RawSet) -> Self {
        Value::Set(v)
    }
}

impl From<RawAggregate> for Value {
    fn from(v: RawAggregate) -> Self {
        v.as_value()
    }
}

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// A position inside an aggregate: a record field, a list index, a map
/// entry, or the synthetic whole-collection key.
///
/// `Collection` is what length and iteration reads record, and what
/// collection-level mutations match against - observers that only care that
/// "this collection changed at all" depend on it instead of every index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(usize),
    Entry(Scalar),
    Collection,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, ".{name}"),
            Key::Index(i) => write!(f, "[{i}]"),
            Key::Entry(k) => write!(f, "[{k}]"),
            Key::Collection => write!(f, "[*]"),
        }
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Field(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Field(v)
    }
}

impl From<usize> for Key {
    fn from(v: usize) -> Self {
        Key::Index(v)
    }
}

impl From<Scalar> for Key {
    fn from(v: Scalar) -> Self {
        Key::Entry(v)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
