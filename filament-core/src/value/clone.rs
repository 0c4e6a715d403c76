//! Structural Clone
//!
//! A cycle-safe deep copy of a value graph. The clone shares nothing with
//! the source: every aggregate cell is a fresh allocation. Internal aliasing
//! is preserved - if the source refers to the same aggregate twice, the
//! clone refers to its copy twice, and a structure that contains itself
//! clones to a structure that contains *itself*, never the original.
//!
//! The algorithm keys a memo map by raw identity: each aggregate is mapped
//! to its (initially empty) copy before its contents are visited, so any
//! back-reference encountered while recursing resolves to the copy.

use std::collections::HashMap;

use super::{RawAggregate, RawId, RawList, RawMap, RawRecord, RawSet, Value};

/// Deep-copy a value. Scalars copy by value; aggregates copy recursively
/// with cycles and shared substructure reproduced inside the clone.
pub fn structural_clone(value: &Value) -> Value {
    let mut seen: HashMap<RawId, RawAggregate> = HashMap::new();
    clone_value(value, &mut seen)
}

fn clone_value(value: &Value, seen: &mut HashMap<RawId, RawAggregate>) -> Value {
    match value {
        Value::Record(r) => Value::from(clone_record(r, seen)),
        Value::List(l) => Value::from(clone_list(l, seen)),
        Value::Map(m) => Value::from(clone_map(m, seen)),
        Value::Set(s) => Value::from(clone_set(s, seen)),
        scalar => scalar.clone(),
    }
}

fn clone_record(source: &RawRecord, seen: &mut HashMap<RawId, RawAggregate>) -> RawRecord {
    if let Some(RawAggregate::Record(copy)) = seen.get(&source.id()) {
        return copy.clone();
    }

    let copy = RawRecord::new();
    // Register before visiting contents so self-references land on the copy.
    seen.insert(source.id(), RawAggregate::Record(copy.clone()));

    let entries: Vec<(String, Value)> = source
        .0
        .read()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, val) in entries {
        let cloned = clone_value(&val, seen);
        copy.0.write().insert(key, cloned);
    }
    copy
}

fn clone_list(source: &RawList, seen: &mut HashMap<RawId, RawAggregate>) -> RawList {
    if let Some(RawAggregate::List(copy)) = seen.get(&source.id()) {
        return copy.clone();
    }

    let copy = RawList::new();
    seen.insert(source.id(), RawAggregate::List(copy.clone()));

    let items: Vec<Value> = source.0.read().clone();
    for item in items {
        let cloned = clone_value(&item, seen);
        copy.0.write().push(cloned);
    }
    copy
}

fn clone_map(source: &RawMap, seen: &mut HashMap<RawId, RawAggregate>) -> RawMap {
    if let Some(RawAggregate::Map(copy)) = seen.get(&source.id()) {
        return copy.clone();
    }

    let copy = RawMap::new();
    seen.insert(source.id(), RawAggregate::Map(copy.clone()));

    let entries: Vec<(super::Scalar, Value)> = source
        .0
        .read()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, val) in entries {
        let cloned = clone_value(&val, seen);
        copy.0.write().insert(key, cloned);
    }
    copy
}

fn clone_set(source: &RawSet, seen: &mut HashMap<RawId, RawAggregate>) -> RawSet {
    if let Some(RawAggregate::Set(copy)) = seen.get(&source.id()) {
        return copy.clone();
    }

    // Set members are scalars: a plain copy, but still memoized so a set
    // referenced twice clones once.
    let copy = RawSet(std::sync::Arc::new(parking_lot::RwLock::new(
        source.0.read().clone(),
    )));
    seen.insert(source.id(), RawAggregate::Set(copy.clone()));
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scalar;

    #[test]
    fn clone_copies_scalars_by_value() {
        let v = Value::Text("hello".into());
        assert_eq!(structural_clone(&v), v);
    }

    #[test]
    fn clone_shares_nothing_with_source() {
        let rec = RawRecord::new();
        rec.insert("n", 1i64);

        let copied = structural_clone(&Value::Record(rec.clone()));
        let Value::Record(copy) = copied else {
            panic!("expected record");
        };

        assert_ne!(copy.id(), rec.id());

        // Mutating the copy leaves the source untouched.
        copy.insert("n", 2i64);
        assert_eq!(rec.0.read().get("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn clone_reproduces_self_reference() {
        let rec = RawRecord::new();
        rec.insert("self", Value::Record(rec.clone()));

        let Value::Record(copy) = structural_clone(&Value::Record(rec.clone())) else {
            panic!("expected record");
        };

        let inner = copy.0.read().get("self").cloned().unwrap();
        // The clone's self-reference points at the clone, not the original.
        assert_eq!(inner, Value::Record(copy.clone()));
        assert_ne!(inner, Value::Record(rec));
    }

    #[test]
    fn clone_preserves_internal_aliasing() {
        let shared = RawList::new();
        shared.push(1i64);

        let rec = RawRecord::new();
        rec.insert("a", Value::List(shared.clone()));
        rec.insert("b", Value::List(shared));

        let Value::Record(copy) = structural_clone(&Value::Record(rec)) else {
            panic!("expected record");
        };

        let a = copy.0.read().get("a").cloned().unwrap();
        let b = copy.0.read().get("b").cloned().unwrap();
        // Both fields alias the same cloned list.
        assert_eq!(a, b);
    }

    #[test]
    fn clone_handles_mutual_cycles() {
        let a = RawRecord::new();
        let b = RawRecord::new();
        a.insert("other", Value::Record(b.clone()));
        b.insert("other", Value::Record(a.clone()));

        let Value::Record(copy_a) = structural_clone(&Value::Record(a)) else {
            panic!("expected record");
        };

        let Some(Value::Record(copy_b)) = copy_a.0.read().get("other").cloned() else {
            panic!("expected nested record");
        };
        let back = copy_b.0.read().get("other").cloned().unwrap();
        assert_eq!(back, Value::Record(copy_a));
    }

    #[test]
    fn clone_copies_sets_of_scalars() {
        let set = RawSet::new();
        set.add(Scalar::Int(1));
        set.add(Scalar::Text("x".into()));

        let Value::Set(copy) = structural_clone(&Value::Set(set.clone())) else {
            panic!("expected set");
        };

        assert_ne!(copy.id(), set.id());
        assert!(copy.0.read().contains(&Scalar::Int(1)));
    }
}
