//! Value literal macros.
//!
//! Construct raw aggregates with literal syntax instead of chained inserts:
//!
//! ```rust,ignore
//! let user = record! {
//!     "name" => "ada",
//!     "tags" => list!["admin", "ops"],
//! };
//! ```

/// Build a [`RawRecord`](crate::value::RawRecord) from field/value pairs.
#[macro_export]
macro_rules! record {
    () => {
        $crate::value::RawRecord::new()
    };
    ($($key:expr => $val:expr),+ $(,)?) => {{
        let rec = $crate::value::RawRecord::new();
        $(rec.insert($key, $crate::value::Value::from($val));)+
        rec
    }};
}

/// Build a [`RawList`](crate::value::RawList) from values.
#[macro_export]
macro_rules! list {
    () => {
        $crate::value::RawList::new()
    };
    ($($val:expr),+ $(,)?) => {{
        let items = vec![$($crate::value::Value::from($val)),+];
        $crate::value::RawList::from_vec(items)
    }};
}

/// Build a [`RawMap`](crate::value::RawMap) from key/value pairs.
#[macro_export]
macro_rules! map_of {
    () => {
        $crate::value::RawMap::new()
    };
    ($($key:expr => $val:expr),+ $(,)?) => {{
        let map = $crate::value::RawMap::new();
        $(map.insert(
            $crate::value::Scalar::from($key),
            $crate::value::Value::from($val),
        );)+
        map
    }};
}

/// Build a [`RawSet`](crate::value::RawSet) from scalar members.
#[macro_export]
macro_rules! set_of {
    () => {
        $crate::value::RawSet::new()
    };
    ($($val:expr),+ $(,)?) => {{
        let set = $crate::value::RawSet::new();
        $(set.add($crate::value::Scalar::from($val));)+
        set
    }};
}

#[cfg(test)]
mod tests {
    use crate::value::{Scalar, Value};

    #[test]
    fn record_macro_builds_fields() {
        let rec = record! { "a" => 1i64, "b" => "two" };
        assert_eq!(rec.0.read().get("a"), Some(&Value::Int(1)));
        assert_eq!(rec.0.read().get("b"), Some(&Value::Text("two".into())));
    }

    #[test]
    fn list_macro_keeps_order() {
        let items = list![1i64, 2i64, 3i64];
        let inner = items.0.read();
        assert_eq!(inner.as_slice(), &[Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn map_and_set_macros() {
        let map = map_of! { "k" => 1i64 };
        assert_eq!(map.0.read().get(&Scalar::Text("k".into())), Some(&Value::Int(1)));

        let set = set_of!["x", "y", "x"];
        assert_eq!(set.0.read().len(), 2);
    }

    #[test]
    fn nested_literals() {
        let rec = record! {
            "items" => list![1i64, 2i64],
            "meta" => record! { "ok" => true },
        };
        assert!(matches!(rec.0.read().get("items"), Some(Value::List(_))));
        assert!(matches!(rec.0.read().get("meta"), Some(Value::Record(_))));
    }
}
