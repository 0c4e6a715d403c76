//! Schema Validation
//!
//! A schema is a tagged-variant validator tree mirroring the static shape of
//! the data it validates. It is resolved once at wrap time: every handle
//! carries the sub-tree for its position, and a write only validates the
//! incoming value against the sub-tree for the written key - there is no
//! per-write dynamic lookup over the whole document.
//!
//! Outcomes are decided by the handle's strictness, not here: `check`
//! reports the violation and the interception layer either rejects with an
//! error (strict) or rejects with a logged advisory (non-strict). In both
//! cases the prior value is retained.
//!
//! Schemas are plain data and serde-serializable, so validator trees can be
//! shipped in configuration.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{Key, Scalar, Value};

/// A validator node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
    /// Accepts anything.
    Any,
    Null,
    Bool,
    Int,
    Float,
    /// Accepts `Int` or `Float`.
    Number,
    Text,
    /// Accepts the inner schema or an absent/null value. The only schema
    /// under which a delete is valid.
    Optional(Box<Schema>),
    /// A record with per-field schemas. Fields not listed accept anything.
    Record(IndexMap<String, Schema>),
    /// A list whose elements all satisfy the inner schema.
    List(Box<Schema>),
    /// A map whose values all satisfy the inner schema.
    Map(Box<Schema>),
    /// A set whose members all satisfy the inner schema (scalar shapes only).
    Set(Box<Schema>),
}

/// A failed validation, with the path-local reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub reason: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl Schema {
    /// The sub-schema governing a key of an aggregate validated by `self`.
    ///
    /// Returns `None` when this schema places no constraint on that key.
    pub fn for_key(&self, key: &Key) -> Option<&Schema> {
        match (self.unwrap_optional(), key) {
            (Schema::Record(fields), Key::Field(name)) => fields.get(name),
            (Schema::List(elem), Key::Index(_)) => Some(&**elem),
            (Schema::Map(val), Key::Entry(_)) => Some(&**val),
            (Schema::Set(member), Key::Entry(_)) => Some(&**member),
            _ => None,
        }
    }

    /// Whether a delete of `key` leaves the aggregate valid.
    ///
    /// List and map entries may always be removed; a record field only when
    /// it is unconstrained or `Optional`.
    pub fn allows_absent(&self, key: &Key) -> bool {
        match self.for_key(key) {
            None => true,
            Some(Schema::Any) => true,
            Some(Schema::Optional(_)) => true,
            Some(_) => !matches!(key, Key::Field(_)),
        }
    }

    /// Validate a value against this schema.
    pub fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        match self {
            Schema::Any => Ok(()),
            Schema::Null => expect(matches!(value, Value::Null), "null", value),
            Schema::Bool => expect(matches!(value, Value::Bool(_)), "bool", value),
            Schema::Int => expect(matches!(value, Value::Int(_)), "int", value),
            Schema::Float => expect(matches!(value, Value::Float(_)), "float", value),
            Schema::Number => expect(
                matches!(value, Value::Int(_) | Value::Float(_)),
                "number",
                value,
            ),
            Schema::Text => expect(matches!(value, Value::Text(_)), "text", value),
            Schema::Optional(inner) => match value {
                Value::Null => Ok(()),
                other => inner.check(other),
            },
            Schema::Record(fields) => {
                let Value::Record(rec) = value else {
                    return Err(violation("record", value));
                };
                let snapshot: Vec<(String, Value)> = rec
                    .0
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (name, field_schema) in fields {
                    match snapshot.iter().find(|(k, _)| k == name) {
                        Some((_, v)) => field_schema.check(v).map_err(|e| SchemaViolation {
                            reason: format!("field {name}: {e}"),
                        })?,
                        None => {
                            if !matches!(field_schema, Schema::Optional(_) | Schema::Any) {
                                return Err(SchemaViolation {
                                    reason: format!("missing field {name}"),
                                });
                            }
                        }
                    }
                }
                Ok(())
            }
            Schema::List(elem) => {
                let Value::List(list) = value else {
                    return Err(violation("list", value));
                };
                let snapshot: Vec<Value> = list.0.read().clone();
                for (i, item) in snapshot.iter().enumerate() {
                    elem.check(item).map_err(|e| SchemaViolation {
                        reason: format!("element {i}: {e}"),
                    })?;
                }
                Ok(())
            }
            Schema::Map(val) => {
                let Value::Map(map) = value else {
                    return Err(violation("map", value));
                };
                let snapshot: Vec<(Scalar, Value)> = map
                    .0
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, v) in snapshot {
                    val.check(&v).map_err(|e| SchemaViolation {
                        reason: format!("entry {k}: {e}"),
                    })?;
                }
                Ok(())
            }
            Schema::Set(member) => {
                let Value::Set(set) = value else {
                    return Err(violation("set", value));
                };
                let snapshot: Vec<Scalar> = set.0.read().iter().cloned().collect();
                for m in snapshot {
                    member.check(&Value::from(m.clone())).map_err(|e| {
                        SchemaViolation {
                            reason: format!("member {m}: {e}"),
                        }
                    })?;
                }
                Ok(())
            }
        }
    }

    fn unwrap_optional(&self) -> &Schema {
        match self {
            Schema::Optional(inner) => inner.unwrap_optional(),
            other => other,
        }
    }
}

fn expect(ok: bool, expected: &str, value: &Value) -> Result<(), SchemaViolation> {
    if ok {
        Ok(())
    } else {
        Err(violation(expected, value))
    }
}

fn violation(expected: &str, value: &Value) -> SchemaViolation {
    SchemaViolation {
        reason: format!("expected {expected}, found {}", value.kind_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list, record};

    fn user_schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), Schema::Text);
        fields.insert("age".to_string(), Schema::Int);
        fields.insert("nick".to_string(), Schema::Optional(Box::new(Schema::Text)));
        Schema::Record(fields)
    }

    #[test]
    fn scalar_checks() {
        assert!(Schema::Int.check(&Value::Int(1)).is_ok());
        assert!(Schema::Int.check(&Value::Text("x".into())).is_err());
        assert!(Schema::Number.check(&Value::Float(1.5)).is_ok());
        assert!(Schema::Any.check(&Value::Null).is_ok());
    }

    #[test]
    fn optional_accepts_null() {
        let schema = Schema::Optional(Box::new(Schema::Int));
        assert!(schema.check(&Value::Null).is_ok());
        assert!(schema.check(&Value::Int(3)).is_ok());
        assert!(schema.check(&Value::Bool(true)).is_err());
    }

    #[test]
    fn record_schema_validates_fields() {
        let schema = user_schema();
        let ok = record! { "name" => "ada", "age" => 36i64 };
        assert!(schema.check(&Value::Record(ok)).is_ok());

        let bad = record! { "name" => "ada", "age" => "old" };
        let err = schema.check(&Value::Record(bad)).unwrap_err();
        assert!(err.reason.contains("age"));

        let missing = record! { "name" => "ada" };
        assert!(schema.check(&Value::Record(missing)).is_err());
    }

    #[test]
    fn list_schema_validates_elements() {
        let schema = Schema::List(Box::new(Schema::Int));
        assert!(schema.check(&Value::List(list![1i64, 2i64])).is_ok());

        let err = schema
            .check(&Value::List(list![1i64, "two"]))
            .unwrap_err();
        assert!(err.reason.contains("element 1"));
    }

    #[test]
    fn sub_schema_resolution() {
        let schema = user_schema();
        assert_eq!(schema.for_key(&Key::Field("age".into())), Some(&Schema::Int));
        assert_eq!(schema.for_key(&Key::Field("other".into())), None);

        let lists = Schema::List(Box::new(Schema::Text));
        assert_eq!(lists.for_key(&Key::Index(4)), Some(&Schema::Text));
    }

    #[test]
    fn delete_validity_follows_optionality() {
        let schema = user_schema();
        assert!(!schema.allows_absent(&Key::Field("name".into())));
        assert!(schema.allows_absent(&Key::Field("nick".into())));
        assert!(schema.allows_absent(&Key::Field("unlisted".into())));

        let lists = Schema::List(Box::new(Schema::Int));
        assert!(lists.allows_absent(&Key::Index(0)));
    }

    #[test]
    fn schema_round_trips_through_serde() {
        let schema = user_schema();
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
