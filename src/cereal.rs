//! Serde impls for [Value], bridging host data (usually JSON) into render
//! globals and back out.
//!
//! Liquid-only shapes need conventions: the `empty`/`blank` sentinels and
//! `undefined` serialize as null, ranges as a two-element `[start, stop]`
//! array, and drops serialize through their coercion hook or not at all.

use crate::value::{Object, Value};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, SeqAccess, Visitor},
    ser::{SerializeMap, SerializeSeq},
};
use std::fmt;

impl Value {
    /// Convert a JSON value. Infallible: [Value] is a superset of JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Nil,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(number) => {
                if let Some(i) = number.as_i64() {
                    Self::Int(i)
                } else {
                    // u64 values beyond i64 range degrade to floats
                    Self::Float(number.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(
                items.into_iter().map(Self::from_json).collect(),
            ),
            serde_json::Value::Object(object) => Self::Object(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil
            | Self::Undefined(_)
            | Self::Empty
            | Self::Blank => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Range(range) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(&range.start)?;
                seq.serialize_element(&range.stop)?;
                seq.end()
            }
            Self::Array(items) => {
                let mut seq =
                    serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(object) => {
                let mut map =
                    serializer.serialize_map(Some(object.len()))?;
                for (key, value) in object {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Self::Drop(drop) => match drop.coerce() {
                Some(value) => value.serialize(serializer),
                None => Err(serde::ser::Error::custom(
                    "drop without a coercion hook cannot be serialized",
                )),
            },
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a template value")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Value, E> {
        Ok(Value::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Value, E> {
        Ok(Value::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Value, E> {
        Ok(i64::try_from(value)
            .map_or(Value::Float(value as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Value, E> {
        Ok(Value::Float(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Value, E> {
        Ok(Value::String(value.to_owned()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Value, E> {
        Ok(Value::String(value))
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut map: A,
    ) -> Result<Value, A::Error> {
        let mut object = Object::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RangeValue;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::null(json!(null), Value::Nil)]
    #[case::bool(json!(true), Value::Bool(true))]
    #[case::int(json!(-7), Value::Int(-7))]
    #[case::float(json!(1.25), Value::Float(1.25))]
    #[case::string(json!("hi"), Value::from("hi"))]
    #[case::array(json!([1, "a"]), Value::Array(vec![
        Value::Int(1),
        Value::from("a"),
    ]))]
    #[case::nested(
        json!({"user": {"age": 20}}),
        Value::from(vec![(
            "user",
            Value::from(vec![("age", Value::Int(20))]),
        )])
    )]
    fn test_from_json(#[case] json: serde_json::Value, #[case] expected: Value) {
        assert_eq!(Value::from_json(json), expected);
    }

    /// Object key order survives the JSON bridge, so `for` loops iterate
    /// mappings in authoring order
    #[test]
    fn test_object_order_preserved() {
        let value =
            Value::from_json(json!({"z": 1, "a": 2, "m": 3}));
        let Value::Object(object) = value else {
            panic!("expected an object");
        };
        let keys: Vec<&str> =
            object.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[rstest]
    #[case::nil(Value::Nil, json!(null))]
    #[case::sentinels_as_null(Value::Empty, json!(null))]
    #[case::undefined_as_null(Value::Undefined("x".into()), json!(null))]
    #[case::range_as_pair(
        Value::Range(RangeValue { start: 1, stop: 4 }),
        json!([1, 4])
    )]
    #[case::round_trip(
        Value::from(vec![("k", Value::from(vec![1_i64, 2]))]),
        json!({"k": [1, 2]})
    )]
    fn test_serialize(#[case] value: Value, #[case] expected: serde_json::Value) {
        assert_eq!(serde_json::to_value(&value).unwrap(), expected);
    }

    #[test]
    fn test_deserialize() {
        let value: Value =
            serde_json::from_str(r#"{"a": [1, 2.5, "x", null]}"#).unwrap();
        assert_eq!(
            value,
            Value::from(vec![(
                "a",
                Value::Array(vec![
                    Value::Int(1),
                    Value::Float(2.5),
                    Value::from("x"),
                    Value::Nil,
                ]),
            )])
        );
    }
}
