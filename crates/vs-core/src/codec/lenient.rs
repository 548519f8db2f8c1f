//! Typed reads over decoded query values
//!
//! Every leaf of a decoded query string is text. [`from_value`] deserializes
//! such a tree into a typed value, converting text into booleans, numbers and
//! enum variants on request, and widening a single value into a one-element
//! sequence when a sequence is expected.

use serde::de::value::Error;
use serde::de::{self, DeserializeOwned, IntoDeserializer, Unexpected, Visitor};
use serde_json::{Map, Value};

/// Deserialize `T` from a decoded query value.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, Error> {
    T::deserialize(Lenient(value))
}

struct Lenient<'a>(&'a Value);

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(flag) => Unexpected::Bool(*flag),
        Value::Number(number) => number
            .as_f64()
            .map(Unexpected::Float)
            .unwrap_or(Unexpected::Other("number")),
        Value::String(text) => Unexpected::Str(text),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

impl<'a> Lenient<'a> {
    fn invalid<V: de::Expected>(&self, expected: &V) -> Error {
        de::Error::invalid_type(unexpected(self.0), expected)
    }

    fn as_i64(&self) -> Option<i64> {
        match self.0 {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self.0 {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self.0 {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

macro_rules! lenient_signed {
    ($($method:ident),*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                match self.as_i64() {
                    Some(number) => visitor.visit_i64(number),
                    None => Err(self.invalid(&visitor)),
                }
            }
        )*
    };
}

macro_rules! lenient_unsigned {
    ($($method:ident),*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
                match self.as_u64() {
                    Some(number) => visitor.visit_u64(number),
                    None => Err(self.invalid(&visitor)),
                }
            }
        )*
    };
}

impl<'de, 'a> de::Deserializer<'de> for Lenient<'a> {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::Bool(flag) => visitor.visit_bool(*flag),
            Value::Number(number) => {
                if let Some(unsigned) = number.as_u64() {
                    visitor.visit_u64(unsigned)
                } else if let Some(signed) = number.as_i64() {
                    visitor.visit_i64(signed)
                } else {
                    visitor.visit_f64(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(text) => visitor.visit_str(text),
            Value::Array(items) => visitor.visit_seq(SeqRef(items.iter())),
            Value::Object(members) => visitor.visit_map(MapRef::new(members)),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Bool(flag) => visitor.visit_bool(*flag),
            Value::String(text) => match text.trim() {
                "true" | "1" => visitor.visit_bool(true),
                "false" | "0" => visitor.visit_bool(false),
                _ => Err(self.invalid(&visitor)),
            },
            _ => Err(self.invalid(&visitor)),
        }
    }

    lenient_signed!(deserialize_i8, deserialize_i16, deserialize_i32, deserialize_i64);
    lenient_unsigned!(deserialize_u8, deserialize_u16, deserialize_u32, deserialize_u64);

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.as_f64() {
            Some(number) => visitor.visit_f64(number),
            None => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::String(text) => visitor.visit_str(text),
            Value::Number(number) => visitor.visit_str(&number.to_string()),
            Value::Bool(flag) => visitor.visit_str(if *flag { "true" } else { "false" }),
            _ => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::String(text) => visitor.visit_bytes(text.as_bytes()),
            _ => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::String(text) if text.is_empty() => visitor.visit_unit(),
            _ => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Array(items) => visitor.visit_seq(SeqRef(items.iter())),
            Value::Null => Err(self.invalid(&visitor)),
            single => visitor.visit_seq(SeqRef(std::slice::from_ref(single).iter())),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.0 {
            Value::Object(members) => visitor.visit_map(MapRef::new(members)),
            _ => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.0 {
            Value::String(text) => visitor.visit_enum(text.as_str().into_deserializer()),
            Value::Object(members) if members.len() == 1 => {
                let Some((variant, content)) = members.iter().next() else {
                    return Err(self.invalid(&visitor));
                };
                visitor.visit_enum(EnumRef { variant, content })
            }
            _ => Err(self.invalid(&visitor)),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }
}

struct SeqRef<'a>(std::slice::Iter<'a, Value>);

impl<'de, 'a> de::SeqAccess<'de> for SeqRef<'a> {
    type Error = Error;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        match self.0.next() {
            Some(item) => seed.deserialize(Lenient(item)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

struct MapRef<'a> {
    members: serde_json::map::Iter<'a>,
    pending: Option<&'a Value>,
}

impl<'a> MapRef<'a> {
    fn new(members: &'a Map<String, Value>) -> Self {
        Self {
            members: members.iter(),
            pending: None,
        }
    }
}

impl<'de, 'a> de::MapAccess<'de> for MapRef<'a> {
    type Error = Error;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, Error> {
        let Some((key, value)) = self.members.next() else {
            return Ok(None);
        };
        self.pending = Some(value);
        // Keys are text too; route them through the lenient path so numeric
        // map keys parse.
        let key = Value::String(key.clone());
        seed.deserialize(Lenient(&key)).map(Some)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        match self.pending.take() {
            Some(value) => seed.deserialize(Lenient(value)),
            None => Err(de::Error::custom("map value requested before its key")),
        }
    }
}

struct EnumRef<'a> {
    variant: &'a str,
    content: &'a Value,
}

impl<'de, 'a> de::EnumAccess<'de> for EnumRef<'a> {
    type Error = Error;
    type Variant = Lenient<'a>;

    fn variant_seed<V: de::DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, Self::Variant), Error> {
        let name: de::value::StrDeserializer<'_, Error> = self.variant.into_deserializer();
        let variant = seed.deserialize(name)?;
        Ok((variant, Lenient(self.content)))
    }
}

impl<'de, 'a> de::VariantAccess<'de> for Lenient<'a> {
    type Error = Error;

    fn unit_variant(self) -> Result<(), Error> {
        match self.0 {
            Value::Null => Ok(()),
            Value::String(text) if text.is_empty() => Ok(()),
            other => Err(de::Error::invalid_type(unexpected(other), &"unit variant")),
        }
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Error> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Error> {
        de::Deserializer::deserialize_seq(self, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        de::Deserializer::deserialize_map(self, visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Aggregate {
        aggregate_func: String,
        distinct: bool,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "lowercase")]
    enum Direction {
        Asc,
        Desc,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Sort {
        field: String,
        direction: Direction,
        aggregate_by: Option<Aggregate>,
    }

    #[test]
    fn test_text_leaves_convert_to_scalars() {
        assert_eq!(from_value::<u64>(&json!("42")).unwrap(), 42);
        assert_eq!(from_value::<i32>(&json!("-7")).unwrap(), -7);
        assert_eq!(from_value::<f64>(&json!("0.5")).unwrap(), 0.5);
        assert!(from_value::<bool>(&json!("true")).unwrap());
        assert!(!from_value::<bool>(&json!("false")).unwrap());
        assert!(from_value::<u64>(&json!("-1")).is_err());
        assert!(from_value::<u8>(&json!("300")).is_err());
        assert!(from_value::<bool>(&json!("maybe")).is_err());
    }

    #[test]
    fn test_struct_with_enum_and_nested_option() {
        let sort: Sort = from_value(&json!({
            "field": "Name",
            "direction": "desc",
            "aggregateBy": { "aggregateFunc": "count", "distinct": "true" },
        }))
        .unwrap();
        assert_eq!(sort.direction, Direction::Desc);
        assert_eq!(
            sort.aggregate_by,
            Some(Aggregate {
                aggregate_func: "count".into(),
                distinct: true,
            })
        );

        let missing: Sort = from_value(&json!({ "field": "Name", "direction": "asc" })).unwrap();
        assert_eq!(missing.aggregate_by, None);
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let result = from_value::<Sort>(&json!({ "field": "Name", "direction": "sideways" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_single_value_widens_to_sequence() {
        assert_eq!(from_value::<Vec<String>>(&json!("one")).unwrap(), vec!["one"]);
        assert_eq!(
            from_value::<Vec<u32>>(&json!(["1", "2"])).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_numeric_map_keys() {
        let parsed: BTreeMap<u32, String> = from_value(&json!({ "1": "a", "10": "b" })).unwrap();
        assert_eq!(parsed.get(&10).map(String::as_str), Some("b"));
    }

    #[test]
    fn test_json_value_passthrough() {
        let raw = json!({ "a": ["x", { "b": "y" }] });
        assert_eq!(from_value::<Value>(&raw).unwrap(), raw);
    }
}
