//! Query string codec
//!
//! Converts between a URL query string and a nested JSON object using
//! bracket-path keys (`sortOption[0][field]=Name`). Decoding never fails:
//! fragments that cannot be placed in the tree are skipped, and keys with
//! unbalanced brackets are stored flat.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::trace;

pub mod lenient;
mod path;

use path::canonical_index;
pub use path::{split_key, KeyPath, Segment};

/// A decoded query string
pub type QueryObject = Map<String, Value>;

/// Largest bracket index decoded as an array position
pub const DEFAULT_ARRAY_LIMIT: usize = 20;

/// Decoder options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Indices above this become object keys instead of array positions
    pub array_limit: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            array_limit: DEFAULT_ARRAY_LIMIT,
        }
    }
}

/// Decode a query string (with or without the leading `?`).
pub fn decode(search: &str) -> QueryObject {
    decode_with(search, CodecOptions::default())
}

/// Decode a query string using explicit options.
pub fn decode_with(search: &str, options: CodecOptions) -> QueryObject {
    let trimmed = search.strip_prefix('?').unwrap_or(search);
    let mut root: IndexMap<String, Node> = IndexMap::new();

    for pair in trimmed.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        if key.is_empty() {
            trace!("Skipping query fragment without a key: {:?}", pair);
            continue;
        }
        let value = decode_component(raw_value);

        let segments = split_key(&key, options.array_limit).unwrap_or_else(|| {
            trace!("Treating malformed key {:?} as a flat name", key);
            vec![Segment::Key(key.clone())]
        });
        let Some((first, rest)) = segments.split_first() else {
            continue;
        };

        let node = root
            .entry(first.name().into_owned())
            .or_insert_with(|| Node::fresh(rest.first()));
        if !node.insert(rest, value) {
            trace!("Dropping query fragment {:?}: conflicts with an earlier value", pair);
        }
    }

    root.into_iter()
        .map(|(key, node)| (key, node.finish()))
        .collect()
}

/// Encode a query object into a query string without the leading `?`.
///
/// Object members keep their insertion order and arrays are written with
/// explicit indices. `null`, empty arrays and empty objects produce nothing.
pub fn encode(query: &QueryObject) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        push_pairs(&encode_component(key), value, &mut pairs);
    }
    pairs.join("&")
}

fn push_pairs(prefix: &str, value: &Value, pairs: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::Bool(flag) => pairs.push(format!("{prefix}={flag}")),
        Value::Number(number) => pairs.push(format!("{prefix}={number}")),
        Value::String(text) => pairs.push(format!("{prefix}={}", encode_component(text))),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                push_pairs(&format!("{prefix}[{index}]"), item, pairs);
            }
        }
        Value::Object(members) => {
            for (key, member) in members {
                push_pairs(&format!("{prefix}[{}]", encode_component(key)), member, pairs);
            }
        }
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced).ok().map(|text| text.into_owned());
    decoded.unwrap_or(spaced)
}

fn encode_component(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

/// Intermediate tree; lists stay keyed by index until the end so sparse
/// indices compact in order.
#[derive(Debug)]
enum Node {
    Leaf(Vec<String>),
    Map(IndexMap<String, Node>),
    List(BTreeMap<usize, Node>),
}

impl Node {
    fn fresh(next: Option<&Segment>) -> Self {
        match next {
            None => Node::Leaf(Vec::new()),
            Some(Segment::Key(_)) => Node::Map(IndexMap::new()),
            Some(Segment::Index(_)) | Some(Segment::Append) => Node::List(BTreeMap::new()),
        }
    }

    /// Returns `false` when the fragment conflicts with the existing shape.
    fn insert(&mut self, segments: &[Segment], value: String) -> bool {
        let Some((segment, rest)) = segments.split_first() else {
            return match self {
                Node::Leaf(values) => {
                    values.push(value);
                    true
                }
                _ => false,
            };
        };

        // An index past the limit still extends a list it continues without a gap
        let promoted = match (segment, &*self) {
            (Segment::Key(name), Node::List(items)) => {
                canonical_index(name).filter(|index| continues_run(items, *index))
            }
            _ => None,
        }
        .map(Segment::Index);
        let segment = promoted.as_ref().unwrap_or(segment);

        if matches!(segment, Segment::Key(_)) {
            if let Node::List(items) = self {
                let keyed = std::mem::take(items)
                    .into_iter()
                    .map(|(index, node)| (index.to_string(), node))
                    .collect();
                *self = Node::Map(keyed);
            }
        }

        match (segment, self) {
            (Segment::Append, Node::Leaf(values)) if rest.is_empty() => {
                values.push(value);
                true
            }
            (_, Node::Leaf(_)) => false,
            (Segment::Key(key), Node::Map(members)) => members
                .entry(key.clone())
                .or_insert_with(|| Node::fresh(rest.first()))
                .insert(rest, value),
            (Segment::Index(index), Node::Map(members)) => members
                .entry(index.to_string())
                .or_insert_with(|| Node::fresh(rest.first()))
                .insert(rest, value),
            (Segment::Append, Node::Map(members)) => {
                let key = members.len().to_string();
                members
                    .entry(key)
                    .or_insert_with(|| Node::fresh(rest.first()))
                    .insert(rest, value)
            }
            (Segment::Index(index), Node::List(items)) => items
                .entry(*index)
                .or_insert_with(|| Node::fresh(rest.first()))
                .insert(rest, value),
            (Segment::Append, Node::List(items)) => {
                let next = items.keys().next_back().map_or(0, |last| last + 1);
                items
                    .entry(next)
                    .or_insert_with(|| Node::fresh(rest.first()))
                    .insert(rest, value)
            }
            (Segment::Key(_), Node::List(_)) => false,
        }
    }

    fn finish(self) -> Value {
        match self {
            Node::Leaf(mut values) if values.len() == 1 => Value::String(values.remove(0)),
            Node::Leaf(values) => Value::Array(values.into_iter().map(Value::String).collect()),
            Node::Map(members) => Value::Object(
                members
                    .into_iter()
                    .map(|(key, node)| (key, node.finish()))
                    .collect(),
            ),
            Node::List(items) => Value::Array(items.into_values().map(Node::finish).collect()),
        }
    }
}

/// Whether `index` lands inside or right after a list holding `0..len`
fn continues_run(items: &BTreeMap<usize, Node>, index: usize) -> bool {
    let contiguous = items
        .keys()
        .next_back()
        .map_or(true, |last| last + 1 == items.len());
    contiguous && index <= items.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrap(key: &str, value: Value) -> QueryObject {
        let mut query = QueryObject::new();
        query.insert(key.to_string(), value);
        query
    }

    #[test]
    fn test_decode_flat_pairs() {
        let query = decode("?page=2&perPage=20&name=a+b%2Fc");
        assert_eq!(
            Value::Object(query),
            json!({ "page": "2", "perPage": "20", "name": "a b/c" })
        );
    }

    #[test]
    fn test_decode_nested_sort_option() {
        let query = decode(
            "sortOption[0][field]=Critical%20severity%20count&sortOption[0][direction]=desc\
             &sortOption[1][field]=Low%20severity%20count&sortOption[1][direction]=desc",
        );
        assert_eq!(
            query.get("sortOption"),
            Some(&json!([
                { "field": "Critical severity count", "direction": "desc" },
                { "field": "Low severity count", "direction": "desc" },
            ]))
        );
    }

    #[test]
    fn test_decode_append_and_repeated_keys() {
        let query = decode("s[Severity][]=LOW&s[Severity][]=HIGH&tag=a&tag=b");
        assert_eq!(query.get("s"), Some(&json!({ "Severity": ["LOW", "HIGH"] })));
        assert_eq!(query.get("tag"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_decode_sparse_indices_compact_in_order() {
        let query = decode("a[5]=five&a[1]=one");
        assert_eq!(query.get("a"), Some(&json!(["one", "five"])));
    }

    #[test]
    fn test_decode_index_above_limit_is_object_key() {
        let query = decode("a[0]=x&a[100]=y");
        assert_eq!(query.get("a"), Some(&json!({ "0": "x", "100": "y" })));

        let query = decode("a[0]=x&a[1]=y&a[999999]=z");
        assert_eq!(
            query.get("a"),
            Some(&json!({ "0": "x", "1": "y", "999999": "z" }))
        );
    }

    #[test]
    fn test_round_trip_array_longer_than_limit() {
        let items: Vec<Value> = (0..=DEFAULT_ARRAY_LIMIT + 1)
            .map(|index| json!(format!("v{index}")))
            .collect();
        let value = Value::Array(items);
        let decoded = decode(&encode(&wrap("k", value.clone())));
        assert_eq!(decoded.get("k"), Some(&value));

        let rows: Vec<Value> = (0..30)
            .map(|index| json!({ "field": format!("f{index}"), "direction": "asc" }))
            .collect();
        let value = Value::Array(rows);
        let decoded = decode(&encode(&wrap("sortOption", value.clone())));
        assert_eq!(decoded.get("sortOption"), Some(&value));
    }

    #[test]
    fn test_index_past_limit_after_gap_is_object_key() {
        let query = decode("a[0]=x&a[2]=y&a[21]=z");
        assert_eq!(
            query.get("a"),
            Some(&json!({ "0": "x", "2": "y", "21": "z" }))
        );
    }

    #[test]
    fn test_decode_never_fails_on_garbage() {
        let query = decode("==&&%zz=%&a[b=1&[x]=2&=3&c]=4&d");
        assert_eq!(query.get("a[b"), Some(&json!("1")));
        assert_eq!(query.get("[x]"), Some(&json!("2")));
        assert_eq!(query.get("c]"), Some(&json!("4")));
        assert_eq!(query.get("d"), Some(&json!("")));
        assert!(query.get("").is_none());
    }

    #[test]
    fn test_decode_conflicting_shapes_keep_first() {
        let query = decode("a=flat&a[b]=nested");
        assert_eq!(query.get("a"), Some(&json!("flat")));

        let query = decode("a[b]=nested&a=flat");
        assert_eq!(query.get("a"), Some(&json!({ "b": "nested" })));
    }

    #[test]
    fn test_encode_preserves_order_and_indices() {
        let query = wrap(
            "sortOption",
            json!([{ "field": "Name", "direction": "desc" }]),
        );
        assert_eq!(
            encode(&query),
            "sortOption[0][field]=Name&sortOption[0][direction]=desc"
        );
    }

    #[test]
    fn test_encode_skips_null_and_empty_containers() {
        let mut query = wrap("a", Value::Null);
        query.insert("b".into(), json!([]));
        query.insert("c".into(), json!({}));
        query.insert("d".into(), json!(true));
        query.insert("e".into(), json!(12));
        assert_eq!(encode(&query), "d=true&e=12");
    }

    #[test]
    fn test_round_trip_nested_strings() {
        let value = json!({
            "field": "Image CVE Count",
            "list": ["a", "b & c", "d=e"],
            "nested": { "deep": [{ "name": "x" }, { "name": "y?" }] },
            "empty": "",
        });
        let decoded = decode(&encode(&wrap("k", value.clone())));
        assert_eq!(decoded.get("k"), Some(&value));
    }
}
