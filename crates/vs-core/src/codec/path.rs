//! Bracket-path keys (`sortOption[0][field]`)

use std::borrow::Cow;

use serde_json::{Map, Value};

use super::{QueryObject, DEFAULT_ARRAY_LIMIT};

/// One step of a bracket path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Named member (`[field]`, or the root name)
    Key(String),
    /// Array position no larger than the array limit (`[0]`)
    Index(usize),
    /// Empty brackets (`[]`), appends to a list
    Append,
}

impl Segment {
    /// The segment rendered as an object member name
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(key) => Cow::Borrowed(key.as_str()),
            Segment::Index(index) => Cow::Owned(index.to_string()),
            Segment::Append => Cow::Borrowed(""),
        }
    }
}

/// Split a decoded key into its root name and bracket segments.
///
/// Returns `None` when the brackets are unbalanced or the key starts with a
/// bracket; such keys are stored flat.
pub fn split_key(raw: &str, array_limit: usize) -> Option<Vec<Segment>> {
    let Some(open) = raw.find('[') else {
        if raw.contains(']') {
            return None;
        }
        return Some(vec![Segment::Key(raw.to_string())]);
    };
    if open == 0 {
        return None;
    }

    let root = &raw[..open];
    if root.contains(']') {
        return None;
    }

    let mut segments = vec![Segment::Key(root.to_string())];
    let mut rest = &raw[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let name = &inner[..close];
        if name.contains('[') {
            return None;
        }
        segments.push(classify(name, array_limit));
        rest = &inner[close + 1..];
    }
    Some(segments)
}

fn classify(name: &str, array_limit: usize) -> Segment {
    if name.is_empty() {
        return Segment::Append;
    }
    match canonical_index(name) {
        Some(index) if index <= array_limit => Segment::Index(index),
        _ => Segment::Key(name.to_string()),
    }
}

/// Parse `name` as an index written without padding (`7`, not `07`)
pub(crate) fn canonical_index(name: &str) -> Option<usize> {
    let canonical = name == "0" || !name.starts_with('0');
    if canonical && !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Location of a parameter inside the decoded query object.
///
/// Parameter keys may be plain (`page`) or bracket paths (`vulns[page]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    pub fn parse(key: &str) -> Self {
        Self::parse_with(key, DEFAULT_ARRAY_LIMIT)
    }

    /// Parse `key`, treating indices above `array_limit` as member names
    pub fn parse_with(key: &str, array_limit: usize) -> Self {
        let segments = split_key(key, array_limit)
            .unwrap_or_else(|| vec![Segment::Key(key.to_string())])
            .into_iter()
            .map(|segment| match segment {
                Segment::Append => Segment::Key(String::new()),
                other => other,
            })
            .collect();
        Self { segments }
    }

    /// Name of the top-level query key this path lives under
    pub fn root(&self) -> Cow<'_, str> {
        self.segments
            .first()
            .map(Segment::name)
            .unwrap_or(Cow::Borrowed(""))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get<'a>(&self, query: &'a QueryObject) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = query.get(first.name().as_ref())?;
        for segment in rest {
            current = match (segment, current) {
                (segment, Value::Array(items)) => items.get(position(segment)?)?,
                (segment, Value::Object(map)) => map.get(segment.name().as_ref())?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at this path, creating containers as needed.
    ///
    /// Scalars sitting on the path are replaced. Arrays indexed past their end
    /// are turned into objects keyed by position.
    pub fn set(&self, query: &mut QueryObject, value: Value) {
        let Some((first, rest)) = self.segments.split_first() else {
            return;
        };
        let slot = query
            .entry(first.name().into_owned())
            .or_insert(Value::Null);
        assign(slot, rest, value);
    }

    /// Remove the value at this path, leaving siblings untouched.
    pub fn remove(&self, query: &mut QueryObject) -> Option<Value> {
        let (first, rest) = self.segments.split_first()?;
        let Some((last, middle)) = rest.split_last() else {
            return query.shift_remove(first.name().as_ref());
        };

        let mut current = query.get_mut(first.name().as_ref())?;
        for segment in middle {
            current = match (segment, current) {
                (segment, Value::Array(items)) => items.get_mut(position(segment)?)?,
                (segment, Value::Object(map)) => map.get_mut(segment.name().as_ref())?,
                _ => return None,
            };
        }

        match (last, current) {
            (segment, Value::Array(items)) => {
                let index = position(segment).filter(|index| *index < items.len())?;
                Some(items.remove(index))
            }
            (segment, Value::Object(map)) => map.shift_remove(segment.name().as_ref()),
            _ => None,
        }
    }
}

/// Array position addressed by `segment`, whatever the limit it was split with
fn position(segment: &Segment) -> Option<usize> {
    match segment {
        Segment::Index(index) => Some(*index),
        Segment::Key(name) => canonical_index(name),
        Segment::Append => None,
    }
}

fn assign(slot: &mut Value, segments: &[Segment], value: Value) {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = value;
        return;
    };

    if let (Some(index), Value::Array(items)) = (position(segment), &mut *slot) {
        if index == items.len() {
            items.push(Value::Null);
        }
        if let Some(child) = items.get_mut(index) {
            assign(child, rest, value);
            return;
        }
    }

    if slot.is_array() {
        if let Value::Array(items) = std::mem::take(slot) {
            let keyed: Map<String, Value> = items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), item))
                .collect();
            *slot = Value::Object(keyed);
        }
    }
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
        let child = map
            .entry(segment.name().into_owned())
            .or_insert(Value::Null);
        assign(child, rest, value);
    }
}
