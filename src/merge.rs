//! Deep merge of two JSON trees: the structure tree and record sets during
//! sync, and two records' identity sections during a manual import.
//!
//! Incoming wins at the leaves. Arrays of objects are a union keyed by `id`:
//! nothing present in `base` is ever dropped or moved, and an entity present
//! on both sides is replaced whole by the incoming one. Neither input is
//! modified.

use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

/// How one incoming node is merged.
#[derive(Debug)]
enum Node<'a> {
    Object(&'a Map<String, Value>),
    /// An array merged as a union: every element is an object (vacuously
    /// true when empty), or the base array already holds identified
    /// entities.
    Entities(&'a [Value]),
    Leaf(&'a Value),
}

fn entity_id(v: &Value) -> Option<String> {
    match v.as_object()?.get("id")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn holds_entities(v: Option<&Value>) -> bool {
    v.and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|i| entity_id(i).is_some()))
}

fn classify<'a>(base: Option<&Value>, v: &'a Value) -> Node<'a> {
    match v {
        Value::Object(map) => Node::Object(map),
        Value::Array(items) if items.iter().all(Value::is_object) || holds_entities(base) => {
            Node::Entities(items)
        }
        other => Node::Leaf(other),
    }
}

/// Union of `base` and `incoming`.
///
/// Base elements keep their positions. The k-th base occurrence of an id is
/// replaced by the k-th incoming occurrence of that id, so duplicate ids
/// survive `merge(x, x)`. Incoming elements left unpaired are appended in
/// incoming order; an id-less incoming element equal to a not yet matched
/// id-less base element is already present and is not appended again.
fn merge_entities(base: Option<&Value>, incoming: &[Value]) -> Value {
    let existing: &[Value] = match base {
        Some(Value::Array(items)) => items,
        _ => &[],
    };

    let mut by_id: HashMap<String, VecDeque<usize>> = HashMap::new();
    for (idx, item) in incoming.iter().enumerate() {
        if let Some(id) = entity_id(item) {
            by_id.entry(id).or_default().push_back(idx);
        }
    }

    let mut used = vec![false; incoming.len()];
    let mut unmatched_anonymous: Vec<&Value> = Vec::new();
    let mut out = Vec::with_capacity(existing.len() + incoming.len());
    for item in existing {
        match entity_id(item) {
            Some(id) => match by_id.get_mut(&id).and_then(VecDeque::pop_front) {
                Some(idx) => {
                    used[idx] = true;
                    out.push(incoming[idx].clone());
                }
                None => out.push(item.clone()),
            },
            None => {
                unmatched_anonymous.push(item);
                out.push(item.clone());
            }
        }
    }

    for (idx, item) in incoming.iter().enumerate() {
        if used[idx] {
            continue;
        }
        if entity_id(item).is_none() {
            if let Some(pos) = unmatched_anonymous.iter().position(|b| *b == item) {
                unmatched_anonymous.swap_remove(pos);
                continue;
            }
        }
        out.push(item.clone());
    }
    Value::Array(out)
}

fn merge_objects(base: Option<&Map<String, Value>>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.cloned().unwrap_or_default();
    for (key, inc) in incoming {
        let merged = match classify(out.get(key), inc) {
            Node::Object(map) => {
                let existing = out.get(key).and_then(Value::as_object);
                Value::Object(merge_objects(existing, map))
            }
            Node::Entities(items) => merge_entities(out.get(key), items),
            Node::Leaf(v) => v.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// `merge(base, incoming)`. An empty incoming object leaves `base` as it
/// is, whatever its type; otherwise a non-object incoming at the root is
/// handled like any other node.
pub fn merge(base: &Value, incoming: &Value) -> Value {
    match classify(Some(base), incoming) {
        Node::Object(map) if map.is_empty() => base.clone(),
        Node::Object(map) => Value::Object(merge_objects(base.as_object(), map)),
        Node::Entities(items) => merge_entities(Some(base), items),
        Node::Leaf(v) => v.clone(),
    }
}

/// Lay typed record JSON over the raw JSON it was parsed from. Objects
/// recurse so keys the typed model does not know survive; everything else,
/// arrays included, is taken from `typed`.
pub fn overlay(raw: &Value, typed: &Value) -> Value {
    match (raw, typed) {
        (Value::Object(r), Value::Object(t)) => {
            let mut out = r.clone();
            for (key, tv) in t {
                let merged = match out.get(key) {
                    Some(rv) => overlay(rv, tv),
                    None => tv.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => typed.clone(),
    }
}

/// Sections of a record a manual import may update. Semesters are left
/// alone so blank imported grades never overwrite entered ones.
pub const IDENTITY_SECTIONS: &[&str] = &["info", "eligibility"];

/// Merge an imported record into an existing one, touching only the
/// identity sections.
pub fn merge_identity(existing: &Value, imported: &Value) -> Value {
    let mut out = existing.clone();
    let Some(target) = out.as_object_mut() else {
        return out;
    };
    for section in IDENTITY_SECTIONS {
        let Some(inc) = imported.get(*section) else {
            continue;
        };
        let base = target.get(*section).cloned().unwrap_or(Value::Null);
        target.insert(section.to_string(), merge(&base, inc));
    }
    out
}
