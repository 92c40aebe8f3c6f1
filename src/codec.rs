//! The text side of the reference model: turning JSON text into a raw
//! [`Value`] tree, the primitive encodings the serializer writes, and
//! ISO-8601 timestamps.

use crate::error::DecodeError;
use crate::utils::offset_of;
use crate::value::{Node, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use miette::NamedSource;
use std::collections::HashSet;

/// The key of a reference marker object.
pub const REF_KEY: &str = "$ref";

/// Decodes JSON text into a raw value tree.
///
/// Objects whose only key is `$ref` with a string value become
/// [`Value::Reference`]; everything else maps one to one. No ids are read
/// and nothing is indexed; that is the resolver's job.
///
/// # Errors
/// Returns a `DecodeError` pointing at the offending position when the
/// text is not valid JSON.
pub fn decode(text: &str, name: &str) -> Result<Value, DecodeError> {
    let parsed: serde_json::Value = serde_json::from_str(text).map_err(|err| {
        let offset = offset_of(text, err.line(), err.column());
        DecodeError::Malformed {
            src: NamedSource::new(name, text.to_string()),
            span: (offset, 0).into(),
            message: err.to_string(),
        }
    })?;
    Ok(from_json(parsed))
}

/// Converts an already parsed JSON value into a raw value tree.
pub fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Node(Node::from_values(items.into_iter().map(from_json)))
        }
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(serde_json::Value::String(reference)) = map.get(REF_KEY) {
                    return Value::Reference(reference.clone());
                }
            }
            Value::Node(Node::from_entries(
                map.into_iter().map(|(k, v)| (k, from_json(v))),
            ))
        }
    }
}

/// Plain JSON for an acyclic graph, or `None` if a node is reached twice
/// along one path. Unresolved references and lazy stubs come out as
/// `{"$ref": ...}` markers, dates as ISO strings; undefined values and
/// functions are dropped from objects and become `null` in arrays.
pub fn to_json(value: &Value) -> Option<serde_json::Value> {
    to_json_inner(value, &mut HashSet::new())
}

fn to_json_inner(value: &Value, path: &mut HashSet<usize>) -> Option<serde_json::Value> {
    Some(match value {
        Value::Undefined | Value::Function(_) | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => json_number(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(format_iso_date(d)),
        Value::Reference(reference) => ref_marker(reference),
        Value::Node(node) => {
            if let Some(stub) = node.lazy_stub() {
                return Some(ref_marker(&stub.reference));
            }
            if !path.insert(node.addr()) {
                return None;
            }
            let out = if node.is_array() {
                let mut items = Vec::with_capacity(node.len());
                for (_, item) in node.entries() {
                    items.push(to_json_inner(&item, path)?);
                }
                serde_json::Value::Array(items)
            } else {
                let mut map = serde_json::Map::new();
                for (step, item) in node.entries() {
                    if matches!(item, Value::Undefined | Value::Function(_)) {
                        continue;
                    }
                    map.insert(step.key(), to_json_inner(&item, path)?);
                }
                serde_json::Value::Object(map)
            };
            path.remove(&node.addr());
            out
        }
    })
}

fn json_number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn ref_marker(reference: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(
        REF_KEY.to_string(),
        serde_json::Value::String(reference.to_string()),
    );
    serde_json::Value::Object(map)
}

/// Parses an ISO-8601 timestamp. Accepts RFC 3339, a local date-time
/// (taken as UTC) and a bare date (midnight UTC).
pub fn parse_iso_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Zulu-qualified ISO-8601, with fractional seconds only when present.
pub fn format_iso_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// JSON string literal for `text`, escaped.
pub fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// JSON number text. Integral values are written without a fraction and
/// non-finite values as `null`, the way JSON encoders in browsers do.
pub fn encode_number(n: f64) -> String {
    if !n.is_finite() {
        return "null".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    serde_json::Number::from_f64(n).map_or_else(|| "null".to_string(), |num| num.to_string())
}
