//! Schema-guided decoding of settings trees into typed values.
//!
//! Settings coming from files and the environment are weakly typed: an env
//! variable is always a string even when the field is a port number. The
//! [`Decoder`] walks the settings alongside the target's [`SchemaNode`],
//! runs the registered [`DecodeHook`]s at every position, coerces scalars to
//! the kind the schema expects and finally hands the tree to serde.
//!
//! Weak coercion rules for scalar targets:
//! - bool: `1 t T TRUE true True` / `0 f F FALSE false False`, empty is false,
//!   numbers are true when non-zero
//! - integers and floats: parsed from strings (empty is zero), bools are 0/1
//! - string: numbers and bools are formatted
//! - duration: humantime text (`"1m 30s"`) or bare seconds
//! - time: unix seconds become RFC 3339 text
//! - a scalar where a sequence is expected becomes a one-element sequence

use crate::error::DecodeError;
use crate::path::PathKey;
use crate::schema::{DEFAULT_TAG_NAME, FieldMode, SchemaNode, ScalarKind};
use chrono::{DateTime, SecondsFormat};
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error type returned by decode hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// JSON type of a raw settings value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

/// A type-coercion step run before the built-in coercion at every position.
///
/// Hooks receive the source kind, the target schema and the raw data and
/// return the (possibly) converted data. Pairs a hook does not handle must
/// be returned unchanged.
pub trait DecodeHook: Send + Sync + fmt::Debug {
    fn hook(&self, source: ValueKind, target: &SchemaNode, data: Value)
    -> Result<Value, HookError>;
}

/// Decodes a string holding a JSON array when a sequence is expected.
///
/// Strings that are not a JSON array are returned unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceJsonHook;

impl DecodeHook for SequenceJsonHook {
    fn hook(
        &self,
        source: ValueKind,
        target: &SchemaNode,
        data: Value,
    ) -> Result<Value, HookError> {
        if source != ValueKind::String || !matches!(target, SchemaNode::Sequence(_)) {
            return Ok(data);
        }
        let parsed = data
            .as_str()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
        match parsed {
            Some(array @ Value::Array(_)) => Ok(array),
            _ => Ok(data),
        }
    }
}

/// Splits a string on a separator when a sequence is expected.
#[derive(Debug, Clone)]
pub struct StringToSequenceHook {
    separator: String,
}

impl StringToSequenceHook {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl DecodeHook for StringToSequenceHook {
    fn hook(
        &self,
        source: ValueKind,
        target: &SchemaNode,
        data: Value,
    ) -> Result<Value, HookError> {
        if source != ValueKind::String || !matches!(target, SchemaNode::Sequence(_)) {
            return Ok(data);
        }
        match data.as_str() {
            Some("") => Ok(Value::Array(Vec::new())),
            Some(raw) => Ok(Value::Array(
                raw.split(self.separator.as_str())
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            )),
            None => Ok(data),
        }
    }
}

/// Weakly typed, schema-guided decoder.
#[derive(Debug, Clone)]
pub struct Decoder {
    tag_name: String,
    hooks: Vec<Arc<dyn DecodeHook>>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    /// A decoder without hooks using the default tag namespace.
    pub fn new() -> Self {
        Self {
            tag_name: DEFAULT_TAG_NAME.to_string(),
            hooks: Vec::new(),
        }
    }

    /// Tag namespace used to resolve struct field keys.
    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = tag_name.into();
        self
    }

    /// Append a hook; hooks run in registration order.
    pub fn with_hook(mut self, hook: impl DecodeHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Coerce `value` against `schema` and deserialize it into `T`.
    pub fn decode<T: DeserializeOwned>(
        &self,
        value: Value,
        schema: &SchemaNode,
    ) -> Result<T, DecodeError> {
        let coerced = self.coerce(value, schema, &PathKey::root())?;
        Ok(serde_json::from_value(coerced)?)
    }

    /// Apply hooks and weak coercion without deserializing.
    pub fn coerce(
        &self,
        value: Value,
        node: &SchemaNode,
        path: &PathKey,
    ) -> Result<Value, DecodeError> {
        let value = self.run_hooks(value, node, path)?;
        match node {
            SchemaNode::Optional(inner) => {
                if value.is_null() {
                    Ok(value)
                } else {
                    self.coerce(value, inner, path)
                }
            }
            SchemaNode::Scalar(kind) => coerce_scalar(value, *kind, path),
            SchemaNode::Struct(_) => match value {
                Value::Object(mut map) => {
                    let mut coerced = Map::new();
                    self.coerce_fields(&mut map, &mut coerced, node, path)?;
                    map.extend(coerced);
                    Ok(Value::Object(map))
                }
                Value::Null => Ok(Value::Null),
                other => Err(mismatch(&other, node, path)),
            },
            SchemaNode::Mapping { value: entry, .. } => match value {
                Value::Object(map) => map
                    .into_iter()
                    .map(|(key, item)| {
                        let coerced = self.coerce(item, entry, &path.child(key.as_str()))?;
                        Ok::<_, DecodeError>((key, coerced))
                    })
                    .collect::<Result<Map<String, Value>, DecodeError>>()
                    .map(Value::Object),
                Value::Null => Ok(Value::Null),
                other => Err(mismatch(&other, node, path)),
            },
            SchemaNode::Sequence(element) => match value {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| self.coerce(item, element, &path.child(index.to_string())))
                    .collect::<Result<Vec<_>, DecodeError>>()
                    .map(Value::Array),
                Value::Null => Ok(Value::Null),
                Value::String(raw) if raw.is_empty() => Ok(Value::Array(Vec::new())),
                Value::Object(map) => Ok(Value::Object(map)),
                scalar => Ok(Value::Array(vec![self.coerce(
                    scalar,
                    element,
                    &path.child("0"),
                )?])),
            },
        }
    }

    /// Move the fields of a struct node from `raw` into `out`, coerced and
    /// keyed by their serde names. Flattened fields share the parent's maps.
    /// Nothing is read back from `out`, so renamed keys cannot collide.
    fn coerce_fields(
        &self,
        raw: &mut Map<String, Value>,
        out: &mut Map<String, Value>,
        node: &SchemaNode,
        path: &PathKey,
    ) -> Result<(), DecodeError> {
        let fields = match node {
            SchemaNode::Struct(fields) => fields,
            SchemaNode::Optional(inner) => return self.coerce_fields(raw, out, inner, path),
            _ => return Ok(()),
        };

        for field in fields {
            let tag = field.tag_info(&self.tag_name);
            match tag.mode() {
                FieldMode::Skip => {}
                FieldMode::Flatten => self.coerce_fields(raw, out, field.node(), path)?,
                FieldMode::Named => {
                    let segment = tag.segment(field.name());
                    if let Some(value) = raw.remove(segment) {
                        let coerced = self.coerce(value, field.node(), &path.child(segment))?;
                        // serde only knows the default namespace's keys
                        let serde_tag = field.tag_info(DEFAULT_TAG_NAME);
                        out.insert(serde_tag.segment(field.name()).to_string(), coerced);
                    }
                }
            }
        }
        Ok(())
    }

    fn run_hooks(
        &self,
        value: Value,
        node: &SchemaNode,
        path: &PathKey,
    ) -> Result<Value, DecodeError> {
        self.hooks.iter().try_fold(value, |data, hook| {
            hook.hook(ValueKind::of(&data), node, data)
                .map_err(|err| DecodeError::Hook {
                    path: path.render(),
                    message: err.to_string(),
                })
        })
    }
}

fn coerce_scalar(value: Value, kind: ScalarKind, path: &PathKey) -> Result<Value, DecodeError> {
    if kind == ScalarKind::Any || value.is_null() {
        return Ok(value);
    }
    let fail = |value: &Value| DecodeError::invalid(&path.render(), kind.expected(), describe(value));

    match kind {
        ScalarKind::Bool => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(raw) => parse_bool(raw.trim())
                .map(Value::Bool)
                .ok_or_else(|| fail(&value)),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
            _ => Err(fail(&value)),
        },
        ScalarKind::Int => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => n
                .as_f64()
                .and_then(integral_i64)
                .map(Value::from)
                .ok_or_else(|| fail(&value)),
            Value::String(raw) => parse_int(raw.trim())
                .map(Value::from)
                .ok_or_else(|| fail(&value)),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            _ => Err(fail(&value)),
        },
        ScalarKind::Uint => match &value {
            Value::Number(n) if n.is_u64() => Ok(value),
            Value::Number(n) => n
                .as_f64()
                .and_then(integral_u64)
                .map(Value::from)
                .ok_or_else(|| fail(&value)),
            Value::String(raw) => parse_uint(raw.trim())
                .map(Value::from)
                .ok_or_else(|| fail(&value)),
            Value::Bool(b) => Ok(Value::from(u64::from(*b))),
            _ => Err(fail(&value)),
        },
        ScalarKind::Float => match &value {
            Value::Number(_) => Ok(value),
            Value::String(raw) => {
                let raw = raw.trim();
                let parsed = if raw.is_empty() {
                    Some(0.0)
                } else {
                    raw.parse::<f64>().ok()
                };
                parsed
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| fail(&value))
            }
            Value::Bool(b) => Ok(Value::from(f64::from(u8::from(*b)))),
            _ => Err(fail(&value)),
        },
        ScalarKind::String => match &value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(fail(&value)),
        },
        ScalarKind::Time => match &value {
            Value::String(_) => Ok(value),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true)))
                .ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
        ScalarKind::Duration => match &value {
            Value::Object(_) => Ok(value),
            Value::String(raw) => parse_duration(raw.trim())
                .map(duration_value)
                .ok_or_else(|| fail(&value)),
            Value::Number(n) => n
                .as_f64()
                .filter(|secs| *secs >= 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .map(duration_value)
                .ok_or_else(|| fail(&value)),
            _ => Err(fail(&value)),
        },
        ScalarKind::Any => Ok(value),
    }
}

fn mismatch(value: &Value, node: &SchemaNode, path: &PathKey) -> DecodeError {
    DecodeError::invalid(&path.render(), node.kind_name(), describe(value))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(raw) => format!("{raw:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
        other => other.to_string(),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "" | "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        _ => None,
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return Some(0);
    }
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(integral_i64))
}

fn parse_uint(raw: &str) -> Option<u64> {
    if raw.is_empty() {
        return Some(0);
    }
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(integral_u64))
}

fn integral_i64(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64).then_some(f as i64)
}

fn integral_u64(f: f64) -> Option<u64> {
    (f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn parse_duration(raw: &str) -> Option<Duration> {
    if raw.is_empty() {
        return Some(Duration::ZERO);
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).ok()
}

/// Serde representation of `std::time::Duration`.
fn duration_value(duration: Duration) -> Value {
    json!({ "secs": duration.as_secs(), "nanos": duration.subsec_nanos() })
}
