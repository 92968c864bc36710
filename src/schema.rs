//! Explicit description of configuration types.
//!
//! A [`SchemaNode`] tree describes the shape of a configuration type: which
//! positions are scalars, structs, mappings, sequences or optional values, and
//! how struct fields are named. Types describe themselves through the
//! [`Configurable`] trait; std and chrono types are covered here, user structs
//! implement it with the [`Field`] builder:
//!
//! ```
//! use env_overlay::schema::{Configurable, Field, SchemaNode};
//!
//! struct Server {
//!     host: String,
//!     port: u16,
//!     tags: Vec<String>,
//! }
//!
//! impl Configurable for Server {
//!     fn schema() -> SchemaNode {
//!         SchemaNode::structure([
//!             Field::of::<String>("host"),
//!             Field::of::<u16>("port"),
//!             Field::of::<Vec<String>>("tags").rename("labels"),
//!         ])
//!     }
//! }
//! ```
//!
//! Field names and renames must agree with the names the type uses when it
//! is (de)serialized, since the same keys address the settings tree.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

/// Tag namespace used when none is configured.
pub const DEFAULT_TAG_NAME: &str = "serde";

/// Scalar categories understood by the decoder's weak coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    String,
    Int,
    Uint,
    Float,
    /// Timestamps, dates and times of day (RFC 3339 text).
    Time,
    /// Durations (`"1m 30s"`, or bare seconds).
    Duration,
    /// Opaque value, passed through untouched.
    Any,
}

impl ScalarKind {
    /// Human-readable name used in decode errors.
    pub fn expected(self) -> &'static str {
        match self {
            ScalarKind::Bool => "boolean",
            ScalarKind::String => "string",
            ScalarKind::Int => "integer",
            ScalarKind::Uint => "unsigned integer",
            ScalarKind::Float => "float",
            ScalarKind::Time => "time",
            ScalarKind::Duration => "duration",
            ScalarKind::Any => "any value",
        }
    }

    /// Whether a value of this kind can be written as plain text in an
    /// environment variable.
    pub fn is_text(self) -> bool {
        !matches!(self, ScalarKind::Any)
    }
}

/// Key type of a mapping.
///
/// Only string-keyed mappings get per-entry environment bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    String,
    Other,
}

/// One position in a configuration type.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Scalar(ScalarKind),
    Struct(Vec<Field>),
    Mapping { key: KeyKind, value: Box<SchemaNode> },
    Sequence(Box<SchemaNode>),
    Optional(Box<SchemaNode>),
}

impl SchemaNode {
    pub fn structure(fields: impl IntoIterator<Item = Field>) -> Self {
        SchemaNode::Struct(fields.into_iter().collect())
    }

    pub fn mapping(key: KeyKind, value: SchemaNode) -> Self {
        SchemaNode::Mapping {
            key,
            value: Box::new(value),
        }
    }

    pub fn sequence(element: SchemaNode) -> Self {
        SchemaNode::Sequence(Box::new(element))
    }

    pub fn optional(inner: SchemaNode) -> Self {
        SchemaNode::Optional(Box::new(inner))
    }

    /// Short name of the node kind, for logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SchemaNode::Scalar(kind) => kind.expected(),
            SchemaNode::Struct(_) => "struct",
            SchemaNode::Mapping { .. } => "mapping",
            SchemaNode::Sequence(_) => "sequence",
            SchemaNode::Optional(_) => "optional",
        }
    }
}

/// Per-field naming metadata for one tag namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInfo {
    /// Segment to use instead of the declared field name.
    pub key: Option<String>,
    /// Exclude the field (and its subtree) from traversal.
    pub skip: bool,
    /// Merge the field's children into the parent's level.
    pub flatten: bool,
}

/// How a field takes part in traversal, after resolving tag conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Skip,
    Flatten,
    Named,
}

impl TagInfo {
    /// Parse conventional tag text: `"name"`, `"-"`, `"name,flatten"` or
    /// `",squash"`. Unknown options are ignored.
    pub fn parse(tag: &str) -> Self {
        let mut parts = tag.split(',');
        let name = parts.next().unwrap_or_default().trim();
        let mut info = TagInfo::default();

        if name == "-" {
            info.skip = true;
        } else if !name.is_empty() {
            info.key = Some(name.to_string());
        }

        for option in parts {
            if matches!(option.trim(), "flatten" | "squash") {
                info.flatten = true;
            }
        }
        info
    }

    pub fn mode(&self) -> FieldMode {
        // Skip wins when both are set.
        if self.skip {
            FieldMode::Skip
        } else if self.flatten {
            FieldMode::Flatten
        } else {
            FieldMode::Named
        }
    }

    /// Path segment for a field declared as `declared`.
    pub fn segment<'a>(&'a self, declared: &'a str) -> &'a str {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => declared,
        }
    }
}

impl From<&str> for TagInfo {
    fn from(tag: &str) -> Self {
        TagInfo::parse(tag)
    }
}

/// A named struct field with its schema and tag metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    node: SchemaNode,
    tags: BTreeMap<String, TagInfo>,
}

impl Field {
    pub fn new(name: impl Into<String>, node: SchemaNode) -> Self {
        Self {
            name: name.into(),
            node,
            tags: BTreeMap::new(),
        }
    }

    /// Field whose schema is taken from `T`.
    pub fn of<T: Configurable + ?Sized>(name: impl Into<String>) -> Self {
        Self::new(name, T::schema())
    }

    /// Override the key in the default namespace.
    pub fn rename(mut self, key: impl Into<String>) -> Self {
        self.default_tag().key = Some(key.into());
        self
    }

    /// Skip the field in the default namespace.
    pub fn skip(mut self) -> Self {
        self.default_tag().skip = true;
        self
    }

    /// Flatten the field in the default namespace.
    pub fn flatten(mut self) -> Self {
        self.default_tag().flatten = true;
        self
    }

    /// Attach tag metadata for `namespace`, replacing any previous entry.
    pub fn tag(mut self, namespace: impl Into<String>, info: impl Into<TagInfo>) -> Self {
        self.tags.insert(namespace.into(), info.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &SchemaNode {
        &self.node
    }

    /// Tag metadata for `namespace`; untagged fields use their declared name.
    pub fn tag_info(&self, namespace: &str) -> TagInfo {
        self.tags.get(namespace).cloned().unwrap_or_default()
    }

    fn default_tag(&mut self) -> &mut TagInfo {
        self.tags.entry(DEFAULT_TAG_NAME.to_string()).or_default()
    }
}

/// Types that can describe their configuration shape.
pub trait Configurable {
    fn schema() -> SchemaNode;
}

/// Key types of mappings.
pub trait MapKey {
    const KIND: KeyKind;
}

macro_rules! impl_scalar {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Configurable for $ty {
                fn schema() -> SchemaNode {
                    SchemaNode::Scalar($kind)
                }
            }
        )+
    };
}

impl_scalar!(ScalarKind::Bool => bool);
impl_scalar!(ScalarKind::String => String, str, char, PathBuf);
impl_scalar!(ScalarKind::Int => i8, i16, i32, i64, i128, isize);
impl_scalar!(ScalarKind::Uint => u8, u16, u32, u64, u128, usize);
impl_scalar!(ScalarKind::Float => f32, f64);
impl_scalar!(ScalarKind::Duration => std::time::Duration);
impl_scalar!(
    ScalarKind::Time => chrono::DateTime<chrono::Utc>,
    chrono::DateTime<chrono::FixedOffset>,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    chrono::NaiveTime,
);
impl_scalar!(ScalarKind::Any => serde_json::Value);

macro_rules! impl_map_key {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl MapKey for $ty {
                const KIND: KeyKind = $kind;
            }
        )+
    };
}

impl_map_key!(KeyKind::String => String, Box<str>, PathBuf);
impl_map_key!(
    KeyKind::Other => bool, char, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize,
);

impl<T: Configurable> Configurable for Option<T> {
    fn schema() -> SchemaNode {
        SchemaNode::optional(T::schema())
    }
}

impl<T: Configurable + ?Sized> Configurable for Box<T> {
    fn schema() -> SchemaNode {
        T::schema()
    }
}

impl<T: Configurable> Configurable for Vec<T> {
    fn schema() -> SchemaNode {
        SchemaNode::sequence(T::schema())
    }
}

impl<T: Configurable> Configurable for VecDeque<T> {
    fn schema() -> SchemaNode {
        SchemaNode::sequence(T::schema())
    }
}

impl<T: Configurable> Configurable for BTreeSet<T> {
    fn schema() -> SchemaNode {
        SchemaNode::sequence(T::schema())
    }
}

impl<T: Configurable, S> Configurable for HashSet<T, S> {
    fn schema() -> SchemaNode {
        SchemaNode::sequence(T::schema())
    }
}

impl<K: MapKey, V: Configurable> Configurable for BTreeMap<K, V> {
    fn schema() -> SchemaNode {
        SchemaNode::mapping(K::KIND, V::schema())
    }
}

impl<K: MapKey, V: Configurable, S> Configurable for HashMap<K, V, S> {
    fn schema() -> SchemaNode {
        SchemaNode::mapping(K::KIND, V::schema())
    }
}
