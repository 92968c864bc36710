//! Traversal of a schema together with a runtime settings value.
//!
//! The walker derives one [`PathKey`] per terminal position and reports it to
//! a [`Visitor`]. Traversal is driven by the schema, so struct fields are
//! visited even when the runtime value lacks them (absent optional sections
//! still get paths); the runtime value only supplies mapping keys.
//!
//! | Node | Behavior |
//! |------|----------|
//! | Struct | per field: skip, flatten (same path, same value) or named child |
//! | Mapping | one child per runtime key; only for string keys |
//! | Sequence | terminal, reported through [`Visitor::visit_sequence`] |
//! | Optional | transparent; null is treated as absent |
//! | Scalar | terminal, reported through [`Visitor::visit_leaf`] |

use crate::path::PathKey;
use crate::schema::{DEFAULT_TAG_NAME, FieldMode, KeyKind, SchemaNode};
use serde_json::Value;
use tracing::trace;

/// Receives the terminal positions found by a [`SchemaWalker`].
pub trait Visitor {
    /// A scalar (or otherwise opaque) position.
    fn visit_leaf(&mut self, path: &PathKey, node: &SchemaNode);

    /// A sequence position; elements are not visited.
    fn visit_sequence(&mut self, path: &PathKey, element: &SchemaNode);
}

/// Walks a [`SchemaNode`] using one tag namespace.
#[derive(Debug, Clone, Copy)]
pub struct SchemaWalker<'a> {
    tag_name: &'a str,
}

impl Default for SchemaWalker<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_NAME)
    }
}

impl<'a> SchemaWalker<'a> {
    pub fn new(tag_name: &'a str) -> Self {
        Self { tag_name }
    }

    pub fn walk<V: Visitor + ?Sized>(
        &self,
        node: &SchemaNode,
        value: Option<&Value>,
        visitor: &mut V,
    ) {
        self.walk_at(node, value, &PathKey::root(), visitor);
    }

    fn walk_at<V: Visitor + ?Sized>(
        &self,
        node: &SchemaNode,
        value: Option<&Value>,
        path: &PathKey,
        visitor: &mut V,
    ) {
        match node {
            SchemaNode::Optional(inner) => {
                self.walk_at(inner, value.filter(|v| !v.is_null()), path, visitor);
            }
            SchemaNode::Struct(fields) => {
                let object = value.and_then(Value::as_object);
                for field in fields {
                    let tag = field.tag_info(self.tag_name);
                    match tag.mode() {
                        FieldMode::Skip => {
                            trace!(field = field.name(), path = %path, "Skipping field");
                        }
                        FieldMode::Flatten => self.walk_at(field.node(), value, path, visitor),
                        FieldMode::Named => {
                            let segment = tag.segment(field.name());
                            let child = object.and_then(|map| map.get(segment));
                            self.walk_at(field.node(), child, &path.child(segment), visitor);
                        }
                    }
                }
            }
            SchemaNode::Mapping { key, value: entry } => {
                if *key != KeyKind::String {
                    trace!(path = %path, "Skipping mapping with non-string keys");
                    return;
                }
                if let Some(map) = value.and_then(Value::as_object) {
                    for (name, item) in map {
                        self.walk_at(entry, Some(item), &path.child(name.as_str()), visitor);
                    }
                }
            }
            SchemaNode::Sequence(element) => {
                if !path.is_root() {
                    visitor.visit_sequence(path, element);
                }
            }
            SchemaNode::Scalar(_) => {
                if !path.is_root() {
                    visitor.visit_leaf(path, node);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Configurable, Field, ScalarKind};
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct Collector {
        leaves: Vec<String>,
        sequences: Vec<String>,
    }

    impl Visitor for Collector {
        fn visit_leaf(&mut self, path: &PathKey, _node: &SchemaNode) {
            self.leaves.push(path.render());
        }

        fn visit_sequence(&mut self, path: &PathKey, _element: &SchemaNode) {
            self.sequences.push(path.render());
        }
    }

    fn collect(node: &SchemaNode, value: Option<&Value>, tag_name: &str) -> Collector {
        let mut collector = Collector::default();
        SchemaWalker::new(tag_name).walk(node, value, &mut collector);
        collector
    }

    fn tls() -> SchemaNode {
        SchemaNode::structure([Field::of::<String>("cert"), Field::of::<String>("key")])
    }

    #[test]
    fn test_nested_struct_paths() {
        let node = SchemaNode::structure([
            Field::of::<String>("name"),
            Field::new(
                "server",
                SchemaNode::structure([Field::of::<u16>("port"), Field::new("tls", tls())]),
            ),
        ]);
        let paths = collect(&node, None, DEFAULT_TAG_NAME);
        assert_eq!(
            paths.leaves,
            ["name", "server.port", "server.tls.cert", "server.tls.key"]
        );
    }

    #[test]
    fn test_absent_optional_struct_is_still_walked() {
        let node = SchemaNode::structure([Field::new("tls", SchemaNode::optional(tls()))]);
        let value = json!({"tls": null});
        let paths = collect(&node, Some(&value), DEFAULT_TAG_NAME);
        assert_eq!(paths.leaves, ["tls.cert", "tls.key"]);
    }

    #[test]
    fn test_skip_and_flatten() {
        let node = SchemaNode::structure([
            Field::new("common", SchemaNode::structure([Field::of::<String>("log_level")]))
                .flatten(),
            Field::of::<String>("secret").skip(),
            Field::of::<String>("both").skip().flatten(),
            Field::of::<u16>("port").rename("listen_port"),
        ]);
        let paths = collect(&node, None, DEFAULT_TAG_NAME);
        assert_eq!(paths.leaves, ["log_level", "listen_port"]);
    }

    #[test]
    fn test_tag_namespace_is_selectable() {
        let node = SchemaNode::structure([
            Field::of::<u16>("port").rename("serde_port").tag("env", "env_port"),
            Field::of::<String>("internal").tag("env", "-"),
        ]);
        assert_eq!(
            collect(&node, None, DEFAULT_TAG_NAME).leaves,
            ["serde_port", "internal"]
        );
        assert_eq!(collect(&node, None, "env").leaves, ["env_port"]);
    }

    #[test]
    fn test_mapping_keys_come_from_runtime_value() {
        let node = SchemaNode::structure([Field::of::<HashMap<String, u16>>("ports")]);
        let value = json!({"ports": {"http": 80, "https": 443}});
        let paths = collect(&node, Some(&value), DEFAULT_TAG_NAME);
        assert_eq!(paths.leaves, ["ports.http", "ports.https"]);

        assert!(collect(&node, None, DEFAULT_TAG_NAME).leaves.is_empty());
    }

    #[test]
    fn test_mapping_of_structs() {
        let node = SchemaNode::structure([Field::new(
            "servers",
            SchemaNode::mapping(KeyKind::String, tls()),
        )]);
        let value = json!({"servers": {"alpha": {"cert": "a"}}});
        let paths = collect(&node, Some(&value), DEFAULT_TAG_NAME);
        assert_eq!(paths.leaves, ["servers.alpha.cert", "servers.alpha.key"]);
    }

    #[test]
    fn test_non_string_keys_are_skipped() {
        let node = SchemaNode::structure([Field::of::<BTreeMap<u32, String>>("by_id")]);
        let value = json!({"by_id": {"1": "one"}});
        let paths = collect(&node, Some(&value), DEFAULT_TAG_NAME);
        assert!(paths.leaves.is_empty());
        assert!(paths.sequences.is_empty());
    }

    #[test]
    fn test_sequences_are_terminal() {
        let node = SchemaNode::structure([
            Field::of::<Vec<String>>("hosts"),
            Field::new("upstreams", SchemaNode::sequence(tls())),
        ]);
        let value = json!({"hosts": ["a", "b"], "upstreams": [{"cert": "x"}]});
        let paths = collect(&node, Some(&value), DEFAULT_TAG_NAME);
        assert!(paths.leaves.is_empty());
        assert_eq!(paths.sequences, ["hosts", "upstreams"]);
    }

    #[test]
    fn test_scalar_root_has_no_path() {
        let paths = collect(&SchemaNode::Scalar(ScalarKind::String), None, DEFAULT_TAG_NAME);
        assert!(paths.leaves.is_empty());
        assert!(collect(&Vec::<u8>::schema(), None, DEFAULT_TAG_NAME).sequences.is_empty());
    }
}
