//! Layer merging and dotted-key access over settings trees.
//!
//! Settings are held as `serde_json::Value` trees. Layers are merged
//! field-by-field with the upper layer winning; arrays are replaced entirely,
//! not concatenated.

use crate::path::KEY_DELIMITER;
use serde_json::{Map, Value};

/// Lay `upper` over `lower` and return the combined settings tree.
///
/// Mappings combine key by key. Any other value in `upper` replaces the
/// one below it, so a sequence from the environment replaces the file's
/// sequence instead of extending it. A null in `upper` is an unset value
/// and leaves `lower` in place.
///
/// ```
/// use serde_json::json;
/// use env_overlay::merge::deep_merge;
///
/// let file = json!({"server": {"host": "file", "port": 80}, "hosts": ["a", "b"]});
/// let env = json!({"server": {"port": "9000"}, "hosts": ["c"]});
///
/// let merged = deep_merge(file, env);
/// assert_eq!(merged, json!({"server": {"host": "file", "port": "9000"}, "hosts": ["c"]}));
/// ```
pub fn deep_merge(lower: Value, upper: Value) -> Value {
    match (lower, upper) {
        (Value::Object(mut settings), Value::Object(layer)) => {
            for (key, value) in layer {
                let merged = match settings.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                settings.insert(key, merged);
            }
            Value::Object(settings)
        }
        (lower, Value::Null) => lower,
        (_, upper) => upper,
    }
}

/// Combine layers given lowest precedence first.
pub fn deep_merge_all(layers: impl IntoIterator<Item = Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

/// Look up a dotted key, e.g. `server.tls.cert`.
///
/// The empty key addresses the root.
pub fn get_dotted<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    if key.is_empty() {
        return Some(root);
    }
    key.split(KEY_DELIMITER)
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Insert `value` at a dotted key, creating intermediate objects.
///
/// Intermediate nodes that are not objects (including null) are replaced.
/// Inserting at the empty key is ignored.
pub fn insert_dotted(root: &mut Value, key: &str, value: Value) {
    if key.is_empty() {
        return;
    }

    let mut node = root;
    let mut segments = key.split(KEY_DELIMITER).peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_env_layer_overrides_single_leaf() {
        let base = json!({
            "server": {"host": "localhost", "port": 8080, "tls": {"cert": "a.pem"}},
            "name": "svc"
        });
        let env = json!({"server": {"tls": {"cert": "/etc/b.pem"}}});
        assert_eq!(
            deep_merge(base, env),
            json!({
                "server": {"host": "localhost", "port": 8080, "tls": {"cert": "/etc/b.pem"}},
                "name": "svc"
            })
        );
    }

    #[test]
    fn test_sequence_layer_replaces_base_sequence() {
        let base = json!({"upstreams": [{"host": "a"}, {"host": "b"}]});
        let env = json!({"upstreams": [{"host": "c"}]});
        assert_eq!(
            deep_merge(base, env),
            json!({"upstreams": [{"host": "c"}]})
        );
    }

    #[test]
    fn test_unset_values_keep_lower_layer() {
        let seed = json!({"name": "preset", "server": {"tls": {"cert": "a.pem"}}});
        let settings = json!({"name": null, "server": {"tls": null}});
        assert_eq!(
            deep_merge(seed.clone(), settings),
            seed
        );
    }

    #[test]
    fn test_mapping_replaces_scalar_and_back() {
        assert_eq!(
            deep_merge(json!({"tls": "off"}), json!({"tls": {"cert": "a.pem"}})),
            json!({"tls": {"cert": "a.pem"}})
        );
        assert_eq!(
            deep_merge(json!({"tls": {"cert": "a.pem"}}), json!({"tls": false})),
            json!({"tls": false})
        );
    }

    #[test]
    fn test_merge_all_tiers() {
        let tiers = [
            json!({"server": {"host": "localhost", "port": 80}}),
            Value::Null,
            json!({"server": {"port": 8080}, "name": "project"}),
            json!({"name": "user"}),
        ];
        assert_eq!(
            deep_merge_all(tiers),
            json!({"server": {"host": "localhost", "port": 8080}, "name": "user"})
        );
        assert_eq!(deep_merge_all(Vec::new()), Value::Null);
    }

    #[test]
    fn test_get_dotted() {
        let root = json!({"server": {"tls": {"cert": "a.pem"}}, "port": 1});
        assert_eq!(get_dotted(&root, "server.tls.cert"), Some(&json!("a.pem")));
        assert_eq!(get_dotted(&root, "port"), Some(&json!(1)));
        assert_eq!(get_dotted(&root, "port.inner"), None);
        assert_eq!(get_dotted(&root, "missing"), None);
        assert_eq!(get_dotted(&root, ""), Some(&root));
    }

    #[test]
    fn test_insert_dotted_creates_intermediates() {
        let mut root = Value::Null;
        insert_dotted(&mut root, "server.tls.cert", json!("b.pem"));
        insert_dotted(&mut root, "server.port", json!("8080"));
        assert_eq!(
            root,
            json!({"server": {"tls": {"cert": "b.pem"}, "port": "8080"}})
        );
    }

    #[test]
    fn test_insert_dotted_replaces_non_objects() {
        let mut root = json!({"tls": null, "name": "x"});
        insert_dotted(&mut root, "tls.cert", json!("c.pem"));
        insert_dotted(&mut root, "name.first", json!("y"));
        assert_eq!(
            root,
            json!({"tls": {"cert": "c.pem"}, "name": {"first": "y"}})
        );
    }

    #[test]
    fn test_insert_dotted_ignores_empty_key() {
        let mut root = json!({"a": 1});
        insert_dotted(&mut root, "", json!(2));
        assert_eq!(root, json!({"a": 1}));
    }
}
