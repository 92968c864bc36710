//! Sequence values assembled from indexed environment variables.
//!
//! A sequence at `LIST` can be supplied one element per variable:
//! `LIST_1`, `LIST_2`, ... Every variable whose name starts with `LIST_`
//! contributes, ordered by suffix (numeric suffixes ascending, then the rest
//! lexicographically). How the collected strings become one value depends on
//! the element type, see [`CastPolicy`].

use crate::env::EnvSource;
use crate::schema::SchemaNode;
use serde_json::Value;
use std::cmp::Ordering;

/// Encoding used for a synthesized sequence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPolicy {
    /// Elements are plain scalars. Values are joined with a space and split
    /// back into a list when read.
    Native,
    /// Elements are structured. Each value is parsed as JSON (falling back to
    /// the raw string) and the whole sequence is encoded as one JSON array.
    Structured,
}

impl CastPolicy {
    pub fn for_element(element: &SchemaNode) -> Self {
        match element {
            SchemaNode::Scalar(kind) if kind.is_text() => CastPolicy::Native,
            _ => CastPolicy::Structured,
        }
    }
}

/// Values of all variables named `{name}_*`, in suffix order.
pub fn collect_suffixed(env: &dyn EnvSource, name: &str) -> Vec<String> {
    let prefix = format!("{name}_");
    let mut matches: Vec<(String, String)> = env
        .vars()
        .into_iter()
        .filter_map(|(var, value)| {
            let suffix = var.strip_prefix(prefix.as_str())?.to_string();
            Some((suffix, value))
        })
        .collect();
    matches.sort_by(|(a, _), (b, _)| compare_suffix(a, b));
    matches.into_iter().map(|(_, value)| value).collect()
}

fn compare_suffix(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Encode collected values under `policy`. Nothing is produced for an empty
/// collection.
pub fn synthesize(policy: CastPolicy, values: &[String]) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let encoded = match policy {
        CastPolicy::Native => values.join(" "),
        CastPolicy::Structured => Value::Array(
            values
                .iter()
                .map(|raw| {
                    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                })
                .collect(),
        )
        .to_string(),
    };
    Some(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::schema::{Configurable, Field};
    use serde_json::json;

    #[test]
    fn test_policy_per_element() {
        assert_eq!(CastPolicy::for_element(&String::schema()), CastPolicy::Native);
        assert_eq!(CastPolicy::for_element(&i64::schema()), CastPolicy::Native);
        assert_eq!(CastPolicy::for_element(&Value::schema()), CastPolicy::Structured);
        assert_eq!(
            CastPolicy::for_element(&SchemaNode::structure([Field::of::<String>("x")])),
            CastPolicy::Structured
        );
        assert_eq!(
            CastPolicy::for_element(&Option::<String>::schema()),
            CastPolicy::Structured
        );
    }

    #[test]
    fn test_collect_orders_numeric_suffixes() {
        let env = MapEnv::from([
            ("LIST_10", "ten"),
            ("LIST_2", "two"),
            ("LIST_1", "one"),
            ("LIST_extra", "extra"),
            ("LISTING", "ignored"),
            ("LIST", "ignored"),
        ]);
        assert_eq!(
            collect_suffixed(&env, "LIST"),
            ["one", "two", "ten", "extra"]
        );
    }

    #[test]
    fn test_collect_nothing() {
        let env = MapEnv::from([("OTHER_1", "x")]);
        assert!(collect_suffixed(&env, "LIST").is_empty());
    }

    #[test]
    fn test_native_joins_with_space() {
        let values = vec!["foo".to_string(), "bar".to_string()];
        assert_eq!(
            synthesize(CastPolicy::Native, &values).as_deref(),
            Some("foo bar")
        );
        assert_eq!(synthesize(CastPolicy::Native, &[]), None);
    }

    #[test]
    fn test_structured_encodes_json_array() {
        let values = vec![r#"{"name":"a","port":1}"#.to_string(), "plain".to_string()];
        let encoded = synthesize(CastPolicy::Structured, &values).unwrap();
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed, json!([{"name": "a", "port": 1}, "plain"]));
    }
}
