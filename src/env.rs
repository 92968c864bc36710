//! Environment access and variable name resolution.
//!
//! Environment variables are read through the [`EnvSource`] trait so that
//! overlays can run against the process environment ([`ProcessEnv`]) or an
//! in-memory map ([`MapEnv`]).
//!
//! Names are derived from dotted store keys by [`EnvKeyResolver`]:
//! separators are substituted, the result is uppercased and an optional
//! prefix is prepended (`server.port` with prefix `app` → `APP_SERVER_PORT`).

use crate::path::{KEY_DELIMITER, PathKey};
use std::collections::BTreeMap;
use std::fmt;

/// Read access to a set of environment variables.
pub trait EnvSource: Send + Sync + fmt::Debug {
    /// Value of a single variable, if set.
    fn var(&self, name: &str) -> Option<String>;

    /// All variables, in the source's enumeration order.
    fn vars(&self) -> Vec<(String, String)>;
}

/// The current process environment.
///
/// Variables whose name or value is not valid Unicode are invisible.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }
}

/// An in-memory environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for MapEnv {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Substitutions applied to a store key before it becomes a variable name.
///
/// Pairs are matched in a single left-to-right pass; at each position the
/// first pair (in insertion order) whose pattern matches wins. The default
/// replacer maps the key delimiter `.` to `_`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReplacer {
    pairs: Vec<(String, String)>,
}

impl Default for KeyReplacer {
    fn default() -> Self {
        Self {
            pairs: vec![(KEY_DELIMITER.to_string(), "_".to_string())],
        }
    }
}

impl KeyReplacer {
    /// A replacer with no substitutions at all.
    pub fn empty() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append a substitution.
    pub fn with(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let from = from.into();
        if !from.is_empty() {
            self.pairs.push((from, to.into()));
        }
        self
    }

    pub fn replace(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        'outer: while let Some(ch) = rest.chars().next() {
            for (from, to) in &self.pairs {
                if let Some(tail) = rest.strip_prefix(from.as_str()) {
                    out.push_str(to);
                    rest = tail;
                    continue 'outer;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }
}

/// Turns paths into environment variable names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvKeyResolver {
    prefix: Option<String>,
    replacer: KeyReplacer,
}

impl EnvKeyResolver {
    pub fn new(prefix: Option<&str>, replacer: KeyReplacer) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            replacer,
        }
    }

    pub fn resolve(&self, path: &PathKey) -> String {
        self.resolve_key(&path.render())
    }

    /// Resolve an already rendered dotted key.
    pub fn resolve_key(&self, key: &str) -> String {
        let replaced = self.replacer.replace(key);
        match &self.prefix {
            Some(prefix) => format!("{prefix}_{replaced}").to_uppercase(),
            None => replaced.to_uppercase(),
        }
    }
}
