//! Layered key/value configuration store.
//!
//! The store keeps three layers, lowest to highest precedence:
//! 1. **Defaults** - set with [`ConfigStore::set_default`]
//! 2. **Base config** - loaded once from the configured [`ConfigSource`]
//! 3. **Environment** - lazy bindings from dotted keys to variable names
//!
//! Bindings are promises: the variable is looked up when settings are read,
//! so an unset variable leaves the lower layers untouched.
//!
//! Values synthesized during an overlay run (sequence bindings) are kept in
//! an override side channel that is consulted before the environment
//! source. The process environment is never written.

use crate::decode::Decoder;
use crate::env::{EnvKeyResolver, EnvSource, KeyReplacer, ProcessEnv};
use crate::error::{DecodeError, SourceError};
use crate::merge::{deep_merge, get_dotted, insert_dotted};
use crate::schema::Configurable;
use crate::source::ConfigSource;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// How a bound variable's raw text becomes a settings value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// The raw string as is.
    Scalar,
    /// The raw string split on whitespace into a list of strings.
    List,
}

/// A dotted key bound to an environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvBinding {
    pub env_name: String,
    pub kind: BindingKind,
}

impl EnvBinding {
    fn materialize(&self, raw: String) -> Value {
        match self.kind {
            BindingKind::Scalar => Value::String(raw),
            BindingKind::List => Value::Array(
                raw.split_whitespace()
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            ),
        }
    }
}

/// Configuration store with defaults, base config and env bindings.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    source: Option<Arc<dyn ConfigSource>>,
    config: Option<Value>,
    defaults: Value,
    bindings: BTreeMap<String, EnvBinding>,
    env_overrides: BTreeMap<String, String>,
    env_prefix: Option<String>,
    key_replacer: KeyReplacer,
    allow_empty_env: bool,
    env: Arc<dyn EnvSource>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// An empty store reading the process environment.
    pub fn new() -> Self {
        Self {
            source: None,
            config: None,
            defaults: Value::Object(Map::new()),
            bindings: BTreeMap::new(),
            env_overrides: BTreeMap::new(),
            env_prefix: None,
            key_replacer: KeyReplacer::default(),
            allow_empty_env: false,
            env: Arc::new(ProcessEnv),
        }
    }

    /// Set the base source. Clears any previously loaded base config.
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self.config = None;
        self
    }

    /// Read variables from `env` instead of the process environment.
    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Prefix prepended (as `PREFIX_`) to every resolved variable name.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.env_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn with_key_replacer(mut self, replacer: KeyReplacer) -> Self {
        self.key_replacer = replacer;
        self
    }

    /// Treat variables set to the empty string as set.
    pub fn with_allow_empty_env(mut self, allow: bool) -> Self {
        self.allow_empty_env = allow;
        self
    }

    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    pub fn key_replacer(&self) -> &KeyReplacer {
        &self.key_replacer
    }

    pub fn env(&self) -> &dyn EnvSource {
        self.env.as_ref()
    }

    /// Resolver matching this store's prefix and key replacer.
    pub fn env_key_resolver(&self) -> EnvKeyResolver {
        EnvKeyResolver::new(self.env_prefix(), self.key_replacer.clone())
    }

    /// Set a default value for a dotted key.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        insert_dotted(&mut self.defaults, key, value.into());
    }

    /// Load the base source. Repeated calls after a successful load are
    /// no-ops. Without a source this reports [`SourceError::NotFound`].
    pub fn read_in_config(&mut self) -> Result<(), SourceError> {
        if self.config.is_some() {
            return Ok(());
        }
        let source = self
            .source
            .as_ref()
            .ok_or(SourceError::NotFound {
                searched: Vec::new(),
            })?;
        self.config = Some(source.load()?);
        Ok(())
    }

    /// Whether a base config has been loaded.
    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    /// Bind `key` to the variable `env_name`, replacing any earlier binding.
    pub fn bind_env(&mut self, key: &str, env_name: impl Into<String>) {
        self.bind(key, env_name.into(), BindingKind::Scalar);
    }

    /// Bind `key` to `env_name`, splitting the value on whitespace.
    pub fn bind_env_list(&mut self, key: &str, env_name: impl Into<String>) {
        self.bind(key, env_name.into(), BindingKind::List);
    }

    fn bind(&mut self, key: &str, env_name: String, kind: BindingKind) {
        if key.is_empty() || env_name.is_empty() {
            debug!(key, env = %env_name, "Ignoring env binding with empty key or name");
            return;
        }
        self.bindings
            .insert(key.to_string(), EnvBinding { env_name, kind });
    }

    /// Remove the binding of `key`, returning it.
    pub fn unbind_env(&mut self, key: &str) -> Option<EnvBinding> {
        self.bindings.remove(key)
    }

    pub fn bindings(&self) -> &BTreeMap<String, EnvBinding> {
        &self.bindings
    }

    /// Provide a value for `env_name` that shadows the environment source.
    pub fn set_env_override(&mut self, env_name: impl Into<String>, value: impl Into<String>) {
        self.env_overrides.insert(env_name.into(), value.into());
    }

    pub fn env_override(&self, env_name: &str) -> Option<&str> {
        self.env_overrides.get(env_name).map(String::as_str)
    }

    pub fn clear_env_overrides(&mut self) {
        self.env_overrides.clear();
    }

    /// Current value of a variable as seen by bindings.
    pub fn lookup_env(&self, env_name: &str) -> Option<String> {
        self.env_override(env_name)
            .map(str::to_string)
            .or_else(|| self.env.var(env_name))
            .filter(|value| self.allow_empty_env || !value.is_empty())
    }

    /// Effective value of a dotted key across all layers.
    pub fn get(&self, key: &str) -> Option<Value> {
        get_dotted(&self.all_settings(), key).cloned()
    }

    /// All layers merged into one settings tree.
    pub fn all_settings(&self) -> Value {
        let mut settings = self.defaults.clone();
        if let Some(config) = &self.config {
            settings = deep_merge(settings, config.clone());
        }
        for (key, binding) in &self.bindings {
            if let Some(raw) = self.lookup_env(&binding.env_name) {
                insert_dotted(&mut settings, key, binding.materialize(raw));
            }
        }
        settings
    }

    /// Decode all settings into `T`.
    pub fn unmarshal<T>(&self, decoder: &Decoder) -> Result<T, DecodeError>
    where
        T: Configurable + DeserializeOwned,
    {
        decoder.decode(self.all_settings(), &T::schema())
    }
}
