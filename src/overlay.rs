//! Environment overlay onto a typed configuration.
//!
//! [`EnvOverlay`] decodes a [`ConfigStore`] into a [`Configurable`] type
//! after binding every position of the type's schema to an environment
//! variable. Only the variable names derived from the schema are consulted,
//! so no per-field binding code is needed:
//!
//! ```no_run
//! use env_overlay::{ConfigStore, EnvOverlay, FileSource};
//! # use env_overlay::schema::{Configurable, Field, SchemaNode};
//! # #[derive(serde::Serialize, serde::Deserialize)]
//! # struct Settings { port: u16 }
//! # impl Configurable for Settings {
//! #     fn schema() -> SchemaNode { SchemaNode::structure([Field::of::<u16>("port")]) }
//! # }
//!
//! let store = ConfigStore::new()
//!     .with_source(FileSource::new("config.yaml"))
//!     .with_env_prefix("app");
//! // APP_PORT=9000 wins over `port` in config.yaml
//! let settings: Settings = EnvOverlay::new(store).unmarshal()?;
//! # Ok::<(), env_overlay::OverlayError>(())
//! ```
//!
//! A run goes through these steps:
//! 1. load the base source (a missing source is fine, a broken one is not)
//! 2. decode once to learn the runtime shape (errors are discarded)
//! 3. walk the schema and bind each path to its variable
//! 4. decode again; this result (or error) is returned

use crate::cast::{CastPolicy, collect_suffixed, synthesize};
use crate::decode::{Decoder, SequenceJsonHook};
use crate::env::EnvKeyResolver;
use crate::error::{DecodeError, OverlayResult, SourceError};
use crate::merge::deep_merge;
use crate::path::PathKey;
use crate::schema::{Configurable, DEFAULT_TAG_NAME, SchemaNode};
use crate::store::{BindingKind, ConfigStore, EnvBinding};
use crate::walker::{SchemaWalker, Visitor};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tracing::{debug, trace};

/// Progress of the current (or last) overlay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Init,
    /// Base source loaded and decoded once.
    BaseDecoded,
    /// No base source was found; defaults and env only.
    BaseMissing,
    EnvBound,
    FinalDecoded,
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OverlayState::Init => "init",
            OverlayState::BaseDecoded => "base_decoded",
            OverlayState::BaseMissing => "base_missing",
            OverlayState::EnvBound => "env_bound",
            OverlayState::FinalDecoded => "final_decoded",
        };
        f.write_str(name)
    }
}

/// Decodes a store into a typed value with environment overrides applied.
///
/// Bindings created by a run are removed at the start of the next one, and
/// any binding they replaced is put back, so every run starts from the
/// bindings the caller registered.
#[derive(Debug, Clone)]
pub struct EnvOverlay {
    store: ConfigStore,
    tag_name: Option<String>,
    state: OverlayState,
    /// Keys bound by the last run, with the binding each one replaced.
    run_bindings: Vec<(String, Option<EnvBinding>)>,
}

impl EnvOverlay {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            tag_name: None,
            state: OverlayState::Init,
            run_bindings: Vec::new(),
        }
    }

    /// Tag namespace used for field keys. Empty selects the default.
    pub fn with_tag_name(mut self, tag_name: impl Into<String>) -> Self {
        let tag_name = tag_name.into();
        self.tag_name = (!tag_name.is_empty()).then_some(tag_name);
        self
    }

    pub fn tag_name(&self) -> &str {
        self.tag_name.as_deref().unwrap_or(DEFAULT_TAG_NAME)
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    pub fn into_store(self) -> ConfigStore {
        self.store
    }

    /// Decode the store into a new `T`.
    pub fn unmarshal<T>(&mut self) -> OverlayResult<T>
    where
        T: Configurable + Serialize + DeserializeOwned,
    {
        self.run(None, Decoder::new())
    }

    /// Like [`unmarshal`](Self::unmarshal) with extra decoder options. The
    /// sequence hook and the overlay's tag namespace are always added.
    pub fn unmarshal_with<T>(&mut self, decoder: Decoder) -> OverlayResult<T>
    where
        T: Configurable + Serialize + DeserializeOwned,
    {
        self.run(None, decoder)
    }

    /// Decode onto an existing value. Fields no layer sets keep their
    /// current values.
    pub fn unmarshal_into<T>(&mut self, target: &mut T) -> OverlayResult<()>
    where
        T: Configurable + Serialize + DeserializeOwned,
    {
        let seed = serde_json::to_value(&*target).map_err(DecodeError::from)?;
        *target = self.run(Some(seed), Decoder::new())?;
        Ok(())
    }

    fn run<T>(&mut self, seed: Option<Value>, decoder: Decoder) -> OverlayResult<T>
    where
        T: Configurable + Serialize + DeserializeOwned,
    {
        self.state = OverlayState::Init;
        self.reset_bindings();
        let decoder = decoder
            .with_hook(SequenceJsonHook)
            .with_tag_name(self.tag_name());
        let schema = T::schema();
        debug!(tag_name = decoder.tag_name(), hooks = decoder.hook_count(), "Starting overlay run");

        match self.store.read_in_config() {
            Ok(()) => {}
            Err(err @ SourceError::NotFound { .. }) => {
                debug!(error = %err, "No base config, continuing with defaults");
            }
            Err(err) => return Err(err.into()),
        }

        let raw = self.settings(seed.as_ref());
        let shape = match decoder.decode::<T>(raw.clone(), &schema) {
            Ok(decoded) => {
                let decoded = serde_json::to_value(&decoded).unwrap_or(Value::Null);
                deep_merge(decoded, raw)
            }
            Err(err) => {
                debug!(error = %err, "Initial decode failed, walking raw settings");
                raw
            }
        };
        let base = if self.store.has_config() {
            OverlayState::BaseDecoded
        } else {
            OverlayState::BaseMissing
        };
        self.transition(base);

        self.store.clear_env_overrides();
        let resolver = self.store.env_key_resolver();
        let mut binder = EnvBinder {
            store: &mut self.store,
            resolver,
            bound: Vec::new(),
        };
        SchemaWalker::new(decoder.tag_name()).walk(&schema, Some(&shape), &mut binder);
        self.run_bindings = binder.bound;
        debug!(bound = self.run_bindings.len(), "Bound config paths to environment");
        self.transition(OverlayState::EnvBound);

        let value = decoder.decode(self.settings(seed.as_ref()), &schema)?;
        self.transition(OverlayState::FinalDecoded);
        Ok(value)
    }

    fn reset_bindings(&mut self) {
        for (key, replaced) in std::mem::take(&mut self.run_bindings) {
            self.store.unbind_env(&key);
            match replaced {
                Some(EnvBinding {
                    env_name,
                    kind: BindingKind::Scalar,
                }) => self.store.bind_env(&key, env_name),
                Some(EnvBinding {
                    env_name,
                    kind: BindingKind::List,
                }) => self.store.bind_env_list(&key, env_name),
                None => {}
            }
        }
    }

    fn settings(&self, seed: Option<&Value>) -> Value {
        let settings = self.store.all_settings();
        match seed {
            Some(seed) => deep_merge(seed.clone(), settings),
            None => settings,
        }
    }

    fn transition(&mut self, next: OverlayState) {
        debug!(from = %self.state, to = %next, "Overlay state");
        self.state = next;
    }
}

/// Binds every visited path to its environment variable.
struct EnvBinder<'a> {
    store: &'a mut ConfigStore,
    resolver: EnvKeyResolver,
    bound: Vec<(String, Option<EnvBinding>)>,
}

impl EnvBinder<'_> {
    fn record(&mut self, key: &str) {
        let replaced = self.store.bindings().get(key).cloned();
        self.bound.push((key.to_string(), replaced));
    }
}

impl Visitor for EnvBinder<'_> {
    fn visit_leaf(&mut self, path: &PathKey, node: &SchemaNode) {
        let key = path.render();
        let env_name = self.resolver.resolve(path);
        trace!(key = %key, env = %env_name, kind = node.kind_name(), "Binding leaf");
        self.record(&key);
        self.store.bind_env(&key, env_name);
    }

    fn visit_sequence(&mut self, path: &PathKey, element: &SchemaNode) {
        let key = path.render();
        let env_name = self.resolver.resolve(path);
        let policy = CastPolicy::for_element(element);

        let values = collect_suffixed(self.store.env(), &env_name);
        let synthesized = synthesize(policy, &values);

        self.record(&key);
        match policy {
            CastPolicy::Native => self.store.bind_env_list(&key, env_name.as_str()),
            CastPolicy::Structured => self.store.bind_env(&key, env_name.as_str()),
        }
        if let Some(encoded) = synthesized {
            debug!(
                key = %key,
                env = %env_name,
                count = values.len(),
                ?policy,
                "Synthesized sequence from indexed variables"
            );
            self.store.set_env_override(env_name, encoded);
        } else {
            trace!(key = %key, env = %env_name, "Binding sequence");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;
    use crate::error::OverlayError;
    use crate::schema::Field;
    use crate::source::ValueSource;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Upstream {
        host: String,
        port: u16,
    }

    impl Configurable for Upstream {
        fn schema() -> SchemaNode {
            SchemaNode::structure([Field::of::<String>("host"), Field::of::<u16>("port")])
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        upstreams: Vec<Upstream>,
    }

    impl Configurable for Settings {
        fn schema() -> SchemaNode {
            SchemaNode::structure([
                Field::of::<String>("name"),
                Field::of::<Vec<String>>("tags"),
                Field::of::<Vec<Upstream>>("upstreams"),
            ])
        }
    }

    fn overlay(config: Value, env: MapEnv) -> EnvOverlay {
        EnvOverlay::new(
            ConfigStore::new()
                .with_source(ValueSource(config))
                .with_env(env),
        )
    }

    #[test]
    fn test_leaf_binding_overrides_base() {
        let mut overlay = overlay(json!({"name": "file"}), MapEnv::from([("NAME", "env")]));
        let settings: Settings = overlay.unmarshal().unwrap();
        assert_eq!(settings.name, "env");
        assert_eq!(overlay.state(), OverlayState::FinalDecoded);
        assert!(overlay.store().bindings().contains_key("name"));
    }

    #[test]
    fn test_native_sequence_from_indexed_vars() {
        let mut overlay = overlay(
            json!({"name": "x", "tags": ["file"]}),
            MapEnv::from([("TAGS_2", "bar"), ("TAGS_1", "foo")]),
        );
        let settings: Settings = overlay.unmarshal().unwrap();
        assert_eq!(settings.tags, ["foo", "bar"]);
        assert_eq!(overlay.store().env_override("TAGS"), Some("foo bar"));
    }

    #[test]
    fn test_structured_sequence_from_indexed_vars() {
        let mut overlay = overlay(
            json!({"name": "x"}),
            MapEnv::from([
                ("UPSTREAMS_0", r#"{"host": "a", "port": "81"}"#),
                ("UPSTREAMS_1", r#"{"host": "b", "port": 82}"#),
            ]),
        );
        let settings: Settings = overlay.unmarshal().unwrap();
        assert_eq!(
            settings.upstreams,
            [
                Upstream { host: "a".into(), port: 81 },
                Upstream { host: "b".into(), port: 82 },
            ]
        );
    }

    #[test]
    fn test_no_indexed_vars_keeps_base_sequence() {
        let mut overlay = overlay(json!({"name": "x", "tags": ["file"]}), MapEnv::new());
        let settings: Settings = overlay.unmarshal().unwrap();
        assert_eq!(settings.tags, ["file"]);
        assert_eq!(overlay.store().env_override("TAGS"), None);
    }

    #[test]
    fn test_missing_base_is_tolerated() {
        let mut overlay = EnvOverlay::new(
            ConfigStore::new().with_env(MapEnv::from([("NAME", "only-env")])),
        );
        let settings: Settings = overlay.unmarshal().unwrap();
        assert_eq!(settings.name, "only-env");
        assert!(!overlay.store().has_config());
    }

    #[test]
    fn test_final_decode_error_is_returned() {
        let mut overlay = overlay(
            json!({"name": "x"}),
            MapEnv::from([("UPSTREAMS_0", r#"{"host": "a", "port": "high"}"#)]),
        );
        let err = overlay.unmarshal::<Settings>().unwrap_err();
        assert!(matches!(err, OverlayError::Decode(_)));
        assert_eq!(overlay.state(), OverlayState::EnvBound);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Port {
        port: u16,
    }

    impl Configurable for Port {
        fn schema() -> SchemaNode {
            SchemaNode::structure([Field::of::<u16>("port")])
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Named {
        name: String,
    }

    impl Configurable for Named {
        fn schema() -> SchemaNode {
            SchemaNode::structure([Field::of::<String>("name")])
        }
    }

    #[test]
    fn test_reused_overlay_drops_previous_run_bindings() {
        let env = MapEnv::from([("PORT", "80"), ("NAME", "n")]);
        let mut overlay = EnvOverlay::new(ConfigStore::new().with_env(env));

        let port: Port = overlay.unmarshal().unwrap();
        assert_eq!(port.port, 80);

        let named: Named = overlay.unmarshal().unwrap();
        assert_eq!(named.name, "n");
        assert_eq!(
            overlay.store().bindings().keys().collect::<Vec<_>>(),
            ["name"]
        );
    }

    #[test]
    fn test_caller_binding_survives_runs() {
        let env = MapEnv::from([("CUSTOM_NAME", "custom"), ("NAME", "derived")]);
        let mut store = ConfigStore::new().with_env(env);
        store.bind_env("name", "CUSTOM_NAME");
        let mut overlay = EnvOverlay::new(store);

        let named: Named = overlay.unmarshal().unwrap();
        assert_eq!(named.name, "derived");

        // PORT is unset, so this run fails after binding
        assert!(overlay.unmarshal::<Port>().is_err());
        let binding = &overlay.store().bindings()["name"];
        assert_eq!(binding.env_name, "CUSTOM_NAME");
        assert_eq!(binding.kind, BindingKind::Scalar);
    }

    #[test]
    fn test_tag_name_defaults() {
        let overlay = EnvOverlay::new(ConfigStore::new());
        assert_eq!(overlay.tag_name(), DEFAULT_TAG_NAME);
        assert_eq!(overlay.clone().with_tag_name("").tag_name(), DEFAULT_TAG_NAME);
        assert_eq!(overlay.with_tag_name("env").tag_name(), "env");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(OverlayState::BaseMissing.to_string(), "base_missing");
        assert_eq!(OverlayState::FinalDecoded.to_string(), "final_decoded");
    }
}
