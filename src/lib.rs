//! Environment variable overlay for typed configuration.
//!
//! Settings are layered in a [`ConfigStore`] (defaults, a base file, the
//! environment) and decoded into a type that describes itself through
//! [`Configurable`]. [`EnvOverlay`] derives one environment variable name per
//! schema path and binds it before decoding, so `server.tls.cert` can be
//! overridden by `APP_SERVER_TLS_CERT` without registering anything by hand.
//! Sequences can also be supplied one element per variable (`APP_HOSTS_1`,
//! `APP_HOSTS_2`, ...).

pub mod cast;
pub mod decode;
pub mod env;
pub mod error;
pub mod merge;
pub mod overlay;
pub mod path;
pub mod schema;
pub mod source;
pub mod store;
pub mod walker;

pub use decode::{DecodeHook, Decoder, SequenceJsonHook, StringToSequenceHook};
pub use env::{EnvKeyResolver, EnvSource, KeyReplacer, MapEnv, ProcessEnv};
pub use error::{DecodeError, OverlayError, OverlayResult, SourceError};
pub use overlay::{EnvOverlay, OverlayState};
pub use path::PathKey;
pub use schema::{Configurable, Field, SchemaNode};
pub use source::{ConfigFormat, ConfigSource, FileSource, LayeredSource, ValueSource};
pub use store::ConfigStore;
