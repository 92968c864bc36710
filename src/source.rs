//! Base configuration sources.
//!
//! A source produces the settings tree that environment variables are laid
//! over. A missing source is reported as [`SourceError::NotFound`] so callers
//! can fall back to defaults; any other failure is fatal.

use crate::error::SourceError;
use crate::merge::deep_merge_all;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Something that can produce a base settings tree.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Value, SourceError>;
}

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Extensions tried when searching, in priority order.
    pub const SEARCH_EXTENSIONS: [&'static str; 3] = ["yaml", "yml", "json"];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Json => "JSON",
        }
    }

    /// Parse `content` into a settings tree. The root must be a mapping; an
    /// empty document yields an empty mapping.
    pub fn parse(self, content: &str, path: &Path) -> Result<Value, SourceError> {
        let parsed = match self {
            ConfigFormat::Yaml => serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str::<Value>(content).map_err(|e| e.to_string()),
        };

        match parsed {
            Ok(Value::Null) => Ok(Value::Object(Map::new())),
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => Err(SourceError::Parse {
                path: path.to_path_buf(),
                format: self.name(),
                message: "top-level value must be a mapping".to_string(),
            }),
            Err(message) => Err(SourceError::Parse {
                path: path.to_path_buf(),
                format: self.name(),
                message,
            }),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A configuration file, either at an explicit path or found by name in a
/// list of directories (first found wins).
#[derive(Debug, Clone)]
pub struct FileSource {
    candidates: Vec<PathBuf>,
    format: Option<ConfigFormat>,
}

impl FileSource {
    /// A file at an explicit path; the format follows the extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            candidates: vec![path.into()],
            format: None,
        }
    }

    /// Look for `name.yaml`, `name.yml` or `name.json` in each directory, in
    /// the order given.
    pub fn search<I, P>(name: &str, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let candidates = dirs
            .into_iter()
            .map(Into::into)
            .flat_map(|dir: PathBuf| {
                ConfigFormat::SEARCH_EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{name}.{ext}")))
            })
            .collect();
        Self {
            candidates,
            format: None,
        }
    }

    /// Search the usual places for `name`: the working directory,
    /// `~/.{name}/` and the platform config directory (`~/.config/{name}/`
    /// on Linux).
    pub fn discover(name: &str) -> Self {
        let mut dirs = vec![PathBuf::from(".")];
        dirs.extend(dirs::home_dir().map(|home| home.join(format!(".{name}"))));
        dirs.extend(dirs::config_dir().map(|config| config.join(name)));
        Self::search(name, dirs)
    }

    /// Force a format regardless of extension.
    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    fn read(&self, path: &Path) -> Result<Value, SourceError> {
        let format = self
            .format
            .or_else(|| ConfigFormat::from_path(path))
            .ok_or_else(|| SourceError::UnsupportedFormat {
                path: path.to_path_buf(),
            })?;

        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), format = %format, "Loaded base config file");
        format.parse(&content, path)
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<Value, SourceError> {
        match self.candidates.iter().find(|path| path.is_file()) {
            Some(path) => self.read(path),
            None => Err(SourceError::NotFound {
                searched: self.candidates.clone(),
            }),
        }
    }
}

/// Several sources merged field by field, lowest priority first.
///
/// Missing sources are skipped; only when every source is missing does the
/// result report [`SourceError::NotFound`] (listing all searched paths).
#[derive(Debug, Clone, Default)]
pub struct LayeredSource {
    layers: Vec<Arc<dyn ConfigSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer above the ones added so far.
    pub fn with_layer(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Arc::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for LayeredSource {
    fn load(&self) -> Result<Value, SourceError> {
        let mut loaded = Vec::with_capacity(self.layers.len());
        let mut searched = Vec::new();
        for layer in &self.layers {
            match layer.load() {
                Ok(value) => loaded.push(value),
                Err(SourceError::NotFound { searched: paths }) => searched.extend(paths),
                Err(err) => return Err(err),
            }
        }
        if loaded.is_empty() {
            return Err(SourceError::NotFound { searched });
        }
        debug!(layers = loaded.len(), "Merged config layers");
        Ok(deep_merge_all(loaded))
    }
}

/// An in-memory settings tree, e.g. embedded defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSource(pub Value);

impl ConfigSource for ValueSource {
    fn load(&self) -> Result<Value, SourceError> {
        match &self.0 {
            Value::Null => Ok(Value::Object(Map::new())),
            value => Ok(value.clone()),
        }
    }
}
