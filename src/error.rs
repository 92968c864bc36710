//! Error types for loading, decoding and overlaying configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to load the base configuration source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No configuration file exists at any of the searched locations.
    ///
    /// The overlay treats this as "start from defaults".
    #[error("config file not found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but its content is not valid for its format.
    #[error("failed to parse {format} config file {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    /// The file extension does not map to a known format.
    #[error("unsupported config format for {path}")]
    UnsupportedFormat { path: PathBuf },
}

impl SourceError {
    /// Whether this error only means that no source exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound { .. })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to decode store settings into a typed value.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A raw value could not be coerced into the scalar type at `path`.
    #[error("invalid value at '{path}': expected {expected}, found {found}")]
    InvalidValue {
        path: String,
        expected: &'static str,
        found: String,
    },

    /// A decode hook rejected its input.
    #[error("decode hook failed at '{path}': {message}")]
    Hook { path: String, message: String },

    /// The coerced value did not match the target type.
    #[error("failed to deserialize config: {0}")]
    Deserialize(#[from] serde_json::Error),
}

impl DecodeError {
    pub(crate) fn invalid(path: &str, expected: &'static str, found: impl Into<String>) -> Self {
        DecodeError::InvalidValue {
            path: display_key(path),
            expected,
            found: found.into(),
        }
    }
}

fn display_key(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

/// Failure of a whole overlay run.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The base source exists but could not be loaded.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The final decode rejected the merged settings.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result type for overlay operations.
pub type OverlayResult<T> = std::result::Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_searched_paths() {
        let err = SourceError::NotFound {
            searched: vec![PathBuf::from("a/config.yaml"), PathBuf::from("b/config.json")],
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "config file not found (searched: a/config.yaml, b/config.json)"
        );
    }

    #[test]
    fn test_invalid_value_names_root() {
        let err = DecodeError::invalid("", "integer", "\"abc\"");
        assert_eq!(
            err.to_string(),
            "invalid value at '<root>': expected integer, found \"abc\""
        );
    }

    #[test]
    fn test_overlay_error_is_transparent() {
        let err: OverlayError = DecodeError::invalid("server.port", "unsigned integer", "-1").into();
        assert_eq!(
            err.to_string(),
            "invalid value at 'server.port': expected unsigned integer, found -1"
        );
        assert!(matches!(err, OverlayError::Decode(_)));
    }
}
