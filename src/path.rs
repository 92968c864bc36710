//! Dotted paths into a configuration tree.

use std::fmt;

/// Separator used when rendering a [`PathKey`] as a store key.
pub const KEY_DELIMITER: &str = ".";

/// Ordered segments identifying one location in the configuration tree.
///
/// Rendered with [`KEY_DELIMITER`] it becomes the store key; the env key
/// resolver derives the variable name from the same rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(Vec<String>);

impl PathKey {
    /// The empty path (tree root).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Dotted store key, e.g. `server.tls.cert`.
    pub fn render(&self) -> String {
        self.0.join(KEY_DELIMITER)
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl<S: Into<String>> FromIterator<S> for PathKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
