use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("schema error at {path}: {message}")]
    Schema { path: String, message: String },
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    pub(crate) fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Schema { path: path.into(), message: message.into() }
    }

    /// True for errors that mean the input could not be parsed at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, LoadError::MalformedDocument(_) | LoadError::Io { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unresolved reference '{name}'")]
    UnresolvedReference { name: String },
}
