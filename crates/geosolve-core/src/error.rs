use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the feature graph, the model chain, and project persistence.
#[derive(Debug, Error)]
pub enum GeosolveError {
    /// Bad invocation: unknown command, unusable option value.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A project or data file could not be read or written.
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A stage was asked to run with unmet prerequisites.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A persisted document has the wrong shape.
    #[error("malformed project document: {0}")]
    Schema(String),
    /// The solver did not converge or produced unusable values.
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("invalid edge ({i}, {j}): {reason}")]
    InvalidEdge {
        i: usize,
        j: usize,
        reason: &'static str,
    },
    #[error("model has no solution yet")]
    NotSolved,
    #[error("{accessor} is not available on {model} models")]
    NotApplicable {
        accessor: &'static str,
        model: &'static str,
    },
    /// The external feature matcher failed on an edge.
    #[error("feature matching failed for edge ({a}, {b}): {message}")]
    Matcher { a: usize, b: usize, message: String },
}

impl GeosolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }
}

pub type Result<T, E = GeosolveError> = std::result::Result<T, E>;
