//! Error types for tree commands.

use std::error::Error as StdError;

use thiserror::Error;

/// Result alias for fallible tree and controller commands.
pub type TreeResult<T> = Result<T, TreeError>;

/// Failure reported by a [`ChildrenGetter`](crate::ChildrenGetter).
#[derive(Error, Debug)]
#[error("{message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl FetchError {
    /// Creates an error with a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error (I/O, database, ...) with a message.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O error while fetching children", err)
    }
}

/// Errors surfaced by tree commands.
///
/// Commands that find nothing to do (unknown model, already expanded, empty list) are not
/// errors; they return `None` or `false`.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Whole-list filters cannot be applied to a hierarchical view.
    #[error("tree list views do not support whole-list filters")]
    ListFilterUnsupported,

    /// The children getter failed; the branch was left without cached children.
    #[error("failed to fetch children: {0}")]
    ChildrenFetch(#[from] FetchError),
}
