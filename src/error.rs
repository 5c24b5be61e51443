//! Failure modes of answering one inline query.

use thiserror::Error;

use crate::compose::ComposeError;

/// Why a note could not be rendered. None of these are fatal: the request is
/// dropped without a reply and the error is logged at the level given by
/// [`LookupError::is_expected`].
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("input is not a note reference: {0:?}")]
    InvalidReference(String),
    #[error("event {0} not found on any reachable relay")]
    EventNotFound(String),
    #[error("no metadata found for author {0}")]
    AuthorNotFound(String),
    #[error("malformed metadata for author {pubkey}: {source}")]
    MalformedMetadata {
        pubkey: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render note: {0}")]
    Rendering(#[from] ComposeError),
}

impl LookupError {
    /// Errors caused by user input or missing data rather than a fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::InvalidReference(_) | Self::EventNotFound(_))
    }
}
