//! Error type shared by every store operation.

use crate::snapshot::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("card id already exists: {0}")]
    DuplicateId(String),

    #[error("link endpoint not found: {0}")]
    MissingEndpoint(String),

    #[error("card cannot link to itself: {0}")]
    SelfLink(String),

    #[error("link already exists: {from} -> {to} ({link_type})")]
    DuplicateLink {
        from: String,
        to: String,
        link_type: String,
    },

    #[error("deck name is reserved for smart decks: {0}")]
    ReservedDeck(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("AI capability failed: {0}")]
    Ai(String),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("search index error: {0}")]
    Search(#[from] tantivy::TantivyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Structural violations that reject an operation without changing state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId(_)
                | Self::MissingEndpoint(_)
                | Self::SelfLink(_)
                | Self::DuplicateLink { .. }
                | Self::ReservedDeck(_)
                | Self::Invalid(_)
        )
    }
}
