use thiserror::Error;

/// Errors surfaced by the data store. An update applied to a missing id is
/// logged at DEBUG and skipped rather than raised here (drift between the
/// store and a late-arriving delta resolves itself on the next full
/// re-walk) — this enum covers the failures that are not recoverable
/// in-place.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to merge delta: {0}")]
    Merge(String),

    #[error("unknown definition id: {0}")]
    UnknownDefinition(String),

    #[error("unknown proxy id: {0}")]
    UnknownProxy(String),

    #[error("identifier error: {0}")]
    Id(#[from] flow_ids::TokensError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
