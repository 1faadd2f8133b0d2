use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing store cannot be reached.  Transient; callers decide
    /// whether to retry or degrade.
    #[error("Store unreachable: {0}")]
    Unavailable(String),

    /// Any other backend failure (adapter implementations map their native
    /// errors here).
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
