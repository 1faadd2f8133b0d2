use thiserror::Error;

/// Errors produced while interpreting stored documents.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A stored document did not match the expected shape.
    #[error("Malformed {0} document: {1}")]
    Malformed(&'static str, String),
}
