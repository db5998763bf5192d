use thiserror::Error;

/// Errors surfaced while building or restoring a startup blob.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Compilation or execution error, with the exception message
    #[error("script error: {0}")]
    Script(String),

    #[error("failed to allocate V8 string")]
    StringAllocation,

    #[error("failed to create native function `{0}`")]
    FunctionCreation(String),

    #[error("no external reference registered at index {0}")]
    UnknownExternalReference(usize),

    /// The restore-side table doesn't have the size the blob was created with
    #[error("external reference table has {actual} entries, blob expects {expected}")]
    ExternalReferenceMismatch { expected: usize, actual: usize },

    #[error("V8 did not produce a startup blob")]
    BlobCreation,

    #[error("no context at snapshot index {0}")]
    ContextNotFound(usize),

    #[error("no snapshot data at index {0}")]
    MissingData(usize),

    #[error("unsupported snapshot value: {0}")]
    UnsupportedValue(String),

    #[error("native field error: {0}")]
    NativeField(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
