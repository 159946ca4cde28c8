//! The single public umbrella error type the CLI converts into a non-zero exit code.

/// A [`std::result::Result`] that has [`ArzipError`] as the error variant.
pub type ArzipResult<T> = std::result::Result<T, ArzipError>;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ArzipError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input not found: {0}")]
    InputNotFound(String),

    #[error("no inputs matched wildcard: {0}")]
    NoInputsForWildcard(String),

    #[error("invalid sort_by value: {0:?}")]
    InvalidSortBy(String),

    #[error("could not determine concatenation dimension {dim:?}")]
    MissingConcatDim { dim: String },

    #[error("could not parse a timestamp from {0:?}")]
    UnparsableTimestamp(String),

    #[error("invalid chunk size for variable {var:?}, dim {dim:?}: {detail}")]
    InvalidChunkSize {
        var: String,
        dim: String,
        detail: String,
    },

    #[error("append dimension {dim:?} is not the first dimension of variable {var:?}")]
    AppendDimNotFirst { var: String, dim: String },

    #[error("overwrite and append cannot both be set")]
    OverwriteAndAppend,

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("append order violation: {0}")]
    AppendOrderViolation(String),

    #[error("custom hook error: {0}")]
    CustomHookError(String),

    #[error("batch job submission failed: {0}")]
    JobSubmissionFailed(String),

    #[error("store I/O error (retryable): {0}")]
    StoreIoError(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ArzipError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if this error kind should be retried by the writer's retry loop (spec §7:
    /// "Retryable `StoreIOError` is retried inside the writer up to the configured limit;
    /// all others propagate immediately").
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArzipError::StoreIoError(_) | ArzipError::ObjectStore(_))
    }
}
