use thiserror::Error;

/// A failure reported by a [`FlagBackend`](super::FlagBackend).
///
/// Returned unchanged from [`Flags::evaluate`](super::Flags::evaluate) and
/// never cached: the next evaluation of the same flag queries again.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("flag backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

/// Errors raised by preloading and scope management.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag evaluation failed: {0}")]
    Evaluation(#[from] BackendError),

    #[error("failed to enumerate known flags: {0}")]
    Enumeration(#[source] BackendError),

    /// A scope guard was entered on a handle that already has an active one.
    #[error("a flag memoization scope is already active for this request")]
    ScopeReentry,

    #[error("preloading requires memoization to be enabled")]
    NotMemoizing,

    /// The request context carries no [`Flags`](super::Flags) handle.
    #[error("no flags handle installed on the request context")]
    MissingFlags,
}
