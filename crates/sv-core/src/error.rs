use thiserror::Error;

pub type SvResult<T> = Result<T, SvError>;

#[derive(Debug, Error)]
pub enum SvError {
    #[error("backend {0} is not authenticated")]
    NotAuthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Network hiccups, 5xx, rate limits. The only retryable class.
    #[error("transient error on backend {backend}: {message}")]
    BackendTransient { backend: String, message: String },

    /// 4xx / permission problems. The backend is skipped for the operation.
    #[error("backend {backend} failed: {message}")]
    BackendFatal { backend: String, message: String },

    #[error("corrupted data: {0}")]
    Corruption(String),

    #[error("not enough shares to reconstruct: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("password incorrect")]
    BadPassword,

    #[error("key exchange incomplete for shared session {0}")]
    HandshakeIncomplete(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    /// The account lacks the role the operation needs, e.g. deleting a
    /// shared session it does not own.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported by backend {backend}: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SvError {
    pub fn transient(backend: impl Into<String>, message: impl ToString) -> Self {
        SvError::BackendTransient {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub fn fatal(backend: impl Into<String>, message: impl ToString) -> Self {
        SvError::BackendFatal {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        SvError::Unsupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    ///
    /// The core itself never retries; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SvError::BackendTransient { .. })
    }

    /// Missing objects are expected while reconciling the path cache.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SvError::NotFound(_))
    }
}
