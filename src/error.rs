use thiserror::Error;

pub type Result<T> = std::result::Result<T, CarpoolError>;

#[derive(Error, Debug)]
pub enum CarpoolError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Store error: {0}")]
    TransientStore(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CarpoolError {
    fn from(err: rocksdb::Error) -> Self {
        CarpoolError::TransientStore(Box::new(err))
    }
}

impl From<serde_json::Error> for CarpoolError {
    fn from(err: serde_json::Error) -> Self {
        CarpoolError::TransientStore(Box::new(err))
    }
}

/// Stable classification of a [`CarpoolError`], independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    Authorization,
    Validation,
    TransientStore,
    Input,
}

impl ErrorKind {
    /// The HTTP status an API layer should surface for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InvalidState | ErrorKind::Validation | ErrorKind::Input => 400,
            ErrorKind::Authorization => 403,
            ErrorKind::TransientStore => 500,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientStore)
    }
}

impl CarpoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CarpoolError::NotFound(_) => ErrorKind::NotFound,
            CarpoolError::Conflict(_) => ErrorKind::Conflict,
            CarpoolError::InvalidState(_) => ErrorKind::InvalidState,
            CarpoolError::Authorization(_) => ErrorKind::Authorization,
            CarpoolError::Validation(_) => ErrorKind::Validation,
            CarpoolError::TransientStore(_) => ErrorKind::TransientStore,
            CarpoolError::Csv(_) | CarpoolError::Io(_) => ErrorKind::Input,
        }
    }

    pub fn store<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        CarpoolError::TransientStore(err.into())
    }
}
