use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PosError {
    #[error("Validation error on `{field}`: {message}")]
    ValidationError { field: String, message: String },
    #[error("Authorization error: {0}")]
    AuthorizationError(String),
    #[error("Transient error: {0}")]
    TransientError(String),
    #[error("Integrity check failed for offline transaction {0}")]
    IntegrityError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Checkout cancelled before the ledger write")]
    Cancelled,
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, PosError>;

impl PosError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError { .. } | Self::CsvError(_) => ErrorKind::Validation,
            Self::AuthorizationError(_) => ErrorKind::Authorization,
            Self::TransientError(_) | Self::IoError(_) => ErrorKind::Transient,
            Self::IntegrityError(_) => ErrorKind::Integrity,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound(_) => ErrorKind::NotFound,
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDBError(_) => ErrorKind::Transient,
            Self::SerializationError(_) | Self::ConfigError(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only transient infrastructure failures are eligible for the orchestrator's retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ValidationError { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    Transient,
    Integrity,
    NotFound,
    Cancelled,
    Internal,
}

/// Caller-facing form of a [`PosError`].
///
/// Every failure that leaves the orchestrator is reduced to this shape so no
/// transport-level fault reaches the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub field: Option<String>,
    pub retryable: bool,
    /// Index of the payment line that failed, when a line is to blame.
    pub payment_line: Option<usize>,
    pub approval_id: Option<String>,
}

impl ErrorDetail {
    pub fn for_line(mut self, index: usize) -> Self {
        self.payment_line = Some(index);
        self
    }

    pub fn for_approval(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }
}

impl From<&PosError> for ErrorDetail {
    fn from(err: &PosError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            field: err.field().map(str::to_string),
            retryable: err.is_retryable(),
            payment_line: None,
            approval_id: None,
        }
    }
}

impl From<PosError> for ErrorDetail {
    fn from(err: PosError) -> Self {
        Self::from(&err)
    }
}
