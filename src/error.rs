use miette::Diagnostic;
use thiserror::Error;

/// Coarse classification used by callers to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    InvalidState,
    NotFound,
    Forbidden,
    Upstream,
    Internal,
}

#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(orderflow::validation))]
    ValidationError(String),

    #[error("Out of stock: {0}")]
    #[diagnostic(code(orderflow::out_of_stock))]
    OutOfStock(String),

    #[error("Conflict: {0}")]
    #[diagnostic(code(orderflow::conflict))]
    Conflict(String),

    #[error("Invalid state: {0}")]
    #[diagnostic(code(orderflow::invalid_state))]
    InvalidState(String),

    #[error("{0} not found")]
    #[diagnostic(code(orderflow::not_found))]
    NotFound(String),

    #[error("Forbidden")]
    #[diagnostic(code(orderflow::forbidden))]
    Forbidden,

    #[error("Upstream failure: {0}")]
    #[diagnostic(code(orderflow::upstream))]
    Upstream(#[from] GatewayError),

    #[error("CSV error: {0}")]
    #[diagnostic(code(orderflow::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(orderflow::io))]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(orderflow::serialization))]
    SerializationError(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    #[diagnostic(code(orderflow::storage))]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Storage error: {0}")]
    #[diagnostic(code(orderflow::storage))]
    StorageError(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(orderflow::config), help("check the environment or .env file"))]
    ConfigError(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError(_) | Self::OutOfStock(_) => ErrorCategory::Validation,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::InvalidState(_) => ErrorCategory::InvalidState,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Forbidden => ErrorCategory::Forbidden,
            Self::Upstream(_) => ErrorCategory::Upstream,
            _ => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures talking to the payment or shipment provider.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Failures delivering an email.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("mail delivery rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            EngineError::OutOfStock("Mate".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            EngineError::Upstream(GatewayError::NotConfigured("MP_ACCESS_TOKEN".into())).category(),
            ErrorCategory::Upstream
        );
        assert_eq!(
            EngineError::StorageError("boom".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = EngineError::NotFound("Order o-1".into());
        assert_eq!(err.to_string(), "Order o-1 not found");
    }
}
