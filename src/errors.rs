//! The public error type. Every engine operation returns one of four kinds
//! which map one-to-one onto the wire error codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unacceptable client input: empty argument lists, unknown
    /// classes or properties, schema violations, protected targets.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A URI that was required to exist does not. Used sparingly; most reads
    /// of missing resources succeed silently.
    #[error("not found: {0}")]
    NotFound(String),

    /// Two resources would end up with the same canonical URL.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store, parser, or serializer failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<oxigraph::store::StorageError> for Error {
    fn from(e: oxigraph::store::StorageError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<oxigraph::sparql::EvaluationError> for Error {
    fn from(e: oxigraph::sparql::EvaluationError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<oxigraph::model::IriParseError> for Error {
    fn from(e: oxigraph::model::IriParseError) -> Self {
        Error::InvalidArgument(format!("not a valid URI: {e}"))
    }
}

impl From<oxigraph::io::RdfParseError> for Error {
    fn from(e: oxigraph::io::RdfParseError) -> Self {
        Error::Internal(format!("parse failure: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Internal(format!("download failure: {e}"))
    }
}
