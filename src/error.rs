use std::{fmt, io};

use http::status::StatusCode;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::{error::ErrorKind as DatabaseErrorKind, Error as SqlxError};

use serde_json::Error as JsonError;

/// The structured body of a [ValidationError]. Either keyed by the offending field (for example
/// `attributes`, `constraints` or `query`) or a bare message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Field { field: String, message: String },
    Message(String),
}

/// Caller/input error raised by the attribute core. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub payload: ErrorPayload,
}

impl ValidationError {
    pub fn field<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        ValidationError {
            payload: ErrorPayload::Field {
                field: field.into(),
                message: message.into(),
            },
        }
    }

    pub fn message<M: Into<String>>(message: M) -> Self {
        ValidationError {
            payload: ErrorPayload::Message(message.into()),
        }
    }

    /// The field this error is keyed by, if any.
    pub fn field_name(&self) -> Option<&str> {
        match &self.payload {
            ErrorPayload::Field { field, .. } => Some(field),
            ErrorPayload::Message(_) => None,
        }
    }

    pub fn text(&self) -> &str {
        match &self.payload {
            ErrorPayload::Field { message, .. } => message,
            ErrorPayload::Message(message) => message,
        }
    }

    /// Re-key this error under a different field, keeping the rendered text of the original.
    pub fn rekey<F: Into<String>>(self, field: F) -> Self {
        ValidationError::field(field, self.to_string())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            ErrorPayload::Field { field, message } => write!(f, "{{'{field}': '{message}'}}"),
            ErrorPayload::Message(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum NsotError {
    #[error("Cache/Database error: {0}")]
    Cache(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Validation error: {0}")]
    Validation(ValidationError),
}

impl NsotError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            NsotError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NsotError::Conflict(_) => StatusCode::CONFLICT,
            NsotError::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NsotError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NsotError::NotFound(_) => StatusCode::NOT_FOUND,
            NsotError::PermissionDenied => StatusCode::FORBIDDEN,
            NsotError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NsotError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Shorthand for a field-keyed [NsotError::Validation].
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        NsotError::Validation(ValidationError::field(field, message))
    }

    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            NsotError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for NsotError {
    fn from(src: ValidationError) -> NsotError {
        NsotError::Validation(src)
    }
}

impl From<toml::de::Error> for NsotError {
    fn from(src: toml::de::Error) -> NsotError {
        NsotError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for NsotError {
    fn from(src: toml::ser::Error) -> NsotError {
        NsotError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for NsotError {
    fn from(src: JsonError) -> NsotError {
        NsotError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for NsotError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => NsotError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => NsotError::PermissionDenied,
            _ => NsotError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for NsotError {
    fn from(x: fmt::Error) -> Self {
        NsotError::Custom(format!("{x}"))
    }
}

impl From<RegexError> for NsotError {
    fn from(x: RegexError) -> Self {
        NsotError::Serialization(format!("Regex parse failed: {x}"))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for NsotError {
    fn from(db_error: SqlxError) -> Self {
        if let SqlxError::Database(ref db_err) = db_error {
            if matches!(db_err.kind(), DatabaseErrorKind::UniqueViolation) {
                return NsotError::Conflict(format!("{}", db_err.message()));
            }
        }
        NsotError::Cache(format!("database error: {db_error:?}"))
    }
}
