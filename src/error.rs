//! Error types for clearkey-cdm.
//!
//! [`Error`] covers internal failures. [`CdmException`] is the triple handed
//! to promise reject callbacks.
use std::fmt;

use thiserror::Error;

/// Main error type for clearkey-cdm operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The JSON Web Key Set is malformed.
    #[error("Invalid JSON Web Key Set: {0}")]
    InvalidKeySet(String),

    /// The ClearKey license request is malformed.
    #[error("Invalid license request: {0}")]
    InvalidLicenseRequest(String),

    /// The init data could not be parsed.
    #[error("Invalid init data: {0}")]
    InvalidInitData(String),

    /// A key has the wrong length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// An IV has the wrong length.
    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    /// Subsample sizes do not add up to the buffer size.
    #[error("Subsample sizes ({total}) do not equal input size ({expected})")]
    SubsampleSizeMismatch { total: u64, expected: usize },

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML configuration error.
    #[error("Config error: {0}")]
    ConfigError(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for clearkey-cdm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Exception kinds reported through promise rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    NotSupported,
    InvalidState,
    InvalidAccess,
    /// Only produced when a configured session limit is reached.
    QuotaExceeded,
    Unknown,
}

impl ExceptionKind {
    /// DOM-style exception name.
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::NotSupported => "NotSupportedError",
            ExceptionKind::InvalidState => "InvalidStateError",
            ExceptionKind::InvalidAccess => "InvalidAccessError",
            ExceptionKind::QuotaExceeded => "QuotaExceededError",
            ExceptionKind::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection payload: exception kind, system code and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdmException {
    pub kind: ExceptionKind,
    pub system_code: u32,
    pub message: String,
}

impl CdmException {
    pub fn new(kind: ExceptionKind, system_code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            system_code,
            message: message.into(),
        }
    }

    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidAccess, 0, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::InvalidState, 0, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NotSupported, 0, message)
    }

    /// Generic rejection used when pending promises are torn down.
    pub fn aborted() -> Self {
        Self::new(ExceptionKind::InvalidState, 0, "Operation aborted.")
    }
}

impl fmt::Display for CdmException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.system_code, self.message)
    }
}

impl std::error::Error for CdmException {}

impl From<Error> for CdmException {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidKeySet(_)
            | Error::InvalidLicenseRequest(_)
            | Error::InvalidKeyLength { .. }
            | Error::InvalidIvLength { .. }
            | Error::SubsampleSizeMismatch { .. }
            | Error::Base64DecodeError(_)
            | Error::JsonError(_) => ExceptionKind::InvalidAccess,
            Error::InvalidInitData(_) => ExceptionKind::NotSupported,
            Error::ConfigError(_) | Error::IoError(_) | Error::Other(_) => ExceptionKind::Unknown,
        };
        Self::new(kind, 0, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{CdmException, Error, ExceptionKind};

    #[test]
    fn error_maps_to_exception_kind() {
        let ex: CdmException = Error::InvalidKeySet("no keys".to_string()).into();
        assert_eq!(ex.kind, ExceptionKind::InvalidAccess);
        assert!(ex.message.contains("no keys"));

        let ex: CdmException = Error::InvalidInitData("bad box".to_string()).into();
        assert_eq!(ex.kind, ExceptionKind::NotSupported);
    }

    #[test]
    fn exception_display_includes_kind() {
        let ex = CdmException::invalid_access("Session does not exist.");
        assert_eq!(
            ex.to_string(),
            "InvalidAccessError (0): Session does not exist."
        );
    }
}
