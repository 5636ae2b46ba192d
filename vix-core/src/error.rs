//! Error taxonomy shared by every VIX client crate.
//!
//! All failures are reported as a single [`VixError`]. Callers that need to
//! branch on the class of failure use [`VixError::kind`]; the classes mirror
//! the exception hierarchy of the management API (`VIXException` as the
//! base, with internal, security and client-programmer specialisations).

use std::fmt;
use std::time::Duration;

use crate::status::StatusCode;

/// Convenience alias used throughout the VIX crates.
pub type Result<T, E = VixError> = std::result::Result<T, E>;

/// Classification of a [`VixError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Operation-specific failure discoverable only by attempting the
    /// operation, such as an illegal power transition. This is the base
    /// class; every error that is not one of the specialisations below
    /// belongs here.
    Operation,
    /// Runtime-reported failure that is neither a security problem nor an
    /// illegal state: undefined property, invalid handle, transport failure.
    Internal,
    /// Authentication or authorisation failure reported by the host.
    Security,
    /// Misuse detected locally without contacting the host, such as
    /// operating on a closed object.
    ClientProgrammer,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Operation => write!(f, "VIXException"),
            ErrorKind::Internal => write!(f, "VIXInternalError"),
            ErrorKind::Security => write!(f, "VIXSecurityException"),
            ErrorKind::ClientProgrammer => write!(f, "VIXClientProgrammerError"),
        }
    }
}

/// Errors produced by VIX client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VixError {
    /// The host rejected the operation; typically an illegal state
    /// transition such as powering off a VM that is already off.
    #[error("{operation} failed (code {code}): {message}")]
    Operation {
        operation: &'static str,
        code: StatusCode,
        message: String,
    },

    /// The host refused the operation for authentication or permission
    /// reasons.
    #[error("{operation} denied (code {code}): {message}")]
    Security {
        operation: &'static str,
        code: StatusCode,
        message: String,
    },

    /// The runtime failed in a way that is not attributable to the target
    /// resource's state.
    #[error("internal error during {operation}: {message}")]
    Internal {
        operation: &'static str,
        code: Option<StatusCode>,
        message: String,
    },

    /// A client-side wait limit expired before the job finished. The job
    /// itself keeps running on the host.
    #[error("{operation} did not complete within {timeout:?}")]
    JobTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The caller misused the API.
    #[error("client programmer error: {0}")]
    ClientProgrammer(String),
}

impl VixError {
    /// Translate a failed runtime status into the matching error class.
    ///
    /// `code` is expected to be a failure; passing [`StatusCode::OK`] yields
    /// an internal error because a successful status has no error meaning.
    #[must_use]
    pub fn from_status(operation: &'static str, code: StatusCode) -> Self {
        let message = code.text().to_owned();
        match classify(code) {
            ErrorKind::Security => VixError::Security {
                operation,
                code,
                message,
            },
            ErrorKind::Internal => VixError::Internal {
                operation,
                code: Some(code),
                message,
            },
            _ => VixError::Operation {
                operation,
                code,
                message,
            },
        }
    }

    /// Build an internal error that has no runtime status code.
    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        VixError::Internal {
            operation,
            code: None,
            message: message.into(),
        }
    }

    /// Build the error returned when an object is used after it was closed.
    #[must_use]
    pub fn not_open(what: &str) -> Self {
        VixError::ClientProgrammer(format!("the {what} must be open to perform this operation"))
    }

    /// The taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            VixError::Operation { .. } | VixError::JobTimeout { .. } => ErrorKind::Operation,
            VixError::Security { .. } => ErrorKind::Security,
            VixError::Internal { .. } => ErrorKind::Internal,
            VixError::ClientProgrammer(_) => ErrorKind::ClientProgrammer,
        }
    }

    /// The runtime status code behind this error, if there is one.
    #[must_use]
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            VixError::Operation { code, .. } | VixError::Security { code, .. } => Some(*code),
            VixError::Internal { code, .. } => *code,
            VixError::JobTimeout { .. } | VixError::ClientProgrammer(_) => None,
        }
    }

    /// Whether retrying the same call later could plausibly succeed.
    ///
    /// Only transport-class internal failures and "busy" conditions qualify.
    /// Security and client-programmer errors never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            VixError::Internal { code, .. } => matches!(
                *code,
                Some(StatusCode::CANNOT_CONNECT_TO_HOST | StatusCode::TOO_MANY_HANDLES)
            ),
            VixError::Operation { code, .. } => matches!(
                *code,
                StatusCode::OBJECT_IS_BUSY
                    | StatusCode::FILE_ALREADY_LOCKED
                    | StatusCode::TIMEOUT_WAITING_FOR_TOOLS
            ),
            VixError::JobTimeout { .. } => true,
            VixError::Security { .. } | VixError::ClientProgrammer(_) => false,
        }
    }

    /// Returns `true` if this error carries exactly `code`.
    #[must_use]
    pub fn has_code(&self, code: StatusCode) -> bool {
        self.code() == Some(code)
    }
}

/// Map a failure status onto its taxonomy class.
#[must_use]
pub fn classify(code: StatusCode) -> ErrorKind {
    match code {
        StatusCode::HOST_USER_PERMISSIONS
        | StatusCode::GUEST_USER_PERMISSIONS
        | StatusCode::GUEST_OPERATIONS_PROHIBITED
        | StatusCode::ANON_GUEST_OPERATIONS_PROHIBITED
        | StatusCode::ROOT_GUEST_OPERATIONS_PROHIBITED
        | StatusCode::MISSING_ANON_GUEST_ACCOUNT
        | StatusCode::CANNOT_AUTHENTICATE_WITH_GUEST => ErrorKind::Security,

        StatusCode::OK
        | StatusCode::OUT_OF_MEMORY
        | StatusCode::INVALID_HANDLE
        | StatusCode::NOT_SUPPORTED_ON_HANDLE_TYPE
        | StatusCode::TOO_MANY_HANDLES
        | StatusCode::TYPE_MISMATCH
        | StatusCode::INVALID_XML
        | StatusCode::UNRECOGNIZED_PROPERTY
        | StatusCode::CANNOT_CONNECT_TO_HOST => ErrorKind::Internal,

        _ => ErrorKind::Operation,
    }
}
