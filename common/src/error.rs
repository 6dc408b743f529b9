//! The closed error-kind taxonomy shared by every crate in this workspace.
//!
//! Every fallible operation in the namespace controller returns one of these
//! kinds, carrying a message but never raw `errno` to callers outside the
//! crate boundary. `Internal` is the catch-all for unexpected syscall
//! failures and always wraps the originating error's text.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    PermissionDenied,
    Unavailable,
    OutOfRange,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::FailedPrecondition => "FailedPrecondition",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::OutOfRange => "OutOfRange",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NsconError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NsconError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        NsconError {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wraps an arbitrary syscall failure as `Internal`, the catch-all for
    /// unexpected errno values that no other kind names.
    pub fn from_errno(context: &str, errno: nix::Error) -> Self {
        Self::internal(format!("{context}: {errno}"))
    }
}

impl From<nix::Error> for NsconError {
    fn from(e: nix::Error) -> Self {
        NsconError::internal(e.to_string())
    }
}

impl From<std::io::Error> for NsconError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => NsconError::not_found(e.to_string()),
            std::io::ErrorKind::AlreadyExists => NsconError::already_exists(e.to_string()),
            std::io::ErrorKind::PermissionDenied => NsconError::permission_denied(e.to_string()),
            _ => NsconError::internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, NsconError>;
