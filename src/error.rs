use std::fmt;

use thiserror::Error;

/// Normalized failure codes shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AccessDenied,
    InvalidArgument,
    AlreadyExists,
    PermissionDenied,
    OutOfSpace,
    TryAgain,
    Busy,
    BadMessage,
    UnsupportedMessage,
    MessageTooLarge,
    IsADirectory,
    NotADirectory,
    NotEmpty,
    BadFileDescriptor,
    IoError,
}

impl ErrorCode {
    /// Convert the code to a libc errno for host VFS replies
    pub fn errno(self) -> i32 {
        match self {
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::AccessDenied => libc::EACCES,
            ErrorCode::InvalidArgument => libc::EINVAL,
            ErrorCode::AlreadyExists => libc::EEXIST,
            ErrorCode::PermissionDenied => libc::EPERM,
            ErrorCode::OutOfSpace => libc::ENOSPC,
            ErrorCode::TryAgain => libc::EAGAIN,
            ErrorCode::Busy => libc::EBUSY,
            ErrorCode::BadMessage => libc::EBADMSG,
            ErrorCode::UnsupportedMessage => libc::ENOTSUP,
            ErrorCode::MessageTooLarge => libc::EMSGSIZE,
            ErrorCode::IsADirectory => libc::EISDIR,
            ErrorCode::NotADirectory => libc::ENOTDIR,
            ErrorCode::NotEmpty => libc::ENOTEMPTY,
            ErrorCode::BadFileDescriptor => libc::EBADF,
            ErrorCode::IoError => libc::EIO,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not found",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::OutOfSpace => "no space left",
            ErrorCode::TryAgain => "try again",
            ErrorCode::Busy => "resource busy",
            ErrorCode::BadMessage => "bad message",
            ErrorCode::UnsupportedMessage => "unsupported message",
            ErrorCode::MessageTooLarge => "message too large",
            ErrorCode::IsADirectory => "is a directory",
            ErrorCode::NotADirectory => "not a directory",
            ErrorCode::NotEmpty => "directory not empty",
            ErrorCode::BadFileDescriptor => "bad file descriptor",
            ErrorCode::IoError => "I/O error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error returned across the adapter boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct AdapterError {
    pub code: ErrorCode,
    pub message: String,
}

impl AdapterError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn bad_message(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadMessage, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IoError, message)
    }

    /// Convert error to libc errno
    pub fn to_errno(&self) -> i32 {
        self.code.errno()
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Native error shape for backends that report failures as HTTP statuses
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// Condition detected by the backend itself, already normalized
    #[error(transparent)]
    Local(#[from] AdapterError),
}

impl HttpError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        HttpError::Status {
            status,
            message: message.into(),
        }
    }
}

/// Map an HTTP status code onto the taxonomy
pub fn status_to_code(status: u16) -> ErrorCode {
    match status {
        404 => ErrorCode::NotFound,
        403 => ErrorCode::AccessDenied,
        400 => ErrorCode::InvalidArgument,
        409 => ErrorCode::AlreadyExists,
        _ => ErrorCode::IoError,
    }
}

/// Conversion shared by the S3 and Google Drive connectors
pub fn convert_http_error(err: HttpError) -> AdapterError {
    match err {
        HttpError::Status { status, message } => AdapterError::new(status_to_code(status), message),
        HttpError::Transport(message) => AdapterError::io(message),
        HttpError::Local(err) => err,
    }
}
