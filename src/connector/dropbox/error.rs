//! Dropbox error shapes and their conversion
//!
//! Route errors arrive as HTTP 409 with a JSON envelope whose `error`
//! field is a nested tagged union: a route-level category (`path`,
//! `path_lookup`, `from_lookup`, `to`, ...) wrapping a leaf reason
//! (`not_found`, `conflict`, ...). Each level is a closed enum with an
//! `Other` arm for tags this crate does not know.

use serde::Deserialize;
use thiserror::Error;

use crate::error::{AdapterError, ErrorCode};

/// Top-level error body of a failed route call
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub error_summary: String,
    #[serde(default)]
    pub user_message: Option<UserMessage>,
    pub error: RouteError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

/// Route-level error category
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum RouteError {
    /// `path` wraps a reason under `path`, or under `reason` for uploads
    Path {
        #[serde(default)]
        path: Option<Reason>,
        #[serde(default)]
        reason: Option<Reason>,
    },
    PathLookup {
        path_lookup: Reason,
    },
    PathWrite {
        path_write: Reason,
    },
    FromLookup {
        from_lookup: Reason,
    },
    FromWrite {
        from_write: Reason,
    },
    To {
        to: Reason,
    },
    Reset,
    TooManyFiles,
    TooManyWriteOperations,
    InsufficientQuota,
    CantMoveFolderIntoItself,
    DuplicatedOrNestedPaths,
    InternalError,
    UnsupportedFile,
    #[serde(other)]
    Other,
}

/// Leaf reason shared by lookup and write failures
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Reason {
    MalformedPath {
        #[serde(default)]
        malformed_path: Option<String>,
    },
    NotFound,
    NotFile,
    NotFolder,
    RestrictedContent,
    UnsupportedContentType,
    Locked,
    Conflict {
        conflict: Conflict,
    },
    NoWritePermission,
    InsufficientSpace,
    DisallowedName,
    TeamFolder,
    OperationSuppressed,
    TooManyWriteOperations,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Conflict {
    File,
    Folder,
    FileAncestor,
    #[serde(other)]
    Other,
}

/// Native Dropbox failure
#[derive(Error, Debug)]
pub enum DropboxError {
    #[error("Dropbox API error: {}", .0.error_summary)]
    Api(ApiErrorEnvelope),

    #[error("Dropbox HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Dropbox transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Local(#[from] AdapterError),
}

impl DropboxError {
    /// Build an error from a non-success response
    pub fn from_response(status: u16, body: &str) -> Self {
        if status == 409 {
            if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
                return DropboxError::Api(envelope);
            }
        }
        DropboxError::Http {
            status,
            message: body.trim().to_string(),
        }
    }
}

impl From<reqwest::Error> for DropboxError {
    fn from(err: reqwest::Error) -> Self {
        DropboxError::Transport(err.to_string())
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Map a Dropbox failure onto the taxonomy
pub fn convert(err: DropboxError) -> AdapterError {
    match err {
        DropboxError::Api(envelope) => convert_envelope(&envelope),
        DropboxError::Http { status, message } => AdapterError::new(http_status_code(status), message),
        DropboxError::Transport(message) => AdapterError::io(message),
        DropboxError::Local(err) => err,
    }
}

fn convert_envelope(envelope: &ApiErrorEnvelope) -> AdapterError {
    let message = envelope
        .user_message
        .as_ref()
        .and_then(|m| non_empty(&m.text));
    let (code, message) = classify_route(&envelope.error, message);
    AdapterError::new(
        code,
        message.unwrap_or_else(|| envelope.error_summary.clone()),
    )
}

fn classify_route(error: &RouteError, message: Option<String>) -> (ErrorCode, Option<String>) {
    match error {
        RouteError::Path { path, reason } => match path.as_ref().or(reason.as_ref()) {
            Some(reason) => classify_reason(reason, message),
            None => (ErrorCode::InvalidArgument, message),
        },
        RouteError::PathLookup { path_lookup: reason }
        | RouteError::PathWrite { path_write: reason }
        | RouteError::FromLookup { from_lookup: reason }
        | RouteError::FromWrite { from_write: reason }
        | RouteError::To { to: reason } => classify_reason(reason, message),
        RouteError::Reset => (ErrorCode::TryAgain, message),
        RouteError::TooManyFiles => (ErrorCode::MessageTooLarge, message),
        RouteError::TooManyWriteOperations => (ErrorCode::TryAgain, message),
        RouteError::InsufficientQuota => (ErrorCode::OutOfSpace, message),
        RouteError::CantMoveFolderIntoItself | RouteError::DuplicatedOrNestedPaths => {
            (ErrorCode::InvalidArgument, message)
        }
        RouteError::InternalError => (ErrorCode::IoError, message),
        RouteError::UnsupportedFile => (ErrorCode::UnsupportedMessage, message),
        RouteError::Other => (ErrorCode::InvalidArgument, message),
    }
}

fn classify_reason(reason: &Reason, message: Option<String>) -> (ErrorCode, Option<String>) {
    let message = message.or_else(|| match reason {
        Reason::MalformedPath { malformed_path } => malformed_path.as_deref().and_then(non_empty),
        _ => None,
    });

    let code = match reason {
        Reason::MalformedPath { .. } => ErrorCode::InvalidArgument,
        Reason::NotFound => ErrorCode::NotFound,
        Reason::NotFile => ErrorCode::IsADirectory,
        Reason::NotFolder => ErrorCode::NotADirectory,
        Reason::RestrictedContent => ErrorCode::AccessDenied,
        Reason::UnsupportedContentType => ErrorCode::UnsupportedMessage,
        Reason::Locked => ErrorCode::Busy,
        Reason::Conflict { conflict } => classify_conflict(conflict),
        Reason::NoWritePermission | Reason::TeamFolder => ErrorCode::PermissionDenied,
        Reason::InsufficientSpace => ErrorCode::OutOfSpace,
        Reason::DisallowedName => ErrorCode::InvalidArgument,
        Reason::OperationSuppressed | Reason::TooManyWriteOperations => ErrorCode::TryAgain,
        Reason::Other => ErrorCode::InvalidArgument,
    };
    (code, message)
}

fn classify_conflict(conflict: &Conflict) -> ErrorCode {
    match conflict {
        Conflict::File | Conflict::Folder => ErrorCode::AlreadyExists,
        Conflict::FileAncestor => ErrorCode::NotADirectory,
        Conflict::Other => ErrorCode::InvalidArgument,
    }
}

/// Status table for failures that are not route errors
fn http_status_code(status: u16) -> ErrorCode {
    match status {
        400 | 409 => ErrorCode::InvalidArgument,
        401 => ErrorCode::AccessDenied,
        403 => ErrorCode::PermissionDenied,
        404 => ErrorCode::NotFound,
        413 => ErrorCode::MessageTooLarge,
        429 => ErrorCode::TryAgain,
        503 => ErrorCode::Busy,
        507 => ErrorCode::OutOfSpace,
        _ => ErrorCode::IoError,
    }
}
