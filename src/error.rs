//! Contains the `Error` and `Result` types that `mongodb-operation` uses.

use std::{
    collections::HashSet,
    fmt::{self, Debug},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{bson::Document, results::BulkWriteResult};

const CURSOR_NOT_FOUND_CODE: i32 = 43;
const MAX_TIME_MS_EXPIRED_CODE: i32 = 50;
const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

// Codes that made a change stream resumable before servers started attaching the
// `ResumableChangeStreamError` label (wire version 9).
const LEGACY_RESUMABLE_CODES: [i32; 17] = [
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13435, 13436, 63, 150, 13388, 234, 133,
];

/// Label the server attaches to errors after which a change stream may be resumed.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while building, executing or iterating an operation. The inner
/// [`ErrorKind`] is wrapped in a `Box` to allow the errors to be cloned cheaply.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,

    pub(crate) wire_version: Option<i32>,

    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Box::new(kind),
            labels,
            wire_version: None,
            source: None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Error {
        ErrorKind::IllegalState {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn incompatible_server(message: impl Into<String>) -> Error {
        ErrorKind::IncompatibleServer {
            message: message.into(),
        }
        .into()
    }

    /// Whether this error was raised on the client before anything was sent to the server
    /// because the operation was malformed or unsupported by the server's wire version.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::InvalidArgument { .. })
    }

    /// Whether this error was caused by using a cursor or change stream after it was closed.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::IllegalState { .. })
    }

    /// Whether the server gave up on the operation because its `maxTimeMS` budget ran out.
    pub fn is_max_time_ms_expired_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ExecutionTimeout(_))
            || self.sdam_code() == Some(MAX_TIME_MS_EXPIRED_CODE)
    }

    pub(crate) fn is_ns_not_found(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(ref err) if err.code == NAMESPACE_NOT_FOUND_CODE)
    }

    pub(crate) fn is_cursor_not_found(&self) -> bool {
        self.sdam_code() == Some(CURSOR_NOT_FOUND_CODE)
    }

    pub(crate) fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(..))
    }

    pub(crate) fn is_server_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Command(_)
                | ErrorKind::ExecutionTimeout(_)
                | ErrorKind::Write(_)
                | ErrorKind::BulkWrite(_)
        )
    }

    /// Whether a change stream that hit this error may transparently reissue its aggregate.
    pub(crate) fn is_resumable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        if !self.is_server_error() {
            return false;
        }
        let code = self.sdam_code();
        if code == Some(CURSOR_NOT_FOUND_CODE) {
            return true;
        }
        match self.wire_version {
            Some(v) if v >= 9 => self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR),
            _ => code.is_some_and(|code| LEGACY_RESUMABLE_CODES.contains(&code)),
        }
    }

    /// The server error code, if this error carries one. For bulk write failures this is the
    /// code of the first write error, or of the write concern error when there are none.
    pub fn code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(err) | ErrorKind::ExecutionTimeout(err) => Some(err.code),
            ErrorKind::Write(failure) => Some(failure.code()),
            ErrorKind::BulkWrite(failure) => failure
                .write_errors
                .first()
                .map(|e| e.code)
                .or_else(|| failure.write_concern_error.as_ref().map(|e| e.code)),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.code()))
    }

    fn sdam_code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(err) | ErrorKind::ExecutionTimeout(err) => Some(err.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)) => Some(wc_error.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.sdam_code()))
    }

    /// The labels attached to this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error or its source carries `label`.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        let label = label.as_ref();
        self.labels().contains(label)
            || self
                .source
                .as_ref()
                .map(|source| source.contains_label(label))
                .unwrap_or(false)
    }

    pub(crate) fn with_wire_version(mut self, wire_version: Option<i32>) -> Self {
        if self.wire_version.is_none() {
            self.wire_version = wire_version;
        }
        self
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<crate::bson::raw::Error> for ErrorKind {
    fn from(err: crate::bson::raw::Error) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<crate::bson::raw::ValueAccessError> for ErrorKind {
    fn from(err: crate::bson::raw::ValueAccessError) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The operation was malformed, or asked for a feature the server's wire version lacks.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// A cursor or change stream was used after it was closed.
    #[error("{message}")]
    #[non_exhaustive]
    IllegalState { message: String },

    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// One or more requests of a bulk write failed, or the write concern could not be
    /// satisfied. Carries whatever the batches that did run managed to do.
    #[error("An error occurred when executing a bulk write: {0:?}")]
    BulkWrite(BulkWriteFailure),

    /// The server returned `ok: 0`.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// The server returned `MaxTimeMSExpired`.
    #[error("Operation exceeded its time limit: {0}")]
    ExecutionTimeout(CommandError),

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// A single-document write failed.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    /// The connection cannot carry the requested wire message.
    #[error("The server does not support a database operation: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,
}

impl ErrorKind {
    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::BulkWrite(BulkWriteFailure {
                write_concern_error,
                ..
            }) => write_concern_error.as_ref(),
            ErrorKind::Write(WriteFailure::WriteConcernError(err)) => Some(err),
            _ => None,
        }
    }
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct CommandError {
    pub code: i32,

    #[serde(rename = "codeName", default)]
    pub code_name: String,

    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred because the server could not satisfy the requested write concern.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    pub code: i32,

    #[serde(rename = "codeName", default)]
    pub code_name: String,

    #[serde(alias = "errmsg", default = "String::new")]
    pub message: String,

    #[serde(rename = "errInfo")]
    pub details: Option<Document>,

    #[serde(rename = "errorLabels", default)]
    pub(crate) labels: Vec<String>,
}

/// An error that occurred during a write operation that wasn't due to being unable to satisfy a
/// write concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WriteError {
    pub code: i32,

    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,

    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// A write error for one request of a bulk write. `index` is the position of the request in the
/// list handed to the operation, not its position inside the batch it was sent in.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexedWriteError {
    #[serde(default)]
    pub index: usize,

    pub code: i32,

    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,

    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// The failure of a bulk write: every indexed write error, the last write concern error seen,
/// and the combined result of the batches that were executed.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    pub write_errors: Vec<IndexedWriteError>,

    pub write_concern_error: Option<WriteConcernError>,

    pub partial_result: BulkWriteResult,
}

/// An error that occurred when trying to execute a single-document write.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum WriteFailure {
    WriteConcernError(WriteConcernError),

    WriteError(WriteError),
}

impl WriteFailure {
    pub(crate) fn code(&self) -> i32 {
        match self {
            Self::WriteConcernError(e) => e.code,
            Self::WriteError(e) => e.code,
        }
    }
}
