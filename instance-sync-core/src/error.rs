//! Error types for instance synchronisation.

use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by an [`crate::contract::InstanceApi`] implementation.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The instance answered with a non-success status.
    #[error("{method} failed with status {status}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("transport error calling {method}: {message}")]
    Transport { method: String, message: String },

    /// A byte stream was cut off before it completed.
    #[error("stream ended early during {method}")]
    EndOfStream { method: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response from {method}: {message}")]
    Decode { method: String, message: String },

    /// The instance refused the request (invalid hash, invalid link, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: i64 },

    /// A local file the call reads or writes could not be accessed.
    #[error("local file error during {method} at {path}: {source}")]
    LocalIo {
        method: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    pub fn local_io(method: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ApiError::LocalIo {
            method: method.to_string(),
            path: path.into(),
            source,
        }
    }
}

/// All errors that can arise while synchronising two instances.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// An I/O error on local scratch storage, with the path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Annotation payload does not match the project schema.
    #[error("annotation error: {0}")]
    Annotation(String),

    /// A destination container could not be resolved or created. Aborts the run.
    #[error("failed to resolve {what} '{name}': {source}")]
    Container {
        what: &'static str,
        name: String,
        #[source]
        source: ApiError,
    },

    /// Link upload produced entities without dimensional metadata.
    #[error("{invalid} entities uploaded by link are missing dimensions")]
    LinkValidation { invalid: usize },

    /// The destination does not recognise every content hash of a batch.
    #[error("{missing} content hashes are not known to the destination")]
    HashRejected { missing: usize },

    /// Entities created by a failed transfer tier could not be removed again.
    /// Falling through to the next tier would leave duplicates behind.
    #[error("failed to remove {count} entities after a rejected upload: {source}")]
    Rollback {
        count: usize,
        #[source]
        source: ApiError,
    },

    /// The resumable-run record could not be read or written.
    #[error("run record error: {0}")]
    Record(String),
}

impl SyncError {
    /// Stream truncation and files vanishing from scratch storage mid-transfer
    /// are worth another attempt. Everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Api(ApiError::EndOfStream { .. }) => true,
            SyncError::Io { source, .. } | SyncError::Api(ApiError::LocalIo { source, .. }) => {
                matches!(source.kind(), ErrorKind::NotFound | ErrorKind::UnexpectedEof)
            }
            _ => false,
        }
    }

    pub fn container(what: &'static str, name: impl Into<String>, source: ApiError) -> Self {
        SyncError::Container {
            what,
            name: name.into(),
            source,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
