//! Error types for the OpenRosa client.
//!
//! # Design
//! HTTP error statuses are data, not errors: `OpenRosaClient` returns them in
//! its result structs and only `Err`s when no response could be obtained or a
//! local precondition failed. `ParseError` covers a whole document that
//! cannot be read; `EntryError` covers one unusable form-list or manifest
//! entry so the rest of a batch can proceed. `FormSourceError` is the
//! caller-facing classification used by the form download and submission
//! workflows.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain any response from the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// Errors returned by `OpenRosaClient` operations.
#[derive(Debug, Error)]
pub enum OpenRosaError {
    #[error("invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(
        "ContentType: {actual} returned from: {uri} is not {expected}. \
         This is often caused by a network proxy. Do you need to login to your network?"
    )]
    UnexpectedContentType {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("cannot read {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OpenRosaError {
    pub(crate) fn invalid_uri(uri: &str, reason: impl Into<String>) -> Self {
        OpenRosaError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn local_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        OpenRosaError::LocalFile {
            path: path.into(),
            source,
        }
    }
}

/// A form-list or manifest document that cannot be read at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("root element is not <{expected}>: found <{actual}>")]
    UnexpectedRoot { expected: String, actual: String },

    #[error("document has no root element")]
    Empty,
}

/// One entry of an otherwise readable document that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} entry {index}{} is missing required element(s): {}", id_suffix(.id), .missing.join(", "))]
pub struct EntryError {
    pub kind: EntryKind,
    /// Zero-based position of the entry in its document.
    pub index: usize,
    /// Form id or file name, when the entry had one.
    pub id: Option<String>,
    pub missing: Vec<&'static str>,
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" ({id})"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Form,
    MediaFile,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Form => write!(f, "form list"),
            EntryKind::MediaFile => write!(f, "manifest"),
        }
    }
}

/// Classified failures of the form-source workflows.
#[derive(Debug, Error)]
pub enum FormSourceError {
    #[error("unable to reach {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("credentials required or incorrect for {url} (status {status})")]
    AuthRequired { url: String, status: u16 },

    #[error("{url} returned status {status}: {message}")]
    Server {
        url: String,
        status: u16,
        message: String,
    },

    #[error("unable to parse response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("submission of {declared} bytes exceeds the server limit of {limit} bytes")]
    SubmissionTooLarge { declared: u64, limit: u64 },

    #[error("invalid media file name {0:?}")]
    InvalidMediaFileName(String),

    #[error(transparent)]
    Request(OpenRosaError),
}

impl FormSourceError {
    /// Classify a client error raised while accessing `url`.
    pub(crate) fn from_client(url: &str, err: OpenRosaError) -> Self {
        match err {
            OpenRosaError::Transport(source) => FormSourceError::Unreachable {
                url: url.to_string(),
                source,
            },
            other => FormSourceError::Request(other),
        }
    }

    /// Classify a non-success status returned for `url`.
    pub(crate) fn from_status(url: &str, status: u16, message: String) -> Self {
        match status {
            401 | 403 => FormSourceError::AuthRequired {
                url: url.to_string(),
                status,
            },
            _ => FormSourceError::Server {
                url: url.to_string(),
                status,
                message,
            },
        }
    }
}
