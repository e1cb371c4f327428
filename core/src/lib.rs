//! Blocking OpenRosa protocol client.
//!
//! # Overview
//! Lists forms, downloads form definitions, manifests and media files, and
//! uploads submissions to an OpenRosa server, answering Basic and Digest
//! challenges along the way.
//!
//! # Design
//! - `OpenRosaClient` speaks HTTP through the `HttpTransport` seam; the
//!   bundled `UreqTransport` (feature `ureq`) is one implementation, tests
//!   script another.
//! - Authentication state lives in an `AuthCache` keyed by origin and
//!   credentials. Clients get their own cache unless one is shared
//!   explicitly.
//! - `OpenRosaServer` is the façade used by download and submission
//!   workflows; it owns URL layout, credential lookup and error
//!   classification.
//! - Types use owned `String` / `Vec` fields so they can cross the FFI layer.

pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod formlist;
pub mod hash;
pub mod http;
pub mod server;
pub mod submission;
#[cfg(feature = "ureq")]
pub mod transport;
pub mod types;
pub mod uri;

pub use auth::{AuthCache, AuthScheme};
pub use client::{http_date, OpenRosaClient};
pub use config::ClientConfig;
pub use credentials::{Anonymous, CredentialStore, Credentials, MemoryCredentialStore};
pub use error::{EntryError, FormSourceError, OpenRosaError, ParseError, TransportError};
pub use formlist::{parse_form_list, parse_manifest};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use server::{media_files_to_download, MediaDownloadReport, OpenRosaServer};
pub use submission::SubmissionCapacity;
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
pub use types::{
    FormDescriptor, FormList, HttpGetResult, HttpHeadResult, HttpPostResult, Manifest, MediaFileDescriptor,
    SubmissionPayload,
};
pub use uri::Uri;
