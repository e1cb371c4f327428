//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` instead of `String`, null for absent optional fields, raw
//! pointers instead of `Vec`, and tagged enums with explicit discriminants.
//! Conversion functions live here to keep `lib.rs` focused on the
//! `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use openrosa_core::{
    FormDescriptor, FormList, FormSourceError, HttpPostResult, Manifest, MediaDownloadReport, MediaFileDescriptor,
    MemoryCredentialStore, OpenRosaError, OpenRosaServer, ParseError, UreqTransport,
};

/// Opaque handle to an OpenRosa server connection. C callers receive a
/// pointer to this and pass it back into every FFI function.
pub struct FfiOpenRosaClient {
    pub(crate) inner: OpenRosaServer<UreqTransport>,
    pub(crate) credentials: Arc<MemoryCredentialStore>,
}

/// Heap C string; interior NULs are dropped.
pub(crate) fn c_string(s: impl Into<String>) -> *mut c_char {
    let mut s = s.into();
    s.retain(|c| c != '\0');
    CString::new(s).unwrap_or_default().into_raw()
}

fn c_string_opt(s: Option<String>) -> *mut c_char {
    s.map_or(std::ptr::null_mut(), c_string)
}

/// Free a string produced by [`c_string`]. Null is ignored.
pub(crate) fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Leak `items` as a pointer/length pair; empty becomes null.
fn into_raw_parts<T>(items: Vec<T>) -> (*mut T, u32) {
    if items.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let len = items.len() as u32;
    let mut items = items.into_boxed_slice();
    let ptr = items.as_mut_ptr();
    std::mem::forget(items);
    (ptr, len)
}

/// Reclaim a pair produced by [`into_raw_parts`].
pub(crate) unsafe fn from_raw_parts<T>(ptr: *mut T, len: u32) -> Vec<T> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    let slice = std::ptr::slice_from_raw_parts_mut(ptr, len as usize);
    unsafe { Box::from_raw(slice) }.into_vec()
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// One form from a form list. `version`, `hash` and `manifest_url` may be null.
#[repr(C)]
pub struct FfiFormDescriptor {
    pub form_id: *mut c_char,
    pub display_name: *mut c_char,
    pub version: *mut c_char,
    pub hash: *mut c_char,
    pub download_url: *mut c_char,
    pub manifest_url: *mut c_char,
}

impl From<FormDescriptor> for FfiFormDescriptor {
    fn from(form: FormDescriptor) -> Self {
        FfiFormDescriptor {
            form_id: c_string(form.form_id),
            display_name: c_string(form.display_name),
            version: c_string_opt(form.version),
            hash: c_string_opt(form.hash),
            download_url: c_string(form.download_url),
            manifest_url: c_string_opt(form.manifest_url),
        }
    }
}

impl FfiFormDescriptor {
    pub(crate) fn free_fields(&self) {
        free_c_string(self.form_id);
        free_c_string(self.display_name);
        free_c_string(self.version);
        free_c_string(self.hash);
        free_c_string(self.download_url);
        free_c_string(self.manifest_url);
    }
}

/// A parsed form list. `invalid_count` counts entries that were skipped.
#[repr(C)]
pub struct FfiFormList {
    pub items: *mut FfiFormDescriptor,
    pub len: u32,
    pub invalid_count: u32,
    pub legacy: bool,
}

/// One media file from a manifest.
#[repr(C)]
pub struct FfiMediaFile {
    pub filename: *mut c_char,
    pub hash: *mut c_char,
    pub download_url: *mut c_char,
}

impl From<MediaFileDescriptor> for FfiMediaFile {
    fn from(media: MediaFileDescriptor) -> Self {
        FfiMediaFile {
            filename: c_string(media.filename),
            hash: c_string(media.hash),
            download_url: c_string(media.download_url),
        }
    }
}

impl FfiMediaFile {
    pub(crate) fn free_fields(&self) {
        free_c_string(self.filename);
        free_c_string(self.hash);
        free_c_string(self.download_url);
    }
}

#[repr(C)]
pub struct FfiManifest {
    pub items: *mut FfiMediaFile,
    pub len: u32,
    pub invalid_count: u32,
}

/// What the server answered to a submission.
#[repr(C)]
pub struct FfiPostResult {
    pub response_code: u16,
    pub reason_phrase: *mut c_char,
    pub http_response: *mut c_char,
}

/// Counts from a media download. `failed` entries were not written; the
/// other files in the manifest were still processed.
#[repr(C)]
pub struct FfiMediaReport {
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiOpenRosaResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidArgument = 2,
    Unreachable = 3,
    AuthRequired = 4,
    Http = 5,
    Parse = 6,
    UnexpectedContentType = 7,
    SubmissionTooLarge = 8,
    LocalFile = 9,
    Panic = 10,
}

/// Tag that tells `openrosa_free_result` what `FfiOpenRosaResult::data` points to.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiDataTag {
    None = 0,
    FormList = 1,
    Manifest = 2,
    PostResult = 3,
    MediaReport = 4,
}

/// Result envelope for every fetch, submit and parse operation.
///
/// On success `error_code` is `Ok`, `error_message` is null, and `data`
/// points to the payload (tagged by `data_tag`).
/// On failure `error_code` describes the category, `error_message` is a
/// human-readable C string, and `data` is null. `http_status` is set
/// whenever a status is known.
#[repr(C)]
pub struct FfiOpenRosaResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub data_tag: FfiDataTag,
    pub data: *mut c_void,
}

impl FfiOpenRosaResult {
    fn ok(data_tag: FfiDataTag, http_status: u16, data: *mut c_void) -> *mut Self {
        Box::into_raw(Box::new(FfiOpenRosaResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status,
            data_tag,
            data,
        }))
    }

    pub(crate) fn error(error_code: FfiErrorCode, http_status: u16, message: impl Into<String>) -> *mut Self {
        Box::into_raw(Box::new(FfiOpenRosaResult {
            error_code,
            error_message: c_string(message),
            http_status,
            data_tag: FfiDataTag::None,
            data: std::ptr::null_mut(),
        }))
    }

    pub(crate) fn ok_form_list(list: FormList) -> *mut Self {
        let invalid_count = list.invalid.len() as u32;
        let legacy = list.legacy;
        let (items, len) = into_raw_parts(list.forms.into_iter().map(FfiFormDescriptor::from).collect());
        let data = Box::new(FfiFormList {
            items,
            len,
            invalid_count,
            legacy,
        });
        Self::ok(FfiDataTag::FormList, 200, Box::into_raw(data) as *mut c_void)
    }

    pub(crate) fn ok_manifest(manifest: Manifest) -> *mut Self {
        let invalid_count = manifest.invalid.len() as u32;
        let (items, len) = into_raw_parts(manifest.media_files.into_iter().map(FfiMediaFile::from).collect());
        let data = Box::new(FfiManifest {
            items,
            len,
            invalid_count,
        });
        Self::ok(FfiDataTag::Manifest, 200, Box::into_raw(data) as *mut c_void)
    }

    /// Any answer from the server is a successful call; the caller inspects
    /// `response_code` to decide whether the submission was accepted.
    pub(crate) fn ok_post_result(result: HttpPostResult) -> *mut Self {
        let status = result.response_code;
        let data = Box::new(FfiPostResult {
            response_code: status,
            reason_phrase: c_string(result.reason_phrase),
            http_response: c_string(result.http_response),
        });
        Self::ok(FfiDataTag::PostResult, status, Box::into_raw(data) as *mut c_void)
    }

    pub(crate) fn ok_media_report(report: MediaDownloadReport) -> *mut Self {
        let data = Box::new(FfiMediaReport {
            downloaded: report.downloaded.len() as u32,
            skipped: report.skipped.len() as u32,
            failed: report.failed.len() as u32,
        });
        Self::ok(FfiDataTag::MediaReport, 200, Box::into_raw(data) as *mut c_void)
    }

    /// Build an error result from a form-source failure.
    pub(crate) fn from_error(err: FormSourceError) -> *mut Self {
        let message = err.to_string();
        let (code, status) = match &err {
            FormSourceError::Unreachable { .. } => (FfiErrorCode::Unreachable, 0),
            FormSourceError::AuthRequired { status, .. } => (FfiErrorCode::AuthRequired, *status),
            FormSourceError::Server { status, .. } => (FfiErrorCode::Http, *status),
            FormSourceError::Parse { .. } => (FfiErrorCode::Parse, 200),
            FormSourceError::SubmissionTooLarge { .. } => (FfiErrorCode::SubmissionTooLarge, 0),
            FormSourceError::InvalidMediaFileName(_) => (FfiErrorCode::InvalidArgument, 0),
            FormSourceError::Request(inner) => (request_error_code(inner), 0),
        };
        Self::error(code, status, message)
    }

    pub(crate) fn from_parse_error(err: ParseError) -> *mut Self {
        Self::error(FfiErrorCode::Parse, 0, err.to_string())
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, 0, format!("null argument: {name}"))
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, 0, msg)
    }
}

fn request_error_code(err: &OpenRosaError) -> FfiErrorCode {
    match err {
        OpenRosaError::InvalidUri { .. } => FfiErrorCode::InvalidArgument,
        OpenRosaError::Transport(_) => FfiErrorCode::Unreachable,
        OpenRosaError::UnexpectedContentType { .. } => FfiErrorCode::UnexpectedContentType,
        OpenRosaError::LocalFile { .. } => FfiErrorCode::LocalFile,
    }
}
