//! C-ABI wrapper around `openrosa-core`.
//!
//! # Overview
//! Exposes form-list and manifest fetches, media downloads and submission
//! uploads through `extern "C"` functions so a host application can talk to
//! an OpenRosa server without linking against Rust types directly. The
//! parse-only helpers let a host that does its own HTTP reuse the parsers.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - A client handle owns the core `OpenRosaServer` and its credential
//!   store; credentials are set per host.
//! - A single `FfiOpenRosaResult` envelope with `FfiDataTag` + `void* data`
//!   conveys success payloads and errors uniformly.
//! - The C caller owns all returned pointers and must call the matching
//!   `openrosa_free_*` function to release them.

pub mod types;

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use openrosa_core::{
    parse_form_list, parse_manifest, ClientConfig, Credentials, FormSourceError, MemoryCredentialStore,
    OpenRosaClient, OpenRosaServer, SubmissionPayload, UreqTransport,
};

use types::*;

/// Borrow a C string argument. `None` for null or non-UTF-8 input.
fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client for the server at `base_url`.
///
/// `config_json` is a `ClientConfig` JSON object, or null for defaults.
/// Returns null if `base_url` is null or invalid, if `config_json` does not
/// parse, or if an internal panic occurs. The caller must free the returned
/// pointer with `openrosa_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_client_new(base_url: *const c_char, config_json: *const c_char) -> *mut FfiOpenRosaClient {
    catch_unwind(|| {
        let Some(url) = str_arg(base_url) else {
            return std::ptr::null_mut();
        };
        let config = if config_json.is_null() {
            ClientConfig::default()
        } else {
            match str_arg(config_json).map(ClientConfig::from_json) {
                Some(Ok(config)) => config,
                _ => return std::ptr::null_mut(),
            }
        };

        let mut client = OpenRosaClient::new(UreqTransport::new(&config));
        if let Some(user_agent) = &config.user_agent {
            client = client.with_user_agent(user_agent.clone());
        }
        let credentials = Arc::new(MemoryCredentialStore::new());
        match OpenRosaServer::new(client, url, credentials.clone()) {
            Ok(inner) => Box::into_raw(Box::new(FfiOpenRosaClient { inner, credentials })),
            Err(_) => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client created by `openrosa_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_client_free(client: *mut FfiOpenRosaClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(client) });
        }));
    }
}

/// Use `username` / `password` for every request to `host`.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_client_set_credentials(
    client: *const FfiOpenRosaClient,
    host: *const c_char,
    username: *const c_char,
    password: *const c_char,
) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiErrorCode::NullArg;
        }
        let client = unsafe { &*client };
        match (str_arg(host), str_arg(username), str_arg(password)) {
            (Some(host), Some(username), Some(password)) => {
                client.credentials.set(host, Credentials::new(username, password));
                FfiErrorCode::Ok
            }
            _ => FfiErrorCode::NullArg,
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Stop sending credentials to `host`.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_client_clear_credentials(client: *const FfiOpenRosaClient, host: *const c_char) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiErrorCode::NullArg;
        }
        let client = unsafe { &*client };
        match str_arg(host) {
            Some(host) => {
                client.credentials.clear(host);
                FfiErrorCode::Ok
            }
            None => FfiErrorCode::NullArg,
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

// ---------------------------------------------------------------------------
// Server operations
// ---------------------------------------------------------------------------

/// Fetch and parse the server's form list.
///
/// Returns a result with `data_tag = FormList` on success.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_fetch_form_list(client: *const FfiOpenRosaClient) -> *mut FfiOpenRosaResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiOpenRosaResult::null_arg("client");
        }
        let client = unsafe { &*client };
        match client.inner.fetch_form_list() {
            Ok(list) => FfiOpenRosaResult::ok_form_list(list),
            Err(e) => FfiOpenRosaResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_fetch_form_list"))
}

/// Fetch and parse the manifest at `manifest_url`.
///
/// Returns a result with `data_tag = Manifest` on success.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_fetch_manifest(
    client: *const FfiOpenRosaClient,
    manifest_url: *const c_char,
) -> *mut FfiOpenRosaResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiOpenRosaResult::null_arg("client");
        }
        let Some(url) = str_arg(manifest_url) else {
            return FfiOpenRosaResult::null_arg("manifest_url");
        };
        let client = unsafe { &*client };
        match client.inner.fetch_manifest(url) {
            Ok(manifest) => FfiOpenRosaResult::ok_manifest(manifest),
            Err(e) => FfiOpenRosaResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_fetch_manifest"))
}

/// Fetch the manifest at `manifest_url` and download every missing or
/// changed media file into `media_dir`.
///
/// Returns a result with `data_tag = MediaReport` on success.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_download_media(
    client: *const FfiOpenRosaClient,
    manifest_url: *const c_char,
    media_dir: *const c_char,
) -> *mut FfiOpenRosaResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiOpenRosaResult::null_arg("client");
        }
        let Some(url) = str_arg(manifest_url) else {
            return FfiOpenRosaResult::null_arg("manifest_url");
        };
        let Some(dir) = str_arg(media_dir) else {
            return FfiOpenRosaResult::null_arg("media_dir");
        };
        let client = unsafe { &*client };
        let result = client
            .inner
            .fetch_manifest(url)
            .and_then(|manifest| client.inner.download_media_files(&manifest, &PathBuf::from(dir)));
        match result {
            Ok(report) => FfiOpenRosaResult::ok_media_report(report),
            Err(e) => FfiOpenRosaResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_download_media"))
}

/// Upload a submission and its attachments to the server's submission URL.
///
/// `attachment_paths` points to `attachments_len` C strings and may be null
/// when `attachments_len` is 0. Any server answer yields `data_tag =
/// PostResult`; check its `response_code` for 201.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_submit(
    client: *const FfiOpenRosaClient,
    submission_path: *const c_char,
    attachment_paths: *const *const c_char,
    attachments_len: u32,
) -> *mut FfiOpenRosaResult {
    catch_unwind(AssertUnwindSafe(|| {
        if client.is_null() {
            return FfiOpenRosaResult::null_arg("client");
        }
        let Some(submission) = str_arg(submission_path) else {
            return FfiOpenRosaResult::null_arg("submission_path");
        };
        if attachment_paths.is_null() && attachments_len > 0 {
            return FfiOpenRosaResult::null_arg("attachment_paths");
        }

        let mut attachments = Vec::with_capacity(attachments_len as usize);
        for i in 0..attachments_len as usize {
            match str_arg(unsafe { *attachment_paths.add(i) }) {
                Some(path) => attachments.push(PathBuf::from(path)),
                None => return FfiOpenRosaResult::null_arg("attachment_paths[i]"),
            }
        }

        let client = unsafe { &*client };
        let payload = match SubmissionPayload::from_files(submission, attachments, client.inner.submission_url()) {
            Ok(payload) => payload,
            Err(e) => return FfiOpenRosaResult::from_error(FormSourceError::Request(e)),
        };
        match client.inner.submit(&payload) {
            Ok(result) => FfiOpenRosaResult::ok_post_result(result),
            Err(e) => FfiOpenRosaResult::from_error(e),
        }
    }))
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_submit"))
}

// ---------------------------------------------------------------------------
// Parse-only helpers
// ---------------------------------------------------------------------------

/// Parse a form list document the caller fetched itself.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_parse_form_list(xml: *const c_char) -> *mut FfiOpenRosaResult {
    catch_unwind(|| {
        let Some(xml) = str_arg(xml) else {
            return FfiOpenRosaResult::null_arg("xml");
        };
        match parse_form_list(xml.as_bytes()) {
            Ok(list) => FfiOpenRosaResult::ok_form_list(list),
            Err(e) => FfiOpenRosaResult::from_parse_error(e),
        }
    })
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_parse_form_list"))
}

/// Parse a manifest document the caller fetched itself.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_parse_manifest(xml: *const c_char) -> *mut FfiOpenRosaResult {
    catch_unwind(|| {
        let Some(xml) = str_arg(xml) else {
            return FfiOpenRosaResult::null_arg("xml");
        };
        match parse_manifest(xml.as_bytes()) {
            Ok(manifest) => FfiOpenRosaResult::ok_manifest(manifest),
            Err(e) => FfiOpenRosaResult::from_parse_error(e),
        }
    })
    .unwrap_or_else(|_| FfiOpenRosaResult::panic("panic in openrosa_parse_manifest"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiOpenRosaResult` returned by any fetch, submit or parse
/// function. Safe to call with null. Uses `data_tag` to determine what
/// `data` points to.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_free_result(result: *mut FfiOpenRosaResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let result = unsafe { Box::from_raw(result) };
        free_c_string(result.error_message);
        if result.data.is_null() {
            return;
        }
        match result.data_tag {
            FfiDataTag::FormList => {
                let list = unsafe { Box::from_raw(result.data as *mut FfiFormList) };
                for form in unsafe { from_raw_parts(list.items, list.len) } {
                    form.free_fields();
                }
            }
            FfiDataTag::Manifest => {
                let manifest = unsafe { Box::from_raw(result.data as *mut FfiManifest) };
                for media in unsafe { from_raw_parts(manifest.items, manifest.len) } {
                    media.free_fields();
                }
            }
            FfiDataTag::PostResult => {
                let post = unsafe { Box::from_raw(result.data as *mut FfiPostResult) };
                free_c_string(post.reason_phrase);
                free_c_string(post.http_response);
            }
            FfiDataTag::MediaReport => {
                drop(unsafe { Box::from_raw(result.data as *mut FfiMediaReport) });
            }
            FfiDataTag::None => {}
        }
    }));
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn openrosa_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| free_c_string(s));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
