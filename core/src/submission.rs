//! Multipart submission bodies, batching and the server capacity policy.
//!
//! # Design
//! A submission is posted as `multipart/form-data`. The first part is always
//! the instance XML under [`SUBMISSION_PART_NAME`]; attachments follow in the
//! order the caller listed them, each named by its file name. When the
//! attachments do not fit the per-request byte budget they are split over
//! several requests, each repeating the instance XML, and every request but
//! the last carries [`INCOMPLETE_PART_NAME`] so the server keeps the
//! submission open.

use std::ops::Range;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::OpenRosaError;
use crate::types::HttpHeadResult;

pub const SUBMISSION_PART_NAME: &str = "xml_submission_file";
pub const INCOMPLETE_PART_NAME: &str = "*isIncomplete*";
pub const INCOMPLETE_PART_VALUE: &str = "yes";
pub const MAX_FILES_PER_BATCH: usize = 100;
/// Limit assumed when a server does not declare one.
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 10_485_760;

const SUBMISSION_CONTENT_TYPE: &str = "text/xml";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type for an attachment, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "xml" => "text/xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "3gpp" => "audio/3gpp",
        "3gp" => "video/3gpp",
        "amr" => "audio/amr",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        "webm" => "video/webm",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "geojson" => "application/geo+json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// A `multipart/form-data` body under construction.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    buf: Vec<u8>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::with_boundary(format!("openrosa-{}", Uuid::new_v4().simple()))
    }

    /// Fixed boundary, for reproducible bodies.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buf: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn add_text(&mut self, name: &str, value: &str) {
        self.open_part();
        self.buf.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", escape(name)).as_bytes(),
        );
        self.buf.extend_from_slice(b"Content-Type: text/plain; charset=UTF-8\r\n\r\n");
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    pub fn add_file(&mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) {
        self.open_part();
        self.buf.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape(name),
                escape(filename)
            )
            .as_bytes(),
        );
        self.buf
            .extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
    }

    fn open_part(&mut self) {
        self.buf.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }

    /// Close the body and return its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.buf
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace(['\r', '\n'], " ")
}

/// A file read into memory ahead of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

impl LoadedFile {
    pub fn read(path: &Path) -> Result<Self, OpenRosaError> {
        let data = std::fs::read(path).map_err(|e| OpenRosaError::local_file(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            content_type: content_type_for(path),
            data,
        })
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split attachments into consecutive batches.
///
/// Each batch counts the submission itself against `budget`. A batch always
/// takes at least one attachment, then closes when the next one would exceed
/// the budget or it already holds [`MAX_FILES_PER_BATCH`]. With no
/// attachments there is a single empty batch.
pub fn plan_batches(submission_len: u64, attachment_lens: &[u64], budget: u64) -> Vec<Range<usize>> {
    if attachment_lens.is_empty() {
        return vec![0..0];
    }

    let mut batches = Vec::new();
    let mut start = 0;
    while start < attachment_lens.len() {
        let mut bytes = submission_len;
        let mut end = start;
        loop {
            bytes = bytes.saturating_add(attachment_lens[end]);
            end += 1;
            if end == attachment_lens.len()
                || end - start >= MAX_FILES_PER_BATCH
                || bytes.saturating_add(attachment_lens[end]) > budget
            {
                break;
            }
        }
        batches.push(start..end);
        start = end;
    }
    batches
}

/// Body of one upload request.
pub fn batch_body(
    mut body: MultipartBody,
    submission: &LoadedFile,
    attachments: &[LoadedFile],
    incomplete: bool,
) -> MultipartBody {
    body.add_file(
        SUBMISSION_PART_NAME,
        &submission.file_name,
        SUBMISSION_CONTENT_TYPE,
        &submission.data,
    );
    for file in attachments {
        body.add_file(&file.file_name, &file.file_name, file.content_type, &file.data);
    }
    if incomplete {
        body.add_text(INCOMPLETE_PART_NAME, INCOMPLETE_PART_VALUE);
    }
    body
}

/// What a server is willing to accept, from its HEAD response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionCapacity {
    pub max_content_length: u64,
    /// False when the server did not declare a usable limit.
    pub declared: bool,
}

impl Default for SubmissionCapacity {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            declared: false,
        }
    }
}

impl SubmissionCapacity {
    pub fn from_head(result: &HttpHeadResult) -> Self {
        match result.accept_content_length() {
            Some(max_content_length) => Self {
                max_content_length,
                declared: true,
            },
            None => Self::default(),
        }
    }

    pub fn accepts(&self, content_length: u64) -> bool {
        content_length <= self.max_content_length
    }
}
