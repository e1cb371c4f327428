//! Protocol data: form descriptors, manifests and per-request results.
//!
//! # Design
//! Results carry HTTP status as data. Descriptors serialize with the element
//! names the server uses (`formID` aside) so they can be handed across the
//! FFI boundary as JSON.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EntryError, OpenRosaError};
use crate::hash::normalize_hash;
use crate::http::{reason_phrase, Headers};

/// One form advertised by a form list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormDescriptor {
    pub form_id: String,
    pub display_name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    pub download_url: String,
    /// Present only when the form has media attachments.
    #[serde(default)]
    pub manifest_url: Option<String>,
}

impl FormDescriptor {
    /// Advertised hash without the `md5:` prefix.
    pub fn normalized_hash(&self) -> Option<&str> {
        self.hash.as_deref().map(normalize_hash)
    }

    pub fn has_media(&self) -> bool {
        self.manifest_url.is_some()
    }
}

/// One media file listed in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileDescriptor {
    pub filename: String,
    pub hash: String,
    pub download_url: String,
}

impl MediaFileDescriptor {
    pub fn normalized_hash(&self) -> &str {
        normalize_hash(&self.hash)
    }
}

/// A parsed form list. Entries that could not be used are kept in `invalid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormList {
    pub forms: Vec<FormDescriptor>,
    pub invalid: Vec<EntryError>,
    /// Parsed from the pre-OpenRosa `<forms>` format.
    pub legacy: bool,
}

/// A parsed manifest. Entries that could not be used are kept in `invalid`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub media_files: Vec<MediaFileDescriptor>,
    pub invalid: Vec<EntryError>,
}

/// Outcome of a GET that produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpGetResult {
    pub status_code: u16,
    pub headers: Headers,
    /// `Some` only for a 200.
    pub body: Option<Vec<u8>>,
    /// MD5 hex of the body, empty when there is none.
    pub hash: String,
    /// Set for every non-200.
    pub error_message: Option<String>,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Body as a reader, for callers that stream into a parser or a file.
    pub fn body_reader(&self) -> Option<Cursor<&[u8]>> {
        self.body.as_deref().map(Cursor::new)
    }
}

/// Outcome of a HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeadResult {
    pub status_code: u16,
    pub headers: Headers,
}

impl HttpHeadResult {
    /// Parsed `x-openrosa-accept-content-length`, if present and numeric.
    pub fn accept_content_length(&self) -> Option<u64> {
        self.headers
            .get(crate::client::ACCEPT_CONTENT_LENGTH_HEADER)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// Outcome of a submission upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPostResult {
    /// Response body, or a message describing why the upload was not accepted.
    pub http_response: String,
    pub response_code: u16,
    pub reason_phrase: String,
}

impl HttpPostResult {
    pub fn new(http_response: impl Into<String>, response_code: u16) -> Self {
        Self {
            http_response: http_response.into(),
            response_code,
            reason_phrase: reason_phrase(response_code).to_string(),
        }
    }

    /// 201 is the only status that marks a submission as sent.
    pub fn is_accepted(&self) -> bool {
        self.response_code == 201
    }
}

/// A finalized submission ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPayload {
    pub submission_file: PathBuf,
    pub attachments: Vec<PathBuf>,
    pub uri: String,
    /// Total bytes of the submission file and every attachment.
    pub content_length: u64,
}

impl SubmissionPayload {
    /// Build a payload, measuring every file. Fails on the first file that
    /// cannot be read.
    pub fn from_files(
        submission_file: impl Into<PathBuf>,
        attachments: Vec<PathBuf>,
        uri: impl Into<String>,
    ) -> Result<Self, OpenRosaError> {
        let submission_file = submission_file.into();
        let mut content_length = file_len(&submission_file)?;
        for attachment in &attachments {
            content_length += file_len(attachment)?;
        }
        Ok(Self {
            submission_file,
            attachments,
            uri: uri.into(),
            content_length,
        })
    }
}

fn file_len(path: &Path) -> Result<u64, OpenRosaError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| OpenRosaError::local_file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn descriptor_hash_is_normalized() {
        let form = FormDescriptor {
            form_id: "audio_question".into(),
            display_name: "Audio Question".into(),
            version: Some("1".into()),
            hash: Some("md5:abcd1234".into()),
            download_url: "https://x/form?formId=0".into(),
            manifest_url: None,
        };
        assert_eq!(form.normalized_hash(), Some("abcd1234"));
        assert!(!form.has_media());
    }

    #[test]
    fn descriptor_json_uses_camel_case() {
        let file = MediaFileDescriptor {
            filename: "nombre.csv".into(),
            hash: "md5:deadbeef".into(),
            download_url: "https://x/mediaFile/0/nombre.csv".into(),
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["downloadUrl"], "https://x/mediaFile/0/nombre.csv");
    }

    #[test]
    fn head_result_reads_accept_content_length() {
        let mut headers = Headers::new();
        headers.append("X-OpenRosa-Accept-Content-Length", " 10485760 ");
        let head = HttpHeadResult {
            status_code: 204,
            headers,
        };
        assert_eq!(head.accept_content_length(), Some(10_485_760));

        let head = HttpHeadResult {
            status_code: 204,
            headers: Headers::new(),
        };
        assert_eq!(head.accept_content_length(), None);
    }

    #[test]
    fn get_result_body_reader() {
        let result = HttpGetResult {
            status_code: 200,
            headers: Headers::new(),
            body: Some(b"<xforms/>".to_vec()),
            hash: String::new(),
            error_message: None,
        };
        let mut text = String::new();
        result.body_reader().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "<xforms/>");
    }

    #[test]
    fn post_result_only_201_is_accepted() {
        assert!(HttpPostResult::new("", 201).is_accepted());
        assert!(!HttpPostResult::new("", 202).is_accepted());
        assert_eq!(HttpPostResult::new("", 410).reason_phrase, "Gone");
    }

    #[test]
    fn payload_measures_files() {
        let dir = tempfile::tempdir().unwrap();
        let submission = dir.path().join("submission.xml");
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&submission, b"<data/>").unwrap();
        std::fs::write(&photo, vec![0u8; 100]).unwrap();

        let payload = SubmissionPayload::from_files(&submission, vec![photo], "https://x/submission").unwrap();
        assert_eq!(payload.content_length, 107);

        let missing = SubmissionPayload::from_files(&submission, vec![dir.path().join("gone.jpg")], "https://x/submission");
        assert!(matches!(missing, Err(OpenRosaError::LocalFile { .. })));
    }
}
