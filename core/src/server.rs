//! Form-source façade over [`OpenRosaClient`].
//!
//! # Design
//! `OpenRosaServer` is what the form download and submission workflows talk
//! to. It derives endpoint URLs from a base URL, looks credentials up per
//! host in a [`CredentialStore`], and turns statuses and parse failures into
//! [`FormSourceError`]s. Submissions are the exception: their result is
//! returned as an [`HttpPostResult`] so the caller can record exactly what
//! the server said.

use std::fs;
use std::io::Write;
use std::path::{Component, Path};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::client::{OpenRosaClient, FORM_LIST_PATH, SUBMISSION_PATH};
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{FormSourceError, OpenRosaError};
use crate::formlist::{parse_form_list, parse_manifest};
use crate::hash::{hashes_match, is_up_to_date, md5_hex};
use crate::http::HttpTransport;
use crate::submission::{LoadedFile, SubmissionCapacity};
use crate::types::{FormDescriptor, FormList, HttpPostResult, Manifest, MediaFileDescriptor, SubmissionPayload};
use crate::uri::Uri;

const XML_CONTENT_TYPE: &str = "text/xml";

/// Outcome of [`OpenRosaServer::download_media_files`], per file name.
#[derive(Debug, Default)]
pub struct MediaDownloadReport {
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, FormSourceError)>,
}

pub struct OpenRosaServer<T> {
    client: OpenRosaClient<T>,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl<T: HttpTransport> OpenRosaServer<T> {
    pub fn new(
        client: OpenRosaClient<T>,
        base_url: &str,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, OpenRosaError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Uri::parse(&base_url)?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn client(&self) -> &OpenRosaClient<T> {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn form_list_url(&self) -> String {
        format!("{}{FORM_LIST_PATH}", self.base_url)
    }

    pub fn submission_url(&self) -> String {
        format!("{}{SUBMISSION_PATH}", self.base_url)
    }

    fn credentials_for(&self, url: &str) -> Option<Credentials> {
        let uri = Uri::parse(url).ok()?;
        self.credentials.credentials_for(uri.host())
    }

    /// GET `url` and return the body of a 200.
    fn get(&self, url: &str, content_type: Option<&str>) -> Result<Vec<u8>, FormSourceError> {
        let credentials = self.credentials_for(url);
        let result = self
            .client
            .execute_get_request(url, content_type, credentials.as_ref())
            .map_err(|e| FormSourceError::from_client(url, e))?;
        if !result.is_success() {
            return Err(FormSourceError::from_status(
                url,
                result.status_code,
                result.error_message.unwrap_or_default(),
            ));
        }
        Ok(result.body.unwrap_or_default())
    }

    pub fn fetch_form_list(&self) -> Result<FormList, FormSourceError> {
        let url = self.form_list_url();
        let body = self.get(&url, Some(XML_CONTENT_TYPE))?;
        let list = parse_form_list(&body).map_err(|source| FormSourceError::Parse {
            url: url.clone(),
            source,
        })?;
        info!(%url, forms = list.forms.len(), invalid = list.invalid.len(), "fetched form list");
        Ok(list)
    }

    /// Form definition XML.
    pub fn fetch_form(&self, form: &FormDescriptor) -> Result<Vec<u8>, FormSourceError> {
        let body = self.get(&form.download_url, Some(XML_CONTENT_TYPE))?;
        if let Some(expected) = form.hash.as_deref() {
            if !hashes_match(&md5_hex(&body), expected) {
                warn!(form_id = %form.form_id, "form definition does not match advertised hash");
            }
        }
        Ok(body)
    }

    pub fn fetch_manifest(&self, manifest_url: &str) -> Result<Manifest, FormSourceError> {
        let body = self.get(manifest_url, Some(XML_CONTENT_TYPE))?;
        parse_manifest(&body).map_err(|source| FormSourceError::Parse {
            url: manifest_url.to_string(),
            source,
        })
    }

    pub fn fetch_media_file(&self, media: &MediaFileDescriptor) -> Result<Vec<u8>, FormSourceError> {
        self.get(&media.download_url, None)
    }

    /// Probe `submission_url` with HEAD for the accepted content length.
    pub fn submission_capacity_at(&self, submission_url: &str) -> Result<SubmissionCapacity, FormSourceError> {
        let credentials = self.credentials_for(submission_url);
        let head = self
            .client
            .execute_head_request(submission_url, credentials.as_ref())
            .map_err(|e| FormSourceError::from_client(submission_url, e))?;
        if !(200..300).contains(&head.status_code) {
            return Err(FormSourceError::from_status(
                submission_url,
                head.status_code,
                format!("HEAD returned {}", head.status_code),
            ));
        }
        let capacity = SubmissionCapacity::from_head(&head);
        debug!(url = %submission_url, max = capacity.max_content_length, declared = capacity.declared, "submission capacity");
        Ok(capacity)
    }

    pub fn submission_capacity(&self) -> Result<SubmissionCapacity, FormSourceError> {
        self.submission_capacity_at(&self.submission_url())
    }

    /// Upload `payload` after checking it against the server's capacity.
    ///
    /// Every file is read before the capacity probe, so a missing or
    /// unreadable file fails without network traffic. An oversized payload
    /// is rejected locally. Otherwise the server's limit becomes the
    /// per-request budget for the upload.
    pub fn submit(&self, payload: &SubmissionPayload) -> Result<HttpPostResult, FormSourceError> {
        let submission = LoadedFile::read(&payload.submission_file).map_err(FormSourceError::Request)?;
        let attachments = payload
            .attachments
            .iter()
            .map(|p| LoadedFile::read(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(FormSourceError::Request)?;

        let capacity = self.submission_capacity_at(&payload.uri)?;
        if !capacity.accepts(payload.content_length) {
            return Err(FormSourceError::SubmissionTooLarge {
                declared: payload.content_length,
                limit: capacity.max_content_length,
            });
        }

        let credentials = self.credentials_for(&payload.uri);
        let result = self
            .client
            .upload_loaded_files(
                &submission,
                &attachments,
                &payload.uri,
                credentials.as_ref(),
                capacity.max_content_length,
            )
            .map_err(|e| FormSourceError::from_client(&payload.uri, e))?;
        info!(uri = %payload.uri, status = result.response_code, "submission uploaded");
        Ok(result)
    }

    /// Fetch every manifest entry whose local copy in `media_dir` is missing
    /// or stale, writing each through a temporary file.
    ///
    /// A bad name, failed fetch or failed write is recorded against that
    /// entry in [`MediaDownloadReport::failed`] and the rest still proceed.
    /// Only an unusable `media_dir` fails the whole call.
    pub fn download_media_files(&self, manifest: &Manifest, media_dir: &Path) -> Result<MediaDownloadReport, FormSourceError> {
        fs::create_dir_all(media_dir).map_err(|e| local_file(media_dir, e))?;

        let mut report = MediaDownloadReport::default();
        for media in &manifest.media_files {
            let dest = media_dir.join(&media.filename);
            if check_media_file_name(&media.filename).is_ok() && is_up_to_date(&dest, &media.hash) {
                report.skipped.push(media.filename.clone());
                continue;
            }

            match self.download_media_file(media, media_dir) {
                Ok(()) => report.downloaded.push(media.filename.clone()),
                Err(err) => {
                    warn!(filename = %media.filename, error = %err, "media file not downloaded");
                    report.failed.push((media.filename.clone(), err));
                }
            }
        }
        Ok(report)
    }

    fn download_media_file(&self, media: &MediaFileDescriptor, media_dir: &Path) -> Result<(), FormSourceError> {
        check_media_file_name(&media.filename)?;
        let data = self.fetch_media_file(media)?;
        if !hashes_match(&md5_hex(&data), &media.hash) {
            warn!(filename = %media.filename, "media file does not match advertised hash");
        }

        let dest = media_dir.join(&media.filename);
        let mut tmp = NamedTempFile::new_in(media_dir).map_err(|e| local_file(media_dir, e))?;
        tmp.write_all(&data).map_err(|e| local_file(tmp.path(), e))?;
        tmp.persist(&dest).map_err(|e| local_file(&dest, e.error))?;
        Ok(())
    }
}

/// Manifest entries in `manifest` whose local copy in `media_dir` is missing
/// or differs from the advertised hash.
pub fn media_files_to_download<'a>(manifest: &'a Manifest, media_dir: &Path) -> Vec<&'a MediaFileDescriptor> {
    manifest
        .media_files
        .iter()
        .filter(|m| !is_up_to_date(&media_dir.join(&m.filename), &m.hash))
        .collect()
}

/// Reject names that would escape the media directory: anything but a
/// single normal path component.
fn check_media_file_name(name: &str) -> Result<(), FormSourceError> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    let bad = !single || name.contains('/') || name.contains('\\') || name.contains('\0');
    if bad {
        return Err(FormSourceError::InvalidMediaFileName(name.to_string()));
    }
    Ok(())
}

fn local_file(path: &Path, source: std::io::Error) -> FormSourceError {
    FormSourceError::Request(OpenRosaError::local_file(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(files: &[(&str, &str)]) -> Manifest {
        Manifest {
            media_files: files
                .iter()
                .map(|(name, hash)| MediaFileDescriptor {
                    filename: name.to_string(),
                    hash: hash.to_string(),
                    download_url: format!("https://x/mediaFile/0/{name}"),
                })
                .collect(),
            invalid: Vec::new(),
        }
    }

    #[test]
    fn only_missing_or_changed_files_are_planned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("same.csv"), b"a,b").unwrap();
        fs::write(dir.path().join("changed.csv"), b"old").unwrap();

        let m = manifest(&[
            ("same.csv", &format!("md5:{}", md5_hex(b"a,b"))),
            ("changed.csv", &md5_hex(b"new")),
            ("missing.png", "md5:00"),
        ]);
        let names: Vec<&str> = media_files_to_download(&m, dir.path())
            .into_iter()
            .map(|f| f.filename.as_str())
            .collect();
        assert_eq!(names, vec!["changed.csv", "missing.png"]);
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["../evil.csv", "a/b.csv", "a\\b.csv", "..", ".", "", "/etc/passwd"] {
            assert!(check_media_file_name(name).is_err(), "{name:?} accepted");
        }
        for name in ["nombre.csv", "x..y", "v1..2.csv", "..hidden"] {
            assert!(check_media_file_name(name).is_ok(), "{name:?} rejected");
        }
    }
}
