//! The OpenRosa HTTP interface.
//!
//! # Design
//! `OpenRosaClient` owns a transport and a shared [`AuthCache`]. Every
//! request passes through [`OpenRosaClient::execute_at`], which adds the
//! OpenRosa headers, strips cookies, attaches cached credentials and answers
//! at most one authentication challenge. The GET, HEAD and upload operations
//! are thin layers over it that turn responses into result structs. Non-2xx
//! statuses come back as data; only transport failures and local
//! preconditions are `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::auth::{answer_challenge, AuthCache};
use crate::credentials::Credentials;
use crate::error::OpenRosaError;
use crate::hash::md5_hex;
use crate::http::{reason_phrase, HttpRequest, HttpResponse, HttpTransport, AUTHORIZATION, CONTENT_TYPE, COOKIE};
use crate::submission::{batch_body, plan_batches, LoadedFile, MultipartBody};
use crate::types::{HttpGetResult, HttpHeadResult, HttpPostResult, SubmissionPayload};
use crate::uri::Uri;

pub const OPENROSA_VERSION_HEADER: &str = "X-OpenRosa-Version";
pub const OPENROSA_VERSION: &str = "1.0";
pub const ACCEPT_CONTENT_LENGTH_HEADER: &str = "X-OpenRosa-Accept-Content-Length";
pub const DATE_HEADER: &str = "Date";
pub const ACCEPT_ENCODING_HEADER: &str = "Accept-Encoding";
pub const USER_AGENT_HEADER: &str = "User-Agent";
pub const GZIP: &str = "gzip";

pub const FORM_LIST_PATH: &str = "/formList";
pub const SUBMISSION_PATH: &str = "/submission";

/// Source of the time stamped into the `Date` header.
pub type Clock = fn() -> DateTime<Utc>;

/// RFC 1123 date in GMT, as sent in the `Date` header.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Blocking OpenRosa client over a pluggable transport.
pub struct OpenRosaClient<T> {
    transport: T,
    auth_cache: Arc<AuthCache>,
    user_agent: Option<String>,
    clock: Clock,
}

impl<T: HttpTransport> OpenRosaClient<T> {
    /// Client with its own, empty authentication cache.
    pub fn new(transport: T) -> Self {
        Self::with_auth_cache(transport, Arc::new(AuthCache::new()))
    }

    /// Client sharing `auth_cache` with other clients. Only state learned
    /// for the same origin and credentials is ever reused.
    pub fn with_auth_cache(transport: T, auth_cache: Arc<AuthCache>) -> Self {
        Self {
            transport,
            auth_cache,
            user_agent: None,
            clock: Utc::now,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn auth_cache(&self) -> &Arc<AuthCache> {
        &self.auth_cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, stamping it with the client's clock.
    pub fn execute(&self, request: HttpRequest, credentials: Option<&Credentials>) -> Result<HttpResponse, OpenRosaError> {
        self.execute_at(request, credentials, (self.clock)())
    }

    /// Send `request` with `now` in its `Date` header.
    ///
    /// A 401 is answered once when `credentials` are given and the challenge
    /// can be met; the response to that retry is returned whatever it is.
    pub fn execute_at(
        &self,
        mut request: HttpRequest,
        credentials: Option<&Credentials>,
        now: DateTime<Utc>,
    ) -> Result<HttpResponse, OpenRosaError> {
        let uri = Uri::parse(&request.url)?;
        self.decorate(&mut request, now);

        let mut proactive = false;
        if let Some(creds) = credentials {
            if let Some(value) = self
                .auth_cache
                .authorization_for(&uri, creds, request.method, request.body_bytes())
            {
                request.headers.insert(AUTHORIZATION, value);
                proactive = true;
            }
        }

        let response = self.transport.execute(&request)?;
        debug!(method = request.method.as_str(), url = %request.url, status = response.status, proactive, "response");
        if response.status != 401 {
            return Ok(response);
        }
        let Some(creds) = credentials else {
            return Ok(response);
        };

        if proactive {
            debug!(origin = %uri.origin(), "cached credentials rejected");
            self.auth_cache.forget(&uri, creds);
        }

        let Some(answer) = answer_challenge(&request, &uri, &response, creds) else {
            return Ok(response);
        };
        request.headers.insert(AUTHORIZATION, answer.authorization);

        let retry = self.transport.execute(&request)?;
        debug!(method = request.method.as_str(), url = %request.url, status = retry.status, "authenticated retry");
        if retry.status == 401 {
            warn!(origin = %uri.origin(), username = creds.username(), "credentials rejected after challenge");
        } else {
            self.auth_cache.record(&uri, creds, answer.state);
        }
        Ok(retry)
    }

    fn decorate(&self, request: &mut HttpRequest, now: DateTime<Utc>) {
        let headers = &mut request.headers;
        headers.remove(COOKIE);
        headers.insert(OPENROSA_VERSION_HEADER, OPENROSA_VERSION);
        headers.insert(ACCEPT_ENCODING_HEADER, GZIP);
        headers.insert(DATE_HEADER, http_date(now));
        if let Some(user_agent) = &self.user_agent {
            headers.insert(USER_AGENT_HEADER, user_agent.as_str());
        }
    }

    /// GET `uri`. A 200 carries the body and its MD5; anything else carries
    /// only the status, headers and an error message.
    ///
    /// When `content_type` is given, a 200 whose `Content-Type` does not
    /// contain it fails with [`OpenRosaError::UnexpectedContentType`]; captive
    /// portals answer with HTML login pages.
    pub fn execute_get_request(
        &self,
        uri: &str,
        content_type: Option<&str>,
        credentials: Option<&Credentials>,
    ) -> Result<HttpGetResult, OpenRosaError> {
        let response = self.execute(HttpRequest::get(uri), credentials)?;

        if response.status != 200 {
            let message = format!(
                "{} {} while accessing {uri}",
                response.status,
                reason_phrase(response.status)
            );
            debug!(%message, "get failed");
            return Ok(HttpGetResult {
                status_code: response.status,
                headers: response.headers,
                body: None,
                hash: String::new(),
                error_message: Some(message),
            });
        }

        if let (Some(expected), Some(actual)) = (content_type, response.headers.get(CONTENT_TYPE)) {
            if !actual.to_ascii_lowercase().contains(&expected.to_ascii_lowercase()) {
                return Err(OpenRosaError::UnexpectedContentType {
                    uri: uri.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let hash = md5_hex(&response.body);
        Ok(HttpGetResult {
            status_code: response.status,
            headers: response.headers,
            body: Some(response.body),
            hash,
            error_message: None,
        })
    }

    /// HEAD `uri`, used to read the server's accepted content length.
    pub fn execute_head_request(&self, uri: &str, credentials: Option<&Credentials>) -> Result<HttpHeadResult, OpenRosaError> {
        let response = self.execute(HttpRequest::head(uri), credentials)?;
        if response.status != 204 {
            debug!(status = response.status, %uri, "head did not return 204");
        }
        Ok(HttpHeadResult {
            status_code: response.status,
            headers: response.headers,
        })
    }

    /// POST the submission and its attachments as multipart requests.
    ///
    /// `content_length` is the byte budget for a single request; attachments
    /// that do not fit are sent in further requests. Every file is read
    /// before anything is sent, so an unreadable file fails the call without
    /// network traffic.
    pub fn upload_submission_and_files(
        &self,
        submission_file: &Path,
        attachments: &[PathBuf],
        uri: &str,
        credentials: Option<&Credentials>,
        content_length: u64,
    ) -> Result<HttpPostResult, OpenRosaError> {
        Uri::parse(uri)?;
        let submission = LoadedFile::read(submission_file)?;
        let files = attachments
            .iter()
            .map(|p| LoadedFile::read(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.upload_loaded_files(&submission, &files, uri, credentials, content_length)
    }

    /// [`upload_submission_and_files`](Self::upload_submission_and_files)
    /// for files already read into memory.
    pub fn upload_loaded_files(
        &self,
        submission: &LoadedFile,
        files: &[LoadedFile],
        uri: &str,
        credentials: Option<&Credentials>,
        content_length: u64,
    ) -> Result<HttpPostResult, OpenRosaError> {
        Uri::parse(uri)?;
        let lens: Vec<u64> = files.iter().map(LoadedFile::len).collect();
        let batches = plan_batches(submission.len(), &lens, content_length);
        let last = batches.len() - 1;

        let mut result = HttpPostResult::new("", 0);
        for (i, range) in batches.into_iter().enumerate() {
            let incomplete = i != last;
            let body = batch_body(MultipartBody::new(), submission, &files[range.clone()], incomplete);
            let request = HttpRequest::post(uri, &body.content_type(), body.finish());

            debug!(%uri, batch = i + 1, of = last + 1, attachments = range.len(), "uploading submission");
            let response = self.execute(request, credentials)?;
            result = post_result(uri, &response);
            if !matches!(response.status, 201 | 202) {
                warn!(%uri, status = response.status, "submission not accepted");
                return Ok(result);
            }
        }
        Ok(result)
    }

    /// Upload a prepared payload, using its declared length as the budget.
    pub fn upload(&self, payload: &SubmissionPayload, credentials: Option<&Credentials>) -> Result<HttpPostResult, OpenRosaError> {
        self.upload_submission_and_files(
            &payload.submission_file,
            &payload.attachments,
            &payload.uri,
            credentials,
            payload.content_length,
        )
    }
}

fn post_result(uri: &str, response: &HttpResponse) -> HttpPostResult {
    let body = response.body_text().trim().to_string();
    let message = if body.is_empty() && !matches!(response.status, 201 | 202) {
        format!(
            "{} {} while posting to {uri}",
            response.status,
            reason_phrase(response.status)
        )
    } else {
        body
    };
    HttpPostResult::new(message, response.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn http_date_is_rfc1123_gmt() {
        let time = Utc.with_ymd_and_hms(2019, 8, 6, 9, 5, 3).unwrap();
        assert_eq!(http_date(time), "Tue, 06 Aug 2019 09:05:03 GMT");
    }

    #[test]
    fn post_result_prefers_server_body() {
        let response = HttpResponse::new(410).with_body("Trying to connect to incorrect server: other.example.com");
        let result = post_result("https://other.example.com/submission", &response);
        assert_eq!(result.response_code, 410);
        assert_eq!(
            result.http_response,
            "Trying to connect to incorrect server: other.example.com"
        );
        assert_eq!(result.reason_phrase, "Gone");
    }

    #[test]
    fn post_result_describes_empty_failures() {
        let result = post_result("https://x/submission", &HttpResponse::new(500));
        assert_eq!(result.http_response, "500 Internal Server Error while posting to https://x/submission");
    }
}
