//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts the stub OpenRosa server on a random port with its own
//! state, then drives `OpenRosaServer` / `OpenRosaClient` over real HTTP
//! through `UreqTransport`. The server's recorded requests and submissions
//! are read back from the shared state once the client call returns.

#![cfg(feature = "ureq")]

use std::path::PathBuf;
use std::sync::Arc;

use mock_server::{shared, AuthMode, ServerState, SharedState, StubConfig};
use openrosa_core::hash::md5_hex;
use openrosa_core::{
    media_files_to_download, Anonymous, ClientConfig, Credentials, FormSourceError, Manifest, MediaFileDescriptor,
    MemoryCredentialStore, OpenRosaClient, OpenRosaError, OpenRosaServer, SubmissionPayload, UreqTransport,
};

const FORM_XML: &str = "<h:html xmlns:h=\"http://www.w3.org/1999/xhtml\"><h:head><h:title>Audio Question</h:title></h:head></h:html>";

fn start_server(state: SharedState) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, state).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn stub_state(config: StubConfig) -> SharedState {
    let mut state = ServerState::new(config);
    state.add_form("audio_question", "Audio Question", "1", FORM_XML, Vec::new());
    state.add_form(
        "with_media",
        "With Media",
        "3",
        "<h:html>media</h:html>",
        vec![
            ("nombre.csv".to_string(), b"name,label\nuno,One\n".to_vec()),
            ("logo.png".to_string(), vec![0x89, b'P', b'N', b'G']),
        ],
    );
    shared(state)
}

fn digest_config() -> StubConfig {
    StubConfig {
        expected_host: Some("127.0.0.1".to_string()),
        auth: AuthMode::Digest,
        username: "user".to_string(),
        password: "pass".to_string(),
        ..StubConfig::default()
    }
}

fn server_for(base_url: &str, credentials: Option<Credentials>) -> OpenRosaServer<UreqTransport> {
    let client = OpenRosaClient::new(UreqTransport::new(&ClientConfig::default()));
    match credentials {
        Some(credentials) => {
            let store = MemoryCredentialStore::new();
            store.set("127.0.0.1", credentials);
            OpenRosaServer::new(client, base_url, Arc::new(store)).unwrap()
        }
        None => OpenRosaServer::new(client, base_url, Arc::new(Anonymous)).unwrap(),
    }
}

fn write_submission(dir: &std::path::Path, attachments: &[(&str, usize)]) -> (PathBuf, Vec<PathBuf>) {
    let submission = dir.join("submission.xml");
    std::fs::write(&submission, "<data id=\"audio_question\"><name>Ana</name></data>").unwrap();
    let files = attachments
        .iter()
        .map(|(name, len)| {
            let path = dir.join(name);
            std::fs::write(&path, vec![b'x'; *len]).unwrap();
            path
        })
        .collect();
    (submission, files)
}

#[test]
fn form_download_lifecycle_with_digest() {
    let state = stub_state(digest_config());
    let base = start_server(state.clone());
    let server = server_for(&base, Some(Credentials::new("user", "pass")));

    // Form list: one challenge, then the list.
    let list = server.fetch_form_list().unwrap();
    assert_eq!(list.forms.len(), 2);
    assert!(list.invalid.is_empty());
    let audio = &list.forms[0];
    assert_eq!(audio.form_id, "audio_question");
    assert_eq!(audio.display_name, "Audio Question");
    assert_eq!(audio.version.as_deref(), Some("1"));
    assert_eq!(audio.manifest_url, None);
    assert_eq!(audio.normalized_hash(), Some(md5_hex(FORM_XML.as_bytes()).as_str()));

    // Form definition: proactive digest, no second challenge.
    let xml = server.fetch_form(audio).unwrap();
    assert_eq!(xml, FORM_XML.as_bytes());

    // Manifest and media.
    let with_media = &list.forms[1];
    let manifest = server.fetch_manifest(with_media.manifest_url.as_deref().unwrap()).unwrap();
    assert_eq!(manifest.media_files.len(), 2);
    assert_eq!(
        manifest.media_files[0].normalized_hash(),
        md5_hex(b"name,label\nuno,One\n")
    );

    let media_dir = tempfile::tempdir().unwrap();
    let report = server.download_media_files(&manifest, media_dir.path()).unwrap();
    assert_eq!(report.downloaded, vec!["nombre.csv", "logo.png"]);
    assert!(report.skipped.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(
        std::fs::read(media_dir.path().join("nombre.csv")).unwrap(),
        b"name,label\nuno,One\n"
    );

    // Everything is now up to date.
    assert!(media_files_to_download(&manifest, media_dir.path()).is_empty());
    let report = server.download_media_files(&manifest, media_dir.path()).unwrap();
    assert!(report.downloaded.is_empty());
    assert_eq!(report.skipped.len(), 2);

    let state = state.blocking_read();
    let challenged = state.requests.iter().filter(|r| r.header("authorization").is_none()).count();
    assert_eq!(challenged, 1, "only the first request should go without credentials");
    assert!(state.requests.iter().all(|r| r.header("cookie").is_none()));
    assert!(state
        .requests
        .iter()
        .all(|r| r.header("x-openrosa-version") == Some("1.0")));
}

#[test]
fn missing_credentials_classify_as_auth_required() {
    let base = start_server(stub_state(digest_config()));
    let server = server_for(&base, None);

    let err = server.fetch_form_list().unwrap_err();
    assert!(matches!(err, FormSourceError::AuthRequired { status: 401, .. }), "{err}");
}

#[test]
fn wrong_password_is_rejected_after_one_retry() {
    let state = stub_state(digest_config());
    let base = start_server(state.clone());
    let server = server_for(&base, Some(Credentials::new("user", "wrong")));

    let err = server.fetch_form_list().unwrap_err();
    assert!(matches!(err, FormSourceError::AuthRequired { status: 401, .. }));
    assert_eq!(state.blocking_read().requests.len(), 2);
}

/// Manifest for form 1 of `stub_state`, listing `names` whether the server
/// has them or not.
fn media_manifest(base: &str, names: &[&str]) -> Manifest {
    Manifest {
        media_files: names
            .iter()
            .map(|name| MediaFileDescriptor {
                filename: name.to_string(),
                hash: "md5:00".to_string(),
                download_url: format!("{base}/mediaFile/1/{name}"),
            })
            .collect(),
        invalid: Vec::new(),
    }
}

#[test]
fn missing_media_file_does_not_stop_the_rest() {
    let base = start_server(stub_state(StubConfig::default()));
    let server = server_for(&base, None);
    let media_dir = tempfile::tempdir().unwrap();

    let manifest = media_manifest(&base, &["nombre.csv", "missing.csv", "logo.png"]);
    let report = server.download_media_files(&manifest, media_dir.path()).unwrap();

    assert_eq!(report.downloaded, vec!["nombre.csv", "logo.png"]);
    assert_eq!(report.failed.len(), 1);
    let (name, err) = &report.failed[0];
    assert_eq!(name, "missing.csv");
    assert!(matches!(err, FormSourceError::Server { status: 404, .. }), "{err}");
    assert!(media_dir.path().join("logo.png").exists());
    assert!(!media_dir.path().join("missing.csv").exists());
}

#[test]
fn path_like_media_name_is_reported_and_others_download() {
    let state = stub_state(StubConfig::default());
    let base = start_server(state.clone());
    let server = server_for(&base, None);
    let root = tempfile::tempdir().unwrap();
    let media_dir = root.path().join("media");

    let manifest = media_manifest(&base, &["nombre.csv", "../evil.csv", "logo.png"]);
    let report = server.download_media_files(&manifest, &media_dir).unwrap();

    assert_eq!(report.downloaded, vec!["nombre.csv", "logo.png"]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(&report.failed[0].1, FormSourceError::InvalidMediaFileName(n) if n == "../evil.csv"));
    assert!(!root.path().join("evil.csv").exists());
    assert_eq!(state.blocking_read().requests.len(), 2);
}

#[test]
fn media_name_with_double_dot_inside_is_downloaded() {
    let mut state = ServerState::new(StubConfig::default());
    state.add_form("dots", "Dots", "1", "<h:html/>", vec![("v1..2.csv".to_string(), b"a,b".to_vec())]);
    let base = start_server(shared(state));
    let server = server_for(&base, None);
    let media_dir = tempfile::tempdir().unwrap();

    let manifest = server.fetch_manifest(&format!("{base}/manifest?formId=0")).unwrap();
    let report = server.download_media_files(&manifest, media_dir.path()).unwrap();

    assert_eq!(report.downloaded, vec!["v1..2.csv"]);
    assert!(report.failed.is_empty());
    assert_eq!(std::fs::read(media_dir.path().join("v1..2.csv")).unwrap(), b"a,b");
}

#[test]
fn manifest_for_form_without_media_is_server_error() {
    let base = start_server(stub_state(StubConfig::default()));
    let server = server_for(&base, None);

    let err = server.fetch_manifest(&format!("{base}/manifest?formId=0")).unwrap_err();
    assert!(matches!(err, FormSourceError::Server { status: 404, .. }));
}

#[test]
fn unreachable_server_is_classified() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = server_for(&format!("http://{addr}"), None);
    let err = server.fetch_form_list().unwrap_err();
    assert!(matches!(err, FormSourceError::Unreachable { .. }), "{err}");
}

#[test]
fn head_reports_capacity() {
    let base = start_server(stub_state(digest_config()));
    let server = server_for(&base, Some(Credentials::new("user", "pass")));

    let head = server
        .client()
        .execute_head_request(&server.submission_url(), Some(&Credentials::new("user", "pass")))
        .unwrap();
    assert_eq!(head.status_code, 204);
    assert_eq!(head.accept_content_length(), Some(10_485_760));

    let capacity = server.submission_capacity().unwrap();
    assert!(capacity.declared);
    assert!(!capacity.accepts(20_000_000));
}

#[test]
fn submission_with_two_attachments_is_accepted() {
    let state = stub_state(digest_config());
    let base = start_server(state.clone());
    let server = server_for(&base, Some(Credentials::new("user", "pass")));
    let dir = tempfile::tempdir().unwrap();
    let (submission, attachments) = write_submission(dir.path(), &[("photo.jpg", 2048), ("audio.m4a", 1024)]);

    let payload = SubmissionPayload::from_files(submission, attachments, server.submission_url()).unwrap();
    let result = server.submit(&payload).unwrap();

    assert_eq!(result.response_code, 201);
    assert!(result.is_accepted());
    assert!(result.http_response.contains("OpenRosaResponse"));

    let state = state.blocking_read();
    assert_eq!(state.submissions.len(), 1);
    let parts = &state.submissions[0].parts;
    let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["xml_submission_file", "photo.jpg", "audio.m4a"]);
    assert_eq!(parts[0].content_type.as_deref(), Some("text/xml"));
    assert_eq!(parts[1].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(parts[1].data.len(), 2048);
    assert!(!state.submissions[0].incomplete);
}

#[test]
fn submission_to_wrong_host_returns_410() {
    let base = start_server(stub_state(digest_config()));
    let wrong = base.replace("127.0.0.1", "localhost");
    let client = OpenRosaClient::new(UreqTransport::default());
    let dir = tempfile::tempdir().unwrap();
    let (submission, attachments) = write_submission(dir.path(), &[("a.jpg", 10), ("b.jpg", 10)]);

    let result = client
        .upload_submission_and_files(
            &submission,
            &attachments,
            &format!("{wrong}/submission"),
            Some(&Credentials::new("user", "pass")),
            10_485_760,
        )
        .unwrap();

    assert_eq!(result.response_code, 410);
    assert_eq!(result.http_response, "Trying to connect to incorrect server: localhost");
}

#[test]
fn oversized_submission_is_rejected_before_upload() {
    let config = StubConfig {
        max_content_length: 1000,
        ..StubConfig::default()
    };
    let state = stub_state(config);
    let base = start_server(state.clone());
    let server = server_for(&base, None);
    let dir = tempfile::tempdir().unwrap();
    let (submission, attachments) = write_submission(dir.path(), &[("video.mp4", 5000)]);

    let payload = SubmissionPayload::from_files(submission, attachments, server.submission_url()).unwrap();
    let err = server.submit(&payload).unwrap_err();

    assert!(matches!(err, FormSourceError::SubmissionTooLarge { limit: 1000, .. }));
    let state = state.blocking_read();
    assert!(state.submissions.is_empty());
    assert!(state.requests.iter().all(|r| r.method == "HEAD"));
}

#[test]
fn attachment_removed_after_preparing_fails_before_capacity_probe() {
    let state = stub_state(StubConfig::default());
    let base = start_server(state.clone());
    let server = server_for(&base, None);
    let dir = tempfile::tempdir().unwrap();
    let (submission, attachments) = write_submission(dir.path(), &[("photo.jpg", 100)]);

    let payload = SubmissionPayload::from_files(submission, attachments.clone(), server.submission_url()).unwrap();
    std::fs::remove_file(&attachments[0]).unwrap();
    let err = server.submit(&payload).unwrap_err();

    assert!(matches!(err, FormSourceError::Request(OpenRosaError::LocalFile { .. })), "{err}");
    assert!(state.blocking_read().requests.is_empty());
}

#[test]
fn attachments_over_budget_are_split_into_batches() {
    let state = stub_state(StubConfig::default());
    let base = start_server(state.clone());
    let client = OpenRosaClient::new(UreqTransport::default());
    let dir = tempfile::tempdir().unwrap();
    let (submission, attachments) = write_submission(dir.path(), &[("a.jpg", 600), ("b.jpg", 600), ("c.jpg", 600)]);

    let result = client
        .upload_submission_and_files(&submission, &attachments, &format!("{base}/submission"), None, 1300)
        .unwrap();

    assert_eq!(result.response_code, 201);
    let state = state.blocking_read();
    assert_eq!(state.submissions.len(), 2);
    let first: Vec<&str> = state.submissions[0].parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(first, vec!["xml_submission_file", "a.jpg", "b.jpg", "*isIncomplete*"]);
    assert!(state.submissions[0].incomplete);
    let second: Vec<&str> = state.submissions[1].parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(second, vec!["xml_submission_file", "c.jpg"]);
    assert!(!state.submissions[1].incomplete);
}

#[test]
fn unreadable_attachment_fails_before_any_request() {
    let state = stub_state(StubConfig::default());
    let base = start_server(state.clone());
    let client = OpenRosaClient::new(UreqTransport::default());
    let dir = tempfile::tempdir().unwrap();
    let (submission, _) = write_submission(dir.path(), &[]);

    let result = client.upload_submission_and_files(
        &submission,
        &[dir.path().join("missing.jpg")],
        &format!("{base}/submission"),
        None,
        10_485_760,
    );

    assert!(result.is_err());
    assert!(state.blocking_read().requests.is_empty());
}
