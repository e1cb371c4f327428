//! Stub OpenRosa server for integration tests and local development.
//!
//! Serves a form list, form definitions, manifests and media files, answers
//! the submission HEAD probe and accepts multipart submissions. Optional
//! Basic or Digest enforcement, an expected-host check and request recording
//! let tests observe exactly what a client sent.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, head},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use md5::{Digest, Md5};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const SUBMISSION_PART_NAME: &str = "xml_submission_file";
pub const INCOMPLETE_PART_NAME: &str = "*isIncomplete*";
pub const ACCEPT_CONTENT_LENGTH_HEADER: &str = "x-openrosa-accept-content-length";
pub const DIGEST_REALM: &str = "ODK Aggregate";
pub const DIGEST_NONCE: &str = "MTU2NTA4MjEzODI4OTpmMjc4MDM5N2YxZTJiNDRiNjNiYTBiMThiOWQ4ZTlkMg==";
pub const BASIC_REALM: &str = "protected area";

const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Digest,
}

#[derive(Clone, Debug)]
pub struct StubConfig {
    /// Host name requests must be addressed to; any host when `None`.
    pub expected_host: Option<String>,
    pub auth: AuthMode,
    pub username: String,
    pub password: String,
    pub max_content_length: u64,
    /// Send media hashes with the `md5:` prefix.
    pub media_hash_prefix: bool,
    /// Answer every request with 500.
    pub always_error: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            expected_host: None,
            auth: AuthMode::None,
            username: String::new(),
            password: String::new(),
            max_content_length: 10_485_760,
            media_hash_prefix: true,
            always_error: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StubForm {
    pub id: String,
    pub label: String,
    pub version: String,
    pub xml: String,
    pub media: Vec<(String, Vec<u8>)>,
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    /// Path and query.
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct SubmittedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Submission {
    pub instance_id: String,
    pub parts: Vec<SubmittedPart>,
    pub incomplete: bool,
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub config: StubConfig,
    pub forms: Vec<StubForm>,
    pub requests: Vec<RecordedRequest>,
    pub submissions: Vec<Submission>,
}

impl ServerState {
    pub fn new(config: StubConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn add_form(&mut self, id: &str, label: &str, version: &str, xml: &str, media: Vec<(String, Vec<u8>)>) {
        self.forms.push(StubForm {
            id: id.to_string(),
            label: label.to_string(),
            version: version.to_string(),
            xml: xml.to_string(),
            media,
        });
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

pub fn shared(state: ServerState) -> SharedState {
    Arc::new(RwLock::new(state))
}

pub fn app() -> Router {
    app_with_state(shared(ServerState::default()))
}

pub fn app_with_state(state: SharedState) -> Router {
    Router::new()
        .route("/formList", get(form_list))
        .route("/form", get(form))
        .route("/manifest", get(manifest))
        .route("/mediaFile/{form}/{name}", get(media_file))
        .route("/submission", head(submission_head).post(submission_post))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), gatekeeper))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_state(listener: TcpListener, state: SharedState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Records the request, enforces host and credentials, and sets a cookie on
/// every response.
async fn gatekeeper(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let recorded = RecordedRequest {
        method: request.method().to_string(),
        target: target_of(&request),
        headers: request
            .headers()
            .iter()
            .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.to_string(), v.to_string())))
            .collect(),
    };
    debug!(method = %recorded.method, target = %recorded.target, "request");

    let config = {
        let mut state = state.write().await;
        state.requests.push(recorded);
        state.config.clone()
    };

    let mut response = match check(&config, &request) {
        Some(rejection) => rejection,
        None => next.run(request).await,
    };
    if let Ok(cookie) = HeaderValue::from_str(&format!("session={}; Path=/", Uuid::new_v4().simple())) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

fn target_of(request: &Request) -> String {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

fn check(config: &StubConfig, request: &Request) -> Option<Response> {
    if config.always_error {
        return Some(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let host = host_name(request.headers());
    if let Some(expected) = &config.expected_host {
        if !host.eq_ignore_ascii_case(expected) {
            return Some(
                (
                    StatusCode::GONE,
                    format!("Trying to connect to incorrect server: {host}"),
                )
                    .into_response(),
            );
        }
    }

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let authorized = match config.auth {
        AuthMode::None => true,
        AuthMode::Basic => authorization == Some(basic_value(&config.username, &config.password).as_str()),
        AuthMode::Digest => authorization.is_some_and(|value| {
            digest_matches(
                value,
                request.method().as_str(),
                &target_of(request),
                &config.username,
                &config.password,
            )
        }),
    };
    if authorized {
        return None;
    }

    let challenge = match config.auth {
        AuthMode::Digest => format!(r#"Digest realm="{DIGEST_REALM}", qop="auth", nonce="{DIGEST_NONCE}""#),
        _ => format!(r#"Basic realm="{BASIC_REALM}""#),
    };
    Some(
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::WWW_AUTHENTICATE, challenge)
            .body(Body::from("Please authenticate."))
            .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response()),
    )
}

/// Host header without the port.
fn host_name(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_string();
    }
    host.split(':').next().unwrap_or_default().to_string()
}

fn basic_value(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Split `a="x", b=y` into a map; commas inside quotes are kept.
fn auth_params(value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut parts = Vec::new();
    for c in value.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    for part in parts {
        if let Some((name, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            params.insert(name.trim().to_ascii_lowercase(), value);
        }
    }
    params
}

fn digest_matches(value: &str, method: &str, target: &str, username: &str, password: &str) -> bool {
    let Some(rest) = value.strip_prefix("Digest ") else {
        return false;
    };
    let params = auth_params(rest);
    let get = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();

    if get("username") != username || get("realm") != DIGEST_REALM || get("nonce") != DIGEST_NONCE {
        return false;
    }
    if get("uri") != target {
        return false;
    }
    let ha1 = md5_hex(format!("{username}:{DIGEST_REALM}:{password}"));
    let ha2 = md5_hex(format!("{method}:{}", get("uri")));
    let expected = md5_hex(format!(
        "{ha1}:{DIGEST_NONCE}:{}:{}:{}:{ha2}",
        get("nc"),
        get("cnonce"),
        get("qop")
    ));
    get("response") == expected
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn xml_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, XML_CONTENT_TYPE),
            (header::HeaderName::from_static("x-openrosa-version"), "1.0"),
        ],
        body,
    )
        .into_response()
}

fn form_index(query: &HashMap<String, String>, forms: &[StubForm]) -> Option<usize> {
    let index: usize = query.get("formId")?.parse().ok()?;
    (index < forms.len()).then_some(index)
}

async fn form_list(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let state = state.read().await;
    let base = base_url(&headers);
    let mut xml = String::from(
        "<?xml version='1.0' encoding='UTF-8' ?>\n<xforms xmlns=\"http://openrosa.org/xforms/xformsList\">\n",
    );
    for (i, form) in state.forms.iter().enumerate() {
        xml.push_str("<xform>\n");
        xml.push_str(&format!("<formID>{}</formID>\n", form.id));
        xml.push_str(&format!("<name>{}</name>\n", form.label));
        xml.push_str(&format!("<version>{}</version>\n", form.version));
        xml.push_str(&format!("<hash>md5:{}</hash>\n", md5_hex(&form.xml)));
        xml.push_str(&format!("<downloadUrl>{base}/form?formId={i}</downloadUrl>\n"));
        if !form.media.is_empty() {
            xml.push_str(&format!("<manifestUrl>{base}/manifest?formId={i}</manifestUrl>\n"));
        }
        xml.push_str("</xform>\n");
    }
    xml.push_str("</xforms>");
    info!(forms = state.forms.len(), "served form list");
    xml_response(xml)
}

async fn form(State(state): State<SharedState>, Query(query): Query<HashMap<String, String>>) -> Response {
    let state = state.read().await;
    match form_index(&query, &state.forms) {
        Some(i) => xml_response(state.forms[i].xml.clone()),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn manifest(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let state = state.read().await;
    let Some(i) = form_index(&query, &state.forms) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let form = &state.forms[i];
    if form.media.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let base = base_url(&headers);
    let prefix = if state.config.media_hash_prefix { "md5:" } else { "" };
    let mut xml = String::from(
        "<?xml version='1.0' encoding='UTF-8' ?>\n<manifest xmlns=\"http://openrosa.org/xforms/xformsManifest\">\n",
    );
    for (name, data) in &form.media {
        xml.push_str("<mediaFile>");
        xml.push_str(&format!("<filename>{name}</filename>\n"));
        xml.push_str(&format!("<hash>{prefix}{} </hash>\n", md5_hex(data)));
        xml.push_str(&format!("<downloadUrl>{base}/mediaFile/{i}/{name}</downloadUrl>\n"));
        xml.push_str("</mediaFile>\n");
    }
    xml.push_str("</manifest>");
    xml_response(xml)
}

async fn media_file(State(state): State<SharedState>, Path((form, name)): Path<(usize, String)>) -> Response {
    let state = state.read().await;
    let data = state
        .forms
        .get(form)
        .and_then(|f| f.media.iter().find(|(n, _)| *n == name))
        .map(|(_, data)| data.clone());
    match data {
        Some(data) => ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn submission_head(State(state): State<SharedState>) -> Response {
    let limit = state.read().await.config.max_content_length;
    (
        StatusCode::NO_CONTENT,
        [
            (header::HeaderName::from_static(ACCEPT_CONTENT_LENGTH_HEADER), limit.to_string()),
            (header::HeaderName::from_static("x-openrosa-version"), "1.0".to_string()),
        ],
    )
        .into_response()
}

async fn submission_post(State(state): State<SharedState>, mut multipart: Multipart) -> Response {
    let mut parts = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(data) => parts.push(SubmittedPart {
                        name,
                        file_name,
                        content_type,
                        data: data.to_vec(),
                    }),
                    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    if parts.first().map(|p| p.name.as_str()) != Some(SUBMISSION_PART_NAME) {
        return (
            StatusCode::BAD_REQUEST,
            format!("first part must be {SUBMISSION_PART_NAME}"),
        )
            .into_response();
    }

    let submission = Submission {
        instance_id: format!("uuid:{}", Uuid::new_v4()),
        incomplete: parts.iter().any(|p| p.name == INCOMPLETE_PART_NAME),
        parts,
    };
    info!(
        instance = %submission.instance_id,
        parts = submission.parts.len(),
        incomplete = submission.incomplete,
        "accepted submission"
    );
    let body = format!(
        "<OpenRosaResponse xmlns=\"http://openrosa.org/http/response\"><message nature=\"submit_success\">Successful submission of {}</message></OpenRosaResponse>",
        submission.instance_id
    );
    state.write().await.submissions.push(submission);

    (
        StatusCode::CREATED,
        [
            (header::CONTENT_TYPE, XML_CONTENT_TYPE),
            (header::HeaderName::from_static("x-openrosa-version"), "1.0"),
        ],
        body,
    )
        .into_response()
}
