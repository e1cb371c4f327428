//! Blocking `ureq` transport.
//!
//! HTTP error statuses are returned as responses, and the agent keeps no
//! cookie jar. Gzip bodies are decoded by `ureq`.

use std::time::Duration;

use tracing::debug;
use ureq::Agent;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport};

#[derive(Clone)]
pub struct UreqTransport {
    agent: Agent,
    max_response_bytes: u64,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .new_agent();
        Self {
            agent,
            max_response_bytes: config.max_response_bytes,
        }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl HttpTransport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), &request.headers).call(),
            HttpMethod::Head => with_headers(self.agent.head(url), &request.headers).call(),
            HttpMethod::Post => with_headers(self.agent.post(url), &request.headers).send(request.body_bytes()),
        };
        let mut response = result.map_err(map_error)?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = if request.method == HttpMethod::Head {
            Vec::new()
        } else {
            response
                .body_mut()
                .with_config()
                .limit(self.max_response_bytes)
                .read_to_vec()
                .map_err(map_error)?
        };
        debug!(%url, status, bytes = body.len(), "transport round-trip");

        Ok(HttpResponse { status, headers, body })
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &Headers) -> ureq::RequestBuilder<B> {
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Io(e) => TransportError::Io(e),
        ureq::Error::Timeout(t) => TransportError::Timeout(format!("{t:?}")),
        ureq::Error::HostNotFound => TransportError::Connect("host not found".to_string()),
        ureq::Error::ConnectionFailed => TransportError::Connect("connection failed".to_string()),
        other => TransportError::Other(other.to_string()),
    }
}
