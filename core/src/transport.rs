//! Transport contract and the ureq-backed implementation.
//!
//! # Design
//! The handler and loader only need one synchronous call: request in,
//! response or `TransportError` out. Anything that can perform an HTTP
//! round-trip (ureq, a test double, a host-provided client) implements
//! `Transport`. Non-2xx statuses count as transport failures; the status code
//! and body travel inside the error so the outcome still carries them.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Performs one HTTP round-trip, blocking the calling thread.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Defaults applied by `UreqTransport` to every request.
///
/// Per-request settings on `HttpRequest` win over these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub default_headers: Vec<(String, String)>,
}

impl TransportConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// `Transport` over a blocking ureq agent.
#[derive(Debug, Clone, Default)]
pub struct UreqTransport {
    config: TransportConfig,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Build an agent that returns 4xx/5xx as data so the status and body
    /// can be reported alongside the failure.
    fn agent(&self, request: &HttpRequest) -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(request.timeout.or_else(|| self.config.timeout()))
            .build()
            .new_agent()
    }

    fn decorate<B>(
        &self,
        mut builder: ureq::RequestBuilder<B>,
        request: &HttpRequest,
        with_query: bool,
    ) -> ureq::RequestBuilder<B> {
        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.header("User-Agent", user_agent.as_str());
        }
        for (name, value) in self.config.default_headers.iter().chain(&request.headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credentials) = &request.credentials {
            builder = builder.header("Authorization", credentials.basic_auth_header().as_str());
        }
        if with_query {
            for (key, value) in &request.params {
                builder = builder.query(key, value);
            }
        }
        builder
    }

    fn send_with_body(
        &self,
        builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
        request: &HttpRequest,
    ) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        if request.sends_params_as_form() {
            // An explicit content type replaces the form default.
            let mut builder = self.decorate(builder, request, false);
            if let Some(content_type) = &request.content_type {
                builder = builder.content_type(content_type.as_str());
            }
            return builder.send_form(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        let mut builder = self.decorate(builder, request, true);
        if let Some(content_type) = &request.content_type {
            builder = builder.content_type(content_type.as_str());
        }
        match &request.body {
            Some(body) => builder.send(body.as_str()),
            None => builder.send_empty(),
        }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let agent = self.agent(request);
        let url = request.url.as_str();

        let result = match request.method {
            HttpMethod::Get => self.decorate(agent.get(url), request, true).call(),
            HttpMethod::Delete => self.decorate(agent.delete(url), request, true).call(),
            HttpMethod::Post => self.send_with_body(agent.post(url), request),
            HttpMethod::Put => self.send_with_body(agent.put(url), request),
        };

        let mut response = result.map_err(|e| {
            warn!(method = %request.method, url = %request.url, error = %e, "transport error");
            TransportError::io(e.to_string())
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.body_mut().read_to_string().map_err(|e| TransportError {
            message: e.to_string(),
            status: Some(status),
            body: None,
        })?;

        debug!(method = %request.method, url = %request.url, status, "response received");
        let response = HttpResponse {
            status,
            headers,
            body,
        };
        if response.is_success() {
            Ok(response)
        } else {
            Err(TransportError::status(response.status, response.body))
        }
    }
}
