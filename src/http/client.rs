//! HTTP collaborator abstraction.
//!
//! The engine only sees the [`HttpClient`] trait. [`HttpSession`] is the
//! production implementation: a blocking reqwest client that keeps cookies
//! for the lifetime of one run and never follows redirects on its own, so
//! every hop is visible to the trace and the interaction resolver.

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::types::{HttpRequest, HttpResponse, Method, TransportError, TransportResult};
use crate::config;

/// Trait for HTTP collaborators
///
/// Session state such as cookies must persist across calls on the same
/// value. One value serves exactly one run.
pub trait HttpClient {
    /// Dispatch a request and return the raw response
    fn send(&mut self, request: &HttpRequest) -> TransportResult<HttpResponse>;
}

/// Settings for an [`HttpSession`]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for one request/response exchange
    pub timeout: Duration,

    /// PEM bundle used to verify the IdP. Without one, certificates are not verified.
    pub ca_certs: Option<PathBuf>,

    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            timeout: Duration::from_secs(cfg.http.timeout),
            ca_certs: cfg.http.ca_certs.clone().map(PathBuf::from),
            user_agent: cfg.http.user_agent.clone(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ca_certs(mut self, path: Option<PathBuf>) -> Self {
        self.ca_certs = path;
        self
    }
}

/// Cookie-keeping blocking HTTP session
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    pub fn new(config: &SessionConfig) -> TransportResult<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone());

        builder = match &config.ca_certs {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    TransportError::Setup(format!("cannot read {}: {}", path.display(), e))
                })?;
                let cert = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| TransportError::Setup(e.to_string()))?;
                builder.add_root_certificate(cert)
            }
            None => builder.danger_accept_invalid_certs(true),
        };

        let client = builder
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for HttpSession {
    fn send(&mut self, request: &HttpRequest) -> TransportResult<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "dispatching request");

        let builder = match request.method {
            Method::Get if request.params.is_empty() => self.client.get(request.url.clone()),
            Method::Get => self.client.get(request.url.clone()).query(&request.params),
            Method::Post => self.client.post(request.url.clone()).form(&request.params),
        };

        let response = builder
            .send()
            .map_err(|e| transport_error(&request.url, e))?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let bytes = response
            .bytes()
            .map_err(|e| transport_error(&request.url, e))?;

        debug!(status, url = %url, bytes = bytes.len(), "received response");

        // invalid UTF-8 is replaced, never dropped; the trace only sees text
        Ok(HttpResponse {
            url,
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

fn transport_error(url: &url::Url, err: reqwest::Error) -> TransportError {
    let url = url.to_string();
    if err.is_timeout() {
        TransportError::Timeout { url }
    } else if err.is_connect() {
        TransportError::Connect {
            url,
            message: err.to_string(),
        }
    } else {
        TransportError::Request {
            url,
            message: err.to_string(),
        }
    }
}
