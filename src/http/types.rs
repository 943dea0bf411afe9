// Core types for the HTTP collaborator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

/// Request method used by steps and interactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    /// Parse an HTML form `method` attribute, defaulting to GET
    pub fn from_form_attr(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "post" => Method::Post,
            _ => Method::Get,
        }
    }

    pub fn is_post(self) -> bool {
        self == Method::Post
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// An outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,

    /// Query parameters for GET, form fields for POST
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            params: Vec::new(),
        }
    }

    pub fn post(url: Url, params: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            params,
        }
    }

    /// One-line form used for trace entries
    pub fn summary(&self) -> String {
        if self.params.is_empty() {
            return format!("{} {}", self.method, self.url);
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{} {} [{}]", self.method, self.url, params.join(", "))
    }
}

/// An inbound response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// URL the response was received from
    pub url: Url,
    pub status: u16,

    /// Header names are lowercase
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(url: Url, status: u16, body: impl Into<String>) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// `Location` header resolved against the response URL
    pub fn location(&self) -> Option<Url> {
        self.header("location")
            .and_then(|loc| self.url.join(loc.trim()).ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }

    /// Status line plus body, used for trace entries
    pub fn summary(&self) -> String {
        let mut out = format!("{} {}", self.status, self.url);
        if let Some(location) = self.header("location") {
            out.push_str(&format!(" -> {}", location));
        }
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
        }
        out
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures of the HTTP collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timed out waiting for {url}")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP client setup failed: {0}")]
    Setup(String),
}
