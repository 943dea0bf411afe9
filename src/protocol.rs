//! Seam to the protocol message library.
//!
//! A [`ProtocolProfile`] turns a declarative step into a request and a
//! terminal response into an [`Assertion`] the checks can inspect.
//! [`HttpProfile`] is the profile shipped with the driver; SAML-specific
//! profiles plug in behind the same trait.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::harness::types::{ConfigError, ConfigResult, HarnessConfig, Step};
use crate::http::{HttpRequest, HttpResponse};
use crate::page::Page;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").expect("static pattern"));

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unresolved placeholder(s): {}", .0.join(", "))]
    UnresolvedPlaceholder(Vec<String>),

    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("invalid target URL {url:?}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("unparseable response: {0}")]
    Unparseable(String),
}

/// Parsed result object consumed by the checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assertion {
    pub attributes: BTreeMap<String, String>,
}

/// Per-run state shared between steps: resolved endpoints and session variables
#[derive(Debug, Clone)]
pub struct RunContext {
    pub base_url: Url,
    pub endpoints: BTreeMap<String, Url>,
    pub variables: BTreeMap<String, String>,
    pub max_hops: usize,
}

impl RunContext {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            endpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            max_hops: crate::config::max_hops(),
        }
    }

    /// Build the context for a run configuration and optional SP variant
    pub fn from_config(config: &HarnessConfig, sp_id: Option<&str>) -> ConfigResult<Self> {
        let base_url = config.base_url()?;
        let mut context = Self::new(base_url);

        for (name, raw) in &config.endpoints {
            let url = context.base_url.join(raw).map_err(|e| {
                ConfigError::Invalid(format!("endpoint {} ({:?}): {}", name, raw, e))
            })?;
            context.endpoints.insert(name.clone(), url);
        }

        context.set("entity_id", config.entity_id.clone());
        if let Some((id, variant)) = config.select_sp(sp_id)? {
            context.set("sp_id", id);
            if let Some(entity_id) = &variant.entity_id {
                context.set("sp_entity_id", entity_id.clone());
            }
            for (key, value) in &variant.params {
                context.set(key.clone(), value.clone());
            }
        }

        Ok(context)
    }

    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Replace `{name}` references with session variables
    pub fn substitute(&self, template: &str) -> ProtocolResult<String> {
        let mut missing = Vec::new();
        let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match self.variables.get(name) {
                Some(value) => value.clone(),
                None => {
                    missing.push(name.to_string());
                    caps[0].to_string()
                }
            }
        });
        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(ProtocolError::UnresolvedPlaceholder(missing))
        }
    }

    /// Target URL of a step
    pub fn resolve_target(&self, step: &Step) -> ProtocolResult<Url> {
        if let Some(endpoint) = &step.endpoint {
            return self
                .endpoints
                .get(endpoint)
                .cloned()
                .ok_or_else(|| ProtocolError::UnknownEndpoint(endpoint.clone()));
        }
        let raw = self.substitute(step.url.as_deref().unwrap_or_default())?;
        self.base_url
            .join(&raw)
            .map_err(|e| ProtocolError::InvalidTarget {
                url: raw.clone(),
                reason: e.to_string(),
            })
    }
}

/// Builds requests for steps and parses terminal responses
pub trait ProtocolProfile {
    /// Produce the first request of a step from the current session state
    fn prepare(&self, step: &Step, context: &RunContext) -> ProtocolResult<HttpRequest>;

    /// Parse a terminal response into an assertion
    fn parse(&self, step: &Step, response: &HttpResponse, page: &Page) -> ProtocolResult<Assertion>;
}

/// Plain HTTP profile driven entirely by the declarative step
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProfile;

impl ProtocolProfile for HttpProfile {
    fn prepare(&self, step: &Step, context: &RunContext) -> ProtocolResult<HttpRequest> {
        let url = context.resolve_target(step)?;
        let params = step
            .params
            .iter()
            .map(|(name, value)| Ok((name.clone(), context.substitute(value)?)))
            .collect::<ProtocolResult<Vec<_>>>()?;

        Ok(HttpRequest {
            method: step.method,
            url,
            params,
        })
    }

    fn parse(&self, _step: &Step, response: &HttpResponse, page: &Page) -> ProtocolResult<Assertion> {
        let mut attributes = BTreeMap::new();

        if response.is_json() {
            let value: serde_json::Value = serde_json::from_str(&response.body)
                .map_err(|e| ProtocolError::Unparseable(e.to_string()))?;
            if let serde_json::Value::Object(map) = value {
                for (key, value) in map {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    attributes.insert(key, text);
                }
            }
            return Ok(Assertion { attributes });
        }

        if let Some(title) = &page.title {
            attributes.insert("title".to_string(), title.clone());
        }
        for form in &page.forms {
            for field in form.fields.iter().filter(|f| f.kind == "hidden") {
                if let (Some(name), Some(value)) = (&field.name, &field.value) {
                    attributes.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        Ok(Assertion { attributes })
    }
}
