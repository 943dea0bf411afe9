use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::http::{Method, TransportError};
use crate::protocol::ProtocolError;
use crate::runner::Severity;

/// Human description of an operation, a single string or a list of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Description {
    Text(String),
    Lines(Vec<String>),
}

impl Description {
    /// Display form, lines joined with newlines
    pub fn render(&self) -> String {
        match self {
            Description::Text(text) => text.clone(),
            Description::Lines(lines) => lines.join("\n"),
        }
    }
}

/// A named test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Registry key, filled in when the registry is loaded
    #[serde(skip)]
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub descr: Option<Description>,

    /// Operations whose steps establish the session this one relies on
    #[serde(default)]
    pub depends: Vec<String>,

    /// Configured endpoints this operation exercises
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One logical request/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    #[serde(default)]
    pub method: Method,

    /// Named endpoint from the run configuration
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Literal target, absolute or relative to the IdP base URL
    #[serde(default)]
    pub url: Option<String>,

    /// Query parameters (GET) or form fields (POST); values may hold `{placeholders}`
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Expectations over the terminal response, in evaluation order
    #[serde(default)]
    pub expect: Vec<Check>,

    /// Session variables to take from the terminal response (variable -> source name)
    #[serde(default)]
    pub captures: BTreeMap<String, String>,
}

/// An expectation and the severity recorded when it does not hold
///
/// Every condition that is set must hold for the check to pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub body_contains: Option<String>,

    /// Regular expression over the final URL
    #[serde(default)]
    pub url_matches: Option<UrlPattern>,

    /// Header that must be present
    #[serde(default)]
    pub header: Option<String>,

    /// Attribute that must be present in the parsed assertion
    #[serde(default)]
    pub attribute: Option<String>,

    pub severity: Severity,
}

impl Check {
    /// Label used in findings
    pub fn label(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(format!("status == {}", status));
        }
        if let Some(needle) = &self.body_contains {
            parts.push(format!("body contains {:?}", needle));
        }
        if let Some(pattern) = &self.url_matches {
            parts.push(format!("url ~ {}", pattern.as_str()));
        }
        if let Some(header) = &self.header {
            parts.push(format!("header {}", header));
        }
        if let Some(attribute) = &self.attribute {
            parts.push(format!("attribute {}", attribute));
        }
        if parts.is_empty() {
            "empty check".to_string()
        } else {
            parts.join(" && ")
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !(Severity::Warning..=Severity::Critical).contains(&self.severity) {
            return Err(format!(
                "check '{}' has severity {}, expected 2..=4",
                self.label(),
                self.severity.as_u8()
            ));
        }
        Ok(())
    }
}

/// URL regular expression, compiled once when the registry is parsed
#[derive(Debug, Clone)]
pub struct UrlPattern(regex::Regex);

impl UrlPattern {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, url: &Url) -> bool {
        self.0.is_match(url.as_str())
    }
}

impl TryFrom<String> for UrlPattern {
    type Error = regex::Error;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        regex::Regex::new(&pattern).map(UrlPattern)
    }
}

impl Serialize for UrlPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UrlPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        UrlPattern::try_from(pattern).map_err(serde::de::Error::custom)
    }
}

impl Operation {
    /// Description joined for display
    pub fn description(&self) -> Option<String> {
        self.descr.as_ref().map(Description::render)
    }

    pub(crate) fn validate(&self) -> ConfigResult<()> {
        for step in &self.steps {
            if step.endpoint.is_some() == step.url.is_some() {
                return Err(ConfigError::Invalid(format!(
                    "operation '{}', step '{}': exactly one of endpoint or url is required",
                    self.id, step.name
                )));
            }
            for check in &step.expect {
                check.validate().map_err(|reason| {
                    ConfigError::Invalid(format!(
                        "operation '{}', step '{}': {}",
                        self.id, step.name, reason
                    ))
                })?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Interaction rules
// ============================================================================

/// Maps a page signature to an automated user action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRule {
    pub matches: RuleMatch,

    /// Label for trace output (e.g. "login")
    #[serde(rename = "page-type", default)]
    pub page_type: Option<String>,

    pub control: Control,
}

/// Page predicate; every condition given must hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Regular expression searched in the page URL
    #[serde(default)]
    pub url: Option<String>,

    /// Exact page title
    #[serde(default)]
    pub title: Option<String>,

    /// Substring of the body
    #[serde(default)]
    pub content: Option<String>,
}

/// Automated action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Control {
    /// Submit a form with the given values over the page defaults
    Form {
        #[serde(default)]
        set: BTreeMap<String, String>,
        #[serde(default)]
        pick: Option<FormPick>,
    },

    /// Follow a link by its text and/or an href pattern
    Link {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        href: Option<String>,
    },
}

/// Which form a form control applies to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormPick {
    #[serde(default)]
    pub id: Option<String>,

    /// Regular expression over the form action
    #[serde(default)]
    pub action: Option<String>,
}

// ============================================================================
// Run configuration
// ============================================================================

/// A service-provider variant the driver can impersonate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpVariant {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub entity_id: Option<String>,

    /// Extra placeholder values
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// What to test against, loaded from the JSON passed with `-J`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Entity id of the IdP under test
    pub entity_id: String,

    /// Base for relative step URLs, defaults to the entity id
    #[serde(default)]
    pub base_url: Option<String>,

    /// Named protocol endpoints
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    /// Interaction rules, evaluated in order
    #[serde(default)]
    pub interaction: Vec<InteractionRule>,

    /// SP variants keyed by id
    #[serde(default)]
    pub sp: BTreeMap<String, SpVariant>,
}

impl HarnessConfig {
    /// Load from a file, `-` reads standard input
    pub fn load(path: &str) -> ConfigResult<Self> {
        if path == "-" {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|source| ConfigError::Io {
                    path: "<stdin>".to_string(),
                    source,
                })?;
            return Self::from_json(&raw);
        }
        let raw = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.base_url()?;
        Ok(config)
    }

    /// Base URL for relative targets
    pub fn base_url(&self) -> ConfigResult<Url> {
        let raw = self.base_url.as_deref().unwrap_or(&self.entity_id);
        Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("base url {:?}: {}", raw, e)))
    }

    /// Pick the SP variant: the requested one, or the only one configured
    pub fn select_sp(&self, sp_id: Option<&str>) -> ConfigResult<Option<(&str, &SpVariant)>> {
        match sp_id {
            Some(id) => self
                .sp
                .get_key_value(id)
                .map(|(k, v)| Some((k.as_str(), v)))
                .ok_or_else(|| ConfigError::Invalid(format!("unknown SP id: {}", id))),
            None if self.sp.is_empty() => Ok(None),
            None if self.sp.len() == 1 => Ok(self.sp.iter().next().map(|(k, v)| (k.as_str(), v))),
            None => Err(ConfigError::Invalid("SP id undefined".to_string())),
        }
    }

    /// SP variant ids with their descriptions
    pub fn sp_descriptions(&self) -> BTreeMap<String, String> {
        self.sp
            .iter()
            .map(|(id, variant)| (id.clone(), variant.description.clone()))
            .collect()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors loading configuration or operation files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Conditions that end a run without a verdict
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Undefined testcase: {0}")]
    UnknownOperation(String),

    #[error("Operation {operation} exercises endpoint '{endpoint}', which is not configured")]
    UnknownEndpoint { operation: String, endpoint: String },

    #[error("Dependency cycle through operation {0}")]
    DependencyCycle(String),

    #[error("No interaction rule covers the {kind} at {url}")]
    MissingInteraction { url: String, kind: String },

    #[error("Interaction rule #{index} matched {url} but cannot be applied: {reason}")]
    InapplicableRule {
        index: usize,
        url: String,
        reason: String,
    },

    #[error("Step {step} exceeded {limit} round-trips, last at {url}")]
    InteractionLoop {
        step: String,
        limit: usize,
        url: String,
    },

    #[error("Prerequisite {operation} failed during setup: {message}")]
    SetupFailed { operation: String, message: String },

    #[error("Step {step}: {source}")]
    Protocol {
        step: String,
        #[source]
        source: ProtocolError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Who is to blame for an aborted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// The interaction table lacks what the run needed
    ConfigurationGap,

    /// The exchange with the IdP broke down
    ProtocolFault,

    /// The harness was asked to do something it cannot
    HarnessFault,
}

impl std::fmt::Display for FaultClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultClass::ConfigurationGap => f.write_str("configuration gap"),
            FaultClass::ProtocolFault => f.write_str("protocol fault"),
            FaultClass::HarnessFault => f.write_str("harness fault"),
        }
    }
}

impl HarnessError {
    pub fn fault_class(&self) -> FaultClass {
        match self {
            HarnessError::MissingInteraction { .. } | HarnessError::InapplicableRule { .. } => {
                FaultClass::ConfigurationGap
            }
            HarnessError::InteractionLoop { .. }
            | HarnessError::SetupFailed { .. }
            | HarnessError::Transport(_) => FaultClass::ProtocolFault,
            HarnessError::UnknownOperation(_)
            | HarnessError::UnknownEndpoint { .. }
            | HarnessError::DependencyCycle(_)
            | HarnessError::Protocol { .. }
            | HarnessError::Config(_) => FaultClass::HarnessFault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "entity_id": "https://idp.example.org/idp",
        "metadata": "ignored",
        "endpoints": {"sso": "https://idp.example.org/sso"},
        "interaction": [{
            "matches": {"url": "/login", "title": "Sign in"},
            "page-type": "login",
            "control": {"type": "form", "set": {"user": "alice", "pass": "x"}}
        }, {
            "matches": {"content": "Continue"},
            "control": {"type": "link", "text": "Continue"}
        }],
        "sp": {"basic": {"description": "Plain SP", "entity_id": "https://sp.example.org"}}
    }"#;

    #[test]
    fn test_config_parses_rules() {
        let config = HarnessConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.interaction.len(), 2);
        assert_eq!(config.interaction[0].page_type.as_deref(), Some("login"));
        match &config.interaction[0].control {
            Control::Form { set, pick } => {
                assert_eq!(set["user"], "alice");
                assert!(pick.is_none());
            }
            other => panic!("unexpected control {:?}", other),
        }
        assert!(matches!(config.interaction[1].control, Control::Link { .. }));
        assert_eq!(config.base_url().unwrap().as_str(), "https://idp.example.org/idp");
    }

    #[test]
    fn test_select_sp() {
        let mut config = HarnessConfig::from_json(CONFIG).unwrap();
        let (id, _) = config.select_sp(None).unwrap().unwrap();
        assert_eq!(id, "basic");
        assert!(config.select_sp(Some("other")).is_err());

        config.sp.insert("second".to_string(), SpVariant::default());
        let err = config.select_sp(None).unwrap_err();
        assert!(err.to_string().contains("SP id undefined"));

        config.sp.clear();
        assert!(config.select_sp(None).unwrap().is_none());
    }

    #[test]
    fn test_description_render() {
        let lines = Description::Lines(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(lines.render(), "first\nsecond");
        assert_eq!(Description::Text("one".to_string()).render(), "one");
    }

    #[test]
    fn test_fault_classes() {
        let gap = HarnessError::MissingInteraction {
            url: "https://idp/login".to_string(),
            kind: "login form".to_string(),
        };
        assert_eq!(gap.fault_class(), FaultClass::ConfigurationGap);

        let looped = HarnessError::InteractionLoop {
            step: "sso".to_string(),
            limit: 3,
            url: "https://idp/a".to_string(),
        };
        assert_eq!(looped.fault_class(), FaultClass::ProtocolFault);
        assert_eq!(
            HarnessError::UnknownOperation("nope".to_string()).fault_class(),
            FaultClass::HarnessFault
        );
    }

    #[test]
    fn test_check_label() {
        let check = Check {
            description: None,
            status: Some(200),
            body_contains: Some("Assertion".to_string()),
            url_matches: None,
            header: None,
            attribute: None,
            severity: Severity::Error,
        };
        assert_eq!(check.label(), "status == 200 && body contains \"Assertion\"");
        assert!(check.validate().is_ok());

        let fatal = Check {
            severity: Severity::Fatal,
            ..check
        };
        assert!(fatal.validate().is_err());
    }
}
