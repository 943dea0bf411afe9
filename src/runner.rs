//! Types for test run results and the verdict they fold into.

use serde::{Deserialize, Serialize};

/// Severity of a step outcome.
///
/// External consumers read the integer, so the mapping is fixed:
///
/// | value | variant    | meaning                                       |
/// |-------|------------|-----------------------------------------------|
/// | 0     | `Unset`    | pre-aggregation sentinel, never recorded      |
/// | 1     | `Ok`       | step satisfied its protocol expectation       |
/// | 2     | `Warning`  | minor deviation                               |
/// | 3     | `Error`    | deviation                                     |
/// | 4     | `Critical` | severe deviation                              |
/// | 5     | `Fatal`    | transport failure or unrecoverable protocol error |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    #[default]
    Unset = 0,
    Ok = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
    Fatal = 5,
}

impl Severity {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_fatal(self) -> bool {
        self == Severity::Fatal
    }
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity.as_u8()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(Severity::Unset),
            1 => Ok(Severity::Ok),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Error),
            4 => Ok(Severity::Critical),
            5 => Ok(Severity::Fatal),
            other => Err(format!("severity out of range: {}", other)),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Unset => "UNSET",
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
        };
        f.write_str(label)
    }
}

/// A check that did not hold for a step's terminal response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Human-readable form of the check
    pub check: String,

    /// Severity the operation assigned to this check
    pub severity: Severity,

    /// What was observed instead
    pub detail: String,
}

/// Classified outcome of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name as declared by the operation
    pub step: String,

    pub status: Severity,

    /// Endpoint where the terminal response was observed
    pub url: String,

    /// "ok", a summary of failed checks, or the response body for fatal results
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl StepResult {
    pub fn ok(step: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: Severity::Ok,
            url: url.into(),
            message: "ok".to_string(),
            findings: Vec::new(),
        }
    }

    pub fn fatal(step: impl Into<String>, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: Severity::Fatal,
            url: url.into(),
            message: message.into(),
            findings: Vec::new(),
        }
    }
}

/// Run-level outcome derived from a step result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Identifier of the operation that ran
    pub id: String,

    pub status: Severity,

    /// All step results in execution order
    pub tests: Vec<StepResult>,

    /// URL of the last step result, only for fatal verdicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Message of the last step result, only for fatal verdicts
    #[serde(rename = "htmlbody", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Fold a step result log into a verdict.
///
/// The status is the maximum recorded severity, floored at `Ok` so a run
/// without findings never reports `Unset`. A fatal verdict carries the url
/// and message of the last entry, the page where the run broke down.
pub fn aggregate(id: &str, log: Vec<StepResult>) -> Verdict {
    let mut status = log
        .iter()
        .map(|result| result.status)
        .max()
        .unwrap_or(Severity::Unset);

    if status == Severity::Unset {
        status = Severity::Ok;
    }

    let (url, message) = match (status, log.last()) {
        (Severity::Fatal, Some(last)) => (Some(last.url.clone()), Some(last.message.clone())),
        _ => (None, None),
    };

    Verdict {
        id: id.to_string(),
        status,
        tests: log,
        url,
        message,
    }
}
