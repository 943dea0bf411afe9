//! Process configuration with environment variable support.
//!
//! These settings describe how the driver itself behaves (timeouts, hop
//! limits, where files live). What to test against is described by the run
//! configuration passed with `-J`, see [`crate::harness::HarnessConfig`].
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `IDP_TEST_TIMEOUT` | Per-request timeout in seconds | `30` |
//! | `IDP_TEST_MAX_HOPS` | Round-trips allowed within one step | `16` |
//! | `IDP_TEST_CA_CERTS` | PEM bundle for verifying the IdP | unset (no verification) |
//! | `IDP_TEST_USER_AGENT` | User-Agent header | `idp-test/<version>` |
//! | `IDP_TEST_OPERATIONS` | Operation registry file | `operations.yaml` |
//! | `IDP_TEST_REPORT_DIR` | Base directory for run reports | `/tmp/idp-test` |
//!
//! # Example
//!
//! ```bash
//! export IDP_TEST_TIMEOUT=10
//! export IDP_TEST_OPERATIONS=./flows/saml2.yaml
//! idp-test -J idp.json login-basic
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default per-request timeout (seconds)
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Default number of round-trips allowed within a single step
pub const DEFAULT_MAX_HOPS: usize = 16;

/// Default operation registry file
pub const DEFAULT_OPERATIONS_FILE: &str = "operations.yaml";

/// Default base directory for run reports
pub const DEFAULT_REPORT_DIR: &str = "/tmp/idp-test";

/// Default User-Agent header
pub const DEFAULT_USER_AGENT: &str = concat!("idp-test/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_TIMEOUT: &str = "IDP_TEST_TIMEOUT";

pub const ENV_MAX_HOPS: &str = "IDP_TEST_MAX_HOPS";

pub const ENV_CA_CERTS: &str = "IDP_TEST_CA_CERTS";

pub const ENV_USER_AGENT: &str = "IDP_TEST_USER_AGENT";

pub const ENV_OPERATIONS: &str = "IDP_TEST_OPERATIONS";

pub const ENV_REPORT_DIR: &str = "IDP_TEST_REPORT_DIR";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpSettings,
    pub engine: EngineSettings,
    pub paths: PathSettings,
}

/// HTTP session settings
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Per-request timeout (seconds)
    pub timeout: u64,
    /// CA bundle path
    pub ca_certs: Option<String>,
    pub user_agent: String,
}

/// Step execution settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Round-trips allowed within one step before it counts as a loop
    pub max_hops: usize,
}

/// File locations
#[derive(Debug, Clone)]
pub struct PathSettings {
    pub operations: String,
    pub report_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            http: HttpSettings::from_env(),
            engine: EngineSettings::from_env(),
            paths: PathSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            http: HttpSettings::defaults(),
            engine: EngineSettings::defaults(),
            paths: PathSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self {
            timeout: parse_env(ENV_TIMEOUT).unwrap_or(DEFAULT_TIMEOUT),
            ca_certs: env::var(ENV_CA_CERTS).ok().filter(|s| !s.is_empty()),
            user_agent: env::var(ENV_USER_AGENT)
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            ca_certs: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self {
            max_hops: parse_env(ENV_MAX_HOPS)
                .filter(|hops| *hops > 0)
                .unwrap_or(DEFAULT_MAX_HOPS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl PathSettings {
    pub fn from_env() -> Self {
        Self {
            operations: env::var(ENV_OPERATIONS)
                .unwrap_or_else(|_| DEFAULT_OPERATIONS_FILE.to_string()),
            report_dir: env::var(ENV_REPORT_DIR)
                .unwrap_or_else(|_| DEFAULT_REPORT_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            operations: DEFAULT_OPERATIONS_FILE.to_string(),
            report_dir: DEFAULT_REPORT_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| parse_value(&s))
}

fn parse_value<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// Get the report base directory (convenience function)
pub fn report_base_dir() -> String {
    get().paths.report_dir.clone()
}

/// Get the hop limit (convenience function)
pub fn max_hops() -> usize {
    get().engine.max_hops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>(" 45 "), Some(45));
        assert_eq!(parse_value::<usize>("abc"), None);
        assert_eq!(parse_value::<usize>(""), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.http.timeout, DEFAULT_TIMEOUT);
        assert!(config.http.ca_certs.is_none());
        assert_eq!(config.engine.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(config.paths.operations, DEFAULT_OPERATIONS_FILE);
        assert!(config.http.user_agent.starts_with("idp-test/"));
    }
}
