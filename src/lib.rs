//! idp-test - conformance test driver for SAML identity providers.
//!
//! This crate provides:
//! - A registry of named test operations loaded from YAML
//! - A sequence engine that runs an operation's steps over one HTTP session
//! - Rule-driven handling of the IdP's interactive pages (login forms, consent)
//! - A timestamped protocol trace and a single aggregated verdict per run
//!
//! # Example
//!
//! ```rust,no_run
//! use idp_test::harness::{HarnessConfig, InteractionResolver, OperationRegistry, SequenceRunner};
//! use idp_test::http::{HttpSession, SessionConfig};
//! use idp_test::protocol::{HttpProfile, RunContext};
//! use idp_test::trace::Trace;
//!
//! let config = HarnessConfig::load("idp.json").unwrap();
//! let registry = OperationRegistry::load("operations.yaml").unwrap();
//! let resolver = InteractionResolver::new(&config.interaction).unwrap();
//! let context = RunContext::from_config(&config, None).unwrap();
//! let runner = SequenceRunner::new(&registry, &resolver, &HttpProfile, context);
//!
//! let mut session = HttpSession::new(&SessionConfig::default()).unwrap();
//! let mut trace = Trace::new();
//! let verdict = runner.verdict("login-basic", &mut session, &mut trace).unwrap();
//! println!("{}", serde_json::to_string(&verdict).unwrap());
//! ```

pub mod config;
pub mod harness;
pub mod http;
pub mod page;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod trace;

// Re-export engine types
pub use harness::{
    FaultClass, HarnessConfig, HarnessError, HarnessResult, InteractionResolver,
    OperationRegistry, SequenceRunner,
};

// Re-export results
pub use runner::{Finding, Severity, StepResult, Verdict, aggregate};

pub use http::{HttpClient, HttpSession, SessionConfig};
pub use protocol::{HttpProfile, ProtocolProfile, RunContext};
pub use report::ReportDir;
pub use trace::Trace;
