use std::fmt;
use tracing::{info, warn};

use crate::harness::interaction::InteractionResolver;
use crate::harness::registry::OperationRegistry;
use crate::harness::step::StepExecutor;
use crate::harness::types::{HarnessError, HarnessResult, Operation};
use crate::http::HttpClient;
use crate::protocol::{ProtocolProfile, RunContext};
use crate::runner::{Severity, StepResult, Verdict, aggregate};
use crate::trace::Trace;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Setup { prerequisite: usize },
    Running { step: usize },
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => f.write_str("not started"),
            RunState::Setup { prerequisite } => write!(f, "setup #{}", prerequisite),
            RunState::Running { step } => write!(f, "running step #{}", step),
            RunState::Completed => f.write_str("completed"),
            RunState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Runs operations from a registry.
///
/// Holds only read-only configuration; every call to [`SequenceRunner::run`]
/// brings its own HTTP session and trace, so independent runs can share one
/// runner.
pub struct SequenceRunner<'a> {
    registry: &'a OperationRegistry,
    resolver: &'a InteractionResolver,
    profile: &'a dyn ProtocolProfile,
    context: RunContext,
}

impl<'a> SequenceRunner<'a> {
    pub fn new(
        registry: &'a OperationRegistry,
        resolver: &'a InteractionResolver,
        profile: &'a dyn ProtocolProfile,
        context: RunContext,
    ) -> Self {
        Self {
            registry,
            resolver,
            profile,
            context,
        }
    }

    /// Run an operation and return its step result log.
    ///
    /// A fatal step result ends the log; later steps are not attempted.
    /// On abort the error is returned and `trace` keeps everything recorded
    /// up to that point; no step result is made up for the aborting condition.
    pub fn run(
        &self,
        id: &str,
        client: &mut dyn HttpClient,
        trace: &mut Trace,
    ) -> HarnessResult<Vec<StepResult>> {
        let mut state = RunState::NotStarted;
        let outcome = self.run_inner(id, client, trace, &mut state);
        match &outcome {
            Ok(log) => {
                state = RunState::Completed;
                info!(operation = id, steps = log.len(), %state, "run finished");
            }
            Err(err) => {
                let during = state;
                state = RunState::Aborted;
                warn!(operation = id, error = %err, class = %err.fault_class(), %during, "run aborted");
                trace.error(format!("{} during {}: {}", state, during, err));
            }
        }
        outcome
    }

    /// Run an operation and fold its log into a verdict
    pub fn verdict(
        &self,
        id: &str,
        client: &mut dyn HttpClient,
        trace: &mut Trace,
    ) -> HarnessResult<Verdict> {
        let log = self.run(id, client, trace)?;
        Ok(aggregate(id, log))
    }

    fn run_inner(
        &self,
        id: &str,
        client: &mut dyn HttpClient,
        trace: &mut Trace,
        state: &mut RunState,
    ) -> HarnessResult<Vec<StepResult>> {
        let operation = self.registry.require(id)?;
        self.check_endpoints(operation)?;
        let prerequisites = self.registry.prerequisites(id)?;

        let mut context = self.context.clone();
        let mut executor = StepExecutor::new(client, self.profile, self.resolver);

        trace.info(format!("operation {}: {}", operation.id, operation.name));

        for (index, prerequisite) in prerequisites.iter().enumerate() {
            *state = RunState::Setup {
                prerequisite: index,
            };
            trace.info(format!("setup: {}", prerequisite.id));
            for step in &prerequisite.steps {
                let outcome = executor.execute(step, &mut context, trace)?;
                if outcome.status.is_fatal() {
                    return Err(HarnessError::SetupFailed {
                        operation: prerequisite.id.clone(),
                        message: format!("step {} at {}: {}", step.name, outcome.url, outcome.message),
                    });
                }
                if outcome.status > Severity::Ok {
                    trace.warning(format!(
                        "setup {} step {} ended with {}",
                        prerequisite.id, step.name, outcome.status
                    ));
                }
            }
        }

        let mut log = Vec::with_capacity(operation.steps.len());
        for (index, step) in operation.steps.iter().enumerate() {
            *state = RunState::Running { step: index };
            trace.info(format!("step {}: {}", index, step.name));
            let result = executor.execute(step, &mut context, trace)?;
            let fatal = result.status.is_fatal();
            log.push(result);
            if fatal {
                let skipped = operation.steps.len() - index - 1;
                if skipped > 0 {
                    trace.info(format!("stopping after fatal step {}, {} step(s) skipped", step.name, skipped));
                }
                break;
            }
        }

        Ok(log)
    }

    fn check_endpoints(&self, operation: &Operation) -> HarnessResult<()> {
        for endpoint in &operation.endpoints {
            if !self.context.endpoints.contains_key(endpoint) {
                return Err(HarnessError::UnknownEndpoint {
                    operation: operation.id.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::types::HarnessConfig;
    use crate::http::{HttpRequest, HttpResponse, TransportError, TransportResult};
    use crate::protocol::HttpProfile;
    use std::collections::HashMap;

    /// Stateless fake IdP keyed by path
    struct FakeIdp {
        pages: HashMap<String, (u16, Option<String>, String)>,
        sent: Vec<HttpRequest>,
    }

    impl FakeIdp {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                sent: Vec::new(),
            }
        }

        fn page(mut self, path: &str, status: u16, body: &str) -> Self {
            self.pages
                .insert(path.to_string(), (status, None, body.to_string()));
            self
        }

        fn redirect(mut self, path: &str, to: &str) -> Self {
            self.pages
                .insert(path.to_string(), (302, Some(to.to_string()), String::new()));
            self
        }
    }

    impl HttpClient for FakeIdp {
        fn send(&mut self, request: &HttpRequest) -> TransportResult<HttpResponse> {
            self.sent.push(request.clone());
            let key = format!("{} {}", request.method, request.url.path());
            let (status, location, body) = self
                .pages
                .get(&key)
                .or_else(|| self.pages.get(request.url.path()))
                .cloned()
                .ok_or_else(|| TransportError::Connect {
                    url: request.url.to_string(),
                    message: "connection refused".to_string(),
                })?;
            let mut response = HttpResponse::new(request.url.clone(), status, body)
                .with_header("content-type", "text/html");
            if let Some(location) = location {
                response = response.with_header("location", location);
            }
            Ok(response)
        }
    }

    const OPERATIONS: &str = r#"
login-basic:
  name: Basic login
  endpoints: [sso]
  steps:
    - name: sso
      endpoint: sso
attributes:
  name: Attributes
  depends: [login-basic]
  steps:
    - name: attrs
      url: /attributes
      expect:
        - body_contains: mail
          severity: 2
needs-slo:
  name: Logout
  endpoints: [slo]
"#;

    const LOGIN: &str = r#"<html><head><title>Sign in</title></head><body><form method="post" action="/login"><input name="user"><input type="password" name="pass"></form></body></html>"#;

    fn config(rules: &str) -> HarnessConfig {
        HarnessConfig::from_json(&format!(
            r#"{{"entity_id": "https://idp.example.org/", "endpoints": {{"sso": "/sso"}}, "interaction": {}}}"#,
            rules
        ))
        .unwrap()
    }

    const LOGIN_RULE: &str = r#"[{"matches": {"url": "/login"}, "page-type": "login",
        "control": {"type": "form", "set": {"user": "alice", "pass": "x"}}}]"#;

    fn happy_idp() -> FakeIdp {
        FakeIdp::new()
            .redirect("/sso", "/login")
            .page("GET /login", 200, LOGIN)
            .redirect("POST /login", "/assertion")
            .page("/assertion", 200, "<p>ok</p>")
            .page("/attributes", 200, "<p>uid</p>")
    }

    fn run(idp: &mut FakeIdp, rules: &str, id: &str) -> (HarnessResult<Vec<StepResult>>, Trace) {
        let registry = OperationRegistry::from_yaml(OPERATIONS).unwrap();
        let config = config(rules);
        let resolver = InteractionResolver::new(&config.interaction).unwrap();
        let context = RunContext::from_config(&config, None).unwrap();
        let runner = SequenceRunner::new(&registry, &resolver, &HttpProfile, context);
        let mut trace = Trace::new();
        let outcome = runner.run(id, idp, &mut trace);
        (outcome, trace)
    }

    #[test]
    fn test_login_basic_completes() {
        let mut idp = happy_idp();
        let (outcome, trace) = run(&mut idp, LOGIN_RULE, "login-basic");
        let log = outcome.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, Severity::Ok);
        assert_eq!(log[0].url, "https://idp.example.org/assertion");
        assert_eq!(log[0].message, "ok");

        let verdict = aggregate("login-basic", log);
        assert_eq!(verdict.status, Severity::Ok);
        assert!(trace.iter().any(|e| e.message.starts_with("operation login-basic")));
    }

    #[test]
    fn test_missing_interaction_aborts_without_result() {
        let mut idp = happy_idp();
        let (outcome, trace) = run(&mut idp, "[]", "login-basic");
        let err = outcome.unwrap_err();
        assert!(matches!(err, HarnessError::MissingInteraction { .. }));
        assert!(trace.iter().any(|e| e.message.starts_with("aborted during running step #0")));
    }

    #[test]
    fn test_interaction_loop_aborts_without_result() {
        let registry = OperationRegistry::from_yaml(
            "loop: {name: Loop, steps: [{name: status, url: /status}, {name: sso, url: /sso}]}\n",
        )
        .unwrap();
        let config = config("[]");
        let resolver = InteractionResolver::new(&config.interaction).unwrap();
        let context = RunContext::from_config(&config, None).unwrap().max_hops(3);
        let runner = SequenceRunner::new(&registry, &resolver, &HttpProfile, context);

        let mut idp = FakeIdp::new()
            .page("/status", 200, "<p>up</p>")
            .redirect("/sso", "/sso");
        let mut trace = Trace::new();
        let outcome = runner.verdict("loop", &mut idp, &mut trace);

        match outcome {
            Err(HarnessError::InteractionLoop { step, limit, url }) => {
                assert_eq!(step, "sso");
                assert_eq!(limit, 3);
                assert_eq!(url, "https://idp.example.org/sso");
            }
            other => panic!("expected interaction loop, got {:?}", other),
        }
        // one request for the first step, then the capped round-trips
        assert_eq!(idp.sent.len(), 4);

        let aborted = trace
            .iter()
            .filter(|e| e.message.starts_with("aborted during running step #1"))
            .count();
        assert_eq!(aborted, 1);
        assert!(!trace.iter().any(|e| e.message.starts_with("aborted during running step #0")));
    }

    #[test]
    fn test_prerequisites_run_as_setup_only() {
        let mut idp = happy_idp();
        let (outcome, trace) = run(&mut idp, LOGIN_RULE, "attributes");
        let log = outcome.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].step, "attrs");
        assert_eq!(log[0].status, Severity::Warning);
        assert!(trace.iter().any(|e| e.message == "setup: login-basic"));
        assert_eq!(idp.sent.len(), 5);
    }

    #[test]
    fn test_fatal_setup_aborts() {
        let mut idp = FakeIdp::new().page("/sso", 500, "down");
        let (outcome, _) = run(&mut idp, LOGIN_RULE, "attributes");
        match outcome.unwrap_err() {
            HarnessError::SetupFailed { operation, message } => {
                assert_eq!(operation, "login-basic");
                assert!(message.contains("down"));
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_unconfigured_endpoint_and_unknown_operation() {
        let mut idp = happy_idp();
        let (outcome, _) = run(&mut idp, "[]", "needs-slo");
        assert!(matches!(
            outcome.unwrap_err(),
            HarnessError::UnknownEndpoint { endpoint, .. } if endpoint == "slo"
        ));

        let (outcome, _) = run(&mut idp, "[]", "missing");
        assert!(matches!(outcome.unwrap_err(), HarnessError::UnknownOperation(_)));
        assert!(idp.sent.is_empty());
    }

    #[test]
    fn test_fatal_step_ends_log() {
        let registry = OperationRegistry::from_yaml(
            "two: {name: Two, steps: [{name: first, url: /broken}, {name: second, url: /assertion}]}\n",
        )
        .unwrap();
        let config = config("[]");
        let resolver = InteractionResolver::new(&config.interaction).unwrap();
        let context = RunContext::from_config(&config, None).unwrap();
        let runner = SequenceRunner::new(&registry, &resolver, &HttpProfile, context);

        let mut idp = FakeIdp::new()
            .page("/broken", 502, "bad gateway")
            .page("/assertion", 200, "<p>ok</p>");
        let mut trace = Trace::new();
        let verdict = runner.verdict("two", &mut idp, &mut trace).unwrap();

        assert_eq!(verdict.tests.len(), 1);
        assert_eq!(verdict.status, Severity::Fatal);
        assert_eq!(verdict.url.as_deref(), Some("https://idp.example.org/broken"));
        assert_eq!(verdict.message.as_deref(), Some("bad gateway"));
        assert_eq!(idp.sent.len(), 1);
    }

    #[test]
    fn test_repeat_runs_are_equal() {
        let mut first = happy_idp();
        let mut second = happy_idp();
        let (a, _) = run(&mut first, LOGIN_RULE, "login-basic");
        let (b, _) = run(&mut second, LOGIN_RULE, "login-basic");
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Running { step: 2 }.to_string(), "running step #2");
        assert_eq!(RunState::Setup { prerequisite: 0 }.to_string(), "setup #0");
    }
}
