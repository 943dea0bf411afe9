//! Execution and classification of a single step.

use tracing::{debug, info, warn};

use crate::harness::interaction::{InteractionResolver, Resolution};
use crate::harness::types::{Check, HarnessError, HarnessResult, Step};
use crate::http::{HttpClient, HttpResponse};
use crate::page::Page;
use crate::protocol::{Assertion, ProtocolProfile, RunContext};
use crate::runner::{Finding, Severity, StepResult};
use crate::trace::Trace;

/// Runs steps against one HTTP session
pub struct StepExecutor<'a> {
    client: &'a mut dyn HttpClient,
    profile: &'a dyn ProtocolProfile,
    resolver: &'a InteractionResolver,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        client: &'a mut dyn HttpClient,
        profile: &'a dyn ProtocolProfile,
        resolver: &'a InteractionResolver,
    ) -> Self {
        Self {
            client,
            profile,
            resolver,
        }
    }

    /// Execute one step until its terminal response and classify it.
    ///
    /// Interaction round-trips do not produce results of their own. Transport
    /// failures become a fatal result; interaction loops and configuration
    /// gaps abort with an error instead.
    pub fn execute(
        &mut self,
        step: &Step,
        context: &mut RunContext,
        trace: &mut Trace,
    ) -> HarnessResult<StepResult> {
        let mut request = self
            .profile
            .prepare(step, context)
            .map_err(|source| HarnessError::Protocol {
                step: step.name.clone(),
                source,
            })?;

        let mut hops = 0;
        loop {
            hops += 1;
            if hops > context.max_hops {
                let err = HarnessError::InteractionLoop {
                    step: step.name.clone(),
                    limit: context.max_hops,
                    url: request.url.to_string(),
                };
                trace.error(err.to_string());
                return Err(err);
            }

            trace.request(request.summary());
            let response = match self.client.send(&request) {
                Ok(response) => response,
                Err(err) => {
                    warn!(step = %step.name, error = %err, "transport failure");
                    trace.error(err.to_string());
                    return Ok(StepResult::fatal(&step.name, request.url.as_str(), err.to_string()));
                }
            };
            trace.reply(response.summary());

            let page = Page::from_response(&response);
            match self.resolver.resolve(&request, &response, &page) {
                Ok(Resolution::Terminal) => {
                    let result = self.classify(step, context, &response, &page, trace);
                    info!(step = %step.name, status = %result.status, url = %result.url, "step finished");
                    return Ok(result);
                }
                Ok(Resolution::Follow { request: next, reason }) => {
                    debug!(step = %step.name, hop = hops, %reason, "following");
                    trace.info(reason);
                    request = next;
                }
                Err(err) => {
                    trace.error(err.to_string());
                    return Err(err);
                }
            }
        }
    }

    fn classify(
        &self,
        step: &Step,
        context: &mut RunContext,
        response: &HttpResponse,
        page: &Page,
        trace: &mut Trace,
    ) -> StepResult {
        let url = response.url.to_string();

        if response.is_server_error() {
            return StepResult::fatal(&step.name, url, response.body.clone());
        }

        let assertion = match self.profile.parse(step, response, page) {
            Ok(assertion) => assertion,
            Err(err) => {
                trace.error(err.to_string());
                return StepResult::fatal(&step.name, url, err.to_string());
            }
        };

        capture(step, context, response, page, &assertion, trace);

        let findings: Vec<Finding> = step
            .expect
            .iter()
            .filter_map(|check| evaluate(check, response, &assertion))
            .collect();

        let status = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Ok);

        if findings.is_empty() {
            return StepResult::ok(&step.name, url);
        }

        for finding in &findings {
            trace.warning(format!("{}: {}", finding.check, finding.detail));
        }
        let message = findings
            .iter()
            .map(|f| format!("{}: {}", f.check, f.detail))
            .collect::<Vec<_>>()
            .join("; ");

        StepResult {
            step: step.name.clone(),
            status,
            url,
            message,
            findings,
        }
    }
}

/// Store the step's captures in the session variables
fn capture(
    step: &Step,
    context: &mut RunContext,
    response: &HttpResponse,
    page: &Page,
    assertion: &Assertion,
    trace: &mut Trace,
) {
    for (var, source) in &step.captures {
        let value = page
            .hidden_value(source)
            .map(str::to_string)
            .or_else(|| {
                response
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == source.as_str())
                    .map(|(_, v)| v.into_owned())
            })
            .or_else(|| assertion.attributes.get(source).cloned());

        match value {
            Some(value) => context.set(var.clone(), value),
            None => trace.warning(format!("capture {}: '{}' not found in response", var, source)),
        }
    }
}

/// Returns a finding when the check does not hold
fn evaluate(check: &Check, response: &HttpResponse, assertion: &Assertion) -> Option<Finding> {
    let mut failures = Vec::new();

    if let Some(expected) = check.status {
        if response.status != expected {
            failures.push(format!("got status {}", response.status));
        }
    }
    if let Some(needle) = &check.body_contains {
        if !response.body.contains(needle.as_str()) {
            failures.push(format!("body lacks {:?}", needle));
        }
    }
    if let Some(pattern) = &check.url_matches {
        if !pattern.is_match(&response.url) {
            failures.push(format!("ended at {}", response.url));
        }
    }
    if let Some(header) = &check.header {
        if response.header(header).is_none() {
            failures.push(format!("header {} missing", header));
        }
    }
    if let Some(attribute) = &check.attribute {
        if !assertion.attributes.contains_key(attribute) {
            failures.push(format!("attribute {} missing", attribute));
        }
    }

    if failures.is_empty() {
        None
    } else {
        Some(Finding {
            check: check.label(),
            severity: check.severity,
            detail: failures.join(", "),
        })
    }
}
