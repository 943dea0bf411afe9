//! Interaction resolution: deciding what a simulated user does next.
//!
//! Policy for a response, in order:
//! 1. server errors are terminal, they are findings for the step;
//! 2. redirects are followed;
//! 3. configured rules are tried against the page, first match wins;
//! 4. auto-submitting forms (HTTP-POST binding) are submitted;
//! 5. a page that needs a human but matched no rule is a configuration gap;
//! 6. anything else is terminal.

use regex::Regex;

use crate::harness::types::{
    ConfigError, ConfigResult, Control, FormPick, HarnessError, HarnessResult, InteractionRule,
    RuleMatch,
};
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::page::{Form, Page};

/// Outcome of resolving one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No further client-side action, classify this response
    Terminal,

    /// Send this request next
    Follow { request: HttpRequest, reason: String },
}

/// Rule with its patterns compiled
#[derive(Debug, Clone)]
struct CompiledRule {
    url: Option<Regex>,
    title: Option<String>,
    content: Option<String>,
    label: String,
    control: CompiledControl,
}

#[derive(Debug, Clone)]
enum CompiledControl {
    Form {
        set: Vec<(String, String)>,
        pick_id: Option<String>,
        pick_action: Option<Regex>,
    },
    Link {
        text: Option<String>,
        href: Option<Regex>,
    },
}

impl CompiledRule {
    fn compile(index: usize, rule: &InteractionRule) -> ConfigResult<Self> {
        let RuleMatch { url, title, content } = &rule.matches;
        let control = match &rule.control {
            Control::Form { set, pick } => {
                let FormPick { id, action } = pick.clone().unwrap_or_default();
                CompiledControl::Form {
                    set: set.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    pick_id: id,
                    pick_action: compile_pattern(index, action.as_deref())?,
                }
            }
            Control::Link { text, href } => CompiledControl::Link {
                text: text.clone(),
                href: compile_pattern(index, href.as_deref())?,
            },
        };

        Ok(Self {
            url: compile_pattern(index, url.as_deref())?,
            title: title.clone(),
            content: content.clone(),
            label: rule
                .page_type
                .clone()
                .unwrap_or_else(|| format!("rule #{}", index)),
            control,
        })
    }

    /// Pure predicate over the normalized page
    fn matches(&self, page: &Page) -> bool {
        if let Some(url) = &self.url {
            if !url.is_match(page.url.as_str()) {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if page.title.as_deref() != Some(title.as_str()) {
                return false;
            }
        }
        if let Some(content) = &self.content {
            if !page.body.contains(content.as_str()) {
                return false;
            }
        }
        // a form control only makes sense on a page that has a form
        match self.control {
            CompiledControl::Form { .. } => !page.forms.is_empty(),
            CompiledControl::Link { .. } => true,
        }
    }

    fn apply(&self, page: &Page) -> Result<HttpRequest, String> {
        match &self.control {
            CompiledControl::Form {
                set,
                pick_id,
                pick_action,
            } => {
                let form = pick_form(page, set, pick_id.as_deref(), pick_action.as_ref())
                    .ok_or_else(|| "no form satisfies the pick".to_string())?;
                form.submit(&page.url, set.iter().map(|(k, v)| (k, v)))
                    .ok_or_else(|| format!("form action {:?} is not a valid URL", form.action))
            }
            CompiledControl::Link { text, href } => {
                let link = page
                    .links
                    .iter()
                    .find(|link| {
                        text.as_deref().map_or(true, |t| link.text == t)
                            && href.as_ref().map_or(true, |re| re.is_match(&link.href))
                    })
                    .ok_or_else(|| "no matching link on the page".to_string())?;
                let url = page
                    .url
                    .join(&link.href)
                    .map_err(|e| format!("link {:?}: {}", link.href, e))?;
                Ok(HttpRequest::get(url))
            }
        }
    }
}

fn compile_pattern(index: usize, pattern: Option<&str>) -> ConfigResult<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ConfigError::Invalid(format!("interaction rule #{}: {}", index, e))
            })
        })
        .transpose()
}

fn pick_form<'p>(
    page: &'p Page,
    set: &[(String, String)],
    pick_id: Option<&str>,
    pick_action: Option<&Regex>,
) -> Option<&'p Form> {
    let explicit = pick_id.is_some() || pick_action.is_some();
    let mut candidates = page.forms.iter().filter(|form| {
        pick_id.map_or(true, |id| form.id.as_deref() == Some(id))
            && pick_action.map_or(true, |re| {
                form.action.as_deref().map_or(false, |a| re.is_match(a))
            })
    });

    if explicit {
        return candidates.next();
    }

    page.forms
        .iter()
        .find(|form| set.iter().all(|(name, _)| form.has_field(name)))
        .or_else(|| page.interactive_form())
        .or_else(|| candidates.next())
}

/// Applies the interaction table to responses
#[derive(Debug, Clone, Default)]
pub struct InteractionResolver {
    rules: Vec<CompiledRule>,
}

impl InteractionResolver {
    /// Compile the rule table; invalid patterns are configuration errors
    pub fn new(rules: &[InteractionRule]) -> ConfigResult<Self> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule::compile(index, rule))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Index of the first rule matching the page
    pub fn matching_rule(&self, page: &Page) -> Option<usize> {
        self.rules.iter().position(|rule| rule.matches(page))
    }

    /// Decide what follows `response`, which answered `request`
    pub fn resolve(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        page: &Page,
    ) -> HarnessResult<Resolution> {
        if response.is_server_error() {
            return Ok(Resolution::Terminal);
        }

        if response.is_redirect() {
            return Ok(match response.location() {
                Some(location) => Resolution::Follow {
                    request: redirect_request(request, response.status, location),
                    reason: format!("redirect {}", response.status),
                },
                None => Resolution::Terminal,
            });
        }

        if let Some(index) = self.matching_rule(page) {
            let rule = &self.rules[index];
            let next = rule
                .apply(page)
                .map_err(|reason| HarnessError::InapplicableRule {
                    index,
                    url: page.url.to_string(),
                    reason,
                })?;
            return Ok(Resolution::Follow {
                request: next,
                reason: format!("interaction: {}", rule.label),
            });
        }

        if let Some(form) = page.auto_submit_form() {
            if let Some(next) = form.submit(&page.url, std::iter::empty()) {
                return Ok(Resolution::Follow {
                    request: next,
                    reason: "auto-submit form".to_string(),
                });
            }
        }

        if let Some(form) = page.interactive_form() {
            let kind = if form.fields.iter().any(|f| f.kind == "password") {
                "login form"
            } else if form.needs_text_input() {
                "input form"
            } else {
                "consent form"
            };
            return Err(HarnessError::MissingInteraction {
                url: page.url.to_string(),
                kind: kind.to_string(),
            });
        }

        Ok(Resolution::Terminal)
    }
}

fn redirect_request(previous: &HttpRequest, status: u16, location: url::Url) -> HttpRequest {
    match status {
        307 | 308 => HttpRequest {
            method: previous.method,
            url: location,
            params: if previous.method == Method::Post {
                previous.params.clone()
            } else {
                Vec::new()
            },
        },
        _ => HttpRequest::get(location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::types::HarnessConfig;
    use url::Url;

    const LOGIN: &str = r#"<html><head><title>Sign in</title></head><body>
        <form method="post" action="/login">
          <input name="user"><input type="password" name="pass">
        </form><a href="/next">Continue</a></body></html>"#;

    fn resolver(rules_json: &str) -> InteractionResolver {
        let config = HarnessConfig::from_json(&format!(
            r#"{{"entity_id": "https://idp.example.org/", "interaction": {}}}"#,
            rules_json
        ))
        .unwrap();
        InteractionResolver::new(&config.interaction).unwrap()
    }

    fn html(url: &str, status: u16, body: &str) -> (HttpResponse, Page) {
        let response = HttpResponse::new(Url::parse(url).unwrap(), status, body)
            .with_header("content-type", "text/html");
        let page = Page::from_response(&response);
        (response, page)
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_first_match_wins() {
        let resolver = resolver(
            r#"[
            {"matches": {"url": "/nowhere"}, "control": {"type": "link", "text": "Continue"}},
            {"matches": {"url": "/login"}, "page-type": "login",
             "control": {"type": "form", "set": {"user": "alice", "pass": "x"}}},
            {"matches": {"title": "Sign in"}, "control": {"type": "link", "text": "Continue"}}
        ]"#,
        );
        let (response, page) = html("https://idp.example.org/login", 200, LOGIN);
        assert_eq!(resolver.matching_rule(&page), Some(1));

        match resolver.resolve(&get("https://idp.example.org/login"), &response, &page).unwrap() {
            Resolution::Follow { request, reason } => {
                assert_eq!(reason, "interaction: login");
                assert_eq!(request.method, Method::Post);
                assert_eq!(request.url.as_str(), "https://idp.example.org/login");
                assert!(request.params.contains(&("user".to_string(), "alice".to_string())));
                assert!(request.params.contains(&("pass".to_string(), "x".to_string())));
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_link_control() {
        let resolver = resolver(
            r#"[{"matches": {"content": "Continue"}, "control": {"type": "link", "text": "Continue"}}]"#,
        );
        let (response, page) = html("https://idp.example.org/login", 200, LOGIN);
        match resolver.resolve(&get("https://idp.example.org/login"), &response, &page).unwrap() {
            Resolution::Follow { request, .. } => {
                assert_eq!(request.url.as_str(), "https://idp.example.org/next");
                assert_eq!(request.method, Method::Get);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_missing_interaction() {
        let resolver = resolver(r#"[{"matches": {"url": "/other"}, "control": {"type": "form"}}]"#);
        let (response, page) = html("https://idp.example.org/login", 200, LOGIN);
        let err = resolver
            .resolve(&get("https://idp.example.org/login"), &response, &page)
            .unwrap_err();
        match err {
            HarnessError::MissingInteraction { url, kind } => {
                assert_eq!(url, "https://idp.example.org/login");
                assert_eq!(kind, "login form");
            }
            other => panic!("unexpected error {}", other),
        }
    }

    const CONSENT: &str = r#"<html><head><title>Consent</title></head><body>
        <form method="post" action="/consent">
          <input type="hidden" name="AuthState" value="s1">
          <input type="checkbox" name="remember" value="yes">
          <input type="radio" name="release" value="all">
          <input type="radio" name="release" value="none" checked>
          <select name="duration"><option value="once">Once</option></select>
          <input type="submit" name="yes" value="Accept">
        </form></body></html>"#;

    #[test]
    fn test_unmatched_consent_page_is_missing_interaction() {
        let (response, page) = html("https://idp.example.org/consent", 200, CONSENT);
        let err = InteractionResolver::default()
            .resolve(&get("https://idp.example.org/consent"), &response, &page)
            .unwrap_err();
        match err {
            HarnessError::MissingInteraction { kind, .. } => assert_eq!(kind, "consent form"),
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_consent_rule_submits_browser_values() {
        let resolver = resolver(
            r#"[{"matches": {"title": "Consent"}, "page-type": "consent",
                 "control": {"type": "form", "set": {"release": "all"}}}]"#,
        );
        let (response, page) = html("https://idp.example.org/consent", 200, CONSENT);
        match resolver.resolve(&get("https://idp.example.org/consent"), &response, &page).unwrap() {
            Resolution::Follow { request, reason } => {
                assert_eq!(reason, "interaction: consent");
                assert_eq!(
                    request.params,
                    vec![
                        ("AuthState".to_string(), "s1".to_string()),
                        ("release".to_string(), "all".to_string()),
                        ("duration".to_string(), "once".to_string()),
                    ]
                );
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_inapplicable_link_rule() {
        let resolver = resolver(
            r#"[{"matches": {"url": "/login"}, "control": {"type": "link", "text": "Absent"}}]"#,
        );
        let (response, page) = html("https://idp.example.org/login", 200, LOGIN);
        let err = resolver
            .resolve(&get("https://idp.example.org/login"), &response, &page)
            .unwrap_err();
        assert!(matches!(err, HarnessError::InapplicableRule { index: 0, .. }));
    }

    #[test]
    fn test_redirects_are_followed() {
        let resolver = InteractionResolver::default();
        let response = HttpResponse::new(Url::parse("https://idp.example.org/sso").unwrap(), 302, "")
            .with_header("Location", "/login?x=1");
        let page = Page::from_response(&response);
        match resolver.resolve(&get("https://idp.example.org/sso"), &response, &page).unwrap() {
            Resolution::Follow { request, reason } => {
                assert_eq!(request.url.as_str(), "https://idp.example.org/login?x=1");
                assert_eq!(reason, "redirect 302");
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_307_keeps_post_body() {
        let resolver = InteractionResolver::default();
        let request = HttpRequest::post(
            Url::parse("https://idp.example.org/sso").unwrap(),
            vec![("SAMLRequest".to_string(), "abc".to_string())],
        );
        let response = HttpResponse::new(request.url.clone(), 307, "")
            .with_header("Location", "https://idp.example.org/sso2");
        let page = Page::from_response(&response);
        match resolver.resolve(&request, &response, &page).unwrap() {
            Resolution::Follow { request: next, .. } => {
                assert_eq!(next.method, Method::Post);
                assert_eq!(next.params, request.params);
            }
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[test]
    fn test_auto_submit_and_terminal() {
        let resolver = InteractionResolver::default();
        let (response, page) = html(
            "https://idp.example.org/sso",
            200,
            r#"<form method="post" action="https://sp.example.org/acs"><input type="hidden" name="SAMLResponse" value="x"></form>"#,
        );
        match resolver.resolve(&get("https://idp.example.org/sso"), &response, &page).unwrap() {
            Resolution::Follow { request, reason } => {
                assert_eq!(reason, "auto-submit form");
                assert_eq!(request.url.as_str(), "https://sp.example.org/acs");
            }
            other => panic!("unexpected resolution {:?}", other),
        }

        let (response, page) = html("https://idp.example.org/done", 200, "<p>Welcome</p>");
        assert_eq!(
            resolver.resolve(&get("https://idp.example.org/done"), &response, &page).unwrap(),
            Resolution::Terminal
        );
    }

    #[test]
    fn test_server_error_is_terminal_even_when_rule_matches() {
        let resolver = resolver(
            r#"[{"matches": {"url": "/login"}, "control": {"type": "form", "set": {"user": "alice"}}}]"#,
        );
        let (response, page) = html("https://idp.example.org/login", 500, LOGIN);
        assert_eq!(
            resolver.resolve(&get("https://idp.example.org/login"), &response, &page).unwrap(),
            Resolution::Terminal
        );
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = HarnessConfig::from_json(
            r#"{"entity_id": "https://idp.example.org/",
                "interaction": [{"matches": {"url": "("}, "control": {"type": "form"}}]}"#,
        )
        .unwrap();
        assert!(InteractionResolver::new(&config.interaction).is_err());
    }
}
