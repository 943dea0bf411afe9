//! Normalized view of a response for rule matching and form handling.
//!
//! Interaction predicates and the protocol profile never look at raw HTML;
//! they work on a [`Page`], which keeps matching deterministic and easy to
//! test without a server.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::http::{HttpRequest, HttpResponse, Method};

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("static selector"));
static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("static selector"));
static FIELD: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, textarea, select").expect("static selector"));
static OPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("option").expect("static selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Field kinds a human has to fill in
const USER_INPUT_TYPES: &[&str] = &["text", "password", "email", "tel", "number", "search", "textarea"];

/// Field kinds a human has to choose from, as on a consent page
const CHOICE_TYPES: &[&str] = &["checkbox", "radio", "select"];

/// Input types that never contribute a value to a submission
const CONTROL_TYPES: &[&str] = &["submit", "button", "reset", "image"];

/// A form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Option<String>,

    /// Lowercased `type` attribute, `text` when absent; `textarea` and
    /// `select` for those elements
    pub kind: String,
    pub value: Option<String>,

    /// `checked` attribute of a checkbox or radio button
    pub checked: bool,
}

impl Field {
    fn from_element(field: ElementRef<'_>) -> Self {
        let el = field.value();
        let (kind, value) = match el.name() {
            "textarea" => ("textarea".to_string(), Some(field.text().collect::<String>())),
            "select" => ("select".to_string(), selected_option(field)),
            _ => {
                let kind = el
                    .attr("type")
                    .map(|t| t.trim().to_ascii_lowercase())
                    .unwrap_or_else(|| "text".to_string());
                let value = el.attr("value").map(str::to_string).or_else(|| {
                    // browsers submit "on" for a checked box without a value
                    (kind == "checkbox" || kind == "radio").then(|| "on".to_string())
                });
                (kind, value)
            }
        };

        Field {
            name: el.attr("name").map(str::to_string),
            kind,
            value,
            checked: el.attr("checked").is_some(),
        }
    }

    /// Whether a browser would include this field when submitting as-is
    fn is_submitted(&self) -> bool {
        match self.kind.as_str() {
            "checkbox" | "radio" => self.checked,
            kind => !CONTROL_TYPES.contains(&kind),
        }
    }
}

/// Value of the selected option, else the first one
fn selected_option(select: ElementRef<'_>) -> Option<String> {
    let mut options = select.select(&OPTION);
    let first = options.next()?;
    let chosen = std::iter::once(first)
        .chain(options)
        .find(|opt| opt.value().attr("selected").is_some())
        .unwrap_or(first);
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| chosen.text().collect::<String>().trim().to_string()),
    )
}

/// A form found on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub id: Option<String>,
    pub action: Option<String>,
    pub method: Method,
    pub fields: Vec<Field>,
}

impl Form {
    fn from_element(element: ElementRef<'_>) -> Self {
        let attrs = element.value();
        let fields = element.select(&FIELD).map(Field::from_element).collect();

        Self {
            id: attrs.attr("id").map(str::to_string),
            action: attrs.attr("action").map(str::to_string),
            method: Method::from_form_attr(attrs.attr("method")),
            fields,
        }
    }

    /// Form holding only hidden fields, the HTTP-POST binding pattern
    pub fn is_auto_submit(&self) -> bool {
        let mut has_hidden = false;
        for field in &self.fields {
            match field.kind.as_str() {
                "hidden" => has_hidden |= field.name.is_some(),
                kind if CONTROL_TYPES.contains(&kind) => {}
                _ => return false,
            }
        }
        has_hidden
    }

    /// Form that cannot be submitted without someone filling it in or
    /// making a choice
    pub fn requires_user_input(&self) -> bool {
        self.needs_text_input()
            || self
                .fields
                .iter()
                .any(|f| CHOICE_TYPES.contains(&f.kind.as_str()))
    }

    /// Form with at least one field someone has to type into
    pub fn needs_text_input(&self) -> bool {
        self.fields
            .iter()
            .any(|f| USER_INPUT_TYPES.contains(&f.kind.as_str()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name.as_deref() == Some(name))
    }

    pub fn hidden_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.kind == "hidden" && f.name.as_deref() == Some(name))
            .and_then(|f| f.value.as_deref())
    }

    /// Submission target, the page URL when `action` is missing or empty
    pub fn target(&self, base: &Url) -> Option<Url> {
        match self.action.as_deref().map(str::trim) {
            None | Some("") => Some(base.clone()),
            Some(action) => base.join(action).ok(),
        }
    }

    /// Name/value pairs a browser would submit with the page defaults
    pub fn default_values(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter(|f| f.is_submitted())
            .filter_map(|f| {
                f.name
                    .as_ref()
                    .map(|name| (name.clone(), f.value.clone().unwrap_or_default()))
            })
            .collect()
    }

    /// Build the submission request, overriding defaults with `overrides`
    pub fn submit<'a, I>(&self, base: &Url, overrides: I) -> Option<HttpRequest>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut url = self.target(base)?;
        if self.method == Method::Get {
            // a GET submission replaces the action's query
            url.set_query(None);
        }
        let mut params = self.default_values();
        for (name, value) in overrides {
            match params.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.clone(),
                None => params.push((name.clone(), value.clone())),
            }
        }
        Some(HttpRequest {
            method: self.method,
            url,
            params,
        })
    }
}

/// An anchor found on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub text: String,
}

/// Normalized response descriptor
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: u16,
    pub title: Option<String>,
    pub forms: Vec<Form>,
    pub links: Vec<Link>,
    pub body: String,
}

impl Page {
    pub fn from_response(response: &HttpResponse) -> Self {
        let mut page = Self {
            url: response.url.clone(),
            status: response.status,
            title: None,
            forms: Vec::new(),
            links: Vec::new(),
            body: response.body.clone(),
        };

        if response.is_json() || !looks_like_markup(&response.body) {
            return page;
        }

        let document = Html::parse_document(&response.body);

        page.title = document
            .select(&TITLE)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        page.forms = document.select(&FORM).map(Form::from_element).collect();

        page.links = document
            .select(&ANCHOR)
            .filter_map(|el| {
                el.value().attr("href").map(|href| Link {
                    href: href.trim().to_string(),
                    text: el
                        .text()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" "),
                })
            })
            .collect();

        page
    }

    /// First form that needs a human, if any
    pub fn interactive_form(&self) -> Option<&Form> {
        self.forms.iter().find(|f| f.requires_user_input())
    }

    /// First auto-submitting form, if any
    pub fn auto_submit_form(&self) -> Option<&Form> {
        self.forms.iter().find(|f| f.is_auto_submit())
    }

    /// Hidden field value from any form on the page
    pub fn hidden_value(&self, name: &str) -> Option<&str> {
        self.forms.iter().find_map(|f| f.hidden_value(name))
    }
}

fn looks_like_markup(body: &str) -> bool {
    body.trim_start().starts_with('<')
}
