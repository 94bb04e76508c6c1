//! Work-context extraction from whitelisted work-tool pages.

pub mod github;
pub mod jira;
pub mod observer;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use github::{GithubContext, GithubItemKind};
pub use jira::JiraContext;
pub use observer::{PageLocation, PageObserver};

/// Typed context record. Serializes as `{"type": .., "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ContextRecord {
    Jira(JiraContext),
    Github(GithubContext),
}

/// Body of `POST /page-context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContextPayload {
    pub url: String,
    #[serde(flatten)]
    pub record: ContextRecord,
}

/// Work tools whose pages may carry context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkDomain {
    Jira,
    Github,
    Gitlab,
    AzureDevops,
    Bitbucket,
}

impl WorkDomain {
    pub fn classify(hostname: &str) -> Option<Self> {
        let host = hostname.to_ascii_lowercase();
        if host.ends_with("atlassian.net") || host.contains("jira") {
            Some(Self::Jira)
        } else if host == "github.com" {
            Some(Self::Github)
        } else if host == "gitlab.com" || host.starts_with("gitlab.") {
            Some(Self::Gitlab)
        } else if host == "dev.azure.com" || host.ends_with(".visualstudio.com") {
            Some(Self::AzureDevops)
        } else if host == "bitbucket.org" {
            Some(Self::Bitbucket)
        } else {
            None
        }
    }
}

/// A DOM node as seen by an extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomElement {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl DomElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Minimal `document.querySelector` capability.
pub trait DomQuery {
    fn query(&self, selector: &str) -> Option<DomElement>;
}

/// A page with no queryable DOM.
pub struct NoDom;

impl DomQuery for NoDom {
    fn query(&self, _selector: &str) -> Option<DomElement> {
        None
    }
}

/// Selector-keyed snapshot, as shipped by the page script.
impl DomQuery for HashMap<String, DomElement> {
    fn query(&self, selector: &str) -> Option<DomElement> {
        self.get(selector).cloned()
    }
}

/// Runs the extractor for `hostname`. Hosts off the whitelist never touch the DOM.
pub fn extract_context(
    hostname: &str,
    pathname: &str,
    search: &str,
    dom: &dyn DomQuery,
) -> Option<ContextRecord> {
    match WorkDomain::classify(hostname)? {
        WorkDomain::Jira => jira::extract(pathname, search, dom).map(ContextRecord::Jira),
        WorkDomain::Github => github::extract(pathname).map(ContextRecord::Github),
        // Recognized so extractors can be registered later without touching the observer.
        WorkDomain::Gitlab | WorkDomain::AzureDevops | WorkDomain::Bitbucket => None,
    }
}
