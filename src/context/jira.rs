use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::DomQuery;

/// Selectors tried in order when the URL carries no issue key.
const ISSUE_SELECTORS: [&str; 3] = [
    r#"[data-testid="issue.views.issue-base.foundation.breadcrumbs.current-issue.item"]"#,
    ".issue-link",
    "[data-issue-key]",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraContext {
    pub issue_key: String,
    pub project_key: String,
    pub all_tickets: Vec<String>,
}

impl JiraContext {
    /// Normalizes `key` to upper case and derives the project key.
    pub fn from_key(key: &str) -> Self {
        let issue_key = key.to_ascii_uppercase();
        let project_key = issue_key
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            all_tickets: vec![issue_key.clone()],
            issue_key,
            project_key,
        }
    }
}

fn browse_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)/browse/([A-Z]+-\d+)").expect("valid regex"))
}

fn selected_issue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)selectedIssue=([A-Z]+-\d+)").expect("valid regex"))
}

fn text_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z]+-\d+").expect("valid regex"))
}

pub fn extract(pathname: &str, search: &str, dom: &dyn DomQuery) -> Option<JiraContext> {
    key_from_url(pathname, search)
        .or_else(|| key_from_dom(dom))
        .map(|key| JiraContext::from_key(&key))
}

fn key_from_url(pathname: &str, search: &str) -> Option<String> {
    browse_re()
        .captures(pathname)
        .or_else(|| selected_issue_re().captures(search))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn key_from_dom(dom: &dyn DomQuery) -> Option<String> {
    ISSUE_SELECTORS.iter().find_map(|selector| {
        let element = dom.query(selector)?;
        match element.attribute("data-issue-key") {
            Some(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
            _ => text_key_re()
                .find(&element.text)
                .map(|m| m.as_str().to_string()),
        }
    })
}
