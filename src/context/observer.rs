use anyhow::{Context, Result};
use serde_json::{json, Value};

use super::{extract_context, ContextRecord, DomQuery, WorkDomain};
use crate::control::ControlMessage;

/// The parts of `window.location` an extractor looks at, plus the page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub href: String,
    pub hostname: String,
    pub pathname: String,
    pub search: String,
    pub title: String,
}

impl PageLocation {
    pub fn parse(href: &str, title: &str) -> Result<Self> {
        let url = url::Url::parse(href).with_context(|| format!("invalid page url '{href}'"))?;
        Ok(Self {
            href: href.to_string(),
            hostname: url.host_str().unwrap_or_default().to_string(),
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            title: title.to_string(),
        })
    }
}

/// One-shot extractor for a single page load.
#[derive(Debug, Default)]
pub struct PageObserver {
    context_sent: bool,
}

impl PageObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context_sent(&self) -> bool {
        self.context_sent
    }

    /// Returns the `pageContext` message to relay, at most once per observer.
    pub fn observe(&mut self, page: &PageLocation, dom: &dyn DomQuery) -> Option<ControlMessage> {
        if self.context_sent || WorkDomain::classify(&page.hostname).is_none() {
            return None;
        }

        let record = extract_context(&page.hostname, &page.pathname, &page.search, dom)?;
        self.context_sent = true;
        Some(ControlMessage::PageContext {
            data: raw_payload(&record, page),
        })
    }
}

/// The loose shape page scripts send to the background session.
fn raw_payload(record: &ContextRecord, page: &PageLocation) -> Value {
    match record {
        ContextRecord::Jira(jira) => json!({
            "url": page.href,
            "title": page.title,
            "tickets": jira.all_tickets,
        }),
        ContextRecord::Github(github) => json!({
            "url": page.href,
            "title": page.title,
            "githubIssue": format!("#{}", github.number),
        }),
    }
}
