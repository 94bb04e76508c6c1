//! Message types for the out-of-band control channel.
//!
//! Requests are tagged by `action`; anything that does not parse into a
//! [`ControlMessage`] is dropped without a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{
    github::{self, parse_leading_number},
    jira::JiraContext,
    ContextRecord, GithubContext, PageContextPayload,
};
use crate::tracker::CurrentTab;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    GetStatus,
    CheckConnection,
    PageContext {
        #[serde(default)]
        data: Value,
    },
    GetPort,
    SetPort {
        #[serde(default)]
        port: Value,
    },
}

impl ControlMessage {
    /// `None` for unknown actions or malformed requests.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Status {
        connected: bool,
        #[serde(rename = "currentTab")]
        current_tab: Option<CurrentTab>,
    },
    Connection {
        connected: bool,
    },
    Received {
        received: bool,
    },
    Port {
        port: u16,
    },
    PortUpdated {
        success: bool,
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Turns a raw page payload into a typed record, or nothing.
///
/// A non-empty all-string `tickets` array is read as JIRA keyed on its first
/// entry; otherwise a `githubIssue` on a GitHub URL is read as a GitHub item.
pub fn normalize_page_payload(data: &Value) -> Option<PageContextPayload> {
    let url = data.get("url").and_then(Value::as_str).unwrap_or_default();

    if let Some(tickets) = string_tickets(data) {
        let first = tickets[0].trim();
        if first.is_empty() {
            return None;
        }
        let mut record = JiraContext::from_key(first);
        record.all_tickets = tickets
            .iter()
            .map(|ticket| ticket.trim().to_ascii_uppercase())
            .filter(|ticket| !ticket.is_empty())
            .collect();
        return Some(PageContextPayload {
            url: url.to_string(),
            record: ContextRecord::Jira(record),
        });
    }

    let issue = data.get("githubIssue")?;
    let (owner, repo, kind) = github::repo_from_url(url)?;
    let number = match issue {
        Value::String(raw) => parse_leading_number(raw.trim().trim_start_matches('#'))?,
        Value::Number(n) => n.as_u64()?,
        _ => return None,
    };

    Some(PageContextPayload {
        url: url.to_string(),
        record: ContextRecord::Github(GithubContext {
            owner,
            repo,
            kind,
            number,
        }),
    })
}

fn string_tickets(data: &Value) -> Option<Vec<&str>> {
    let tickets = data.get("tickets")?.as_array()?;
    if tickets.is_empty() {
        return None;
    }
    tickets.iter().map(Value::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GithubItemKind;
    use serde_json::json;

    #[test]
    fn parses_known_actions() {
        assert_eq!(
            ControlMessage::from_value(json!({"action": "getStatus"})),
            Some(ControlMessage::GetStatus)
        );
        assert_eq!(
            ControlMessage::from_value(json!({"action": "checkConnection"})),
            Some(ControlMessage::CheckConnection)
        );
        assert_eq!(
            ControlMessage::from_value(json!({"action": "getPort"})),
            Some(ControlMessage::GetPort)
        );
        assert_eq!(
            ControlMessage::from_value(json!({"action": "setPort", "port": "50000"})),
            Some(ControlMessage::SetPort { port: json!("50000") })
        );
        assert_eq!(
            ControlMessage::from_value(json!({"action": "pageContext", "data": {"tickets": []}})),
            Some(ControlMessage::PageContext { data: json!({"tickets": []}) })
        );
    }

    #[test]
    fn unknown_actions_are_inert() {
        assert_eq!(ControlMessage::from_value(json!({"action": "selfDestruct"})), None);
        assert_eq!(ControlMessage::from_value(json!({"noAction": true})), None);
        assert_eq!(ControlMessage::from_value(json!("getStatus")), None);
    }

    #[test]
    fn response_shapes() {
        let status = ControlResponse::Status {
            connected: true,
            current_tab: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"connected": true, "currentTab": null})
        );

        let updated = ControlResponse::PortUpdated {
            success: true,
            port: 50000,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&updated).unwrap(),
            json!({"success": true, "port": 50000})
        );
    }

    #[test]
    fn normalizes_jira_tickets() {
        let payload = normalize_page_payload(&json!({
            "url": "https://acme.atlassian.net/browse/proj-42?x=1",
            "title": "PROJ-42",
            "tickets": ["PROJ-42"],
        }))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "url": "https://acme.atlassian.net/browse/proj-42?x=1",
                "type": "jira",
                "data": {"issueKey": "PROJ-42", "projectKey": "PROJ", "allTickets": ["PROJ-42"]}
            })
        );
    }

    #[test]
    fn mixed_ticket_array_is_not_jira() {
        assert!(normalize_page_payload(&json!({
            "url": "https://acme.atlassian.net/browse/A-1",
            "tickets": ["A-1", 7],
        }))
        .is_none());
        assert!(normalize_page_payload(&json!({"tickets": []})).is_none());
    }

    #[test]
    fn first_ticket_keys_the_record() {
        let payload = normalize_page_payload(&json!({
            "url": "https://acme.atlassian.net/jira/software/projects/OPS/boards/1",
            "tickets": ["ops-7", "WEB-12", "release notes"],
        }))
        .unwrap();
        assert_eq!(
            payload.record,
            ContextRecord::Jira(JiraContext {
                issue_key: "OPS-7".into(),
                project_key: "OPS".into(),
                all_tickets: vec!["OPS-7".into(), "WEB-12".into(), "RELEASE NOTES".into()],
            })
        );

        // Taken as reported even when it does not look like an issue key.
        let payload = normalize_page_payload(&json!({"tickets": ["Backlog"]})).unwrap();
        let ContextRecord::Jira(record) = payload.record else {
            panic!("expected jira");
        };
        assert_eq!(record.issue_key, "BACKLOG");
        assert_eq!(record.project_key, "BACKLOG");

        assert!(normalize_page_payload(&json!({"tickets": ["  "]})).is_none());
    }

    #[test]
    fn normalizes_github_issue() {
        let payload = normalize_page_payload(&json!({
            "url": "https://github.com/acme/widgets/issues/12",
            "githubIssue": "#12",
        }))
        .unwrap();
        assert_eq!(
            payload.record,
            ContextRecord::Github(GithubContext {
                owner: "acme".into(),
                repo: "widgets".into(),
                kind: GithubItemKind::Issue,
                number: 12,
            })
        );
    }

    #[test]
    fn github_issue_on_foreign_url_is_suppressed() {
        assert!(normalize_page_payload(&json!({
            "url": "https://example.com/acme/widgets",
            "githubIssue": "#12",
        }))
        .is_none());
        assert!(normalize_page_payload(&json!({
            "url": "https://github.com/acme/widgets/pull/5",
            "githubIssue": "#abc",
        }))
        .is_none());
    }

    #[test]
    fn empty_payload_is_suppressed() {
        assert!(normalize_page_payload(&json!({})).is_none());
        assert!(normalize_page_payload(&Value::Null).is_none());
    }
}
