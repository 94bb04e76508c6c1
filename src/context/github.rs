use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GithubItemKind {
    Issue,
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubContext {
    pub owner: String,
    pub repo: String,
    #[serde(rename = "type")]
    pub kind: GithubItemKind,
    pub number: u64,
}

/// `/owner/repo/(issues|pull)/N[...]`. Plain repository pages yield nothing.
pub fn extract(pathname: &str) -> Option<GithubContext> {
    let segments: Vec<&str> = pathname.split('/').collect();
    if segments.len() < 5 {
        return None;
    }

    let kind = match segments[3] {
        "issues" => GithubItemKind::Issue,
        "pull" => GithubItemKind::Pull,
        _ => return None,
    };

    let (owner, repo) = (segments[1], segments[2]);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }

    Some(GithubContext {
        owner: owner.to_string(),
        repo: repo.to_string(),
        kind,
        number: parse_leading_number(segments[4])?,
    })
}

/// Owner, repository and item kind from a full GitHub URL.
pub fn repo_from_url(url: &str) -> Option<(String, String, GithubItemKind)> {
    let parsed = url::Url::parse(url).ok()?;
    if parsed.host_str()? != "github.com" {
        return None;
    }

    let mut segments = parsed.path_segments()?;
    let owner = segments.next().filter(|s| !s.is_empty())?;
    let repo = segments.next().filter(|s| !s.is_empty())?;
    let kind = match segments.next() {
        Some("pull") => GithubItemKind::Pull,
        _ => GithubItemKind::Issue,
    };
    Some((owner.to_string(), repo.to_string(), kind))
}

/// Leading decimal digits, ignoring anything after them.
pub fn parse_leading_number(raw: &str) -> Option<u64> {
    let digits: String = raw
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
