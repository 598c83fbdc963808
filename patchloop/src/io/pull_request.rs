//! Pull request creation on the code host.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

const USER_AGENT: &str = concat!("patchloop/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to open one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    pub owner: String,
    pub repo: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Abstraction over code hosts that can open pull requests.
pub trait PullRequestHost {
    /// Open the pull request and return its URL.
    ///
    /// `Ok(None)` means the host answered but did not create the pull request.
    fn open(&self, request: &PullRequestRequest) -> Result<Option<String>>;
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct CreatedPull {
    html_url: String,
}

/// GitHub REST v3 client.
pub struct GitHubPullRequests {
    api_url: String,
    token: String,
    http: Client,
}

impl GitHubPullRequests {
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("build github http client")?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    fn pulls_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{owner}/{repo}/pulls", self.api_url)
    }
}

impl PullRequestHost for GitHubPullRequests {
    #[instrument(skip_all, fields(owner = %request.owner, repo = %request.repo, head = %request.head))]
    fn open(&self, request: &PullRequestRequest) -> Result<Option<String>> {
        let url = self.pulls_url(&request.owner, &request.repo);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&CreatePullBody {
                title: &request.title,
                head: &request.head,
                base: &request.base,
                body: &request.body,
            })
            .send()
            .with_context(|| format!("send pull request to {url}"))?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            let body = resp.text().unwrap_or_default();
            warn!(status = status.as_u16(), %body, "pull request not created");
            return Ok(None);
        }
        let created: CreatedPull = resp.json().context("decode pull request response")?;
        info!(url = %created.html_url, "pull request created");
        Ok(Some(created.html_url))
    }
}

/// Extract `(owner, repo)` from a GitHub remote URL (https or ssh forms).
pub fn parse_github_remote(url: &str) -> Option<(String, String)> {
    let normalized = url.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = ["https://github.com/", "http://github.com/", "ssh://git@github.com/", "git@github.com:"]
        .iter()
        .find_map(|prefix| normalized.strip_prefix(prefix))?;

    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_and_ssh_remotes() {
        let expected = Some(("acme".to_string(), "widgets".to_string()));
        assert_eq!(parse_github_remote("https://github.com/acme/widgets.git"), expected);
        assert_eq!(parse_github_remote("https://github.com/acme/widgets/"), expected);
        assert_eq!(parse_github_remote("git@github.com:acme/widgets.git"), expected);
        assert_eq!(parse_github_remote("ssh://git@github.com/acme/widgets"), expected);
    }

    #[test]
    fn rejects_other_hosts_and_partial_paths() {
        assert_eq!(parse_github_remote("https://gitlab.com/acme/widgets.git"), None);
        assert_eq!(parse_github_remote("https://github.com/acme"), None);
        assert_eq!(parse_github_remote("/tmp/local-origin.git"), None);
    }

    #[test]
    fn pulls_url_trims_trailing_slash() {
        let host = GitHubPullRequests::new("https://api.github.com/", "t").expect("client");
        assert_eq!(
            host.pulls_url("acme", "widgets"),
            "https://api.github.com/repos/acme/widgets/pulls"
        );
    }
}
