//! GitHub REST client for the provider operations the engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shipyard_core::provider::{
    CommitStatus, CommitStatusState, GitHubCredential, ProviderClient, ProviderClientFactory,
    ProviderCredential,
};
use shipyard_core::{CommitSha, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;

/// GitHub API client bound to one credential.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, api_url: &str, access_token: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "Shipyard-CI")
            .header("Accept", "application/vnd.github+json")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> std::result::Result<Option<T>, GitHubError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!("GET {} ({}): {}", path, status, text)));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| GitHubError::Parse(e.to_string()))
    }

    /// Every open pull request of a repository, across pages.
    pub async fn open_pull_requests(
        &self,
        repo_full_name: &str,
    ) -> std::result::Result<Vec<PullRequest>, GitHubError> {
        let mut all = Vec::new();
        for page in 1.. {
            let path = format!(
                "/repos/{}/pulls?state=open&per_page={}&page={}",
                repo_full_name, PER_PAGE, page
            );
            let batch: Vec<PullRequest> = self
                .get_json(&path)
                .await?
                .ok_or_else(|| GitHubError::Api(format!("repository {} not found", repo_full_name)))?;
            let last = batch.len() < PER_PAGE;
            all.extend(batch);
            if last {
                break;
            }
        }
        Ok(all)
    }
}

fn parse_sha(raw: &str) -> std::result::Result<CommitSha, GitHubError> {
    CommitSha::parse(raw).map_err(|e| GitHubError::Parse(e.to_string()))
}

#[async_trait]
impl ProviderClient for GitHubClient {
    async fn last_commit_sha_for_all_open_pull_requests(
        &self,
        repo_full_name: &str,
        branches: &BTreeSet<String>,
    ) -> Result<BTreeSet<CommitSha>> {
        let pulls = self.open_pull_requests(repo_full_name).await?;
        let heads = pulls
            .iter()
            .filter(|pr| branches.contains(&pr.base.git_ref))
            .map(|pr| parse_sha(&pr.head.sha))
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;

        debug!(repo = %repo_full_name, open = pulls.len(), matching = heads.len(), "Listed open pull requests");
        Ok(heads)
    }

    async fn statuses_for_commit_sha(
        &self,
        repo_full_name: &str,
        sha: &CommitSha,
    ) -> Result<Vec<CommitStatus>> {
        let path = format!(
            "/repos/{}/commits/{}/statuses?per_page={}",
            repo_full_name, sha, PER_PAGE
        );
        let statuses: Vec<StatusPayload> = self.get_json(&path).await?.unwrap_or_default();
        Ok(statuses.into_iter().map(CommitStatus::from).collect())
    }

    async fn head_sha_for_branch(
        &self,
        repo_full_name: &str,
        branch: &str,
    ) -> Result<Option<CommitSha>> {
        let path = format!(
            "/repos/{}/branches/{}",
            repo_full_name,
            urlencoding::encode(branch)
        );
        let branch: Option<Branch> = self.get_json(&path).await?;
        Ok(branch.map(|b| parse_sha(&b.commit.sha)).transpose()?)
    }

    async fn set_commit_status(
        &self,
        repo_full_name: &str,
        sha: &CommitSha,
        status: &CommitStatus,
    ) -> Result<()> {
        let path = format!("/repos/{}/statuses/{}", repo_full_name, sha);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&StatusPayload::from(status.clone()))
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!("Failed to set status on {}: {}", sha, text)).into());
        }
        Ok(())
    }
}

/// Hands out GitHub clients sharing one connection pool.
#[derive(Clone)]
pub struct GitHubProviders {
    client: reqwest::Client,
    api_url: String,
}

impl GitHubProviders {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    fn github(&self, credential: &GitHubCredential) -> GitHubClient {
        GitHubClient::new(self.client.clone(), &self.api_url, credential.token.clone())
    }
}

impl Default for GitHubProviders {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl ProviderClientFactory for GitHubProviders {
    fn client_for(&self, credential: &ProviderCredential) -> Arc<dyn ProviderClient> {
        match credential {
            ProviderCredential::Github(github) => Arc::new(self.github(github)),
        }
    }
}

/// Open pull request, reduced to what the engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head: GitRef,
    pub base: GitRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
struct Branch {
    commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
struct BranchCommit {
    sha: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusPayload {
    state: CommitStatusState,
    #[serde(default)]
    context: String,
    description: Option<String>,
    target_url: Option<String>,
}

impl From<StatusPayload> for CommitStatus {
    fn from(payload: StatusPayload) -> Self {
        CommitStatus {
            state: payload.state,
            context: payload.context,
            description: payload.description,
            target_url: payload.target_url,
        }
    }
}

impl From<CommitStatus> for StatusPayload {
    fn from(status: CommitStatus) -> Self {
        StatusPayload {
            state: status.state,
            context: status.context,
            description: status.description,
            target_url: status.target_url,
        }
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GitHubError> for shipyard_core::Error {
    fn from(err: GitHubError) -> Self {
        shipyard_core::Error::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    type Posted = Arc<Mutex<Vec<(String, Value)>>>;

    const HEAD: &str = "0123456789abcdef0123456789abcdef01234567";
    const OTHER: &str = "89abcdef0123456789abcdef0123456789abcdef";

    async fn pulls() -> Json<Value> {
        Json(json!([
            { "number": 1, "head": { "ref": "feature", "sha": HEAD }, "base": { "ref": "main", "sha": OTHER } },
            { "number": 2, "head": { "ref": "wip", "sha": OTHER }, "base": { "ref": "develop", "sha": HEAD } }
        ]))
    }

    async fn statuses(Path((_, _, sha)): Path<(String, String, String)>) -> Json<Value> {
        if sha == HEAD {
            Json(json!([{ "state": "success", "context": "legacy-ci", "description": null, "target_url": null }]))
        } else {
            Json(json!([]))
        }
    }

    async fn branch(Path((_, _, name)): Path<(String, String, String)>) -> std::result::Result<Json<Value>, StatusCode> {
        match name.as_str() {
            "main" => Ok(Json(json!({ "name": "main", "commit": { "sha": HEAD } }))),
            _ => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn create_status(
        State(posted): State<Posted>,
        Path((_, _, sha)): Path<(String, String, String)>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        posted.lock().unwrap().push((sha, body));
        StatusCode::CREATED
    }

    async fn fake_github() -> (String, Posted) {
        let posted: Posted = Arc::default();
        let app = Router::new()
            .route("/repos/{owner}/{repo}/pulls", get(pulls))
            .route("/repos/{owner}/{repo}/commits/{sha}/statuses", get(statuses))
            .route("/repos/{owner}/{repo}/branches/{branch}", get(branch))
            .route("/repos/{owner}/{repo}/statuses/{sha}", post(create_status))
            .with_state(posted.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), posted)
    }

    fn client(api_url: &str) -> Arc<dyn ProviderClient> {
        GitHubProviders::new(api_url).client_for(&ProviderCredential::Github(GitHubCredential {
            name: "ci-bot".to_string(),
            token: "token".to_string(),
        }))
    }

    #[tokio::test]
    async fn test_open_pull_requests_filtered_by_base() {
        let (url, _) = fake_github().await;
        let github = client(&url);

        let branches = BTreeSet::from(["main".to_string()]);
        let heads = github
            .last_commit_sha_for_all_open_pull_requests("acme/app", &branches)
            .await
            .unwrap();

        assert_eq!(heads, BTreeSet::from([CommitSha::parse(HEAD).unwrap()]));
    }

    #[tokio::test]
    async fn test_statuses_and_branch_heads() {
        let (url, _) = fake_github().await;
        let github = client(&url);
        let head = CommitSha::parse(HEAD).unwrap();

        let statuses = github.statuses_for_commit_sha("acme/app", &head).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, CommitStatusState::Success);
        let other = CommitSha::parse(OTHER).unwrap();
        assert!(github.statuses_for_commit_sha("acme/app", &other).await.unwrap().is_empty());

        assert_eq!(github.head_sha_for_branch("acme/app", "main").await.unwrap(), Some(head));
        assert_eq!(github.head_sha_for_branch("acme/app", "gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_commit_status_posts_payload() {
        let (url, posted) = fake_github().await;
        let github = client(&url);

        github
            .set_commit_status(
                "acme/app",
                &CommitSha::parse(HEAD).unwrap(),
                &CommitStatus {
                    state: CommitStatusState::Pending,
                    context: "shipyard".to_string(),
                    description: Some("build queued".to_string()),
                    target_url: None,
                },
            )
            .await
            .unwrap();

        let posted = posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, HEAD);
        assert_eq!(posted[0].1["state"], "pending");
        assert_eq!(posted[0].1["context"], "shipyard");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_a_provider_error() {
        let github = client("http://127.0.0.1:1");
        let result = github.head_sha_for_branch("acme/app", "main").await;
        assert!(matches!(result, Err(shipyard_core::Error::Provider(_))));
    }
}
