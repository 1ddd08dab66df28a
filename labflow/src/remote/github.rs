//! GitHub REST implementation of [`VcsClient`].

use super::client::VcsClient;
use super::inputs::DispatchInputs;
use super::types::{Artifact, BranchCreation, FileChange, Job, RepoRef, WorkflowRun, WorkflowRunList};
use crate::backoff::BackoffPolicy;
use crate::config::GitHubConfig;
use crate::errors::{LabflowError, RemoteError};
use crate::telemetry::SpanTimer;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: &str = "100";

/// GitHub REST client.
///
/// Every call goes through the injected [`BackoffPolicy`]; the per-request
/// timeout comes from [`GitHubConfig`] and is independent of any job-level
/// timeout.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    policy: BackoffPolicy,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Deserialize)]
struct GitCommit {
    tree: GitObject,
}

#[derive(Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

impl GitHubClient {
    /// Creates a client authenticated with `token`.
    pub fn new(token: impl Into<String>, config: &GitHubConfig, policy: BackoffPolicy) -> Result<Self, LabflowError> {
        Self::from_builder(http_builder(config), token, config, policy)
    }

    fn from_builder(
        builder: reqwest::ClientBuilder,
        token: impl Into<String>,
        config: &GitHubConfig,
        policy: BackoffPolicy,
    ) -> Result<Self, LabflowError> {
        let http = builder
            .build()
            .map_err(|e| LabflowError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            policy,
        })
    }

    /// Returns the retry policy applied to every call.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response, RemoteError> {
        let mut request = self.http.request(method, self.url(path)).bearer_auth(&self.token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();
        Err(status_error(
            status.as_u16(),
            status.canonical_reason(),
            retry_after,
            text,
        ))
    }

    async fn execute<T, F, Fut>(
        &self,
        op: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        read: F,
    ) -> Result<T, LabflowError>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let timer = SpanTimer::start(op);
        let read = &read;
        let result = self
            .policy
            .retry(|| {
                let method = method.clone();
                async move {
                    let response = self.attempt(method, path, query, body).await?;
                    read(response).await
                }
            })
            .await;

        match &result {
            Ok(_) => tracing::debug!(op, path, duration_ms = timer.elapsed_ms(), "GitHub call completed"),
            Err(e) => tracing::debug!(op, path, duration_ms = timer.elapsed_ms(), error = %e, "GitHub call failed"),
        }
        result.map_err(|e| self.policy.into_error(e))
    }

    async fn get_json<T: DeserializeOwned>(&self, op: &str, path: &str, query: &[(&str, &str)]) -> Result<T, LabflowError> {
        self.execute(op, Method::GET, path, query, None, read_json::<T>).await
    }

    async fn post_json<T: DeserializeOwned>(&self, op: &str, path: &str, body: &Value) -> Result<T, LabflowError> {
        self.execute(op, Method::POST, path, &[], Some(body), read_json::<T>).await
    }
}

fn http_builder(config: &GitHubConfig) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
    headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));

    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| RemoteError::decode(e.to_string()))
}

async fn read_empty(_response: Response) -> Result<(), RemoteError> {
    Ok(())
}

async fn read_bytes(response: Response) -> Result<Vec<u8>, RemoteError> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(transport_error)
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::timeout(err.to_string())
    } else if err.is_builder() {
        RemoteError::provider(format!("invalid request: {err}"))
    } else if err.is_decode() {
        RemoteError::decode(err.to_string())
    } else {
        RemoteError::connect(err.to_string())
    }
}

fn status_error(code: u16, reason: Option<&str>, retry_after: Option<String>, body: String) -> RemoteError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| reason.unwrap_or("request failed").to_string());

    let err = RemoteError::status(code, message).with_body(body);
    match retry_after {
        Some(value) => err.with_retry_after(value),
        None => err,
    }
}

fn is_reference_exists(err: &LabflowError) -> bool {
    err.remote().is_some_and(|remote| {
        remote.status_code() == Some(422) && remote.message.to_lowercase().contains("already exists")
    })
}

fn repo_path(repo: &RepoRef) -> String {
    format!("/repos/{}/{}", repo.owner, repo.name)
}

#[async_trait]
impl VcsClient for GitHubClient {
    async fn branch_head_sha(&self, repo: &RepoRef, branch: &str) -> Result<String, LabflowError> {
        let path = format!("{}/git/ref/heads/{branch}", repo_path(repo));
        let git_ref: GitRef = self.get_json("branch_head_sha", &path, &[]).await?;
        Ok(git_ref.object.sha)
    }

    async fn create_branch(
        &self,
        repo: &RepoRef,
        branch: &str,
        sha: &str,
    ) -> Result<BranchCreation, LabflowError> {
        let path = format!("{}/git/refs", repo_path(repo));
        let body = json!({"ref": format!("refs/heads/{branch}"), "sha": sha});

        match self
            .execute("create_branch", Method::POST, &path, &[], Some(&body), read_empty)
            .await
        {
            Ok(()) => Ok(BranchCreation::Created),
            Err(e) if is_reference_exists(&e) => Ok(BranchCreation::AlreadyExists),
            Err(e) => Err(e),
        }
    }

    async fn commit_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        message: &str,
        files: &[FileChange],
    ) -> Result<String, LabflowError> {
        let base = repo_path(repo);
        let head = self.branch_head_sha(repo, branch).await?;
        let commit: GitCommit = self
            .get_json("get_commit", &format!("{base}/git/commits/{head}"), &[])
            .await?;

        let mut tree = Vec::with_capacity(files.len());
        for file in files {
            let body = json!({
                "content": base64::engine::general_purpose::STANDARD.encode(&file.content),
                "encoding": "base64",
            });
            let blob: GitObject = self.post_json("create_blob", &format!("{base}/git/blobs"), &body).await?;
            tree.push(json!({"path": file.path, "mode": "100644", "type": "blob", "sha": blob.sha}));
        }

        let body = json!({"base_tree": commit.tree.sha, "tree": tree});
        let new_tree: GitObject = self.post_json("create_tree", &format!("{base}/git/trees"), &body).await?;

        let body = json!({"message": message, "tree": new_tree.sha, "parents": [head]});
        let new_commit: GitObject = self
            .post_json("create_commit", &format!("{base}/git/commits"), &body)
            .await?;

        let body = json!({"sha": new_commit.sha, "force": false});
        self.execute(
            "update_ref",
            Method::PATCH,
            &format!("{base}/git/refs/heads/{branch}"),
            &[],
            Some(&body),
            read_empty,
        )
        .await?;

        tracing::info!(repo = %repo, branch, files = files.len(), sha = %new_commit.sha, "Committed files");
        Ok(new_commit.sha)
    }

    async fn dispatch_workflow(
        &self,
        repo: &RepoRef,
        workflow: &str,
        git_ref: &str,
        inputs: &DispatchInputs,
    ) -> Result<(), LabflowError> {
        let path = format!("{}/actions/workflows/{workflow}/dispatches", repo_path(repo));
        let body = json!({"ref": git_ref, "inputs": inputs});
        self.execute("dispatch_workflow", Method::POST, &path, &[], Some(&body), read_empty)
            .await
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        workflow: &str,
        branch: &str,
    ) -> Result<WorkflowRunList, LabflowError> {
        let path = format!("{}/actions/workflows/{workflow}/runs", repo_path(repo));
        self.get_json("list_workflow_runs", &path, &[("branch", branch), ("per_page", PAGE_SIZE)])
            .await
    }

    async fn get_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun, LabflowError> {
        let path = format!("{}/actions/runs/{run_id}", repo_path(repo));
        self.get_json("get_workflow_run", &path, &[]).await
    }

    async fn cancel_workflow_run(&self, repo: &RepoRef, run_id: u64) -> Result<(), LabflowError> {
        let path = format!("{}/actions/runs/{run_id}/cancel", repo_path(repo));
        self.execute("cancel_workflow_run", Method::POST, &path, &[], None, read_empty)
            .await
    }

    async fn list_run_jobs(&self, repo: &RepoRef, run_id: u64) -> Result<Vec<Job>, LabflowError> {
        let path = format!("{}/actions/runs/{run_id}/jobs", repo_path(repo));
        let list: JobList = self.get_json("list_run_jobs", &path, &[("per_page", PAGE_SIZE)]).await?;
        Ok(list.jobs)
    }

    async fn list_artifacts(&self, repo: &RepoRef) -> Result<Vec<Artifact>, LabflowError> {
        let path = format!("{}/actions/artifacts", repo_path(repo));
        let list: ArtifactList = self.get_json("list_artifacts", &path, &[("per_page", PAGE_SIZE)]).await?;
        Ok(list.artifacts)
    }

    async fn download_artifact(&self, repo: &RepoRef, artifact_id: u64) -> Result<Vec<u8>, LabflowError> {
        let path = format!("{}/actions/artifacts/{artifact_id}/zip", repo_path(repo));
        self.execute("download_artifact", Method::GET, &path, &[], None, read_bytes)
            .await
    }
}
