//! Artifact lookup and download for completed runs.

use super::archive;
use crate::errors::LabflowError;
use crate::remote::{Artifact, RepoRef, VcsClient, WorkflowRun};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fetches and decodes the artifacts of a run.
#[derive(Debug, Clone)]
pub struct ArtifactRetriever {
    client: Arc<dyn VcsClient>,
}

impl ArtifactRetriever {
    /// Creates a retriever.
    #[must_use]
    pub fn new(client: Arc<dyn VcsClient>) -> Self {
        Self { client }
    }

    /// Lists the artifacts of `run` named in `names`, in `names` order.
    ///
    /// An empty `names` accepts any artifact of the run.
    ///
    /// # Errors
    ///
    /// Returns [`LabflowError::ArtifactMissing`] when nothing matches.
    pub async fn find(&self, repo: &RepoRef, run: &WorkflowRun, names: &[&str]) -> Result<Vec<Artifact>, LabflowError> {
        let listed: Vec<Artifact> = self
            .client
            .list_artifacts(repo)
            .await?
            .into_iter()
            .filter(|a| a.run_id() == Some(run.id) && !a.expired)
            .collect();

        let mut matching: Vec<Artifact> = if names.is_empty() {
            listed
        } else {
            names
                .iter()
                .filter_map(|name| listed.iter().find(|a| a.name == *name).cloned())
                .collect()
        };
        matching.dedup_by_key(|a| a.id);

        if matching.is_empty() {
            return Err(LabflowError::ArtifactMissing {
                run_id: run.id,
                names: names.iter().map(|n| (*n).to_string()).collect(),
            });
        }
        Ok(matching)
    }

    /// Returns the first JSON payload found in the run's artifacts.
    ///
    /// Artifacts are tried in `names` order; within an artifact, the first
    /// `.json` entry wins.
    pub async fn retrieve_json(&self, repo: &RepoRef, run: &WorkflowRun, names: &[&str]) -> Result<Value, LabflowError> {
        let artifacts = self.find(repo, run, names).await?;
        let mut last_error = None;

        for artifact in &artifacts {
            let bytes = self.client.download_artifact(repo, artifact.id).await?;
            match archive::first_json_payload(&bytes) {
                Ok((entry, value)) => {
                    tracing::info!(run_id = run.id, artifact = %artifact.name, entry = %entry, "Decoded artifact payload");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::debug!(artifact = %artifact.name, error = %e, "No payload in artifact");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LabflowError::Archive("no artifact could be decoded".to_string())))
    }

    /// Unpacks artifact `name` into `extract_dir` and promotes its newest
    /// `iteration_<n>` directory into `latest_dir`.
    ///
    /// Returns the path of the promoted iteration directory.
    pub async fn retrieve_files(
        &self,
        repo: &RepoRef,
        run: &WorkflowRun,
        name: &str,
        extract_dir: &Path,
        latest_dir: &Path,
    ) -> Result<PathBuf, LabflowError> {
        let artifact = self
            .find(repo, run, &[name])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LabflowError::ArtifactMissing {
                run_id: run.id,
                names: vec![name.to_string()],
            })?;
        let bytes = self.client.download_artifact(repo, artifact.id).await?;

        let extract_dir = extract_dir.to_path_buf();
        let latest_dir = latest_dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let written = archive::extract_archive(&bytes, &extract_dir)?;
            let latest = archive::latest_iteration_among(&written).ok_or_else(|| {
                LabflowError::Archive(format!(
                    "no iteration_<n> directory in artifact extracted to {}",
                    extract_dir.display()
                ))
            })?;
            archive::promote_latest(&latest, &latest_dir)?;
            Ok(latest)
        })
        .await
        .map_err(|e| LabflowError::Internal(format!("Task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RunStatus;
    use crate::testing::{run_at, MockVcsClient, ZipFixture};
    use serde_json::json;
    use std::fs;

    fn repo() -> RepoRef {
        RepoRef::new("acme", "lab")
    }

    fn done(id: u64) -> WorkflowRun {
        run_at(id, "exp-v1", 0, RunStatus::Completed, Some("success"))
    }

    fn results_zip(loss: f64) -> Vec<u8> {
        ZipFixture::new()
            .file("output.txt", "ok")
            .file("results.json", json!({"loss": loss}).to_string())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_json_filters_by_run() {
        let mock = Arc::new(
            MockVcsClient::new()
                .with_artifact(1, "results", 40, results_zip(0.9))
                .with_artifact(2, "results", 41, results_zip(0.1)),
        );
        let retriever = ArtifactRetriever::new(mock);

        let value = retriever.retrieve_json(&repo(), &done(41), &["results"]).await.unwrap();
        assert_eq!(value, json!({"loss": 0.1}));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_an_error() {
        let mock = Arc::new(MockVcsClient::new().with_artifact(1, "results", 40, results_zip(0.9)));
        let retriever = ArtifactRetriever::new(mock);

        let err = retriever.retrieve_json(&repo(), &done(99), &["results"]).await.unwrap_err();
        match err {
            LabflowError::ArtifactMissing { run_id, names } => {
                assert_eq!(run_id, 99);
                assert_eq!(names, vec!["results".to_string()]);
            }
            other => panic!("expected ArtifactMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_names_are_tried_in_order() {
        let logs = ZipFixture::new().file("log.txt", "x").build().unwrap();
        let mock = Arc::new(
            MockVcsClient::new()
                .with_artifact(1, "logs", 41, logs)
                .with_artifact(2, "results", 41, results_zip(0.5)),
        );
        let retriever = ArtifactRetriever::new(mock);

        let value = retriever
            .retrieve_json(&repo(), &done(41), &["logs", "results"])
            .await
            .unwrap();
        assert_eq!(value, json!({"loss": 0.5}));

        let found = retriever.find(&repo(), &done(41), &["results", "logs"]).await.unwrap();
        assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_retrieve_files_promotes_latest() {
        let bundle = ZipFixture::new()
            .file("output.txt", "ok")
            .file("results/iteration_1/plot.png", "1")
            .file("results/iteration_2/plot.png", "2")
            .file("results/iteration_3/plot.png", "3")
            .build()
            .unwrap();
        let mock = Arc::new(MockVcsClient::new().with_artifact(5, "figures", 41, bundle));
        let retriever = ArtifactRetriever::new(mock);
        let dir = tempfile::tempdir().unwrap();

        let latest = retriever
            .retrieve_files(&repo(), &done(41), "figures", &dir.path().join("logs"), &dir.path().join("images"))
            .await
            .unwrap();

        assert!(latest.ends_with("results/iteration_3"));
        assert_eq!(fs::read_to_string(dir.path().join("images/plot.png")).unwrap(), "3");
    }

    #[tokio::test]
    async fn test_retrieve_files_ignores_earlier_extractions() {
        let bundle = ZipFixture::new()
            .file("results/iteration_3/plot.png", "fresh")
            .build()
            .unwrap();
        let mock = Arc::new(MockVcsClient::new().with_artifact(5, "figures", 41, bundle));
        let retriever = ArtifactRetriever::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let stale = logs.join("results/iteration_9");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("plot.png"), "stale").unwrap();

        let latest = retriever
            .retrieve_files(&repo(), &done(41), "figures", &logs, &dir.path().join("images"))
            .await
            .unwrap();

        assert_eq!(latest, logs.join("results/iteration_3"));
        assert_eq!(fs::read_to_string(dir.path().join("images/plot.png")).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_retrieve_files_without_iterations() {
        let bundle = ZipFixture::new().file("output.txt", "ok").build().unwrap();
        let mock = Arc::new(MockVcsClient::new().with_artifact(5, "figures", 41, bundle));
        let retriever = ArtifactRetriever::new(mock);
        let dir = tempfile::tempdir().unwrap();

        let err = retriever
            .retrieve_files(&repo(), &done(41), "figures", &dir.path().join("logs"), &dir.path().join("images"))
            .await
            .unwrap_err();
        assert!(matches!(err, LabflowError::Archive(_)));
    }
}
