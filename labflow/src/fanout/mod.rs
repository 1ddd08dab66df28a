//! Branch fan-out.
//!
//! Creates one child branch per experiment variation from a single base
//! branch. The base is resolved once; child creations run concurrently up to
//! the configured cap and each one succeeds or fails on its own.

use crate::config::FanoutConfig;
use crate::errors::LabflowError;
use crate::remote::{BranchContext, BranchCreation, VcsClient};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of creating one child branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutOutcome {
    /// The variation identifier, as given.
    pub variation_id: String,
    /// The child context.
    pub branch: BranchContext,
    /// Whether the branch exists after the call.
    pub success: bool,
    /// True when the branch was already present.
    #[serde(default)]
    pub already_existed: bool,
    /// Failure description, if creation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Child context for `variation`, inheriting the base's repository and SHA.
#[must_use]
pub fn child_context(base: &BranchContext, variation: &str) -> BranchContext {
    BranchContext {
        repo: base.repo.clone(),
        branch: base.child_branch_name(variation),
        sha: base.sha.clone(),
    }
}

/// Creates sibling branches for experiment variations.
#[derive(Debug, Clone)]
pub struct BranchFanout {
    client: Arc<dyn VcsClient>,
    config: FanoutConfig,
}

impl BranchFanout {
    /// Creates a fan-out manager.
    #[must_use]
    pub fn new(client: Arc<dyn VcsClient>, config: FanoutConfig) -> Self {
        Self { client, config }
    }

    /// Resolves `base` and creates one child branch per variation.
    ///
    /// Returns one outcome per variation in input order. Fails only when the
    /// base branch cannot be read, before any child is created.
    pub async fn fan_out(
        &self,
        base: &BranchContext,
        variation_ids: &[String],
    ) -> Result<Vec<FanoutOutcome>, LabflowError> {
        let sha = self
            .client
            .branch_head_sha(&base.repo, &base.branch)
            .await
            .map_err(|e| LabflowError::BaseContextUnresolved {
                branch: base.branch.clone(),
                source: Box::new(e),
            })?;
        let resolved = base.clone().with_sha(sha);

        let width = self
            .config
            .max_concurrency
            .unwrap_or(variation_ids.len())
            .max(1);
        tracing::info!(
            repo = %base.repo,
            base = %base.branch,
            variations = variation_ids.len(),
            width,
            "Fanning out branches"
        );

        let pending: Vec<_> = variation_ids
            .iter()
            .map(|variation| self.create_child(resolved.clone(), variation.clone()))
            .collect();
        let outcomes: Vec<FanoutOutcome> = stream::iter(pending)
            .buffered(width)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.success).count();
        if failed > 0 {
            tracing::warn!(base = %base.branch, failed, total = outcomes.len(), "Some branches could not be created");
        }
        Ok(outcomes)
    }

    async fn create_child(&self, base: BranchContext, variation: String) -> FanoutOutcome {
        let child = child_context(&base, &variation);
        let sha = child.sha.clone().unwrap_or_default();

        match self.client.create_branch(&child.repo, &child.branch, &sha).await {
            Ok(creation) => {
                let already_existed = creation == BranchCreation::AlreadyExists;
                tracing::debug!(branch = %child.branch, already_existed, "Branch ready");
                FanoutOutcome {
                    variation_id: variation,
                    branch: child,
                    success: true,
                    already_existed,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(branch = %child.branch, error = %e, "Branch creation failed");
                FanoutOutcome {
                    variation_id: variation,
                    branch: child,
                    success: false,
                    already_existed: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use crate::remote::RepoRef;
    use crate::testing::MockVcsClient;
    use std::time::Duration;

    fn base() -> BranchContext {
        BranchContext::new(RepoRef::new("acme", "lab"), "exp")
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_outcomes_follow_input_order() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0").with_create_delay(Duration::from_millis(5)));
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::unbounded());

        let variations = ids(&["c", "a", "b", "d"]);
        let outcomes = fanout.fan_out(&base(), &variations).await.unwrap();

        let order: Vec<&str> = outcomes.iter().map(|o| o.variation_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(outcomes[0].branch.branch, "exp-c");
        assert_eq!(outcomes[0].branch.sha.as_deref(), Some("sha0"));
    }

    #[tokio::test]
    async fn test_fan_out_on_spawned_task() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0"));
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::with_max_concurrency(2));

        let handle = tokio::spawn(async move { fanout.fan_out(&base(), &ids(&["v1", "v2", "v3"])).await });
        let outcomes = handle.await.unwrap().unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(mock.has_branch("exp-v3"));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let mock = Arc::new(
            MockVcsClient::new()
                .with_branch("exp", "sha0")
                .with_create_failure("exp-bad", RemoteError::status(403, "Resource not accessible")),
        );
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::default());

        let outcomes = fanout.fan_out(&base(), &ids(&["ok1", "bad", "ok2"])).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.as_deref().is_some_and(|e| e.contains("403")));
        assert!(outcomes[2].success);
        assert!(mock.has_branch("exp-ok2"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0"));
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::default());
        let variations = ids(&["v1", "v2"]);

        let first = fanout.fan_out(&base(), &variations).await.unwrap();
        let second = fanout.fan_out(&base(), &variations).await.unwrap();

        assert!(first.iter().all(|o| o.success && !o.already_existed));
        assert!(second.iter().all(|o| o.success && o.already_existed));
    }

    #[tokio::test]
    async fn test_unresolvable_base_fails_fast() {
        let mock = Arc::new(MockVcsClient::new());
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::default());

        let err = fanout.fan_out(&base(), &ids(&["v1"])).await.unwrap_err();

        assert!(matches!(err, LabflowError::BaseContextUnresolved { ref branch, .. } if branch == "exp"));
        assert_eq!(err.status_code(), Some(404));
        assert!(mock.created_branches().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0").with_create_delay(Duration::from_millis(20)));
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::with_max_concurrency(2));

        let variations: Vec<String> = (0..6).map(|i| format!("v{i}")).collect();
        let outcomes = fanout.fan_out(&base(), &variations).await.unwrap();

        assert_eq!(outcomes.len(), 6);
        assert!(mock.max_concurrent_creates() <= 2);
        assert!(mock.max_concurrent_creates() >= 1);
    }

    #[tokio::test]
    async fn test_unbounded_runs_all_at_once() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0").with_create_delay(Duration::from_millis(20)));
        let fanout = BranchFanout::new(mock.clone(), FanoutConfig::unbounded());

        let variations: Vec<String> = (0..5).map(|i| format!("v{i}")).collect();
        fanout.fan_out(&base(), &variations).await.unwrap();

        assert_eq!(mock.max_concurrent_creates(), 5);
    }

    #[tokio::test]
    async fn test_empty_variations() {
        let mock = Arc::new(MockVcsClient::new().with_branch("exp", "sha0"));
        let fanout = BranchFanout::new(mock, FanoutConfig::default());
        assert!(fanout.fan_out(&base(), &[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_child_context() {
        let parent = base().with_sha("abc");
        let child = child_context(&parent, "lr-1e3");
        assert_eq!(child.branch, "exp-lr-1e3");
        assert_eq!(child.sha.as_deref(), Some("abc"));
        assert_eq!(child.repo, parent.repo);
    }
}
