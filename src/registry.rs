//! Registry adapters
//!
//! Only the operations the build engine needs beyond the runtime CLI:
//! deleting a whole repository through the registry's HTTP API.

use crate::error::{StagehandError, StagehandResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Host used for references without an explicit registry
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Result of a repository deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteRepoOutcome {
    Deleted,
    /// The registry has no such repository; callers usually treat this as done
    NotFound,
}

/// A repository reference split into its registry parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    pub host: String,
    pub namespace: String,
    pub repository: Option<String>,
}

fn invalid(reference: &str, reason: impl Into<String>) -> StagehandError {
    StagehandError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Split `host/namespace[/repository][:tag|@digest]`.
///
/// Without a registry host the default registry is assumed, and a
/// single-component path gets the `library` namespace.
pub fn parse_reference(reference: &str) -> StagehandResult<RepositoryReference> {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    let (host, path) = match without_digest.split_once('/') {
        Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest.to_string()),
        _ => (DEFAULT_REGISTRY.to_string(), without_digest.to_string()),
    };

    // A ':' after the last '/' starts the tag
    let path = match path.rsplit_once(':') {
        Some((repo, tag)) if !repo.is_empty() && !tag.contains('/') => repo.to_string(),
        _ => path,
    };
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(invalid(reference, "empty repository path"));
    }
    if path
        .chars()
        .any(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c)))
    {
        return Err(invalid(reference, "repository path must be lowercase alphanumerics and separators"));
    }

    let path = if host == DEFAULT_REGISTRY && !path.contains('/') {
        format!("library/{}", path)
    } else {
        path
    };

    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        [namespace] => Ok(RepositoryReference {
            host,
            namespace: namespace.to_string(),
            repository: None,
        }),
        [namespace, repository] => Ok(RepositoryReference {
            host,
            namespace: namespace.to_string(),
            repository: Some(repository.to_string()),
        }),
        _ => Err(invalid(reference, "expected at most namespace/repository")),
    }
}

/// Registry operations beyond push and pull
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Delete the repository a reference points to
    async fn delete_repo(&self, reference: &str) -> StagehandResult<DeleteRepoOutcome>;

    /// Implementation name for display
    fn name(&self) -> &'static str;
}

/// Quay registry (quay.io or self-hosted `quay.*.com`)
pub struct QuayRegistry {
    token: String,
    /// Overrides `https://<host>` as API base
    api_base: Option<String>,
}

impl QuayRegistry {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: None,
        }
    }

    /// Send API calls to `base` instead of the reference's host
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Whether a registry host is served by Quay
    pub fn matches_host(host: &str) -> bool {
        host.starts_with("quay.io")
            || (host.starts_with("quay.") && host.split(':').next().is_some_and(|h| h.ends_with(".com")))
    }

    fn repository_url(&self, parsed: &RepositoryReference, repository: &str) -> String {
        let base = self
            .api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}", parsed.host));
        format!(
            "{}/api/v1/repository/{}/{}",
            base.trim_end_matches('/'),
            parsed.namespace,
            repository
        )
    }
}

#[async_trait]
impl RegistryAdapter for QuayRegistry {
    async fn delete_repo(&self, reference: &str) -> StagehandResult<DeleteRepoOutcome> {
        let parsed = parse_reference(reference)?;
        let repository = parsed
            .repository
            .clone()
            .ok_or_else(|| invalid(reference, "quay references need namespace/repository"))?;
        let url = self.repository_url(&parsed, &repository);
        let authorization = format!("Bearer {}", self.token);
        let host = parsed.host.clone();

        debug!("DELETE {}", url);
        let result = tokio::task::spawn_blocking(move || {
            ureq::delete(url.as_str())
                .header("Authorization", authorization.as_str())
                .call()
                .map(|_| ())
        })
        .await
        .map_err(|e| StagehandError::Internal(format!("registry request task failed: {}", e)))?;

        match result {
            Ok(()) => {
                info!("Deleted repository {}", reference);
                Ok(DeleteRepoOutcome::Deleted)
            }
            Err(ureq::Error::StatusCode(404)) => Ok(DeleteRepoOutcome::NotFound),
            Err(e) => Err(StagehandError::Registry {
                registry: host,
                reason: e.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "quay"
    }
}
