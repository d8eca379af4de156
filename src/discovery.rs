//! Generation backend discovery
//!
//! Resolves which generation model to use, exactly once at startup. An
//! explicit override wins immediately; otherwise the Ollama model listing
//! is polled with a bounded retry policy until at least one model shows up.
//! Exhausting the policy is startup-fatal: the service refuses to serve
//! without a usable backend.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StartupError;

/// Identifier of the resolved generation backend model. Immutable for the
/// service lifetime; there is no runtime model hot-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle(String);

impl ModelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded retry policy for the discovery poll loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

/// Seam over the backend's model-listing endpoint so tests can simulate
/// not-ready → ready transitions without real delays.
#[async_trait]
pub trait ModelLister: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Response wrapper for the Ollama /api/tags endpoint
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

/// Model listing backed by a running Ollama instance.
pub struct OllamaModelLister {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaModelLister {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ModelLister for OllamaModelLister {
    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Resolve the generation model to use.
///
/// With an explicit override the backend is not contacted at all. Otherwise
/// each poll that errors, returns zero models, or returns a malformed body
/// counts as "not ready yet" and is retried after the policy delay.
pub async fn discover(
    override_model: Option<&str>,
    lister: &dyn ModelLister,
    policy: RetryPolicy,
    backend_url: &str,
) -> Result<ModelHandle, StartupError> {
    if let Some(model) = override_model {
        tracing::info!("Using configured generation model override '{}'", model);
        return Ok(ModelHandle::new(model));
    }

    for attempt in 1..=policy.max_attempts {
        match lister.list_models().await {
            Ok(models) => {
                if let Some(first) = models.into_iter().next() {
                    tracing::info!(
                        "Discovered generation model '{}' on attempt {}/{}",
                        first,
                        attempt,
                        policy.max_attempts
                    );
                    return Ok(ModelHandle::new(first));
                }
                tracing::warn!(
                    "Backend reachable but no models provisioned yet (attempt {}/{})",
                    attempt,
                    policy.max_attempts
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Backend not ready (attempt {}/{}): {}",
                    attempt,
                    policy.max_attempts,
                    e
                );
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(StartupError::DiscoveryExhausted {
        url: backend_url.to_string(),
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Lister that fails or returns empty for the first `ready_after`
    /// attempts, then reports one model.
    struct EventuallyReady {
        calls: AtomicU32,
        ready_after: u32,
        early_behavior: EarlyBehavior,
    }

    enum EarlyBehavior {
        Empty,
        Error,
    }

    #[async_trait]
    impl ModelLister for EventuallyReady {
        async fn list_models(&self) -> Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.ready_after {
                return match self.early_behavior {
                    EarlyBehavior::Empty => Ok(vec![]),
                    EarlyBehavior::Error => Err(anyhow::anyhow!("connection refused")),
                };
            }
            Ok(vec!["llama3:latest".to_string(), "phi4".to_string()])
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_override_skips_backend_entirely() {
        // A lister that panics if contacted
        struct MustNotBeCalled;

        #[async_trait]
        impl ModelLister for MustNotBeCalled {
            async fn list_models(&self) -> Result<Vec<String>> {
                panic!("Override must not contact the backend");
            }
        }

        let handle = discover(
            Some("llama3.1"),
            &MustNotBeCalled,
            fast_policy(1),
            "http://localhost:11434",
        )
        .await
        .expect("Override must resolve");
        assert_eq!(handle.name(), "llama3.1");
    }

    #[tokio::test]
    async fn test_discovery_returns_first_model_on_fourth_poll() {
        // Zero models for 3 polls, then ready: discovery must succeed on
        // attempt 4, not before and not after
        let lister = EventuallyReady {
            calls: AtomicU32::new(0),
            ready_after: 3,
            early_behavior: EarlyBehavior::Empty,
        };

        let handle = discover(None, &lister, fast_policy(20), "http://localhost:11434")
            .await
            .expect("Discovery must succeed once a model appears");

        assert_eq!(handle.name(), "llama3:latest");
        assert_eq!(lister.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_network_failures_are_retried_like_not_ready() {
        let lister = EventuallyReady {
            calls: AtomicU32::new(0),
            ready_after: 2,
            early_behavior: EarlyBehavior::Error,
        };

        let handle = discover(None, &lister, fast_policy(20), "http://localhost:11434")
            .await
            .expect("Errors before readiness must not abort discovery");

        assert_eq!(handle.name(), "llama3:latest");
        assert_eq!(lister.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_fatal() {
        let lister = EventuallyReady {
            calls: AtomicU32::new(0),
            ready_after: u32::MAX,
            early_behavior: EarlyBehavior::Empty,
        };

        let err = discover(None, &lister, fast_policy(5), "http://localhost:11434")
            .await
            .expect_err("Exhaustion must be fatal");

        assert!(matches!(
            err,
            StartupError::DiscoveryExhausted { attempts: 5, .. }
        ));
        assert_eq!(lister.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_tags_response_tolerates_missing_models_field() {
        // Ollama responses without a models list parse as empty, which the
        // poll loop treats as "not ready"
        let tags: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(tags.models.is_empty());

        let tags: TagsResponse =
            serde_json::from_str(r#"{"models": [{"name": "llama3", "size": 42}]}"#).unwrap();
        assert_eq!(tags.models[0].name, "llama3");
    }
}
