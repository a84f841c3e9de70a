//! HTTP orchestration backend for apps/v1 Deployment resources.
//!
//! ```text
//! PATCH {base}/apis/apps/v1/namespaces/{ns}/deployments/{workload}   (strategic merge)
//! GET   {base}/apis/apps/v1/namespaces/{ns}/deployments/{workload}
//! ```
//!
//! Service-mesh subsets are separate Deployments named `{deployment}-{version}`,
//! so the workload name comes from [`DeploymentTarget::workload_name`].

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;

use rollout_types::{ConvergenceStatus, DeploymentTarget};

use crate::{
    MAX_ERROR_BODY_BYTES, OrchestrationBackend, PlatformError, PlatformFut,
    http_client_with_timeout, truncate_body,
};

const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpOrchestrator {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client_with_timeout(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn deployment_url(&self, target: &DeploymentTarget) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}",
            self.base_url,
            target.namespace,
            target.workload_name()
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, PlatformError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| PlatformError::unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn patch_image(&self, target: &DeploymentTarget, image: &str) -> Result<(), PlatformError> {
        let url = self.deployment_url(target);
        let body = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{ "name": target.container, "image": image }]
                    }
                }
            }
        });

        tracing::debug!(%url, image, "Applying image patch");
        let builder = self
            .client
            .patch(&url)
            .header(CONTENT_TYPE, STRATEGIC_MERGE_PATCH)
            .json(&body);
        self.send(builder, &url).await?;
        Ok(())
    }

    async fn read_status(
        &self,
        target: &DeploymentTarget,
    ) -> Result<ConvergenceStatus, PlatformError> {
        let url = self.deployment_url(target);
        let response = self.send(self.client.get(&url), &url).await?;
        let resource: DeploymentResource = response.json().await.map_err(|e| {
            PlatformError::unavailable(format!("invalid deployment payload from {url}: {e}"))
        })?;
        Ok(resource.convergence())
    }
}

impl OrchestrationBackend for HttpOrchestrator {
    fn name(&self) -> &'static str {
        "kube-http"
    }

    fn apply_upgrade<'a>(
        &'a self,
        target: &'a DeploymentTarget,
        image: &'a str,
    ) -> PlatformFut<'a, ()> {
        Box::pin(self.patch_image(target, image))
    }

    fn rollout_status<'a>(
        &'a self,
        target: &'a DeploymentTarget,
    ) -> PlatformFut<'a, ConvergenceStatus> {
        Box::pin(self.read_status(target))
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentResource {
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    #[serde(default)]
    replicas: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    replicas: u32,
    #[serde(default)]
    updated_replicas: u32,
}

impl DeploymentResource {
    fn convergence(&self) -> ConvergenceStatus {
        ConvergenceStatus::new(
            self.spec.replicas,
            self.status.replicas,
            self.status.updated_replicas,
        )
    }
}

/// 429 and 5xx are transient; any other non-success status is a refusal.
fn classify_failure(status: StatusCode, body: &str) -> PlatformError {
    let detail = error_detail(body);
    let message = if detail.is_empty() {
        format!("platform returned {status}")
    } else {
        format!("platform returned {status}: {detail}")
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PlatformError::Unavailable { message }
    } else {
        PlatformError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Prefer the `message` field of a Status object over the raw body.
fn error_detail(body: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        });
    truncate_body(extracted.as_deref().unwrap_or(body), MAX_ERROR_BODY_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEPLOYMENT_PATH: &str = "/apis/apps/v1/namespaces/shop/deployments/cart-v2";

    fn target() -> DeploymentTarget {
        DeploymentTarget {
            namespace: "shop".to_string(),
            deployment: "cart".to_string(),
            version: "v2".to_string(),
            container: "cart".to_string(),
        }
    }

    fn backend(server: &MockServer) -> HttpOrchestrator {
        HttpOrchestrator::new(
            &format!("{}/", server.uri()),
            Some("mesh-token".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn apply_upgrade_patches_container_image() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(DEPLOYMENT_PATH))
            .and(header("authorization", "Bearer mesh-token"))
            .and(header("content-type", STRATEGIC_MERGE_PATCH))
            .and(body_json(json!({
                "spec": {"template": {"spec": {"containers": [
                    {"name": "cart", "image": "registry/cart:1.1"}
                ]}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server)
            .apply_upgrade(&target(), "registry/cart:1.1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn apply_upgrade_client_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "kind": "Status",
                "message": "spec.template.spec.containers[0].image: Required value"
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .apply_upgrade(&target(), "")
            .await
            .unwrap_err();
        match err {
            PlatformError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert!(message.contains("Required value"), "{message}");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream connect error"))
            .mount(&server)
            .await;

        let err = backend(&server).rollout_status(&target()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable { .. }));
        assert!(err.to_string().contains("upstream connect error"));
    }

    #[tokio::test]
    async fn rollout_status_reads_replica_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"name": "cart-v2"},
                "spec": {"replicas": 3},
                "status": {"replicas": 4, "updatedReplicas": 2, "readyReplicas": 3}
            })))
            .mount(&server)
            .await;

        let status = backend(&server).rollout_status(&target()).await.unwrap();
        assert_eq!(status, ConvergenceStatus::new(3, 4, 2));
        assert!(!status.is_converged());
    }

    #[tokio::test]
    async fn missing_status_counts_read_as_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spec": {"replicas": 2}
            })))
            .mount(&server)
            .await;

        let status = backend(&server).rollout_status(&target()).await.unwrap();
        assert_eq!(status, ConvergenceStatus::new(2, 0, 0));
    }

    #[tokio::test]
    async fn unreachable_platform_is_unavailable() {
        let backend = HttpOrchestrator::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = backend.rollout_status(&target()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Unavailable { .. }));
    }

    #[test]
    fn throttling_counts_as_unavailable() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, PlatformError::Unavailable { .. }));
        assert_eq!(err.to_string(), "platform returned 429 Too Many Requests");
    }
}
