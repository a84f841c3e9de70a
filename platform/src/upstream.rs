//! Result notification to the upstream release-management system.
//!
//! One `GET {base}{path}?record_id=<source id>&result=<code>` per finalized
//! operation, authenticated with a static bearer credential. The caller
//! decides whether to send; this client never retries.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use rollout_types::ResultStatus;

use crate::{MAX_ERROR_BODY_BYTES, http_client_with_timeout, truncate_body};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid upstream url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub struct UpstreamNotifier {
    client: reqwest::Client,
    endpoint: Url,
    token: String,
}

impl std::fmt::Debug for UpstreamNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamNotifier")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl UpstreamNotifier {
    pub fn new(
        base_url: &str,
        result_path: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let raw = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            result_path.trim_start_matches('/')
        );
        let endpoint = Url::parse(&raw).map_err(|source| NotifyError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        let client = http_client_with_timeout(timeout).map_err(NotifyError::Client)?;
        Ok(Self {
            client,
            endpoint,
            token: token.into(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Report `result` for the upstream record `source_id`.
    pub async fn notify(&self, source_id: &str, result: ResultStatus) -> Result<(), NotifyError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("record_id", source_id)
            .append_pair("result", &result.code().to_string());

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(NotifyError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: truncate_body(&body, MAX_ERROR_BODY_BYTES),
            });
        }

        tracing::info!(source_id, %result, "Upstream release system notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(server: &MockServer) -> UpstreamNotifier {
        UpstreamNotifier::new(
            &server.uri(),
            "/mdp/release/result",
            "release-token",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sends_source_id_and_result_code_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mdp/release/result"))
            .and(query_param("record_id", "R-1024"))
            .and(query_param("result", "1"))
            .and(header("authorization", "Bearer release-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server)
            .notify("R-1024", ResultStatus::Success)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_reported_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mdp/release/result"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let err = notifier(&server)
            .notify("R-1", ResultStatus::Failure)
            .await
            .unwrap_err();
        match err {
            NotifyError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn joins_base_and_path_without_double_slash() {
        let notifier = UpstreamNotifier::new(
            "https://pms.example/",
            "mdp/release/result",
            "t",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            notifier.endpoint().as_str(),
            "https://pms.example/mdp/release/result"
        );
        assert!(!format!("{notifier:?}").contains("\"t\""));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = UpstreamNotifier::new("not a url", "/x", "t", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, NotifyError::InvalidUrl { .. }));
    }
}
