//! Remote collaborators of an operation.
//!
//! # Architecture
//!
//! - [`OrchestrationBackend`] - capability trait for the platform that performs
//!   the rollout: `apply_upgrade` issues the change, `rollout_status` reads the
//!   current replica counts. The convergence loop only sees this trait, so other
//!   backends can be substituted without touching it.
//! - [`kube`] - HTTP backend speaking the apps/v1 Deployment resource shape.
//! - [`upstream`] - one-shot result notification to the release-management system.
//!
//! # Error Handling
//!
//! Backends classify failures into [`PlatformError::Unavailable`] (transient,
//! network, 5xx) and [`PlatformError::Rejected`] (the platform refused the
//! command). Neither is retried here; retry policy belongs to the caller.

pub mod kube;
pub mod upstream;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use rollout_types::{ConvergenceStatus, DeploymentTarget, FailureKind};

pub use kube::HttpOrchestrator;
pub use upstream::{NotifyError, UpstreamNotifier};

/// Boxed future returned by backend calls.
pub type PlatformFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, PlatformError>> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{message}")]
    Unavailable { message: String },
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

impl PlatformError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } => FailureKind::RemoteUnavailable,
            Self::Rejected { .. } => FailureKind::RemoteRejected,
        }
    }
}

/// An orchestration platform that can roll a workload to a new image.
pub trait OrchestrationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ask the platform to start rolling `target` to `image`.
    ///
    /// Success means the command was accepted, not that the rollout finished.
    fn apply_upgrade<'a>(
        &'a self,
        target: &'a DeploymentTarget,
        image: &'a str,
    ) -> PlatformFut<'a, ()>;

    /// Read the current replica counts of `target`.
    fn rollout_status<'a>(&'a self, target: &'a DeploymentTarget)
    -> PlatformFut<'a, ConvergenceStatus>;
}

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 8;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Longest error body excerpt carried into messages.
pub(crate) const MAX_ERROR_BODY_BYTES: usize = 512;

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

pub fn http_client_with_timeout(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder().timeout(timeout).build()
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_body(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
