//! Core domain types for rollout-watch.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;

pub use ids::{InvalidParentId, OperationId, ParentId, UnitId};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Request
// ============================================================================

/// The workload an operation acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub namespace: String,
    pub deployment: String,
    /// Version label of the workload subset (may be empty).
    pub version: String,
    /// Container whose image is replaced.
    pub container: String,
}

impl DeploymentTarget {
    /// Name of the workload resource on the orchestration platform.
    #[must_use]
    pub fn workload_name(&self) -> String {
        if self.version.is_empty() {
            self.deployment.clone()
        } else {
            format!("{}-{}", self.deployment, self.version)
        }
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workload_name())
    }
}

/// Immutable input to one operation.
///
/// Built by the caller and handed to exactly one executor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub target: DeploymentTarget,
    pub unit_id: UnitId,
    pub new_image: String,
    pub old_image: String,
    pub operator: String,
    /// External source identifier (set when a CI/devops caller drives the rollout).
    #[serde(default)]
    pub source_id: Option<String>,
    /// Internal parent deployment record to link this operation to.
    #[serde(default, deserialize_with = "parent_or_none")]
    pub parent_id: Option<ParentId>,
}

/// Callers send `0` for "no parent"; any non-positive reference reads as absent.
fn parent_or_none<'de, D>(deserializer: D) -> Result<Option<ParentId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.and_then(ParentId::from_raw))
}

// ============================================================================
// Result status
// ============================================================================

/// Persisted result of an operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Failure,
    Success,
    Pending,
}

#[derive(Debug, Error)]
#[error("unknown result code {0}")]
pub struct UnknownResultCode(pub i64);

impl ResultStatus {
    /// Storage code. These values are shared with the upstream release system.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Failure => 0,
            Self::Success => 1,
            Self::Pending => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, UnknownResultCode> {
        match code {
            0 => Ok(Self::Failure),
            1 => Ok(Self::Success),
            2 => Ok(Self::Pending),
            other => Err(UnknownResultCode(other)),
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Success => "success",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient platform or network fault.
    RemoteUnavailable,
    /// The platform refused the command.
    RemoteRejected,
    /// Attempt budget or deadline exhausted.
    ConvergenceTimeout,
    /// A transaction failed and was rolled back.
    PersistenceFailure,
    /// A panic was caught at a task boundary.
    PanicRecovered,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteUnavailable => "remote_unavailable",
            Self::RemoteRejected => "remote_rejected",
            Self::ConvergenceTimeout => "convergence_timeout",
            Self::PersistenceFailure => "persistence_failure",
            Self::PanicRecovered => "panic_recovered",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one operation.
///
/// A sum type so a failure always carries its kind and a success never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Outcome {
    Success {
        message: String,
        cost_secs: u64,
    },
    Failure {
        kind: FailureKind,
        message: String,
        cost_secs: u64,
    },
}

impl Outcome {
    #[must_use]
    pub fn success(message: impl Into<String>, cost_secs: u64) -> Self {
        Self::Success {
            message: message.into(),
            cost_secs,
        }
    }

    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>, cost_secs: u64) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            cost_secs,
        }
    }

    #[must_use]
    pub const fn result(&self) -> ResultStatus {
        match self {
            Self::Success { .. } => ResultStatus::Success,
            Self::Failure { .. } => ResultStatus::Failure,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. } | Self::Failure { message, .. } => message,
        }
    }

    #[must_use]
    pub const fn cost_secs(&self) -> u64 {
        match self {
            Self::Success { cost_secs, .. } | Self::Failure { cost_secs, .. } => *cost_secs,
        }
    }

    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

// ============================================================================
// Convergence
// ============================================================================

/// Replica counts observed on the platform at one instant.
///
/// Never persisted; it only lives inside the convergence loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceStatus {
    pub desired_replicas: u32,
    pub current_replicas: u32,
    pub updated_replicas: u32,
}

impl ConvergenceStatus {
    #[must_use]
    pub const fn new(desired: u32, current: u32, updated: u32) -> Self {
        Self {
            desired_replicas: desired,
            current_replicas: current,
            updated_replicas: updated,
        }
    }

    /// A rollout has finished when desired, current and updated counts agree.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        self.desired_replicas == self.current_replicas
            && self.desired_replicas == self.updated_replicas
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "desired={} current={} updated={}",
            self.desired_replicas, self.current_replicas, self.updated_replicas
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(version: &str) -> DeploymentTarget {
        DeploymentTarget {
            namespace: "shop".to_string(),
            deployment: "cart".to_string(),
            version: version.to_string(),
            container: "cart".to_string(),
        }
    }

    #[test]
    fn workload_name_joins_version_label() {
        assert_eq!(target("v2").workload_name(), "cart-v2");
        assert_eq!(target("").workload_name(), "cart");
        assert_eq!(target("v2").to_string(), "shop/cart-v2");
    }

    #[test]
    fn convergence_requires_all_three_counts_equal() {
        assert!(ConvergenceStatus::new(3, 3, 3).is_converged());
        assert!(ConvergenceStatus::new(0, 0, 0).is_converged());
        assert!(!ConvergenceStatus::new(3, 2, 3).is_converged());
        assert!(!ConvergenceStatus::new(3, 3, 1).is_converged());
        assert!(!ConvergenceStatus::new(3, 4, 4).is_converged());
    }

    #[test]
    fn result_codes_match_storage_contract() {
        for status in [
            ResultStatus::Failure,
            ResultStatus::Success,
            ResultStatus::Pending,
        ] {
            assert_eq!(ResultStatus::from_code(status.code()).unwrap(), status);
        }
        assert_eq!(ResultStatus::Pending.code(), 2);
        assert!(ResultStatus::from_code(7).is_err());
        assert!(!ResultStatus::Pending.is_terminal());
        assert!(ResultStatus::Failure.is_terminal());
    }

    #[test]
    fn outcome_accessors() {
        let ok = Outcome::success("cart-v2 image updated", 140);
        assert_eq!(ok.result(), ResultStatus::Success);
        assert_eq!(ok.cost_secs(), 140);
        assert!(ok.failure_kind().is_none());

        let failed = Outcome::failure(FailureKind::RemoteRejected, "forbidden", 0);
        assert_eq!(failed.result(), ResultStatus::Failure);
        assert_eq!(failed.message(), "forbidden");
        assert_eq!(failed.failure_kind(), Some(FailureKind::RemoteRejected));
    }

    #[test]
    fn outcome_serializes_with_result_tag() {
        let failed = Outcome::failure(FailureKind::ConvergenceTimeout, "timed out", 480);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["result"], "failure");
        assert_eq!(json["kind"], "convergence_timeout");
        assert_eq!(json["cost_secs"], 480);
    }

    #[test]
    fn parent_id_rejects_non_positive() {
        assert!(ParentId::from_raw(0).is_none());
        assert!(ParentId::from_raw(-3).is_none());
        assert_eq!(ParentId::from_raw(9).map(ParentId::value), Some(9));
    }

    fn request_json(parent: &str) -> String {
        format!(
            r#"{{
                "target": {{"namespace": "shop", "deployment": "cart", "version": "v2", "container": "cart"}},
                "unit_id": 7,
                "new_image": "cart:2",
                "old_image": "cart:1",
                "operator": "ops"{parent}
            }}"#
        )
    }

    #[test]
    fn request_with_zero_parent_has_no_parent() {
        let request: OperationRequest =
            serde_json::from_str(&request_json(r#", "parent_id": 0"#)).unwrap();
        assert_eq!(request.parent_id, None);

        let request: OperationRequest =
            serde_json::from_str(&request_json(r#", "parent_id": -4"#)).unwrap();
        assert_eq!(request.parent_id, None);

        let request: OperationRequest =
            serde_json::from_str(&request_json(r#", "parent_id": null"#)).unwrap();
        assert_eq!(request.parent_id, None);

        let request: OperationRequest = serde_json::from_str(&request_json("")).unwrap();
        assert_eq!(request.parent_id, None);
        assert_eq!(request.source_id, None);
    }

    #[test]
    fn request_keeps_positive_parent() {
        let request: OperationRequest =
            serde_json::from_str(&request_json(r#", "parent_id": 12"#)).unwrap();
        assert_eq!(request.parent_id, ParentId::from_raw(12));
        assert_eq!(request.target.workload_name(), "cart-v2");
        assert_eq!(request.unit_id, UnitId::new(7));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["parent_id"], 12);
        let back: OperationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn bare_parent_id_rejects_non_positive() {
        assert!(serde_json::from_str::<ParentId>("0").is_err());
        assert!(serde_json::from_str::<ParentId>("-1").is_err());
        assert_eq!(
            serde_json::from_str::<ParentId>("5").unwrap(),
            ParentId::from_raw(5).unwrap()
        );
        assert_eq!(ParentId::try_from(0), Err(InvalidParentId(0)));
    }
}
