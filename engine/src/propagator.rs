//! Push a recorded outcome to the parent's master release and, when the
//! release came from the upstream system, notify it.
//!
//! Best-effort throughout: every failure is logged and folded into the
//! returned [`Propagation`]; already committed local state is never touched.

use std::sync::Arc;

use rollout_platform::UpstreamNotifier;
use rollout_store::OperationLedger;
use rollout_types::{FailureKind, OperationId, ParentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// The operation has no parent link.
    Skipped,
    /// Copying the outcome onto the master release failed.
    SyncFailed,
    /// Master updated; it has no upstream source id.
    LocalOnly,
    /// Master updated; no upstream endpoint is configured.
    NotifierDisabled,
    Notified,
    NotifyFailed,
}

pub struct UpstreamPropagator {
    ledger: Arc<dyn OperationLedger>,
    notifier: Option<UpstreamNotifier>,
}

impl UpstreamPropagator {
    pub fn new(ledger: Arc<dyn OperationLedger>, notifier: Option<UpstreamNotifier>) -> Self {
        Self { ledger, notifier }
    }

    pub async fn propagate(&self, parent: ParentId, operation: OperationId) -> Propagation {
        let sync = match self.ledger.sync_release(parent, operation) {
            Ok(sync) => sync,
            Err(err) => {
                tracing::error!(
                    operation_id = %operation,
                    parent_id = %parent,
                    kind = %FailureKind::PersistenceFailure,
                    error = %err,
                    "Failed to copy outcome onto master release"
                );
                return Propagation::SyncFailed;
            }
        };
        let release = sync.release;

        if !release.has_upstream_source() {
            tracing::debug!(release_id = release.id, "Release has no upstream source id");
            return Propagation::LocalOnly;
        }

        let Some(notifier) = &self.notifier else {
            tracing::warn!(
                release_id = release.id,
                source_id = %release.source_id,
                "Upstream endpoint not configured; release result not pushed"
            );
            return Propagation::NotifierDisabled;
        };

        match notifier.notify(&release.source_id, release.result).await {
            Ok(()) => Propagation::Notified,
            Err(err) => {
                tracing::error!(
                    operation_id = %operation,
                    release_id = release.id,
                    source_id = %release.source_id,
                    error = %err,
                    "Upstream notification failed"
                );
                Propagation::NotifyFailed
            }
        }
    }
}
