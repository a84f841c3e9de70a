//! One operation, start to finish.
//!
//! ```text
//! Created -> Recording -> Racing -> Finalizing -> Done
//!               |                                  ^
//!               +---- pending record not created --+
//! ```
//!
//! The convergence loop runs on its own task and reports through a oneshot
//! channel. The foreground races that channel against the deadline; whichever
//! resolves first decides the outcome. A loop that finishes after the deadline
//! keeps running to completion but its outcome is dropped with the channel.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use rollout_config::{ConvergenceSettings, Environment, RolloutConfig};
use rollout_platform::{OrchestrationBackend, UpstreamNotifier};
use rollout_store::{FinalizeStatus, NewOperation, OperationLedger};
use rollout_types::{FailureKind, OperationId, OperationRequest, Outcome};

use crate::convergence::{ConvergenceLoop, elapsed_secs};
use crate::phase::{ExecutorPhase, transition_edge};
use crate::propagator::{Propagation, UpstreamPropagator};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub environment: Environment,
    /// Wall-clock budget for the whole convergence loop.
    pub deadline: Duration,
    /// Pause between recording the outcome and propagating it.
    pub settle_delay: Duration,
    pub convergence: ConvergenceSettings,
}

impl ExecutorSettings {
    #[must_use]
    pub fn from_config(config: &RolloutConfig) -> Self {
        let environment = config.environment();
        Self {
            deadline: config.deadline_for(&environment),
            settle_delay: config.settle_delay(),
            convergence: config.convergence(),
            environment,
        }
    }
}

/// What happened during one run. Failures are already folded into `outcome`;
/// this is for logging and inspection, not error handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub operation_id: Option<OperationId>,
    pub phase: ExecutorPhase,
    /// The outcome that won the race.
    pub outcome: Option<Outcome>,
    /// `None` when the finalize write failed or was never attempted.
    pub recorded: Option<FinalizeStatus>,
    pub propagation: Propagation,
    /// The foreground sequence panicked and was recovered.
    pub panicked: bool,
}

impl ExecutionReport {
    fn new() -> Self {
        Self {
            operation_id: None,
            phase: ExecutorPhase::Created,
            outcome: None,
            recorded: None,
            propagation: Propagation::Skipped,
            panicked: false,
        }
    }

    fn advance(&mut self, to: ExecutorPhase) {
        let edge = transition_edge(self.phase, to);
        debug_assert!(edge.is_some(), "illegal phase change {} -> {to}", self.phase);
        tracing::debug!(from = %self.phase, %to, ?edge, "Executor phase change");
        self.phase = to;
    }
}

pub struct OperationExecutor {
    ledger: Arc<dyn OperationLedger>,
    backend: Arc<dyn OrchestrationBackend>,
    propagator: UpstreamPropagator,
    settings: ExecutorSettings,
}

impl OperationExecutor {
    pub fn new(
        ledger: Arc<dyn OperationLedger>,
        backend: Arc<dyn OrchestrationBackend>,
        notifier: Option<UpstreamNotifier>,
        settings: ExecutorSettings,
    ) -> Self {
        let propagator = UpstreamPropagator::new(Arc::clone(&ledger), notifier);
        Self {
            ledger,
            backend,
            propagator,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run `request` on the current runtime without waiting for it.
    pub fn spawn(self: &Arc<Self>, request: OperationRequest) -> JoinHandle<ExecutionReport> {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run(request).await })
    }

    /// Run `request` to completion.
    ///
    /// Never fails and never panics: a fault anywhere in the sequence is
    /// logged and reflected in the report.
    pub async fn run(&self, request: OperationRequest) -> ExecutionReport {
        let mut report = ExecutionReport::new();
        let guarded = AssertUnwindSafe(self.execute(request, &mut report))
            .catch_unwind()
            .await;

        if let Err(payload) = guarded {
            tracing::error!(
                operation_id = ?report.operation_id,
                phase = %report.phase,
                kind = %FailureKind::PanicRecovered,
                panic = %panic_message(&*payload),
                "Operation executor panicked; record may remain pending"
            );
            report.panicked = true;
        }
        report
    }

    async fn execute(&self, request: OperationRequest, report: &mut ExecutionReport) {
        report.advance(ExecutorPhase::Recording);

        let created_at = chrono::Local::now().naive_local();
        let new_operation = NewOperation::from_request(&request, created_at);
        let operation_id = match self.ledger.create_pending(&new_operation) {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(
                    deployment = %request.target,
                    kind = %FailureKind::PersistenceFailure,
                    error = %err,
                    "Failed to create operation record; upgrade not started"
                );
                report.advance(ExecutorPhase::Done);
                return;
            }
        };
        report.operation_id = Some(operation_id);

        if let Some(parent) = request.parent_id
            && let Err(err) = self.ledger.link_parent(parent, operation_id)
        {
            tracing::error!(
                %operation_id,
                parent_id = %parent,
                kind = %FailureKind::PersistenceFailure,
                error = %err,
                "Failed to link operation to parent record"
            );
        }

        tracing::info!(
            %operation_id,
            deployment = %request.target,
            image = %request.new_image,
            environment = %self.settings.environment,
            deadline_secs = self.settings.deadline.as_secs(),
            "Starting rollout"
        );

        report.advance(ExecutorPhase::Racing);
        let outcome = self.race(operation_id, &request).await;
        report.outcome = Some(outcome.clone());

        report.advance(ExecutorPhase::Finalizing);
        match self.ledger.finalize(operation_id, &outcome) {
            Ok(status) => {
                report.recorded = Some(status);
                if let FinalizeStatus::AlreadyFinal(existing) = status {
                    tracing::warn!(
                        %operation_id,
                        %existing,
                        "Operation was already finalized; outcome not written"
                    );
                } else {
                    tracing::info!(
                        %operation_id,
                        result = %outcome.result(),
                        cost_secs = outcome.cost_secs(),
                        "Operation finalized"
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    %operation_id,
                    kind = %FailureKind::PersistenceFailure,
                    error = %err,
                    "Failed to record outcome; record remains pending"
                );
            }
        }

        if report.recorded == Some(FinalizeStatus::Applied)
            && let Some(parent) = request.parent_id
        {
            tokio::time::sleep(self.settings.settle_delay).await;
            report.propagation = self.propagator.propagate(parent, operation_id).await;
        }

        report.advance(ExecutorPhase::Done);
    }

    async fn race(&self, operation_id: OperationId, request: &OperationRequest) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let convergence = ConvergenceLoop::new(Arc::clone(&self.backend), self.settings.convergence);
        let target = request.target.clone();
        let image = request.new_image.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(convergence.run(&target, &image))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let panic = panic_message(&*payload);
                    tracing::error!(
                        %operation_id,
                        kind = %FailureKind::PanicRecovered,
                        %panic,
                        "Convergence task panicked"
                    );
                    Outcome::failure(
                        FailureKind::PanicRecovered,
                        format!("convergence task panicked: {panic}"),
                        elapsed_secs(started),
                    )
                }
            };

            if let Err(late) = tx.send(outcome) {
                tracing::info!(
                    %operation_id,
                    result = %late.result(),
                    "Convergence finished after the deadline; outcome discarded"
                );
            }
        });

        tokio::select! {
            received = rx => match received {
                Ok(outcome) => outcome,
                Err(_) => Outcome::failure(
                    FailureKind::PanicRecovered,
                    "convergence task ended without reporting an outcome",
                    elapsed_secs(started),
                ),
            },
            () = tokio::time::sleep(self.settings.deadline) => {
                tracing::warn!(
                    %operation_id,
                    environment = %self.settings.environment,
                    deadline_secs = self.settings.deadline.as_secs(),
                    "Operation deadline expired"
                );
                self.deadline_outcome()
            }
        }
    }

    fn deadline_outcome(&self) -> Outcome {
        let secs = self.settings.deadline.as_secs();
        Outcome::failure(
            FailureKind::ConvergenceTimeout,
            format!(
                "{} environment timed out after {secs}s; container state is abnormal, check the service governance platform",
                self.settings.environment
            ),
            secs,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_config::ExecutorConfig;

    #[test]
    fn settings_follow_environment_class() {
        let config = RolloutConfig {
            environment: Some("prd".to_string()),
            executor: Some(ExecutorConfig {
                settle_delay_ms: Some(250),
            }),
            ..RolloutConfig::default()
        };
        let settings = ExecutorSettings::from_config(&config);
        // ROLLOUT_ENV may pick the environment; the deadline still follows its class.
        assert_eq!(settings.deadline, config.deadline_for(&settings.environment));
        assert_eq!(
            config.deadline_for(&Environment::from_run_mode("prd")),
            Duration::from_secs(1200)
        );
        assert_eq!(
            config.deadline_for(&Environment::from_run_mode("uat")),
            Duration::from_secs(480)
        );
        assert_eq!(settings.settle_delay, Duration::from_millis(250));
        assert_eq!(settings.convergence.max_attempts, 50);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*literal), "boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(&*owned), "kaboom");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
