//! Issue an upgrade, then poll until the rollout converges or the attempt budget runs out.

use std::sync::Arc;

use tokio::time::{Instant, sleep};

use rollout_config::ConvergenceSettings;
use rollout_platform::OrchestrationBackend;
use rollout_types::{DeploymentTarget, FailureKind, Outcome};

pub struct ConvergenceLoop {
    backend: Arc<dyn OrchestrationBackend>,
    settings: ConvergenceSettings,
}

impl ConvergenceLoop {
    pub fn new(backend: Arc<dyn OrchestrationBackend>, settings: ConvergenceSettings) -> Self {
        Self { backend, settings }
    }

    /// Run the loop to a terminal outcome. Never touches persistence.
    ///
    /// Costs are whole seconds since the upgrade command was issued; a rejected
    /// command costs nothing.
    pub async fn run(&self, target: &DeploymentTarget, image: &str) -> Outcome {
        let started = Instant::now();
        let workload = target.workload_name();

        if let Err(err) = self.backend.apply_upgrade(target, image).await {
            tracing::warn!(
                backend = self.backend.name(),
                deployment = %target,
                kind = %err.failure_kind(),
                error = %err,
                "Upgrade command failed"
            );
            return Outcome::failure(err.failure_kind(), err.to_string(), 0);
        }

        // The platform acknowledges before the rollout is visible in status.
        sleep(self.settings.grace).await;

        for attempt in 1..=self.settings.max_attempts {
            sleep(self.settings.poll_interval).await;

            match self.backend.rollout_status(target).await {
                Err(err) => {
                    tracing::warn!(deployment = %target, attempt, error = %err, "Status check failed");
                    // A status read that fails is never a refused command.
                    return Outcome::failure(
                        FailureKind::RemoteUnavailable,
                        err.to_string(),
                        elapsed_secs(started),
                    );
                }
                Ok(status) if status.is_converged() => {
                    let cost = elapsed_secs(started);
                    tracing::info!(deployment = %target, attempt, %status, cost, "Rollout converged");
                    return Outcome::success(format!("{workload} image updated to {image}"), cost);
                }
                Ok(status) => {
                    tracing::info!(
                        deployment = %target,
                        attempt,
                        %status,
                        "Rollout not finished, next check in {}s",
                        self.settings.poll_interval.as_secs()
                    );
                }
            }
        }

        let cost = elapsed_secs(started);
        tracing::warn!(deployment = %target, attempts = self.settings.max_attempts, cost, "Rollout never converged");
        Outcome::failure(
            FailureKind::ConvergenceTimeout,
            format!(
                "{workload} did not converge after {} status checks; container state is abnormal, check the orchestration platform",
                self.settings.max_attempts
            ),
            cost,
        )
    }
}

pub(crate) fn elapsed_secs(started: Instant) -> u64 {
    started.elapsed().as_secs()
}
