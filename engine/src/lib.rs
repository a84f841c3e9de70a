//! Deadline-bounded rollout execution.
//!
//! # Architecture
//!
//! ```text
//!                  OperationExecutor::run
//!                           |
//!        create_pending ----+---- link_parent
//!                           |
//!              +------------+-------------+
//!              |                          |
//!     spawned ConvergenceLoop     sleep(deadline)
//!     apply -> grace -> poll*             |
//!              |  oneshot                 |
//!              +-------> select! <--------+
//!                           |
//!                 finalize (compare-and-set)
//!                           |
//!                  settle -> UpstreamPropagator
//!                           sync_release -> notify
//! ```
//!
//! Exactly one outcome reaches the store: the race winner. The loop never
//! writes; a loop outcome that arrives after the deadline is discarded.
//! Panics on either side of the race are caught and logged, never propagated
//! to the caller.

mod convergence;
mod executor;
mod phase;
mod propagator;

pub use convergence::ConvergenceLoop;
pub use executor::{ExecutionReport, ExecutorSettings, OperationExecutor};
pub use phase::ExecutorPhase;
pub use propagator::{Propagation, UpstreamPropagator};
