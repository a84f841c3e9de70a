//! Operation record persistence.
//!
//! The store is the only shared resource of an operation. Every write is a
//! short transaction scoped to one logical update; errors roll the
//! transaction back and are returned, never retried.
//!
//! # Tables
//!
//! ```text
//! operations     one row per attempt; result 0 = failure, 1 = success, 2 = pending
//! release_items  parent deployment records; operation_id is the ParentLink
//! releases       master release records mirrored to the upstream system
//! ```
//!
//! Finalization is a compare-and-set on `result = pending`, so two writers
//! (in this process or another) can never both finalize the same record.

mod error;
mod record;
mod sqlite_store;
mod sqlite_util;

pub use error::StoreError;
pub use record::{
    MAINTENANCE_CUTOFF_HOUR, NewOperation, OperationRecord, ReleaseRecord, online_date,
};
pub use sqlite_store::SqliteStore;

use rollout_types::{OperationId, Outcome, ParentId, ResultStatus};

/// Result of a conditional finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStatus {
    /// The record moved from pending to the outcome's result.
    Applied,
    /// Someone else finalized first; the record was left untouched.
    AlreadyFinal(ResultStatus),
}

/// Master record state after copying an operation's outcome onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSync {
    pub release: ReleaseRecord,
    pub operation_id: OperationId,
}

/// Persistence operations the executor and propagator depend on.
///
/// Implementations must make `finalize` conditional on the record still
/// being pending.
pub trait OperationLedger: Send + Sync {
    /// Insert a pending record and return its assigned identifier.
    fn create_pending(&self, operation: &NewOperation) -> Result<OperationId, StoreError>;

    /// Point a parent deployment record at `operation` (last write wins).
    fn link_parent(&self, parent: ParentId, operation: OperationId) -> Result<(), StoreError>;

    /// Write the outcome if and only if the record is still pending.
    fn finalize(&self, id: OperationId, outcome: &Outcome) -> Result<FinalizeStatus, StoreError>;

    /// Copy the operation's persisted result onto the parent's master release.
    fn sync_release(
        &self,
        parent: ParentId,
        operation: OperationId,
    ) -> Result<ReleaseSync, StoreError>;

    fn load(&self, id: OperationId) -> Result<Option<OperationRecord>, StoreError>;
}
