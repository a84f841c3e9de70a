use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};

use rollout_types::{OperationId, OperationRequest, ResultStatus, UnitId};

/// Operations started before this local hour count toward the previous business day.
pub const MAINTENANCE_CUTOFF_HOUR: u32 = 4;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Business day an operation created at `created_at` is attributed to.
#[must_use]
pub fn online_date(created_at: NaiveDateTime) -> NaiveDate {
    let date = created_at.date();
    if created_at.hour() < MAINTENANCE_CUTOFF_HOUR {
        date - ChronoDuration::days(1)
    } else {
        date
    }
}

/// Fields written when an operation record is first created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub unit_id: UnitId,
    pub deployment: String,
    pub old_image: String,
    pub new_image: String,
    pub operator: String,
    pub source_id: String,
    pub insert_time: NaiveDateTime,
    pub online_date: NaiveDate,
}

impl NewOperation {
    #[must_use]
    pub fn from_request(request: &OperationRequest, created_at: NaiveDateTime) -> Self {
        Self {
            unit_id: request.unit_id,
            deployment: request.target.workload_name(),
            old_image: request.old_image.clone(),
            new_image: request.new_image.clone(),
            operator: request.operator.clone(),
            source_id: request.source_id.clone().unwrap_or_default(),
            insert_time: created_at,
            online_date: online_date(created_at),
        }
    }
}

/// One persisted operation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub id: OperationId,
    pub unit_id: UnitId,
    pub deployment: String,
    pub old_image: String,
    pub new_image: String,
    pub operator: String,
    pub source_id: String,
    pub insert_time: NaiveDateTime,
    pub online_date: NaiveDate,
    pub result: ResultStatus,
    pub message: String,
    pub cost_secs: u64,
}

/// Master release record the upstream release system tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub id: i64,
    pub source_id: String,
    pub result: ResultStatus,
    pub error_log: String,
}

impl ReleaseRecord {
    /// Upstream only knows releases that carry a real source id.
    #[must_use]
    pub fn has_upstream_source(&self) -> bool {
        !self.source_id.is_empty() && self.source_id != "0"
    }
}
