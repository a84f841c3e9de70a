use std::fmt;

use thiserror::Error;

/// A parent reference that is zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("parent id must be positive, got {0}")]
pub struct InvalidParentId(pub i64);

/// Identifier of a persisted operation record, assigned on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a pre-existing parent deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ParentId(i64);

impl ParentId {
    /// Parent references are positive; zero or negative means "no parent".
    #[must_use]
    pub fn from_raw(id: i64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for ParentId {
    type Error = InvalidParentId;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::from_raw(id).ok_or(InvalidParentId(id))
    }
}

impl From<ParentId> for i64 {
    fn from(id: ParentId) -> Self {
        id.0
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Release unit the rollout belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UnitId(i64);

impl UnitId {
    #[must_use]
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
