use std::path::PathBuf;

use thiserror::Error;

use rollout_types::{OperationId, ParentId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action}: {source}")]
    Sqlite {
        action: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to prepare database path {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("operation {0} not found")]
    OperationNotFound(OperationId),
    #[error("parent record {0} not found")]
    ParentNotFound(ParentId),
    #[error("release {0} not found")]
    ReleaseNotFound(i64),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Attach the attempted action to a rusqlite error.
pub(crate) trait SqliteResultExt<T> {
    fn during(self, action: &'static str) -> Result<T, StoreError>;
}

impl<T> SqliteResultExt<T> for Result<T, rusqlite::Error> {
    fn during(self, action: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Sqlite { action, source })
    }
}
