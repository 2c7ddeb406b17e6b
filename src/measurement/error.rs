use std::path::PathBuf;

use super::MeasurementId;

/// Failures of the measurement store.
///
/// Every variant is a storage fault: the caller is expected to abort the
/// cycle and exit non-zero. An absent query result is not an error and is
/// reported as `Ok(None)` or an empty sequence instead.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{table}: measurement {measurement_id} does not exist")]
    ForeignKeyViolation {
        table: &'static str,
        measurement_id: MeasurementId,
    },

    #[error("preparing database directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Classify a failed child-row insert, turning SQLite's foreign key
    /// constraint failure into [`StoreError::ForeignKeyViolation`].
    pub(crate) fn from_insert(
        err: rusqlite::Error,
        table: &'static str,
        measurement_id: MeasurementId,
    ) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Self::ForeignKeyViolation {
                    table,
                    measurement_id,
                }
            }
            _ => Self::Sqlite(err),
        }
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fk_failure_is_classified() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            Some("FOREIGN KEY constraint failed".into()),
        );
        let classified = StoreError::from_insert(err, "pings", 7);
        assert!(classified.is_foreign_key_violation());
        assert_eq!(
            classified.to_string(),
            "pings: measurement 7 does not exist"
        );
    }

    #[test]
    fn other_failures_stay_sqlite() {
        let classified = StoreError::from_insert(rusqlite::Error::InvalidQuery, "pings", 7);
        assert!(matches!(classified, StoreError::Sqlite(_)));
    }
}
