use crate::measurement::error::StoreError;
use crate::measurement::store::MeasurementStore;
use crate::measurement::{schema, MeasurementId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

/// One successful cycle: a measurement joined with its three facts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub measurement_id: MeasurementId,
    pub timestamp: String,
    /// Bytes per second.
    pub download_rate: f64,
    /// Bytes per second.
    pub upload_rate: f64,
    /// Milliseconds.
    pub ping: f64,
}

/// One failed cycle: a measurement joined with its error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorLogEntry {
    pub measurement_id: MeasurementId,
    pub timestamp: String,
    pub message: String,
}

// Inner joins on purpose: a measurement missing any fact (a failed or
// interrupted cycle) never shows up in a result query.
const RESULT_SELECT: &str = "\
SELECT m.measurement_id, m.timestamp, d.download_rate, u.upload_rate, p.ping
FROM measurements m
JOIN downloads d ON m.measurement_id = d.measurement_id
JOIN uploads   u ON m.measurement_id = u.measurement_id
JOIN pings     p ON m.measurement_id = p.measurement_id";

const ERROR_SELECT: &str = "\
SELECT m.measurement_id, m.timestamp, e.log_message
FROM measurements m
JOIN error_logs e ON m.measurement_id = e.measurement_id";

/// Read operations shared by the writable store and the read-only reader.
///
/// Range bounds are inclusive and compared as text, which orders correctly
/// only when every timestamp uses the same ISO-8601 layout and offset.
pub trait MeasurementQueries {
    fn conn(&self) -> &Connection;

    /// The joined result for `id`, or `None` when the measurement does not
    /// exist or has no complete fact triple.
    fn get_result(&self, id: MeasurementId) -> Result<Option<MeasurementResult>, StoreError> {
        let sql = format!("{RESULT_SELECT}\nWHERE m.measurement_id = ?1");
        let result = self
            .conn()
            .query_row(&sql, params![id], result_from_row)
            .optional()?;
        Ok(result)
    }

    /// Every complete measurement in insertion order.
    fn all_results(&self) -> Result<Vec<MeasurementResult>, StoreError> {
        let sql = format!("{RESULT_SELECT}\nORDER BY m.measurement_id");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], result_from_row)?;
        let results = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Complete measurements with `start <= timestamp <= end`.
    fn results_in_range(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<MeasurementResult>, StoreError> {
        let sql = format!(
            "{RESULT_SELECT}\nWHERE m.timestamp >= ?1 AND m.timestamp <= ?2\nORDER BY m.measurement_id"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![start, end], result_from_row)?;
        let results = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// The error logged for `id`, if that cycle failed.
    fn error_for(&self, id: MeasurementId) -> Result<Option<ErrorLogEntry>, StoreError> {
        let sql = format!("{ERROR_SELECT}\nWHERE m.measurement_id = ?1");
        let entry = self
            .conn()
            .query_row(&sql, params![id], error_from_row)
            .optional()?;
        Ok(entry)
    }

    /// Every failed cycle in insertion order.
    fn all_errors(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let sql = format!("{ERROR_SELECT}\nORDER BY m.measurement_id");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([], error_from_row)?;
        let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Failed cycles with `start <= timestamp <= end`, same comparison rules
    /// as [`MeasurementQueries::results_in_range`].
    fn errors_in_range(&self, start: &str, end: &str) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let sql = format!(
            "{ERROR_SELECT}\nWHERE m.timestamp >= ?1 AND m.timestamp <= ?2\nORDER BY m.measurement_id"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![start, end], error_from_row)?;
        let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl MeasurementQueries for MeasurementStore {
    fn conn(&self) -> &Connection {
        self.connection()
    }
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<MeasurementResult> {
    Ok(MeasurementResult {
        measurement_id: row.get(0)?,
        timestamp: row.get(1)?,
        download_rate: row.get(2)?,
        upload_rate: row.get(3)?,
        ping: row.get(4)?,
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorLogEntry> {
    Ok(ErrorLogEntry {
        measurement_id: row.get(0)?,
        timestamp: row.get(1)?,
        message: row.get(2)?,
    })
}

/// A read-only view of the measurements database for reporting.
///
/// Opens a separate read-only SQLite connection so queries never contend
/// with a running cycle for the write lock (WAL mode allows this).
pub struct MeasurementReader {
    conn: Connection,
}

impl MeasurementReader {
    /// Open a read-only connection to the measurements database.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        Ok(Self { conn })
    }
}

impl MeasurementQueries for MeasurementReader {
    fn conn(&self) -> &Connection {
        &self.conn
    }
}
