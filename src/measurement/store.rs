use crate::measurement::error::StoreError;
use crate::measurement::{schema, MeasurementId};
use crate::speedtest::SpeedTestResult;
use rusqlite::{params, Connection, ToSql, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persistent measurement store backed by a single SQLite connection.
///
/// Each write method is its own atomic statement. Writes that must land
/// together go through [`MeasurementStore::transaction`] (or
/// [`MeasurementStore::record_success`]), which commits only when the closure
/// returns `Ok` and rolls back on every other exit path.
pub struct MeasurementStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl MeasurementStore {
    /// Open (or create) the database file at `db_path`.
    ///
    /// The parent directory is created if missing. The schema is not touched;
    /// call [`MeasurementStore::initialize_schema`] for that.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(schema::FILE_PRAGMAS)?;
        conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        debug!(path = %db_path.display(), "opened measurement store");

        Ok(Self {
            conn,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        Ok(Self {
            conn,
            db_path: None,
        })
    }

    /// Path to the underlying database file, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Create the root table and the four child tables if they don't exist.
    ///
    /// Safe to call on an existing database. Child tables left behind by
    /// older tooling whose foreign key points somewhere other than
    /// `measurements` are rebuilt in place with their rows and ids intact.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::MEASUREMENTS_DDL)?;

        for (table, ddl) in schema::CHILD_TABLES {
            if has_foreign_parent(&self.conn, table)? {
                warn!(table, "child table references the wrong parent, rebuilding");
                self.rebuild_child_table(table, ddl)?;
            } else {
                self.conn.execute_batch(ddl)?;
            }
        }

        info!("measurement schema ready");
        Ok(())
    }

    /// Insert the root row of a cycle and return its id.
    pub fn create_measurement(&self, timestamp: &str) -> Result<MeasurementId, StoreError> {
        insert_measurement(&self.conn, timestamp)
    }

    pub fn record_download(&self, id: MeasurementId, rate: f64) -> Result<(), StoreError> {
        insert_download(&self.conn, id, rate)
    }

    pub fn record_upload(&self, id: MeasurementId, rate: f64) -> Result<(), StoreError> {
        insert_upload(&self.conn, id, rate)
    }

    pub fn record_ping(&self, id: MeasurementId, latency: f64) -> Result<(), StoreError> {
        insert_ping(&self.conn, id, latency)
    }

    pub fn record_error(&self, id: MeasurementId, message: &str) -> Result<(), StoreError> {
        insert_error_log(&self.conn, id, message)
    }

    /// Write the download, upload and ping facts of a successful cycle as one
    /// unit of work, in that order.
    pub fn record_success(
        &mut self,
        id: MeasurementId,
        result: &SpeedTestResult,
    ) -> Result<(), StoreError> {
        self.transaction(|tx| {
            insert_download(tx, id, result.download_rate)?;
            insert_upload(tx, id, result.upload_rate)?;
            insert_ping(tx, id, result.ping)
        })
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back otherwise.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn rebuild_child_table(&self, table: &str, ddl: &str) -> Result<(), StoreError> {
        // foreign_keys cannot be toggled inside a transaction.
        self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;

        let rebuilt = (|| -> Result<(), StoreError> {
            let legacy = format!("{table}_legacy");
            let tx = self.conn.unchecked_transaction()?;
            tx.execute_batch(&format!("ALTER TABLE {table} RENAME TO {legacy};"))?;
            tx.execute_batch(ddl)?;
            let copied = tx.execute(&format!("INSERT INTO {table} SELECT * FROM {legacy}"), [])?;
            tx.execute_batch(&format!("DROP TABLE {legacy};"))?;
            tx.commit()?;
            info!(table, rows = copied, "rebuilt legacy child table");
            Ok(())
        })();

        self.conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        rebuilt
    }
}

/// True when `table` exists and declares a foreign key to anything other
/// than the root table.
fn has_foreign_parent(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_foreign_key_list(?1) WHERE \"table\" <> ?2",
        params![table, schema::ROOT_TABLE],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn insert_measurement(
    conn: &Connection,
    timestamp: &str,
) -> Result<MeasurementId, StoreError> {
    conn.execute(
        "INSERT INTO measurements (timestamp) VALUES (?1)",
        params![timestamp],
    )?;
    let id = conn.last_insert_rowid();
    debug!(measurement_id = id, timestamp, "inserted measurement");
    Ok(id)
}

fn insert_child(
    conn: &Connection,
    table: &'static str,
    sql: &str,
    id: MeasurementId,
    value: &dyn ToSql,
) -> Result<(), StoreError> {
    conn.execute(sql, params![id, value])
        .map_err(|e| StoreError::from_insert(e, table, id))?;
    debug!(measurement_id = id, table, "inserted child row");
    Ok(())
}

pub(crate) fn insert_download(
    conn: &Connection,
    id: MeasurementId,
    rate: f64,
) -> Result<(), StoreError> {
    insert_child(
        conn,
        "downloads",
        "INSERT INTO downloads (measurement_id, download_rate) VALUES (?1, ?2)",
        id,
        &rate,
    )
}

pub(crate) fn insert_upload(
    conn: &Connection,
    id: MeasurementId,
    rate: f64,
) -> Result<(), StoreError> {
    insert_child(
        conn,
        "uploads",
        "INSERT INTO uploads (measurement_id, upload_rate) VALUES (?1, ?2)",
        id,
        &rate,
    )
}

pub(crate) fn insert_ping(
    conn: &Connection,
    id: MeasurementId,
    latency: f64,
) -> Result<(), StoreError> {
    insert_child(
        conn,
        "pings",
        "INSERT INTO pings (measurement_id, ping) VALUES (?1, ?2)",
        id,
        &latency,
    )
}

pub(crate) fn insert_error_log(
    conn: &Connection,
    id: MeasurementId,
    message: &str,
) -> Result<(), StoreError> {
    insert_child(
        conn,
        "error_logs",
        "INSERT INTO error_logs (measurement_id, log_message) VALUES (?1, ?2)",
        id,
        &message,
    )
}
