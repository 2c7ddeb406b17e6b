// DDL constants for the measurements database.
//
// Table and column names are shared with databases provisioned by earlier
// tooling and must not change.

/// Root table. One row per measurement cycle.
pub const MEASUREMENTS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS measurements (
    measurement_id  INTEGER PRIMARY KEY,
    timestamp       TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_measurements_ts ON measurements(timestamp);
";

/// Download rate in bytes per second.
pub const DOWNLOADS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS downloads (
    download_id     INTEGER PRIMARY KEY,
    measurement_id  INTEGER NOT NULL,
    download_rate   REAL    NOT NULL,
    FOREIGN KEY(measurement_id) REFERENCES measurements(measurement_id)
);
";

/// Upload rate in bytes per second.
pub const UPLOADS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS uploads (
    upload_id       INTEGER PRIMARY KEY,
    measurement_id  INTEGER NOT NULL,
    upload_rate     REAL    NOT NULL,
    FOREIGN KEY(measurement_id) REFERENCES measurements(measurement_id)
);
";

/// Latency in milliseconds.
pub const PINGS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS pings (
    ping_id         INTEGER PRIMARY KEY,
    measurement_id  INTEGER NOT NULL,
    ping            REAL    NOT NULL,
    FOREIGN KEY(measurement_id) REFERENCES measurements(measurement_id)
);
";

pub const ERROR_LOGS_DDL: &str = "\
CREATE TABLE IF NOT EXISTS error_logs (
    error_log_id    INTEGER PRIMARY KEY,
    measurement_id  INTEGER NOT NULL,
    log_message     TEXT    NOT NULL,
    FOREIGN KEY(measurement_id) REFERENCES measurements(measurement_id)
);
";

/// Every table referencing `measurements`, with the DDL that creates it.
pub const CHILD_TABLES: [(&str, &str); 4] = [
    ("downloads", DOWNLOADS_DDL),
    ("uploads", UPLOADS_DDL),
    ("pings", PINGS_DDL),
    ("error_logs", ERROR_LOGS_DDL),
];

/// Applied to every connection, file-backed or in-memory.
pub const CONNECTION_PRAGMAS: &str = "\
PRAGMA foreign_keys = ON;
";

/// Applied only to file-backed writers.
pub const FILE_PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
";

/// Name of the table every child foreign key must reference.
pub const ROOT_TABLE: &str = "measurements";
