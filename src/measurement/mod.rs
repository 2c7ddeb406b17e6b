//! Measurement store: schema, append-only writes and joined reads.
//!
//! A measurement row is the root of one cycle. A successful cycle adds one
//! download, one upload and one ping row; a failed cycle adds one error log
//! row. Nothing is ever updated or deleted.

pub mod error;
pub mod reader;
pub mod schema;
pub mod store;

/// Auto-assigned primary key of a `measurements` row.
pub type MeasurementId = i64;

pub use error::StoreError;
pub use reader::{ErrorLogEntry, MeasurementQueries, MeasurementReader, MeasurementResult};
pub use store::MeasurementStore;
