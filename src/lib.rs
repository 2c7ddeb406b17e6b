//! Periodic network speed measurements recorded durably in SQLite.
//!
//! [`runner::MeasurementRunner`] drives one cycle against a
//! [`measurement::MeasurementStore`]: it creates the measurement row, runs a
//! [`speedtest::SpeedTest`], and records either the download/upload/ping facts
//! or the failure message. Reads go through [`measurement::MeasurementQueries`].

pub mod config;
pub mod logging;
pub mod measurement;
pub mod runner;
pub mod speedtest;

pub use config::Config;
pub use measurement::{
    ErrorLogEntry, MeasurementId, MeasurementQueries, MeasurementReader, MeasurementResult,
    MeasurementStore, StoreError,
};
pub use runner::{CycleOutcome, CycleStatus, MeasurementRunner};
pub use speedtest::{HttpSpeedTest, SpeedTest, SpeedTestResult};
