//! The speed test capability the runner drives.
//!
//! Implementations are opaque to the rest of the crate: any error from any
//! step is treated the same way, as a failed measurement.

pub mod http;

pub use http::HttpSpeedTest;

use serde::Serialize;

/// Rates in bytes per second, ping in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedTestResult {
    pub download_rate: f64,
    pub upload_rate: f64,
    pub ping: f64,
}

/// One speed test session. Steps are called in order, once each.
pub trait SpeedTest {
    /// Load the candidate servers, keeping only ids in `filter` when it is
    /// non-empty.
    fn discover_servers(&mut self, filter: &[String]) -> anyhow::Result<()>;

    /// Pick the lowest-latency candidate. Its latency becomes the ping.
    fn select_best_server(&mut self) -> anyhow::Result<()>;

    fn measure_download(&mut self) -> anyhow::Result<f64>;

    fn measure_upload(&mut self) -> anyhow::Result<f64>;

    /// The full triple, once every step above has succeeded.
    fn latest_result(&self) -> Option<SpeedTestResult>;
}
