use crate::measurement::store::{insert_error_log, insert_measurement};
use crate::measurement::{MeasurementId, MeasurementStore, StoreError};
use crate::speedtest::{SpeedTest, SpeedTestResult};
use anyhow::anyhow;
use tracing::{info, warn};

/// Source of cycle timestamps.
pub type Clock = fn() -> String;

/// Local time, ISO-8601 with microseconds and no offset.
pub fn local_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

/// How a recorded cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleStatus {
    Succeeded(SpeedTestResult),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub measurement_id: MeasurementId,
    pub status: CycleStatus,
}

impl CycleOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, CycleStatus::Succeeded(_))
    }
}

/// Drives exactly one measurement cycle against a store.
pub struct MeasurementRunner<'a, T: SpeedTest> {
    store: &'a mut MeasurementStore,
    speedtest: T,
    server_filter: Vec<String>,
    clock: Clock,
}

impl<'a, T: SpeedTest> MeasurementRunner<'a, T> {
    pub fn new(store: &'a mut MeasurementStore, speedtest: T) -> Self {
        Self {
            store,
            speedtest,
            server_filter: Vec::new(),
            clock: local_timestamp,
        }
    }

    pub fn with_server_filter(mut self, filter: Vec<String>) -> Self {
        self.server_filter = filter;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cycle: create the measurement, run the speed test, then record
    /// either the three facts or a single error log.
    ///
    /// A speed test failure is recorded and reported as
    /// [`CycleStatus::Failed`]. Only storage failures are returned as errors.
    /// If the process dies between the two writes, the measurement row is
    /// left without children.
    pub fn run_cycle(mut self) -> Result<CycleOutcome, StoreError> {
        let timestamp = (self.clock)();
        let measurement_id = self
            .store
            .transaction(|tx| insert_measurement(tx, &timestamp))?;
        info!(measurement_id, %timestamp, "measurement cycle started");

        let status = match self.measure() {
            Ok(result) => {
                self.store.record_success(measurement_id, &result)?;
                info!(
                    measurement_id,
                    download_rate = result.download_rate,
                    upload_rate = result.upload_rate,
                    ping = result.ping,
                    "measurement recorded"
                );
                CycleStatus::Succeeded(result)
            }
            Err(fault) => {
                let message = format!("{fault:#}");
                warn!(measurement_id, error = %message, "speed test failed");
                self.store
                    .transaction(|tx| insert_error_log(tx, measurement_id, &message))?;
                CycleStatus::Failed(message)
            }
        };

        Ok(CycleOutcome {
            measurement_id,
            status,
        })
    }

    fn measure(&mut self) -> anyhow::Result<SpeedTestResult> {
        self.speedtest.discover_servers(&self.server_filter)?;
        self.speedtest.select_best_server()?;
        self.speedtest.measure_download()?;
        self.speedtest.measure_upload()?;
        self.speedtest
            .latest_result()
            .ok_or_else(|| anyhow!("speed test finished without a result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::MeasurementQueries;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Scripted speed test. `fail_at` names the step that errors.
    struct FakeSpeedTest {
        fail_at: Option<&'static str>,
        result: SpeedTestResult,
        calls: Rc<RefCell<Vec<&'static str>>>,
        done: bool,
    }

    impl FakeSpeedTest {
        fn ok() -> Self {
            Self {
                fail_at: None,
                result: SpeedTestResult {
                    download_rate: 50_000_000.0,
                    upload_rate: 10_000_000.0,
                    ping: 15.5,
                },
                calls: Rc::default(),
                done: false,
            }
        }

        fn failing_at(step: &'static str) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::ok()
            }
        }

        fn step(&mut self, name: &'static str) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(name);
            if self.fail_at == Some(name) {
                anyhow::bail!("{name}: connection refused");
            }
            Ok(())
        }
    }

    impl SpeedTest for FakeSpeedTest {
        fn discover_servers(&mut self, _filter: &[String]) -> anyhow::Result<()> {
            self.step("discover")
        }
        fn select_best_server(&mut self) -> anyhow::Result<()> {
            self.step("select")
        }
        fn measure_download(&mut self) -> anyhow::Result<f64> {
            self.step("download").map(|_| self.result.download_rate)
        }
        fn measure_upload(&mut self) -> anyhow::Result<f64> {
            self.step("upload")?;
            self.done = true;
            Ok(self.result.upload_rate)
        }
        fn latest_result(&self) -> Option<SpeedTestResult> {
            self.done.then_some(self.result)
        }
    }

    fn fixed_clock() -> String {
        "2024-01-01T00:00:00".into()
    }

    fn store() -> MeasurementStore {
        let store = MeasurementStore::open_in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    #[test]
    fn successful_cycle_records_facts() {
        let mut store = store();
        let outcome = MeasurementRunner::new(&mut store, FakeSpeedTest::ok())
            .with_clock(fixed_clock)
            .run_cycle()
            .unwrap();

        assert!(outcome.succeeded());
        let result = store.get_result(outcome.measurement_id).unwrap().unwrap();
        assert_eq!(result.timestamp, "2024-01-01T00:00:00");
        assert_eq!(result.download_rate, 50_000_000.0);
        assert_eq!(result.upload_rate, 10_000_000.0);
        assert_eq!(result.ping, 15.5);
        assert_eq!(store.error_for(outcome.measurement_id).unwrap(), None);
    }

    #[test]
    fn each_failing_step_records_one_error() {
        for step in ["discover", "select", "download", "upload"] {
            let mut store = store();
            let outcome = MeasurementRunner::new(&mut store, FakeSpeedTest::failing_at(step))
                .with_clock(fixed_clock)
                .run_cycle()
                .unwrap();

            assert_eq!(
                outcome.status,
                CycleStatus::Failed(format!("{step}: connection refused"))
            );
            assert_eq!(store.get_result(outcome.measurement_id).unwrap(), None);
            let entry = store.error_for(outcome.measurement_id).unwrap().unwrap();
            assert_eq!(entry.message, format!("{step}: connection refused"));
            assert!(store.all_results().unwrap().is_empty());
        }
    }

    #[test]
    fn steps_stop_at_first_failure() {
        let mut store = store();
        let fake = FakeSpeedTest::failing_at("select");
        let calls = Rc::clone(&fake.calls);
        MeasurementRunner::new(&mut store, fake).run_cycle().unwrap();
        assert_eq!(*calls.borrow(), vec!["discover", "select"]);
    }

    #[test]
    fn missing_result_is_a_measurement_fault() {
        struct NoResult;
        impl SpeedTest for NoResult {
            fn discover_servers(&mut self, _: &[String]) -> anyhow::Result<()> {
                Ok(())
            }
            fn select_best_server(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
            fn measure_download(&mut self) -> anyhow::Result<f64> {
                Ok(1.0)
            }
            fn measure_upload(&mut self) -> anyhow::Result<f64> {
                Ok(1.0)
            }
            fn latest_result(&self) -> Option<SpeedTestResult> {
                None
            }
        }

        let mut store = store();
        let outcome = MeasurementRunner::new(&mut store, NoResult).run_cycle().unwrap();
        assert!(!outcome.succeeded());
    }

    #[test]
    fn storage_failure_propagates() {
        // No schema: creating the measurement row must fail loudly.
        let mut store = MeasurementStore::open_in_memory().unwrap();
        let err = MeasurementRunner::new(&mut store, FakeSpeedTest::ok())
            .run_cycle()
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn local_timestamp_is_sortable_iso8601() {
        let ts = local_timestamp();
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000".len());
        assert_eq!(&ts[10..11], "T");
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, "%Y-%m-%dT%H:%M:%S%.6f").is_ok());
    }
}
