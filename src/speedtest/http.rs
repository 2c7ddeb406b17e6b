use crate::config::{ServerConfig, SpeedTestConfig};
use crate::speedtest::{SpeedTest, SpeedTestResult};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const USER_AGENT: &str = concat!("speedlog/", env!("CARGO_PKG_VERSION"));

/// Speed test over plain HTTP against configured endpoints.
///
/// Latency is the median round trip of a zero-byte GET, download is a
/// streamed GET of `download_bytes`, upload is a POST of `upload_bytes`
/// zeros. Nothing is retried.
pub struct HttpSpeedTest {
    client: Client,
    config: SpeedTestConfig,
    candidates: Vec<ServerConfig>,
    best: Option<(ServerConfig, f64)>,
    download_rate: Option<f64>,
    upload_rate: Option<f64>,
}

impl HttpSpeedTest {
    pub fn new(config: SpeedTestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            config,
            candidates: Vec::new(),
            best: None,
            download_rate: None,
            upload_rate: None,
        })
    }

    /// The server chosen by [`SpeedTest::select_best_server`].
    pub fn best_server(&self) -> Option<&ServerConfig> {
        self.best.as_ref().map(|(server, _)| server)
    }

    fn require_best(&self) -> Result<&ServerConfig> {
        self.best_server()
            .ok_or_else(|| anyhow!("no server selected; run best-server selection first"))
    }

    fn sample_latency(&self, server: &ServerConfig) -> Option<f64> {
        let mut samples = Vec::with_capacity(self.config.latency_samples as usize);
        for _ in 0..self.config.latency_samples {
            let start = Instant::now();
            match self.client.get(&server.latency_url).send() {
                Ok(resp) if resp.status().is_success() => match resp.bytes() {
                    Ok(_) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
                    Err(e) => debug!(server = %server.id, "latency body read failed: {e}"),
                },
                Ok(resp) => debug!(server = %server.id, status = %resp.status(), "latency request rejected"),
                Err(e) => debug!(server = %server.id, "latency request failed: {e}"),
            }
        }
        median(&mut samples)
    }
}

impl SpeedTest for HttpSpeedTest {
    fn discover_servers(&mut self, filter: &[String]) -> Result<()> {
        self.candidates = filter_servers(&self.config.servers, filter);
        if self.candidates.is_empty() {
            bail!("no speed test servers available");
        }
        debug!(count = self.candidates.len(), "discovered servers");
        Ok(())
    }

    fn select_best_server(&mut self) -> Result<()> {
        if self.candidates.is_empty() {
            bail!("no speed test servers available");
        }
        let timed: Vec<(ServerConfig, f64)> = self
            .candidates
            .iter()
            .filter_map(|server| self.sample_latency(server).map(|ms| (server.clone(), ms)))
            .collect();

        let (server, ping) = pick_best(timed)
            .ok_or_else(|| anyhow!("unable to reach any of {} server(s)", self.candidates.len()))?;
        info!(server = %server.id, ping_ms = ping, "selected best server");
        self.best = Some((server, ping));
        Ok(())
    }

    fn measure_download(&mut self) -> Result<f64> {
        let server = self.require_best()?;
        let url = download_url(&server.download_url, self.config.download_bytes);

        let start = Instant::now();
        let mut resp = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("download from {}", server.id))?;

        let mut buf = vec![0u8; 64 * 1024];
        let mut received: u64 = 0;
        loop {
            let n = resp
                .read(&mut buf)
                .with_context(|| format!("reading download body from {}", server.id))?;
            if n == 0 {
                break;
            }
            received += n as u64;
        }
        if received == 0 {
            bail!("download from {} returned an empty body", server.id);
        }

        let rate = bytes_per_sec(received, start.elapsed());
        debug!(bytes = received, rate, "download finished");
        self.download_rate = Some(rate);
        Ok(rate)
    }

    fn measure_upload(&mut self) -> Result<f64> {
        let server = self.require_best()?;
        let size = self.config.upload_bytes;
        let payload = vec![0u8; size];

        let start = Instant::now();
        self.client
            .post(&server.upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("upload to {}", server.id))?;

        let rate = bytes_per_sec(size as u64, start.elapsed());
        debug!(bytes = size, rate, "upload finished");
        self.upload_rate = Some(rate);
        Ok(rate)
    }

    fn latest_result(&self) -> Option<SpeedTestResult> {
        Some(SpeedTestResult {
            download_rate: self.download_rate?,
            upload_rate: self.upload_rate?,
            ping: self.best.as_ref()?.1,
        })
    }
}

fn filter_servers(servers: &[ServerConfig], filter: &[String]) -> Vec<ServerConfig> {
    servers
        .iter()
        .filter(|s| filter.is_empty() || filter.contains(&s.id))
        .cloned()
        .collect()
}

fn pick_best(timed: Vec<(ServerConfig, f64)>) -> Option<(ServerConfig, f64)> {
    timed.into_iter().min_by(|a, b| a.1.total_cmp(&b.1))
}

fn median(samples: &mut [f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(f64::total_cmp);
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    } else {
        Some(samples[mid])
    }
}

fn download_url(template: &str, bytes: u64) -> String {
    template.replace("{bytes}", &bytes.to_string())
}

fn bytes_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    // Sub-microsecond transfers only happen against loopback fakes.
    let secs = elapsed.as_secs_f64().max(1e-6);
    bytes as f64 / secs
}
