use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "speedlog";
const DB_FILE_NAME: &str = "measurements.db";

/// Top-level configuration, read from `config.toml`.
///
/// Every section and field is optional; a missing file yields the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub speedtest: SpeedTestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `~` and `$VARS` are expanded.
    pub path: String,
    /// Create missing tables before each cycle.
    pub auto_init: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME));
        Self {
            path: path.to_string_lossy().into_owned(),
            auto_init: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpeedTestConfig {
    pub connect_timeout_secs: u64,
    /// Upper bound for any single request, transfers included.
    pub timeout_secs: u64,
    pub download_bytes: u64,
    pub upload_bytes: usize,
    /// Latency samples per candidate server during best-server selection.
    pub latency_samples: u32,
    /// Only consider servers with these ids. Empty means all.
    pub server_filter: Vec<String>,
    pub servers: Vec<ServerConfig>,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 60,
            download_bytes: 25_000_000,
            upload_bytes: 10_000_000,
            latency_samples: 5,
            server_filter: Vec::new(),
            servers: vec![ServerConfig::cloudflare()],
        }
    }
}

/// One candidate speed test server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    /// Cheap GET timed to estimate latency.
    pub latency_url: String,
    /// GET target; `{bytes}` is replaced by the requested size.
    pub download_url: String,
    /// POST target for the upload payload.
    pub upload_url: String,
}

impl ServerConfig {
    pub fn cloudflare() -> Self {
        Self {
            id: "cloudflare".into(),
            name: "Cloudflare".into(),
            latency_url: "https://speed.cloudflare.com/__down?bytes=0".into(),
            download_url: "https://speed.cloudflare.com/__down?bytes={bytes}".into(),
            upload_url: "https://speed.cloudflare.com/__up".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Default location of the config file, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and silently skipped when absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let st = &self.speedtest;
        ensure!(st.connect_timeout_secs > 0, "speedtest.connect_timeout_secs must be > 0");
        ensure!(st.timeout_secs > 0, "speedtest.timeout_secs must be > 0");
        ensure!(st.download_bytes > 0, "speedtest.download_bytes must be > 0");
        ensure!(st.upload_bytes > 0, "speedtest.upload_bytes must be > 0");
        ensure!(st.latency_samples > 0, "speedtest.latency_samples must be > 0");
        for server in &st.servers {
            ensure!(
                server.download_url.contains("{bytes}"),
                "server {}: download_url must contain {{bytes}}",
                server.id
            );
        }
        Ok(())
    }

    /// The database path with `~` and environment variables expanded.
    pub fn db_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.store.path)
            .with_context(|| format!("expanding store.path: {}", self.store.path))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.store.auto_init);
        assert!(config.store.path.ends_with(DB_FILE_NAME));
        assert_eq!(config.speedtest.servers, vec![ServerConfig::cloudflare()]);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[store]
path = "/var/lib/speedlog/m.db"

[speedtest]
latency_samples = 3
server_filter = ["cloudflare"]
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.store.path, "/var/lib/speedlog/m.db");
        assert!(config.store.auto_init);
        assert_eq!(config.speedtest.latency_samples, 3);
        assert_eq!(config.speedtest.server_filter, vec!["cloudflare".to_string()]);
        assert_eq!(config.speedtest.timeout_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn custom_servers_replace_default() {
        let raw = r#"
[[speedtest.servers]]
id = "lan"
name = "LAN box"
latency_url = "http://10.0.0.2/ping"
download_url = "http://10.0.0.2/down?n={bytes}"
upload_url = "http://10.0.0.2/up"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.speedtest.servers.len(), 1);
        assert_eq!(config.speedtest.servers[0].id, "lan");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("reading config"));
    }

    #[test]
    fn zero_samples_rejected() {
        let mut config = Config::default();
        config.speedtest.latency_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn download_url_needs_placeholder() {
        let mut config = Config::default();
        config.speedtest.servers[0].download_url = "https://example.com/big.bin".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn db_path_expands_env() {
        let config = Config {
            store: StoreConfig {
                path: "$SPEEDLOG_TEST_DIR/m.db".into(),
                auto_init: true,
            },
            ..Config::default()
        };
        std::env::set_var("SPEEDLOG_TEST_DIR", "/tmp/speedlog-test");
        assert_eq!(
            config.db_path().unwrap(),
            PathBuf::from("/tmp/speedlog-test/m.db")
        );
    }
}
