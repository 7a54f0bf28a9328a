//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vmimport_vcenter::SessionOptions;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_INVENTORY_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "plain" => Ok(Self::Text),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Filter directive, `RUST_LOG` syntax
    pub log_level: String,
    pub log_format: LogFormat,
    pub use_mock_data: bool,
    pub insecure_skip_verify: bool,
    pub api_release: String,
    pub vcenter_timeout_secs: u64,
    pub inventory_timeout_secs: u64,
    warnings: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Json,
            use_mock_data: false,
            insecure_skip_verify: true,
            api_release: SessionOptions::DEFAULT_API_RELEASE.to_string(),
            vcenter_timeout_secs: SessionOptions::DEFAULT_TIMEOUT_SECS,
            inventory_timeout_secs: DEFAULT_INVENTORY_TIMEOUT_SECS,
            warnings: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables:
    /// - `LISTEN_ADDR` (default: 0.0.0.0:8080)
    /// - `LOG_LEVEL` (default: info)
    /// - `LOG_FORMAT` (default: json; or text)
    /// - `USE_MOCK_DATA` (default: false)
    /// - `VCENTER_INSECURE_SKIP_VERIFY` (default: true)
    /// - `VCENTER_API_RELEASE` (default: 8.0.1.0)
    /// - `VCENTER_TIMEOUT_SECS` (default: 30)
    /// - `INVENTORY_TIMEOUT_SECS` (default: 300)
    ///
    /// Unparsable values keep the default; see [`AppConfig::warnings`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let mut loader = Loader {
            lookup: &lookup,
            warnings: Vec::new(),
        };

        config.listen_addr = loader.parsed("LISTEN_ADDR", config.listen_addr);
        if let Some(level) = loader.raw("LOG_LEVEL") {
            if EnvFilter::try_new(&level).is_ok() {
                config.log_level = level;
            } else {
                loader.reject("LOG_LEVEL", &level, &config.log_level);
            }
        }
        if let Some(format) = loader.raw("LOG_FORMAT") {
            match format.parse() {
                Ok(f) => config.log_format = f,
                Err(()) => loader.reject("LOG_FORMAT", &format, "json"),
            }
        }
        config.use_mock_data = loader.flag("USE_MOCK_DATA", config.use_mock_data);
        config.insecure_skip_verify =
            loader.flag("VCENTER_INSECURE_SKIP_VERIFY", config.insecure_skip_verify);
        if let Some(release) = loader.raw("VCENTER_API_RELEASE") {
            config.api_release = release;
        }
        config.vcenter_timeout_secs =
            loader.positive("VCENTER_TIMEOUT_SECS", config.vcenter_timeout_secs);
        config.inventory_timeout_secs =
            loader.positive("INVENTORY_TIMEOUT_SECS", config.inventory_timeout_secs);

        config.warnings = loader.warnings;
        config
    }

    /// Rejected settings, to be logged once logging is up.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new(self.insecure_skip_verify)
            .with_timeout_secs(self.vcenter_timeout_secs)
            .with_api_release(self.api_release.clone())
    }

    pub fn inventory_timeout(&self) -> Duration {
        Duration::from_secs(self.inventory_timeout_secs)
    }
}

struct Loader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
    warnings: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Loader<'_, F> {
    /// Trimmed value; blank counts as unset.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn reject(&mut self, key: &str, value: &str, default: &str) {
        self.warnings
            .push(format!("Invalid {key} '{value}', using default '{default}'"));
    }

    fn parsed<T: FromStr + ToString>(&mut self, key: &str, default: T) -> T {
        match self.raw(key) {
            None => default,
            Some(v) => match v.parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.reject(key, &v, &default.to_string());
                    default
                }
            },
        }
    }

    fn flag(&mut self, key: &str, default: bool) -> bool {
        match self.raw(key).map(|v| v.to_ascii_lowercase()) {
            None => default,
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    self.reject(key, &v, &default.to_string());
                    default
                }
            },
        }
    }

    fn positive(&mut self, key: &str, default: u64) -> u64 {
        match self.parsed(key, default) {
            0 => {
                self.reject(key, "0", &default.to_string());
                default
            }
            n => n,
        }
    }
}
