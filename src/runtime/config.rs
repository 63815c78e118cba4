use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_RESULTS: usize = 1_000;
const DEFAULT_MAX_ATTEMPTS: usize = 8;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 10_800;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 7_200;
const DEFAULT_ORDER_FIELD: &str = "updated_at";
const DEFAULT_KEY_FIELD: &str = "key";
const DEFAULT_ARCHIVE_DIR: &str = "archive";

/// Per-kind download settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConfig {
    pub name: String,
    /// Size of each unit of work partitioned out of an overall range.
    pub sub_interval: Duration,
    /// Identity field used to derive document keys.
    pub key_field: String,
}

impl KindConfig {
    pub fn new(name: impl Into<String>, sub_interval: Duration) -> Self {
        Self {
            name: name.into(),
            sub_interval,
            key_field: DEFAULT_KEY_FIELD.to_owned(),
        }
    }

    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Self {
        self.key_field = key_field.into();
        self
    }
}

/// Runtime configuration for one pipeline run.
///
/// All instances must be constructed via [`PipelineConfig::builder`] or
/// [`PipelineConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    api_url: String,
    kinds: Vec<KindConfig>,
    max_results: usize,
    max_attempts: usize,
    concurrency: usize,
    worker_timeout: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
    metrics_interval: Duration,
    grace_period: Duration,
    order_field: String,
    archive_dir: PathBuf,
}

pub struct PipelineConfigParams {
    pub api_url: String,
    pub kinds: Vec<KindConfig>,
    pub max_results: usize,
    pub max_attempts: usize,
    pub concurrency: usize,
    pub worker_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub metrics_interval: Duration,
    pub grace_period: Duration,
    pub order_field: String,
    pub archive_dir: PathBuf,
}

impl PipelineConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`PipelineConfig::builder`] when many values use defaults.
    pub fn new(params: PipelineConfigParams) -> Result<Self> {
        let PipelineConfigParams {
            api_url,
            kinds,
            max_results,
            max_attempts,
            concurrency,
            worker_timeout,
            poll_interval,
            request_timeout,
            metrics_interval,
            grace_period,
            order_field,
            archive_dir,
        } = params;

        let config = Self {
            api_url: api_url.trim().to_owned(),
            kinds,
            max_results,
            max_attempts,
            concurrency,
            worker_timeout,
            poll_interval,
            request_timeout,
            metrics_interval,
            grace_period,
            order_field: order_field.trim().to_owned(),
            archive_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Base URL of the remote entity export API.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Kinds downloaded by a run, in configuration order.
    pub fn kinds(&self) -> &[KindConfig] {
        &self.kinds
    }

    /// Settings for a single kind, if configured.
    pub fn kind(&self, name: &str) -> Option<&KindConfig> {
        self.kinds.iter().find(|kind| kind.name == name)
    }

    /// Hard per-call result cap enforced by the remote API.
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Attempts per API call before a fetch failure becomes fatal.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Upper bound on concurrently running workers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Wall-clock budget per unit of work before the monitor terminates it.
    pub fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }

    /// Sleep between orchestrator scheduling polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-request timeout for the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// How recently a record must have moved for the reprocessor to leave
    /// it alone.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Entity property the remote API orders and filters by.
    pub fn order_field(&self) -> &str {
        &self.order_field
    }

    /// Root directory for raw batch archives.
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            bail!("api_url must start with http:// or https://");
        }

        if self.kinds.is_empty() {
            bail!("at least one kind must be configured");
        }
        for kind in &self.kinds {
            if kind.name.trim().is_empty() {
                bail!("kind names cannot be empty");
            }
            if kind.sub_interval.is_zero() {
                bail!("sub_interval for kind {:?} must be greater than 0", kind.name);
            }
            if kind.key_field.trim().is_empty() {
                bail!("key_field for kind {:?} cannot be empty", kind.name);
            }
        }
        let mut names: Vec<&str> = self.kinds.iter().map(|kind| kind.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.kinds.len() {
            bail!("kind names must be unique");
        }

        if self.max_results == 0 {
            bail!("max_results must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        if self.worker_timeout.is_zero() {
            bail!("worker_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.grace_period.is_zero() {
            bail!("grace_period must be greater than 0");
        }

        if self.order_field.is_empty() {
            bail!("order_field cannot be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineConfigBuilder {
    api_url: Option<String>,
    kinds: Vec<KindConfig>,
    max_results: Option<usize>,
    max_attempts: Option<usize>,
    concurrency: Option<usize>,
    worker_timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    grace_period: Option<Duration>,
    order_field: Option<String>,
    archive_dir: Option<PathBuf>,
}

impl PipelineConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn kind(mut self, kind: KindConfig) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = KindConfig>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    pub fn order_field(mut self, field: impl Into<String>) -> Self {
        self.order_field = Some(field.into());
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let params = PipelineConfigParams {
            api_url: self.api_url.context("api_url is required")?,
            kinds: self.kinds,
            max_results: self.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            concurrency: self.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            worker_timeout: self
                .worker_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS)),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            grace_period: self
                .grace_period
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS)),
            order_field: self
                .order_field
                .unwrap_or_else(|| DEFAULT_ORDER_FIELD.to_owned()),
            archive_dir: self
                .archive_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_DIR)),
        };

        PipelineConfig::new(params)
    }
}

/// On-disk JSON configuration, mirroring the builder's fields with
/// durations expressed in seconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub api_url: String,
    pub kinds: BTreeMap<String, KindFileEntry>,
    pub max_results: Option<usize>,
    pub max_attempts: Option<usize>,
    pub concurrency: Option<usize>,
    pub worker_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub order_field: Option<String>,
    pub archive_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindFileEntry {
    pub sub_interval_secs: u64,
    pub key_field: Option<String>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.as_ref().display()))
    }

    pub fn into_config(self) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder().api_url(self.api_url);

        for (name, entry) in self.kinds {
            let mut kind = KindConfig::new(name, Duration::from_secs(entry.sub_interval_secs));
            if let Some(key_field) = entry.key_field {
                kind = kind.with_key_field(key_field);
            }
            builder = builder.kind(kind);
        }

        if let Some(max_results) = self.max_results {
            builder = builder.max_results(max_results);
        }
        if let Some(max_attempts) = self.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        if let Some(concurrency) = self.concurrency {
            builder = builder.concurrency(concurrency);
        }
        if let Some(secs) = self.worker_timeout_secs {
            builder = builder.worker_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.poll_interval_secs {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.grace_period_secs {
            builder = builder.grace_period(Duration::from_secs(secs));
        }
        if let Some(order_field) = self.order_field {
            builder = builder.order_field(order_field);
        }
        if let Some(archive_dir) = self.archive_dir {
            builder = builder.archive_dir(archive_dir);
        }

        builder.build()
    }
}
