use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RETRY_MAX: u32 = 1;
pub const DEFAULT_RETRY_WAIT_MIN_MS: u64 = 1_000;
pub const DEFAULT_RETRY_WAIT_MAX_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} base path must not be empty")]
    EmptyBasePath(&'static str),
    #[error("thread count must be greater than 0")]
    ZeroThreads,
    #[error("request timeout must be greater than 0")]
    ZeroTimeout,
    #[error("retry wait min ({min_ms}ms) exceeds retry wait max ({max_ms}ms)")]
    RetryWaitRange { min_ms: u128, max_ms: u128 },
    #[error("invalid header `{0}`, expected `Name: Value`")]
    InvalidHeader(String),
    #[error("invalid {kind} `{value}`")]
    InvalidNumber { kind: &'static str, value: String },
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    pub before_base: String,
    pub after_base: String,
    pub fixture_path: PathBuf,
    pub headers: Vec<(String, String)>,
    pub access_token: Option<String>,
    pub ignore_fields: BTreeSet<String>,
    pub rows: Option<BTreeSet<u32>>,
    pub retry_statuses: BTreeSet<u16>,
    pub retry_on_timeout: bool,
    pub threads: usize,
    pub retry_max: u32,
    pub retry_wait_min: Duration,
    pub retry_wait_max: Duration,
    pub request_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub proxy_url: Option<String>,
    pub system_proxy: bool,
    pub verify_tls: bool,
}

impl DiffConfig {
    pub fn new(before_base: impl Into<String>, after_base: impl Into<String>) -> Self {
        Self {
            before_base: before_base.into(),
            after_base: after_base.into(),
            fixture_path: PathBuf::new(),
            headers: Vec::new(),
            access_token: None,
            ignore_fields: BTreeSet::new(),
            rows: None,
            retry_statuses: BTreeSet::new(),
            retry_on_timeout: false,
            threads: default_threads(),
            retry_max: DEFAULT_RETRY_MAX,
            retry_wait_min: Duration::from_millis(DEFAULT_RETRY_WAIT_MIN_MS),
            retry_wait_max: Duration::from_millis(DEFAULT_RETRY_WAIT_MAX_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            run_timeout: None,
            proxy_url: None,
            system_proxy: true,
            verify_tls: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.before_base.trim().is_empty() {
            return Err(ConfigError::EmptyBasePath("before"));
        }
        if self.after_base.trim().is_empty() {
            return Err(ConfigError::EmptyBasePath("after"));
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.retry_wait_min > self.retry_wait_max {
            return Err(ConfigError::RetryWaitRange {
                min_ms: self.retry_wait_min.as_millis(),
                max_ms: self.retry_wait_max.as_millis(),
            });
        }
        Ok(())
    }
}

pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(1)
}

pub fn parse_header(raw: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader(raw.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidHeader(raw.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parses a comma separated list, skipping blank entries.
pub fn parse_list<T: std::str::FromStr + Ord>(
    raw: &str,
    kind: &'static str,
) -> Result<BTreeSet<T>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
                kind,
                value: item.to_string(),
            })
        })
        .collect()
}
