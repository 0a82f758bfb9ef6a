//! # Command Line Interface
//!
//! `regdiff --before https://old.api --after https://new.api --fixture cases.json`
//!
//! Every flag can also be supplied through a `REGDIFF_*` environment variable.

use crate::config::{parse_header, parse_list, ConfigError, DiffConfig};
use crate::report::OutputFormat;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "regdiff", version, about = "Diff API responses between two environments")]
pub struct Cli {
    /// Base URL of the environment before the change
    #[arg(long, env = "REGDIFF_BEFORE")]
    pub before: String,

    /// Base URL of the environment after the change
    #[arg(long, env = "REGDIFF_AFTER")]
    pub after: String,

    /// JSON fixture describing the requests to compare
    #[arg(short, long, env = "REGDIFF_FIXTURE")]
    pub fixture: PathBuf,

    /// Extra request header, `Name: Value` (repeatable; newline separated in
    /// `REGDIFF_HEADERS`)
    #[arg(short = 'H', long = "header", env = "REGDIFF_HEADERS")]
    pub headers: Vec<String>,

    /// Sent as X-Access-Token on every request
    #[arg(long, env = "REGDIFF_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Comma separated response fields excluded from the diff
    #[arg(short, long, env = "REGDIFF_IGNORE", default_value = "")]
    pub ignore: String,

    /// Comma separated fixture rows to run (default: all)
    #[arg(long, env = "REGDIFF_ROWS")]
    pub rows: Option<String>,

    /// Comma separated HTTP statuses that are retried
    #[arg(long, env = "REGDIFF_RETRY", default_value = "")]
    pub retry: String,

    /// Also retry requests that timed out without a response
    #[arg(long, env = "REGDIFF_RETRY_ON_TIMEOUT")]
    pub retry_on_timeout: bool,

    /// Number of parallel workers (default: available CPUs)
    #[arg(short, long, env = "REGDIFF_THREADS")]
    pub threads: Option<usize>,

    #[arg(long, env = "REGDIFF_RETRY_MAX", default_value_t = crate::config::DEFAULT_RETRY_MAX)]
    pub retry_max: u32,

    #[arg(long, env = "REGDIFF_RETRY_WAIT_MIN_MS", default_value_t = crate::config::DEFAULT_RETRY_WAIT_MIN_MS)]
    pub retry_wait_min_ms: u64,

    #[arg(long, env = "REGDIFF_RETRY_WAIT_MAX_MS", default_value_t = crate::config::DEFAULT_RETRY_WAIT_MAX_MS)]
    pub retry_wait_max_ms: u64,

    /// Per request timeout
    #[arg(long, env = "REGDIFF_TIMEOUT_MS", default_value_t = crate::config::DEFAULT_REQUEST_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Overall run timeout (default: none)
    #[arg(long, env = "REGDIFF_RUN_TIMEOUT_MS")]
    pub run_timeout_ms: Option<u64>,

    #[arg(long, env = "REGDIFF_PROXY")]
    pub proxy: Option<String>,

    /// Ignore HTTP(S)_PROXY from the environment
    #[arg(long, env = "REGDIFF_NO_SYSTEM_PROXY")]
    pub no_system_proxy: bool,

    /// Accept invalid TLS certificates
    #[arg(short = 'k', long, env = "REGDIFF_INSECURE")]
    pub insecure: bool,

    #[arg(short, long, env = "REGDIFF_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(short, long, value_enum, env = "REGDIFF_OUTPUT", default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl Cli {
    pub fn into_config(self) -> Result<DiffConfig, ConfigError> {
        let mut config = DiffConfig::new(self.before, self.after);
        config.fixture_path = self.fixture;
        config.headers = self
            .headers
            .iter()
            .flat_map(|raw| raw.lines())
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(parse_header)
            .collect::<Result<_, _>>()?;
        config.access_token = self.access_token.filter(|token| !token.is_empty());
        config.ignore_fields = self
            .ignore
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(str::to_string)
            .collect();
        config.rows = self
            .rows
            .as_deref()
            .map(|rows| parse_list(rows, "row"))
            .transpose()?
            .filter(|rows| !rows.is_empty());
        config.retry_statuses = parse_list(&self.retry, "status")?;
        config.retry_on_timeout = self.retry_on_timeout;
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.retry_max = self.retry_max;
        config.retry_wait_min = Duration::from_millis(self.retry_wait_min_ms);
        config.retry_wait_max = Duration::from_millis(self.retry_wait_max_ms);
        config.request_timeout = Duration::from_millis(self.timeout_ms);
        config.run_timeout = self
            .run_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        config.proxy_url = self.proxy;
        config.system_proxy = !self.no_system_proxy;
        config.verify_tls = !self.insecure;

        config.validate()?;
        Ok(config)
    }
}
