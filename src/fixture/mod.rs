//! Fixture loading: turns a JSON fixture file into the stream of paired test
//! cases consumed by the diff workers.
//!
//! A fixture is an array of cases. Row numbers are 1-based positions in the
//! array.
//!
//! ```json
//! [
//!   { "path": "/video/2387e4d6", "headers": { "X-User-Dma": "999" },
//!     "afterHeaders": { "X-Feature-V1getvideobyidenabled": "true" } }
//! ]
//! ```

use crate::config::DiffConfig;
use crate::domain::{RequestSpec, TestCase};
use crate::engine::cancel::RunContext;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub const HEADER_ACCESS_TOKEN: &str = "X-Access-Token";
pub const HEADER_CACHE_CONTROL: &str = "Cache-Control";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("fixture row {0} has an empty path")]
    EmptyPath(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureCase {
    #[serde(default)]
    pub method: Option<String>,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub before_headers: HashMap<String, String>,
    #[serde(default)]
    pub after_headers: HashMap<String, String>,
}

pub fn parse_fixture(input: &str, config: &DiffConfig) -> Result<Vec<TestCase>, FixtureError> {
    let cases: Vec<FixtureCase> = serde_json::from_str(input)?;
    let base_headers = base_headers(config);

    let mut tests = Vec::with_capacity(cases.len());
    for (idx, case) in cases.into_iter().enumerate() {
        let row = idx as u32 + 1;
        if let Some(rows) = &config.rows {
            if !rows.contains(&row) {
                continue;
            }
        }
        if case.path.trim().is_empty() {
            return Err(FixtureError::EmptyPath(row));
        }

        let method = case
            .method
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();

        let mut shared = base_headers.clone();
        merge_headers(&mut shared, case.headers);

        let mut before_headers = shared.clone();
        merge_headers(&mut before_headers, case.before_headers);
        let mut after_headers = shared;
        merge_headers(&mut after_headers, case.after_headers);

        tests.push(TestCase {
            row,
            before: RequestSpec {
                method: method.clone(),
                path: join_url(&config.before_base, &case.path),
                headers: before_headers,
            },
            after: RequestSpec {
                method,
                path: join_url(&config.after_base, &case.path),
                headers: after_headers,
            },
        });
    }

    Ok(tests)
}

pub fn load_fixture(path: &Path, config: &DiffConfig) -> Result<Vec<TestCase>, FixtureError> {
    let input = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_fixture(&input, config)
}

fn base_headers(config: &DiffConfig) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    set_header(&mut headers, HEADER_CACHE_CONTROL, "no-cache");
    for (name, value) in &config.headers {
        set_header(&mut headers, name, value);
    }
    if let Some(token) = config.access_token.as_deref() {
        set_header(&mut headers, HEADER_ACCESS_TOKEN, token);
    }
    headers
}

/// Header names are case-insensitive: a later layer replaces any earlier
/// entry whose name differs only in case.
fn set_header(headers: &mut HashMap<String, String>, name: &str, value: &str) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value.to_string());
}

fn merge_headers(headers: &mut HashMap<String, String>, layer: HashMap<String, String>) {
    for (name, value) in layer {
        set_header(headers, &name, &value);
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim().trim_start_matches('/')
    )
}

/// Feeds `tests` into a bounded stream, stopping early when the context is
/// done. The stream closes after the last case.
pub fn spawn_source(
    ctx: RunContext,
    tests: Vec<TestCase>,
    capacity: usize,
) -> mpsc::Receiver<TestCase> {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let total = tests.len();
        for test in tests {
            tokio::select! {
                biased;
                cause = ctx.done() => {
                    debug!(%cause, "test source stopping");
                    return;
                }
                sent = tx.send(test) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
        debug!(total, "test source exhausted");
    });

    rx
}
