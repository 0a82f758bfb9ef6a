use crate::config::DiffConfig;
use crate::domain::{DiffResult, Leg, RequestSpec, TestCase};
use crate::engine::cancel::{ContextError, RunContext};
use crate::engine::diff::{compare, IgnoreSet};
use crate::engine::retry::{
    honours_retry_after, parse_retry_after, Attempt, Backoff, RetryPolicy, StatusRetryPolicy,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, Proxy, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{leg} request cancelled: {cause}")]
    Cancelled { leg: Leg, cause: ContextError },
    #[error("invalid {leg} request: {message}")]
    InvalidRequest { leg: Leg, message: String },
    #[error("{leg} request failed: {source}")]
    Transport {
        leg: Leg,
        #[source]
        source: reqwest::Error,
    },
    #[error("{leg} request giving up after {attempts} attempt(s), last status {status}")]
    RetriesExhausted { leg: Leg, status: u16, attempts: u32 },
    #[error("{leg} request returned status {status}")]
    Status { leg: Leg, status: u16 },
    #[error("{leg} response is not valid JSON: {source}")]
    Decode {
        leg: Leg,
        #[source]
        source: serde_json::Error,
    },
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. })
    }

    pub fn leg(&self) -> Leg {
        match self {
            ExecError::Cancelled { leg, .. }
            | ExecError::InvalidRequest { leg, .. }
            | ExecError::Transport { leg, .. }
            | ExecError::RetriesExhausted { leg, .. }
            | ExecError::Status { leg, .. }
            | ExecError::Decode { leg, .. } => *leg,
        }
    }
}

/// Runs one paired exchange and diffs the outcome.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        ctx: &RunContext,
        test: &TestCase,
    ) -> impl Future<Output = Result<DiffResult, ExecError>> + Send;
}

pub fn build_headers(input: &HashMap<String, String>) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| format!("Invalid header name `{key}`: {err}"))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| format!("Invalid header value for `{key}`: {err}"))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Shared transport for every worker of a run.
pub fn build_client(config: &DiffConfig) -> Result<Client, String> {
    let mut builder = Client::builder()
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(config.threads + 1)
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(proxy_url) = config
        .proxy_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let proxy = Proxy::all(proxy_url).map_err(|err| format!("Invalid proxy URL: {err}"))?;
        builder = builder.proxy(proxy);
    } else if !config.system_proxy {
        builder = builder.no_proxy();
    }

    if !config.verify_tls {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|err| format!("Failed to build HTTP client: {err}"))
}

/// An empty body decodes to `null`; anything else must be JSON.
pub fn decode_body(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
}

fn classify_reqwest_error(err: &reqwest::Error) -> Attempt {
    if err.is_timeout() {
        Attempt::Timeout
    } else {
        Attempt::Transport
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    if !honours_retry_after(response.status().as_u16()) {
        return None;
    }
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
}

struct LegOutcome {
    body: Value,
    retries: u32,
}

pub struct HttpExecutor {
    client: Client,
    policy: Arc<dyn RetryPolicy>,
    backoff: Backoff,
    retry_max: u32,
    ignore: IgnoreSet,
}

impl HttpExecutor {
    pub fn new(
        client: Client,
        policy: Arc<dyn RetryPolicy>,
        backoff: Backoff,
        retry_max: u32,
        ignore: IgnoreSet,
    ) -> Self {
        Self {
            client,
            policy,
            backoff,
            retry_max,
            ignore,
        }
    }

    pub fn from_config(config: &DiffConfig) -> Result<Self, String> {
        let policy = StatusRetryPolicy::new(config.retry_statuses.clone())
            .retry_on_timeout(config.retry_on_timeout);
        Ok(Self::new(
            build_client(config)?,
            Arc::new(policy),
            Backoff::new(config.retry_wait_min, config.retry_wait_max),
            config.retry_max,
            IgnoreSet::new(config.ignore_fields.iter().cloned()),
        ))
    }

    async fn send_leg(
        &self,
        ctx: &RunContext,
        row: u32,
        leg: Leg,
        spec: &RequestSpec,
    ) -> Result<LegOutcome, ExecError> {
        let method = Method::from_bytes(spec.method.as_bytes()).map_err(|err| {
            ExecError::InvalidRequest {
                leg,
                message: format!("Invalid HTTP method: {err}"),
            }
        })?;
        let headers =
            build_headers(&spec.headers).map_err(|message| ExecError::InvalidRequest { leg, message })?;

        let mut retries = 0u32;
        loop {
            if let Some(cause) = ctx.err() {
                return Err(ExecError::Cancelled { leg, cause });
            }

            trace!(row, %leg, method = %method, url = %spec.path, ?headers, "sending request");
            let request = self
                .client
                .request(method.clone(), &spec.path)
                .headers(headers.clone());

            let sent = tokio::select! {
                biased;
                cause = ctx.done() => return Err(ExecError::Cancelled { leg, cause }),
                sent = request.send() => sent,
            };

            let attempt = match &sent {
                Ok(response) => Attempt::Status(response.status().as_u16()),
                Err(err) => classify_reqwest_error(err),
            };
            let retry = self
                .policy
                .should_retry(ctx, &attempt)
                .map_err(|cause| ExecError::Cancelled { leg, cause })?;

            if !retry {
                let response = sent.map_err(|source| ExecError::Transport { leg, source })?;
                let body = self.read_body(ctx, row, leg, response).await?;
                return Ok(LegOutcome { body, retries });
            }

            if retries >= self.retry_max {
                return Err(match sent {
                    Ok(response) => ExecError::RetriesExhausted {
                        leg,
                        status: response.status().as_u16(),
                        attempts: retries + 1,
                    },
                    Err(source) => ExecError::Transport { leg, source },
                });
            }

            let wait = self
                .backoff
                .delay(retries, sent.as_ref().ok().and_then(retry_after));
            drop(sent);
            debug!(row, %leg, retry = retries + 1, wait_ms = wait.as_millis() as u64, "backing off");

            tokio::select! {
                biased;
                cause = ctx.done() => return Err(ExecError::Cancelled { leg, cause }),
                _ = tokio::time::sleep(wait) => {}
            }
            retries += 1;
        }
    }

    async fn read_body(
        &self,
        ctx: &RunContext,
        row: u32,
        leg: Leg,
        response: Response,
    ) -> Result<Value, ExecError> {
        let status = response.status().as_u16();
        if status >= 500 {
            return Err(ExecError::Status { leg, status });
        }

        let bytes = tokio::select! {
            biased;
            cause = ctx.done() => return Err(ExecError::Cancelled { leg, cause }),
            bytes = response.bytes() => bytes.map_err(|source| ExecError::Transport { leg, source })?,
        };
        trace!(row, %leg, status, body = %String::from_utf8_lossy(&bytes), "received response");

        decode_body(&bytes).map_err(|source| ExecError::Decode { leg, source })
    }
}

impl Executor for HttpExecutor {
    fn execute(
        &self,
        ctx: &RunContext,
        test: &TestCase,
    ) -> impl Future<Output = Result<DiffResult, ExecError>> + Send {
        async move {
            let started = Instant::now();
            // The after leg may rely on side effects of the before leg.
            let before = self.send_leg(ctx, test.row, Leg::Before, &test.before).await?;
            let after = self.send_leg(ctx, test.row, Leg::After, &test.after).await?;

            Ok(DiffResult {
                test: test.clone(),
                diffs: compare(&before.body, &after.body, &self.ignore),
                retries: before.retries + after.retries,
                elapsed: started.elapsed(),
            })
        }
    }
}
