//! Regression diffing for HTTP APIs.
//!
//! Every fixture row is sent to a "before" and an "after" environment and
//! the decoded responses are compared field by field. A pool of workers runs
//! the paired exchanges concurrently, their results are merged into a single
//! stream and one aggregator builds the run [`Summary`].

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fixture;
pub mod logging;
pub mod report;

pub use config::DiffConfig;
pub use domain::{DiffResult, FieldDiff, RequestSpec, Summary, TestCase};
pub use engine::cancel::{CancelHandle, ContextError, RunContext};
pub use engine::diff::{compare, IgnoreSet};
pub use engine::http::{ExecError, Executor, HttpExecutor};
pub use engine::pipeline::{run_pipeline, PipelineError};
pub use engine::retry::{Attempt, Backoff, RetryPolicy, StatusRetryPolicy};
pub use report::Reporter;
