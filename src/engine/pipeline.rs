use crate::domain::{DiffResult, Summary, TestCase};
use crate::engine::aggregate::Aggregator;
use crate::engine::cancel::RunContext;
use crate::engine::http::Executor;
use crate::report::Reporter;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Input stream shared by every worker of a run.
pub type SharedSource = Arc<Mutex<mpsc::Receiver<TestCase>>>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Setup(String),
    #[error("diff worker crashed: {0}")]
    WorkerCrashed(#[from] tokio::task::JoinError),
}

async fn next_case(source: &SharedSource) -> Option<TestCase> {
    source.lock().await.recv().await
}

/// Spawns one worker. It drains `source` until the stream closes or the
/// context is done, and its output stream closes when it exits.
pub fn spawn_worker<E>(
    id: usize,
    ctx: RunContext,
    executor: Arc<E>,
    source: SharedSource,
) -> (mpsc::Receiver<DiffResult>, JoinHandle<()>)
where
    E: Executor + 'static,
{
    let (result_tx, result_rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                cause = ctx.done() => {
                    debug!(worker = id, %cause, "worker stopping");
                    None
                }
                next = next_case(&source) => next,
            };
            let Some(test) = next else {
                break;
            };

            match executor.execute(&ctx, &test).await {
                Ok(result) => {
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
                Err(err) if err.is_cancelled() => {
                    info!(worker = id, row = test.row, leg = %err.leg(), "row was canceled");
                }
                Err(err) => {
                    error!(worker = id, row = test.row, leg = %err.leg(), error = %err, "row failed");
                }
            }
        }
        debug!(worker = id, "worker finished");
    });

    (result_rx, handle)
}

/// Fans several streams into one. The output closes only after every input
/// has closed and been drained.
pub fn merge<T>(streams: Vec<mpsc::Receiver<T>>) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(streams.len().max(1));

    for mut stream in streams {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                if out_tx.send(item).await.is_err() {
                    break;
                }
            }
        });
    }

    out_rx
}

/// Runs the whole pool: `workers` workers feed a merger, whose single
/// consumer builds the summary. Failed results are handed to `reporter` as
/// they arrive. The summary's elapsed time is measured from `started`.
pub async fn run_pipeline<E, R>(
    ctx: &RunContext,
    started: Instant,
    executor: Arc<E>,
    source: mpsc::Receiver<TestCase>,
    workers: usize,
    reporter: &mut R,
) -> Result<Summary, PipelineError>
where
    E: Executor + 'static,
    R: Reporter + ?Sized,
{
    let mut aggregator = Aggregator::new(started).map_err(PipelineError::Setup)?;
    let source: SharedSource = Arc::new(Mutex::new(source));

    let worker_count = workers.max(1);
    let mut streams = Vec::with_capacity(worker_count);
    let mut handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let (stream, handle) = spawn_worker(id, ctx.clone(), executor.clone(), source.clone());
        streams.push(stream);
        handles.push(handle);
    }
    debug!(workers = worker_count, "diff workers started");

    let mut results = merge(streams);
    while let Some(result) = results.recv().await {
        if aggregator.observe(&result) {
            reporter.failure(&result);
        }
    }

    for handle in handles {
        handle.await?;
    }

    let summary = aggregator.finish();
    reporter.summary(&summary);
    Ok(summary)
}
