use anyhow::{Context, Result};
use clap::Parser;
use regdiff::cli::Cli;
use regdiff::engine::cancel::RunContext;
use regdiff::engine::http::HttpExecutor;
use regdiff::engine::pipeline::run_pipeline;
use regdiff::{fixture, logging, report};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let started = Instant::now();
    let output = cli.output;
    logging::init_logging(&cli.log_level)?;
    let config = cli.into_config().context("Invalid configuration")?;

    let (cancel, mut ctx) = RunContext::new();
    if let Some(timeout) = config.run_timeout {
        ctx = ctx.with_timeout(timeout);
    }

    let tests = fixture::load_fixture(&config.fixture_path, &config)
        .context("Failed to load fixture")?;
    let executor = Arc::new(HttpExecutor::from_config(&config).map_err(anyhow::Error::msg)?);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    info!(
        cases = tests.len(),
        workers = config.threads,
        before = %config.before_base,
        after = %config.after_base,
        "starting diff run"
    );
    let source = fixture::spawn_source(ctx.clone(), tests, config.threads);
    let mut reporter = report::reporter_for(output);
    let summary = run_pipeline(
        &ctx,
        started,
        executor,
        source,
        config.threads,
        reporter.as_mut(),
    )
    .await
    .context("Diff run failed")?;

    if let Some(cause) = ctx.err() {
        warn!(%cause, "run ended before every case completed");
    }

    Ok(if summary.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}
