use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the process-wide stderr subscriber. `RUST_LOG` takes precedence
/// over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(level))
            .with_context(|| format!("Invalid log level `{level}`"))?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Scopes a bare level to this crate so dependency noise stays at `warn`.
fn filter_directive(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level.contains('=') || level.contains(',') {
        level
    } else {
        format!("warn,regdiff={level}")
    }
}
