//! Rendering of failed results and run summaries.
//!
//! `ConsoleReporter` prints human readable tables and `curl` reproduction
//! commands; `JsonReporter` prints one JSON line per failure followed by the
//! summary document.

use crate::domain::{join_rows, DiffResult, RequestSpec, Summary};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use serde_json::json;
use std::io::{self, Write};
use tracing::warn;

/// Consumer of pipeline output. `failure` is called once per failed result as
/// it arrives; `summary` once when the run completes.
pub trait Reporter: Send {
    fn failure(&mut self, result: &DiffResult);
    fn summary(&mut self, summary: &Summary);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn reporter_for(format: OutputFormat) -> Box<dyn Reporter> {
    match format {
        OutputFormat::Text => Box::new(ConsoleReporter::new(io::stdout())),
        OutputFormat::Json => Box::new(JsonReporter::new(io::stdout())),
    }
}

/// Shell-quoted `curl` command reproducing a request.
pub fn curl_command(spec: &RequestSpec) -> String {
    let mut headers: Vec<(&String, &String)> = spec.headers.iter().collect();
    headers.sort();

    let mut command = format!("curl -X {} {}", spec.method, shell_quote(&spec.path));
    for (name, value) in headers {
        command.push_str(" -H ");
        command.push_str(&shell_quote(&format!("{name}: {value}")));
    }
    command
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub struct ConsoleReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_failure(&mut self, result: &DiffResult) -> io::Result<()> {
        writeln!(self.out, "Row {} failed", result.test.row)?;
        writeln!(self.out, "  before: {}", curl_command(&result.test.before))?;
        writeln!(self.out, "  after:  {}", curl_command(&result.test.after))?;

        let mut table = new_table(vec!["Field", "Diff"]);
        for diff in &result.diffs {
            table.add_row(vec![diff.field.as_str(), diff.delta.as_str()]);
        }
        writeln!(self.out, "{table}\n")
    }

    fn write_summary(&mut self, summary: &Summary) -> io::Result<()> {
        writeln!(self.out, "Summary")?;
        writeln!(self.out, "  Count:       {}", summary.count)?;
        writeln!(self.out, "  Passed:      {}", summary.passed)?;
        writeln!(self.out, "  Failed:      {}", summary.failed)?;
        writeln!(self.out, "  Failed rows: {}", join_rows(&summary.failed_rows, ","))?;
        writeln!(self.out, "  Retries:     {}", summary.retries)?;
        writeln!(
            self.out,
            "  Latency:     avg {:.1}ms, p50 {:.1}ms, p99 {:.1}ms",
            summary.latency.avg_ms, summary.latency.p50_ms, summary.latency.p99_ms
        )?;
        writeln!(self.out, "  Time:        {:.3?}", summary.elapsed)?;

        if summary.issues.is_empty() {
            return Ok(());
        }

        let mut table = new_table(vec!["Field", "Issues", "Rows"]);
        for (field, rows) in summary.issues_by_frequency() {
            table.add_row(vec![
                field.to_string(),
                rows.len().to_string(),
                join_rows(rows, ","),
            ]);
        }
        writeln!(self.out, "\n{table}")
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn failure(&mut self, result: &DiffResult) {
        if let Err(err) = self.write_failure(result) {
            warn!(row = result.test.row, error = %err, "failed to write failure report");
        }
    }

    fn summary(&mut self, summary: &Summary) {
        if let Err(err) = self.write_summary(summary) {
            warn!(error = %err, "failed to write summary");
        }
    }
}

pub struct JsonReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Reporter for JsonReporter<W> {
    fn failure(&mut self, result: &DiffResult) {
        let line = json!({
            "row": result.test.row,
            "before": result.test.before,
            "after": result.test.after,
            "diffs": result.diffs,
        });
        if let Err(err) = writeln!(self.out, "{line}") {
            warn!(row = result.test.row, error = %err, "failed to write failure report");
        }
    }

    fn summary(&mut self, summary: &Summary) {
        let written = serde_json::to_string_pretty(summary)
            .map_err(io::Error::from)
            .and_then(|document| writeln!(self.out, "{document}"));
        if let Err(err) = written {
            warn!(error = %err, "failed to write summary");
        }
    }
}
