use crate::domain::{DiffResult, LatencyMetrics, Summary};
use hdrhistogram::Histogram;
use std::collections::BTreeSet;
use std::time::Instant;

const MAX_TRACKED_LATENCY_US: u64 = 60 * 60 * 1_000_000;

#[derive(Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }

        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Sole owner of the run summary. Fed sequentially from the merged result
/// stream, so no synchronisation is needed.
pub struct Aggregator {
    summary: Summary,
    stats: RunningStats,
    latency: Histogram<u64>,
    started: Instant,
}

impl Aggregator {
    pub fn new(started: Instant) -> Result<Self, String> {
        let latency = Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
            .map_err(|err| format!("Failed to initialize latency histogram: {err}"))?;
        Ok(Self {
            summary: Summary::default(),
            stats: RunningStats::default(),
            latency,
            started,
        })
    }

    /// Records one result. Returns `true` when it failed.
    pub fn observe(&mut self, result: &DiffResult) -> bool {
        self.summary.count += 1;
        self.summary.retries += u64::from(result.retries);

        let latency_ms = result.elapsed.as_secs_f64() * 1000.0;
        self.stats.add(latency_ms);
        let latency_us = (result.elapsed.as_micros() as u64).clamp(1, MAX_TRACKED_LATENCY_US);
        let _ = self.latency.record(latency_us);

        if result.passed() {
            self.summary.passed += 1;
            return false;
        }

        let row = result.test.row;
        self.summary.failed_rows.push(row);
        let fields: BTreeSet<&str> = result.diffs.iter().map(|diff| diff.field.as_str()).collect();
        for field in fields {
            self.summary
                .issues
                .entry(field.to_string())
                .or_default()
                .push(row);
        }
        true
    }

    pub fn finish(self) -> Summary {
        let Aggregator {
            mut summary,
            stats,
            latency,
            started,
        } = self;

        summary.failed = summary.count - summary.passed;
        summary.failed_rows.sort_unstable();
        summary.failed_rows.dedup();
        for rows in summary.issues.values_mut() {
            rows.sort_unstable();
            rows.dedup();
        }

        if stats.count > 0 {
            summary.latency = LatencyMetrics {
                min_ms: round_to_3(stats.min),
                avg_ms: round_to_3(stats.mean),
                p50_ms: round_to_3(latency.value_at_quantile(0.50) as f64 / 1000.0),
                p90_ms: round_to_3(latency.value_at_quantile(0.90) as f64 / 1000.0),
                p99_ms: round_to_3(latency.value_at_quantile(0.99) as f64 / 1000.0),
                max_ms: round_to_3(stats.max),
            };
        }
        summary.elapsed = started.elapsed();
        summary
    }
}

fn round_to_3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FieldDiff, RequestSpec, TestCase};
    use std::collections::HashMap;
    use std::time::Duration;

    fn result(row: u32, fields: &[&str], latency_ms: u64) -> DiffResult {
        let spec = RequestSpec {
            method: "GET".to_string(),
            path: format!("http://example.com/{row}"),
            headers: HashMap::new(),
        };
        DiffResult {
            test: TestCase {
                row,
                before: spec.clone(),
                after: spec,
            },
            diffs: fields
                .iter()
                .map(|field| FieldDiff::new(*field, "1 → 2"))
                .collect(),
            retries: 0,
            elapsed: Duration::from_millis(latency_ms),
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(Instant::now()).expect("aggregator")
    }

    #[test]
    fn empty_run_has_zero_counts() {
        let summary = aggregator().finish();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.failed_rows.is_empty());
        assert!(summary.issues.is_empty());
        assert_eq!(summary.latency, LatencyMetrics::default());
    }

    #[test]
    fn counts_and_sorts_out_of_order_results() {
        let mut aggregator = aggregator();
        assert!(aggregator.observe(&result(9, &["count", "name"], 10)));
        assert!(!aggregator.observe(&result(2, &[], 20)));
        assert!(aggregator.observe(&result(4, &["count"], 30)));
        assert!(!aggregator.observe(&result(7, &[], 40)));
        let summary = aggregator.finish();

        assert_eq!(summary.count, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.passed + summary.failed, summary.count);
        assert_eq!(summary.failed_rows, vec![4, 9]);
        assert_eq!(summary.issues.get("count"), Some(&vec![4, 9]));
        assert_eq!(summary.issues.get("name"), Some(&vec![9]));
    }

    #[test]
    fn row_appears_once_per_field() {
        let mut aggregator = aggregator();
        aggregator.observe(&result(3, &["tags", "tags", "tags"], 1));
        let summary = aggregator.finish();
        assert_eq!(summary.issues.get("tags"), Some(&vec![3]));
    }

    #[test]
    fn every_issue_row_is_a_failed_row() {
        let mut aggregator = aggregator();
        for (row, fields) in [(1, vec!["a"]), (2, vec![]), (3, vec!["a", "b"]), (5, vec!["c"])] {
            aggregator.observe(&result(row, &fields, 5));
        }
        let summary = aggregator.finish();
        for rows in summary.issues.values() {
            for row in rows {
                assert!(summary.failed_rows.contains(row));
            }
        }
        assert_eq!(summary.failed_rows.len() as u64, summary.failed);
    }

    #[test]
    fn tracks_latency_and_retries() {
        let mut aggregator = aggregator();
        let mut slow = result(1, &[], 40);
        slow.retries = 2;
        aggregator.observe(&result(2, &[], 10));
        aggregator.observe(&result(3, &[], 20));
        aggregator.observe(&result(4, &[], 30));
        aggregator.observe(&slow);
        let summary = aggregator.finish();

        assert_eq!(summary.retries, 2);
        assert_eq!(summary.latency.min_ms, 10.0);
        assert_eq!(summary.latency.max_ms, 40.0);
        assert_eq!(summary.latency.avg_ms, 25.0);
        assert!((summary.latency.p50_ms - 20.0).abs() < 0.1);
        assert!((summary.latency.p99_ms - 40.0).abs() < 0.1);
    }
}
