use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

// ─── Test Cases ───────────────────────────────────────────────────────────────

/// One side of a paired exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub row: u32,
    pub before: RequestSpec,
    pub after: RequestSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Before,
    After,
}

impl Leg {
    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Before => "before",
            Leg::After => "after",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Diff Results ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: String,
    pub delta: String,
}

impl FieldDiff {
    pub fn new(field: impl Into<String>, delta: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            delta: delta.into(),
        }
    }
}

/// Outcome of one successfully executed test case. Empty `diffs` means pass.
#[derive(Debug, Clone)]
pub struct DiffResult {
    pub test: TestCase,
    pub diffs: Vec<FieldDiff>,
    pub retries: u32,
    pub elapsed: Duration,
}

impl DiffResult {
    pub fn passed(&self) -> bool {
        self.diffs.is_empty()
    }
}

// ─── Summary ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetrics {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub count: u64,
    pub passed: u64,
    pub failed: u64,
    pub failed_rows: Vec<u32>,
    pub issues: BTreeMap<String, Vec<u32>>,
    pub retries: u64,
    pub latency: LatencyMetrics,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl Summary {
    /// Issue rows ordered by number of affected rows (desc), then field name.
    pub fn issues_by_frequency(&self) -> Vec<(&str, &[u32])> {
        let mut issues: Vec<(&str, &[u32])> = self
            .issues
            .iter()
            .map(|(field, rows)| (field.as_str(), rows.as_slice()))
            .collect();
        issues.sort_by(|left, right| {
            right
                .1
                .len()
                .cmp(&left.1.len())
                .then_with(|| left.0.cmp(right.0))
        });
        issues
    }
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

pub fn join_rows(rows: &[u32], separator: &str) -> String {
    rows.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}
