use crate::domain::FieldDiff;
use serde_json::Value;
use std::collections::BTreeSet;

const ROOT_FIELD: &str = "$";
const REMOVED: &str = "(removed)";
const ADDED: &str = "(added)";

/// Field names excluded from comparison. An entry matches a field by its full
/// path (`data.meta.traceId`) or by its own key name (`traceId`) at any depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    fields: BTreeSet<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    fn skips(&self, path: &str, key: &str) -> bool {
        self.fields.contains(path) || self.fields.contains(key)
    }
}

/// Structural comparison of two decoded bodies. Output follows a depth-first
/// walk with object keys in sorted order, so identical inputs always produce
/// the same sequence.
pub fn compare(before: &Value, after: &Value, ignore: &IgnoreSet) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    if ignore.contains(ROOT_FIELD) {
        return diffs;
    }
    walk(ROOT_FIELD, Some(before), Some(after), ignore, &mut diffs);
    diffs
}

fn walk(
    path: &str,
    before: Option<&Value>,
    after: Option<&Value>,
    ignore: &IgnoreSet,
    diffs: &mut Vec<FieldDiff>,
) {
    match (before, after) {
        (Some(Value::Object(before)), Some(Value::Object(after))) => {
            let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            for key in keys {
                let child = child_path(path, key);
                if ignore.skips(&child, key) {
                    continue;
                }
                walk(&child, before.get(key), after.get(key), ignore, diffs);
            }
        }
        (Some(Value::Array(before)), Some(Value::Array(after))) => {
            for index in 0..before.len().max(after.len()) {
                let child = index_path(path, index);
                if ignore.contains(&child) {
                    continue;
                }
                walk(&child, before.get(index), after.get(index), ignore, diffs);
            }
        }
        (Some(before), Some(after)) => {
            if before != after {
                diffs.push(FieldDiff::new(
                    path,
                    format!("{} → {}", render(before), render(after)),
                ));
            }
        }
        (Some(before), None) => {
            diffs.push(FieldDiff::new(path, format!("{} → {REMOVED}", render(before))));
        }
        (None, Some(after)) => {
            diffs.push(FieldDiff::new(path, format!("{ADDED} → {}", render(after))));
        }
        (None, None) => {}
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent == ROOT_FIELD {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    if parent == ROOT_FIELD {
        format!("[{index}]")
    } else {
        format!("{parent}[{index}]")
    }
}

fn render(value: &Value) -> String {
    value.to_string()
}
