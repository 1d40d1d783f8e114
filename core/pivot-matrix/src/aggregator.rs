//! FILENAME: core/pivot-matrix/src/aggregator.rs
//! Aggregator functions.
//!
//! Built-in reductions are a closed enum dispatched with a `match`. Custom
//! reductions share one typed signature (`AggregatorFn`) and are either
//! attached directly to a dimension or registered by name on the
//! `AggregatorRegistry`. Names are resolved late: an unknown name only fails
//! when a result is calculated.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use crate::error::{PivotError, Result};
use crate::value::{Record, Value};

// ============================================================================
// INPUT AND CONTEXT
// ============================================================================

/// Read-only view of the matrix available to aggregators that need to look
/// beyond their own cell (the group percentages).
pub trait AggregateScope {
    fn keys_separator(&self) -> &str;
    fn grand_total_key(&self) -> &str;
    /// Records attached to the result at `(left_key, top_key)`, empty when
    /// no such result exists.
    fn records_at(&self, left_key: &str, top_key: &str) -> Vec<&Record>;
}

/// Everything an aggregator receives for one cell and one measure.
pub struct AggregateInput<'a> {
    pub records: &'a [&'a Record],
    /// Field read from each record.
    pub measure: &'a str,
    pub scope: &'a dyn AggregateScope,
    pub left_key: &'a str,
    pub top_key: &'a str,
}

impl AggregateInput<'_> {
    fn numbers(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.get(self.measure).number_or_zero()).collect()
    }
}

/// Signature shared by every custom aggregator.
pub type AggregatorFn = Arc<dyn Fn(&AggregateInput<'_>) -> Value + Send + Sync>;

// ============================================================================
// BUILT-IN KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregatorKind {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Variance,
    VarianceP,
    StdDev,
    StdDevP,
    GroupSumPercentage,
    GroupCountPercentage,
}

impl AggregatorKind {
    pub const ALL: [AggregatorKind; 11] = [
        AggregatorKind::Sum,
        AggregatorKind::Avg,
        AggregatorKind::Min,
        AggregatorKind::Max,
        AggregatorKind::Count,
        AggregatorKind::Variance,
        AggregatorKind::VarianceP,
        AggregatorKind::StdDev,
        AggregatorKind::StdDevP,
        AggregatorKind::GroupSumPercentage,
        AggregatorKind::GroupCountPercentage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AggregatorKind::Sum => "sum",
            AggregatorKind::Avg => "avg",
            AggregatorKind::Min => "min",
            AggregatorKind::Max => "max",
            AggregatorKind::Count => "count",
            AggregatorKind::Variance => "variance",
            AggregatorKind::VarianceP => "varianceP",
            AggregatorKind::StdDev => "stdDev",
            AggregatorKind::StdDevP => "stdDevP",
            AggregatorKind::GroupSumPercentage => "groupSumPercentage",
            AggregatorKind::GroupCountPercentage => "groupCountPercentage",
        }
    }

    pub fn apply(&self, input: &AggregateInput<'_>) -> Value {
        match self {
            AggregatorKind::Sum => Value::number(sum(input)),
            AggregatorKind::Avg => Value::number(avg(input)),
            AggregatorKind::Min => extreme(input, Ordering::Less),
            AggregatorKind::Max => extreme(input, Ordering::Greater),
            AggregatorKind::Count => Value::number(input.records.len() as f64),
            AggregatorKind::Variance => Value::number(variance(input, false)),
            AggregatorKind::VarianceP => Value::number(variance(input, true)),
            AggregatorKind::StdDev => Value::number(std_dev(input, false)),
            AggregatorKind::StdDevP => Value::number(std_dev(input, true)),
            AggregatorKind::GroupSumPercentage => {
                Value::number(group_percentage(input, |records| {
                    records.iter().map(|r| r.get(input.measure).number_or_zero()).sum()
                }))
            }
            AggregatorKind::GroupCountPercentage => {
                Value::number(group_percentage(input, |records| records.len() as f64))
            }
        }
    }
}

impl FromStr for AggregatorKind {
    type Err = PivotError;

    fn from_str(s: &str) -> Result<Self> {
        AggregatorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| PivotError::AggregatorNotFound(s.to_string()))
    }
}

fn sum(input: &AggregateInput<'_>) -> f64 {
    input.numbers().iter().sum()
}

fn avg(input: &AggregateInput<'_>) -> f64 {
    let n = input.records.len();
    if n == 0 {
        return 0.0;
    }
    sum(input) / n as f64
}

/// Raw min or max, skipping blanks. Blank when nothing is left.
fn extreme(input: &AggregateInput<'_>, keep: Ordering) -> Value {
    input
        .records
        .iter()
        .map(|r| r.get(input.measure))
        .filter(|v| !v.is_empty())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.total_cmp(b) != keep => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Empty)
}

/// Sample or population variance. Zero unless the mean is strictly positive.
fn variance(input: &AggregateInput<'_>, population: bool) -> f64 {
    let n = input.records.len();
    let mean = avg(input);
    let mut total = 0.0;
    if mean > 0.0 {
        total = input.numbers().iter().map(|v| (v - mean) * (v - mean)).sum();
    }

    if population {
        if total > 0.0 {
            total / n as f64
        } else {
            0.0
        }
    } else if total > 0.0 && n > 1 {
        total / (n - 1) as f64
    } else {
        0.0
    }
}

fn std_dev(input: &AggregateInput<'_>, population: bool) -> f64 {
    let v = variance(input, population);
    if v > 0.0 {
        v.sqrt()
    } else {
        0.0
    }
}

/// Drops the last segment of a composite key; top-level keys map to the
/// grand total.
pub(crate) fn parent_key(key: &str, separator: &str, grand_total_key: &str) -> String {
    match key.rfind(separator) {
        Some(pos) if !separator.is_empty() => key[..pos].to_string(),
        _ => grand_total_key.to_string(),
    }
}

/// This cell's measure as a percentage of its parent group's measure.
/// The parent is one level up the row chain, or up the column chain for
/// cells on the grand-total row.
fn group_percentage(
    input: &AggregateInput<'_>,
    measure: impl Fn(&[&Record]) -> f64,
) -> f64 {
    let scope = input.scope;
    let gt = scope.grand_total_key();
    let sep = scope.keys_separator();

    let (parent_left, parent_top) = if input.left_key != gt {
        (parent_key(input.left_key, sep, gt), input.top_key.to_string())
    } else {
        (input.left_key.to_string(), parent_key(input.top_key, sep, gt))
    };

    let own = measure(input.records);
    let parent_records = scope.records_at(&parent_left, &parent_top);
    let parent = measure(&parent_records);

    if own > 0.0 && parent > 0.0 {
        own / parent * 100.0
    } else {
        0.0
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// The reduction attached to an aggregate dimension.
#[derive(Clone)]
pub enum Aggregator {
    Builtin(AggregatorKind),
    /// Resolved against the registry when results are calculated.
    Named(String),
    Custom { name: String, func: AggregatorFn },
}

impl Aggregator {
    /// Built-in when the name is known, late-bound otherwise.
    pub fn from_name(name: &str) -> Self {
        match name.parse::<AggregatorKind>() {
            Ok(kind) => Aggregator::Builtin(kind),
            Err(_) => Aggregator::Named(name.to_string()),
        }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&AggregateInput<'_>) -> Value + Send + Sync + 'static,
    {
        Aggregator::Custom { name: name.into(), func: Arc::new(func) }
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregator::Builtin(kind) => kind.name(),
            Aggregator::Named(name) => name,
            Aggregator::Custom { name, .. } => name,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::Builtin(AggregatorKind::Sum)
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregator::Builtin(kind) => f.debug_tuple("Builtin").field(kind).finish(),
            Aggregator::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Aggregator::Custom { name, .. } => {
                f.debug_struct("Custom").field("name", name).finish_non_exhaustive()
            }
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// User-registered aggregators looked up by name.
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    custom: FxHashMap<String, AggregatorFn>,
}

impl AggregatorRegistry {
    pub fn new() -> Self {
        AggregatorRegistry::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&AggregateInput<'_>) -> Value + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || name.parse::<AggregatorKind>().is_ok()
    }

    pub fn apply(&self, aggregator: &Aggregator, input: &AggregateInput<'_>) -> Result<Value> {
        match aggregator {
            Aggregator::Builtin(kind) => Ok(kind.apply(input)),
            Aggregator::Custom { func, .. } => Ok(func(input)),
            Aggregator::Named(name) => self
                .custom
                .get(name)
                .map(|func| func(input))
                .ok_or_else(|| PivotError::AggregatorNotFound(name.clone())),
        }
    }
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("AggregatorRegistry").field("custom", &names).finish()
    }
}
