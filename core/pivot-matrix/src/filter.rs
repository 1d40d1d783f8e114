//! FILENAME: core/pivot-matrix/src/filter.rs
//! Group filters.
//!
//! Two families share one operator set:
//! - Label filters test a group's raw value while records are classified.
//!   A rejected value drops the record from that axis.
//! - Value filters test a group's grand-total aggregate after results are
//!   calculated, and prune the axis tree. The `top10` operator ranks sibling
//!   groups instead of testing them one by one.
//!
//! Operators that a family does not understand match everything.

use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::error::{PivotError, Result};
use crate::locale::LocaleSettings;
use crate::sort::natural_cmp;
use crate::value::Value;

// ============================================================================
// OPERATORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    NotBetween,
    Begins,
    NotBegins,
    Ends,
    NotEnds,
    Contains,
    NotContains,
    In,
    NotIn,
    Top10,
    /// Any other spelling. Never rejected, always matches.
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Between => "between",
            Operator::NotBetween => "not between",
            Operator::Begins => "begins",
            Operator::NotBegins => "not begins",
            Operator::Ends => "ends",
            Operator::NotEnds => "not ends",
            Operator::Contains => "contains",
            Operator::NotContains => "not contains",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Top10 => "top10",
            Operator::Unknown(s) => s,
        }
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "=" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "between" => Operator::Between,
            "not between" => Operator::NotBetween,
            "begins" => Operator::Begins,
            "not begins" => Operator::NotBegins,
            "ends" => Operator::Ends,
            "not ends" => Operator::NotEnds,
            "contains" => Operator::Contains,
            "not contains" => Operator::NotContains,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "top10" => Operator::Top10,
            _ => Operator::Unknown(s),
        }
    }
}

impl From<&str> for Operator {
    fn from(s: &str) -> Self {
        Operator::from(s.to_string())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Filter operand: one scalar, or a list for `in`/`between`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterOperand {
    List(Vec<Value>),
    Single(Value),
}

impl Default for FilterOperand {
    fn default() -> Self {
        FilterOperand::Single(Value::Empty)
    }
}

impl FilterOperand {
    fn first(&self) -> &Value {
        match self {
            FilterOperand::Single(v) => v,
            FilterOperand::List(list) => list.first().unwrap_or(&Value::Empty),
        }
    }

    fn nth(&self, n: usize) -> Option<&Value> {
        match self {
            FilterOperand::Single(v) if n == 0 => Some(v),
            FilterOperand::Single(_) => None,
            FilterOperand::List(list) => list.get(n),
        }
    }

    fn as_slice(&self) -> &[Value] {
        match self {
            FilterOperand::Single(v) => std::slice::from_ref(v),
            FilterOperand::List(list) => list,
        }
    }
}

impl From<Value> for FilterOperand {
    fn from(v: Value) -> Self {
        FilterOperand::Single(v)
    }
}

impl From<f64> for FilterOperand {
    fn from(n: f64) -> Self {
        FilterOperand::Single(Value::number(n))
    }
}

impl From<&str> for FilterOperand {
    fn from(s: &str) -> Self {
        FilterOperand::Single(Value::text(s))
    }
}

impl From<Vec<Value>> for FilterOperand {
    fn from(list: Vec<Value>) -> Self {
        FilterOperand::List(list)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelFilterConfig {
    pub operator: Operator,
    #[serde(default)]
    pub value: FilterOperand,
    /// Lower bound for `between`. Falls back to the first list operand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    /// Upper bound for `between`. Falls back to the second list operand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopType {
    #[default]
    Items,
    Sum,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopOrder {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFilterConfig {
    pub operator: Operator,
    #[serde(default)]
    pub value: FilterOperand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    /// Aggregate dimension whose grand total is tested. Required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_id: Option<String>,
    #[serde(default)]
    pub top_type: TopType,
    #[serde(default)]
    pub top_order: TopOrder,
    /// Reorder the surviving Top-N siblings by their aggregate.
    #[serde(default = "default_true")]
    pub top_sort: bool,
}

fn default_true() -> bool {
    true
}

/// Serialized filter, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterConfig {
    Label(LabelFilterConfig),
    Value(ValueFilterConfig),
}

impl FilterConfig {
    pub fn label(operator: impl Into<Operator>, value: impl Into<FilterOperand>) -> Self {
        FilterConfig::Label(LabelFilterConfig {
            operator: operator.into(),
            value: value.into(),
            from: None,
            to: None,
            case_sensitive: true,
        })
    }

    pub fn value(
        operator: impl Into<Operator>,
        value: impl Into<FilterOperand>,
        dimension_id: impl Into<String>,
    ) -> Self {
        FilterConfig::Value(ValueFilterConfig {
            operator: operator.into(),
            value: value.into(),
            from: None,
            to: None,
            dimension_id: Some(dimension_id.into()),
            top_type: TopType::Items,
            top_order: TopOrder::Top,
            top_sort: true,
        })
    }

    pub fn top(
        count: f64,
        top_type: TopType,
        top_order: TopOrder,
        dimension_id: impl Into<String>,
    ) -> Self {
        FilterConfig::Value(ValueFilterConfig {
            operator: Operator::Top10,
            value: FilterOperand::Single(Value::number(count)),
            from: None,
            to: None,
            dimension_id: Some(dimension_id.into()),
            top_type,
            top_order,
            top_sort: true,
        })
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// A configured filter bound to locale settings.
#[derive(Debug, Clone)]
pub struct Filter {
    config: FilterConfig,
    locale: LocaleSettings,
}

impl Filter {
    pub fn new(config: FilterConfig, locale: LocaleSettings) -> Self {
        Filter { config, locale }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn is_label(&self) -> bool {
        matches!(self.config, FilterConfig::Label(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self.config, FilterConfig::Value(_))
    }

    pub fn is_top10(&self) -> bool {
        matches!(&self.config, FilterConfig::Value(v) if v.operator == Operator::Top10)
    }

    /// Aggregate dimension read by a value filter.
    pub fn dimension_id(&self) -> Option<&str> {
        match &self.config {
            FilterConfig::Value(v) => v.dimension_id.as_deref(),
            FilterConfig::Label(_) => None,
        }
    }

    pub fn top_sort(&self) -> bool {
        matches!(&self.config, FilterConfig::Value(v) if v.top_sort)
    }

    /// Checks that a value filter names an existing aggregate dimension.
    pub fn validate(&self, owner: &str, aggregate_ids: &[String]) -> Result<()> {
        let FilterConfig::Value(v) = &self.config else {
            return Ok(());
        };
        let dimension_id = match v.dimension_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(PivotError::MissingFilterDimension(owner.to_string())),
        };
        if !aggregate_ids.iter().any(|id| id == dimension_id) {
            return Err(PivotError::UnknownAggregateDimension {
                dimension: owner.to_string(),
                aggregate: dimension_id.to_string(),
            });
        }
        Ok(())
    }

    /// Tests a group value (label filters) or a grand-total aggregate
    /// (value filters). `top10` always matches here; see `select_top`.
    pub fn is_match(&self, candidate: &Value) -> bool {
        match &self.config {
            FilterConfig::Label(cfg) => self.label_match(cfg, candidate),
            FilterConfig::Value(cfg) => self.value_match(cfg, candidate),
        }
    }

    fn label_match(&self, cfg: &LabelFilterConfig, candidate: &Value) -> bool {
        let case = cfg.case_sensitive;
        let cmp = |operand: &Value| natural_cmp(candidate, operand, case, &self.locale);
        let text = |v: &Value| {
            let s = v.to_string();
            if case {
                s
            } else {
                s.to_lowercase()
            }
        };

        match &cfg.operator {
            Operator::Eq => cmp(cfg.value.first()) == Ordering::Equal,
            Operator::Ne => cmp(cfg.value.first()) != Ordering::Equal,
            Operator::Gt => cmp(cfg.value.first()) == Ordering::Greater,
            Operator::Ge => cmp(cfg.value.first()) != Ordering::Less,
            Operator::Lt => cmp(cfg.value.first()) == Ordering::Less,
            Operator::Le => cmp(cfg.value.first()) != Ordering::Greater,
            Operator::Between | Operator::NotBetween => {
                let (from, to) = bounds(&cfg.value, &cfg.from, &cfg.to);
                let inside = cmp(from) != Ordering::Less && cmp(to) != Ordering::Greater;
                inside == (cfg.operator == Operator::Between)
            }
            Operator::Begins => text(candidate).starts_with(&text(cfg.value.first())),
            Operator::NotBegins => !text(candidate).starts_with(&text(cfg.value.first())),
            Operator::Ends => text(candidate).ends_with(&text(cfg.value.first())),
            Operator::NotEnds => !text(candidate).ends_with(&text(cfg.value.first())),
            Operator::Contains => text(candidate).contains(&text(cfg.value.first())),
            Operator::NotContains => !text(candidate).contains(&text(cfg.value.first())),
            Operator::In => cfg.value.as_slice().iter().any(|v| cmp(v) == Ordering::Equal),
            Operator::NotIn => !cfg.value.as_slice().iter().any(|v| cmp(v) == Ordering::Equal),
            Operator::Top10 | Operator::Unknown(_) => true,
        }
    }

    fn value_match(&self, cfg: &ValueFilterConfig, candidate: &Value) -> bool {
        let num = |v: &Value| self.locale.coerce(v).unwrap_or(0.0);
        let x = num(candidate);
        let y = num(cfg.value.first());

        match &cfg.operator {
            Operator::Eq => x == y,
            Operator::Ne => x != y,
            Operator::Gt => x > y,
            Operator::Ge => x >= y,
            Operator::Lt => x < y,
            Operator::Le => x <= y,
            Operator::Between | Operator::NotBetween => {
                let (from, to) = bounds(&cfg.value, &cfg.from, &cfg.to);
                let inside = x >= num(from) && x <= num(to);
                inside == (cfg.operator == Operator::Between)
            }
            _ => true,
        }
    }

    /// Ranks sibling groups by their aggregate and returns the survivors in
    /// ranked order. `parent_total` is the parent group's grand total, used
    /// by the `percent` mode. Non top10 filters keep everything unchanged.
    pub fn select_top<T: Clone>(&self, candidates: &[(T, f64)], parent_total: f64) -> Vec<T> {
        let cfg = match &self.config {
            FilterConfig::Value(cfg) if cfg.operator == Operator::Top10 => cfg,
            _ => return candidates.iter().map(|(item, _)| item.clone()).collect(),
        };

        let mut ranked: Vec<&(T, f64)> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            match cfg.top_order {
                TopOrder::Top => ord.reverse(),
                TopOrder::Bottom => ord,
            }
        });

        let threshold = self.locale.coerce(cfg.value.first()).unwrap_or(0.0);
        let mut kept = Vec::new();

        match cfg.top_type {
            TopType::Items => {
                let mut unique: Vec<f64> = Vec::new();
                for (i, (item, value)) in ranked.iter().map(|c| (&c.0, c.1)).enumerate() {
                    if !unique.contains(&value) {
                        unique.push(value);
                    }
                    if unique.len() as f64 > threshold || (threshold < (i + 1) as f64 && i > 0) {
                        break;
                    }
                    kept.push(item.clone());
                }
            }
            TopType::Sum | TopType::Percent => {
                let mut running = 0.0;
                for (item, value) in ranked.iter().map(|c| (&c.0, c.1)) {
                    running += value;
                    kept.push(item.clone());
                    let reached = if cfg.top_type == TopType::Sum {
                        running
                    } else if parent_total != 0.0 {
                        running / parent_total * 100.0
                    } else {
                        0.0
                    };
                    if reached >= threshold {
                        break;
                    }
                }
            }
        }

        kept
    }
}

/// Resolves `between` bounds from explicit `from`/`to` or a two-item list.
fn bounds<'a>(
    value: &'a FilterOperand,
    from: &'a Option<Value>,
    to: &'a Option<Value>,
) -> (&'a Value, &'a Value) {
    let lo = from.as_ref().or_else(|| value.nth(0)).unwrap_or(&Value::Empty);
    let hi = to.as_ref().or_else(|| value.nth(1)).unwrap_or(&Value::Empty);
    (lo, hi)
}
