//! FILENAME: core/pivot-matrix/src/dimension.rs
//! Dimension - one grouping or aggregated field.
//!
//! A dimension knows which record field to read, how to order and label the
//! groups it produces, which filter applies to it and, when used as a measure,
//! which aggregator reduces it. Closures (grouper, renderers, sorter, custom
//! aggregator) are attached with builder methods and never serialized.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use rustc_hash::FxHashSet;
use crate::aggregator::{AggregateInput, Aggregator};
use crate::definition::{DimensionConfig, SortDirection};
use crate::error::{PivotError, Result};
use crate::filter::Filter;
use crate::locale::LocaleSettings;
use crate::sort::natural_cmp;
use crate::value::{Record, Value};

pub type GrouperFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
pub type RendererFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
pub type SorterFn = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

static NEXT_DIMENSION_ID: AtomicU64 = AtomicU64::new(1);

fn generate_id() -> String {
    format!("dim{}", NEXT_DIMENSION_ID.fetch_add(1, AtomicOrdering::Relaxed))
}

/// A value observed on this dimension and the label it was shown with.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionValue {
    pub value: Value,
    pub display: String,
}

#[derive(Clone)]
pub struct Dimension {
    id: String,
    header: String,
    data_index: String,
    sort_index: Option<String>,
    sortable: bool,
    direction: SortDirection,
    case_sensitive_sort: bool,
    blank_text: String,
    is_aggregate: bool,
    aggregator: Aggregator,
    filter: Option<Filter>,
    locale: LocaleSettings,

    grouper: Option<GrouperFn>,
    label_renderer: Option<RendererFn>,
    renderer: Option<RendererFn>,
    sorter: Option<SorterFn>,

    values: Vec<DimensionValue>,
    seen: FxHashSet<Value>,
}

impl Dimension {
    /// Builds a dimension from its configuration. Fails when `data_index`
    /// is empty.
    pub fn from_config(
        config: &DimensionConfig,
        is_aggregate: bool,
        locale: &LocaleSettings,
    ) -> Result<Self> {
        let id = config
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_id);

        if config.data_index.is_empty() {
            return Err(PivotError::MissingDataIndex(id));
        }

        let aggregator = config
            .aggregator
            .as_deref()
            .map(Aggregator::from_name)
            .unwrap_or_default();

        Ok(Dimension {
            header: config.header.clone().unwrap_or_else(|| config.data_index.clone()),
            data_index: config.data_index.clone(),
            sort_index: config.sort_index.clone(),
            sortable: config.sortable,
            direction: config.direction,
            case_sensitive_sort: config.case_sensitive_sort,
            blank_text: config.blank_text.clone(),
            is_aggregate,
            aggregator,
            filter: config.filter.clone().map(|f| Filter::new(f, locale.clone())),
            locale: locale.clone(),
            grouper: None,
            label_renderer: None,
            renderer: None,
            sorter: None,
            values: Vec::new(),
            seen: FxHashSet::default(),
            id,
        })
    }

    // ========================================================================
    // BUILDERS
    // ========================================================================

    pub fn with_grouper<F>(mut self, grouper: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.set_grouper(grouper);
        self
    }

    pub fn set_grouper<F>(&mut self, grouper: F)
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.grouper = Some(Arc::new(grouper));
    }

    /// Renderer for group labels on an axis.
    pub fn with_label_renderer<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.label_renderer = Some(Arc::new(renderer));
        self
    }

    /// Renderer for aggregated values.
    pub fn with_renderer<F>(mut self, renderer: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_sorter<F>(mut self, sorter: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.sorter = Some(Arc::new(sorter));
        self
    }

    pub fn with_aggregator_fn<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&AggregateInput<'_>) -> Value + Send + Sync + 'static,
    {
        self.aggregator = Aggregator::custom(name, func);
        self
    }

    pub fn set_aggregator(&mut self, aggregator: Aggregator) {
        self.aggregator = aggregator;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn data_index(&self) -> &str {
        &self.data_index
    }

    pub fn sort_index(&self) -> &str {
        self.sort_index.as_deref().unwrap_or(&self.data_index)
    }

    pub fn is_aggregate(&self) -> bool {
        self.is_aggregate
    }

    pub fn is_sortable(&self) -> bool {
        self.sortable
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn set_direction(&mut self, direction: SortDirection) {
        self.direction = direction;
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn set_filter(&mut self, filter: Option<Filter>) {
        self.filter = filter;
    }

    pub fn has_label_filter(&self) -> bool {
        self.filter.as_ref().is_some_and(|f| f.is_label())
    }

    pub fn has_value_filter(&self) -> bool {
        self.filter.as_ref().is_some_and(|f| f.is_value())
    }

    /// True when a change to `field` may move a record to another group.
    /// A custom grouper may read any field.
    pub fn reads_field(&self, field: &str) -> bool {
        self.grouper.is_some() || self.data_index == field || self.sort_index() == field
    }

    // ========================================================================
    // RECORD ACCESS
    // ========================================================================

    /// Group value for a record, with blanks replaced by `blank_text`.
    pub fn group_value(&self, record: &Record) -> Value {
        let value = match &self.grouper {
            Some(grouper) => grouper(record),
            None => record.get(&self.data_index).clone(),
        };
        if value.is_empty() {
            Value::text(self.blank_text.clone())
        } else {
            value
        }
    }

    /// Value used to order the group a record falls into.
    pub fn sort_value(&self, record: &Record) -> Value {
        match &self.sort_index {
            Some(field) => record.get(field).clone(),
            None => self.group_value(record),
        }
    }

    /// Display label for a group value.
    pub fn label(&self, value: &Value) -> String {
        match &self.label_renderer {
            Some(renderer) => renderer(value),
            None => value.to_string(),
        }
    }

    /// Display text for an aggregated value.
    pub fn format(&self, value: &Value) -> String {
        if let Some(renderer) = &self.renderer {
            return renderer(value);
        }
        match value {
            Value::Number(n) if self.is_aggregate => self.locale.format_number(n.0, 2),
            _ => value.to_string(),
        }
    }

    /// Orders two group values, honouring the direction.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = match &self.sorter {
            Some(sorter) => sorter(a, b),
            None => natural_cmp(a, b, self.case_sensitive_sort, &self.locale),
        };
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }

    // ========================================================================
    // OBSERVED VALUES
    // ========================================================================

    /// Records a group value. Returns false when it was already known.
    pub fn add_value(&mut self, value: &Value, display: &str) -> bool {
        if !self.seen.insert(value.clone()) {
            return false;
        }
        self.values.push(DimensionValue { value: value.clone(), display: display.to_string() });
        true
    }

    pub fn has_value(&self, value: &Value) -> bool {
        self.seen.contains(value)
    }

    pub fn values(&self) -> &[DimensionValue] {
        &self.values
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
        self.seen.clear();
    }

    /// Serializable form. Closures are not included.
    pub fn to_config(&self) -> DimensionConfig {
        DimensionConfig {
            id: Some(self.id.clone()),
            header: Some(self.header.clone()),
            data_index: self.data_index.clone(),
            sort_index: self.sort_index.clone(),
            sortable: self.sortable,
            direction: self.direction,
            case_sensitive_sort: self.case_sensitive_sort,
            blank_text: self.blank_text.clone(),
            aggregator: self.is_aggregate.then(|| self.aggregator.name().to_string()),
            filter: self.filter.as_ref().map(|f| f.config().clone()),
        }
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dimension")
            .field("id", &self.id)
            .field("data_index", &self.data_index)
            .field("direction", &self.direction)
            .field("is_aggregate", &self.is_aggregate)
            .field("aggregator", &self.aggregator)
            .field("filter", &self.filter)
            .field("values", &self.values.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorKind;
    use crate::filter::FilterConfig;

    fn dim(config: DimensionConfig) -> Dimension {
        Dimension::from_config(&config, false, &LocaleSettings::default()).unwrap()
    }

    #[test]
    fn test_missing_data_index_is_fatal() {
        let config = DimensionConfig::new("").with_id("country");
        let err = Dimension::from_config(&config, false, &LocaleSettings::default()).unwrap_err();
        assert!(matches!(err, PivotError::MissingDataIndex(id) if id == "country"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = dim(DimensionConfig::new("person"));
        let b = dim(DimensionConfig::new("person"));
        assert!(a.id().starts_with("dim"));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.header(), "person");
    }

    #[test]
    fn test_group_value_substitutes_blank_text() {
        let d = dim(DimensionConfig::new("country"));
        assert_eq!(d.group_value(&Record::new()), Value::text("(empty)"));
        assert_eq!(d.group_value(&Record::new().with("country", "USA")), Value::text("USA"));

        let upper = dim(DimensionConfig::new("country"))
            .with_grouper(|r: &Record| Value::text(r.get("country").to_string().to_uppercase()));
        assert_eq!(upper.group_value(&Record::new().with("country", "usa")), Value::text("USA"));
        assert!(upper.reads_field("anything"));
    }

    #[test]
    fn test_compare_respects_direction_and_sorter() {
        let mut d = dim(DimensionConfig::new("n"));
        let (a, b) = (Value::text("item 2"), Value::text("item 10"));
        assert_eq!(d.compare(&a, &b), Ordering::Less);
        d.set_direction(SortDirection::Desc);
        assert_eq!(d.compare(&a, &b), Ordering::Greater);

        let by_len = dim(DimensionConfig::new("n"))
            .with_sorter(|x: &Value, y: &Value| x.to_string().len().cmp(&y.to_string().len()));
        assert_eq!(by_len.compare(&Value::text("bbb"), &Value::text("a")), Ordering::Greater);
    }

    #[test]
    fn test_aggregate_default_format() {
        let config = DimensionConfig::new("value").with_aggregator("avg");
        let d = Dimension::from_config(&config, true, &LocaleSettings::default()).unwrap();
        assert!(matches!(d.aggregator(), Aggregator::Builtin(AggregatorKind::Avg)));
        assert_eq!(d.format(&Value::number(1234.5)), "1,234.50");

        let d = d.with_renderer(|v: &Value| format!("{}%", v));
        assert_eq!(d.format(&Value::number(12.0)), "12%");
    }

    #[test]
    fn test_observed_values() {
        let mut d = dim(DimensionConfig::new("country"));
        assert!(d.add_value(&Value::text("USA"), "USA"));
        assert!(!d.add_value(&Value::text("USA"), "USA"));
        assert!(d.has_value(&Value::text("USA")));
        assert!(!d.has_value(&Value::text("Canada")));
        assert_eq!(d.values().len(), 1);
    }

    #[test]
    fn test_to_config_round_trip_keeps_filter() {
        let config = DimensionConfig::new("country")
            .with_id("country")
            .with_filter(FilterConfig::label("=", "USA"));
        let d = dim(config);
        assert!(d.has_label_filter());
        let back = d.to_config();
        assert_eq!(back.id.as_deref(), Some("country"));
        assert_eq!(back.filter, Some(FilterConfig::label("=", "USA")));
        assert_eq!(back.aggregator, None);
    }
}
