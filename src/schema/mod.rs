//! Schema validation for raw input rows.
//!
//! Rows are checked for required fields, JSON types and per-metric value
//! ranges. A bad row never fails the batch: it is moved to the rejected
//! partition together with a reason code.

use crate::models::{Field, RawRow, Record, RejectReason, Rejection};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// A declared range that can never accept a value sensibly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("range for '{0}' has min greater than max")]
    InvertedRange(String),

    #[error("range for '{0}' has a non-finite bound")]
    NonFiniteBound(String),
}

/// Inclusive range of accepted values. Open on a side when the bound is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Check that both bounds are finite and ordered. `name` labels the error.
    pub fn check(&self, name: &str) -> Result<(), SchemaError> {
        if self.min.iter().chain(self.max.iter()).any(|b| !b.is_finite()) {
            return Err(SchemaError::NonFiniteBound(name.to_string()));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(SchemaError::InvertedRange(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Declared value ranges per metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Range applied to metrics without their own entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_range: Option<ValueRange>,

    /// Ranges keyed by metric name.
    #[serde(default)]
    pub metrics: HashMap<String, ValueRange>,
}

impl Schema {
    /// Builder: declare the range of one metric.
    pub fn with_metric(mut self, name: impl Into<String>, range: ValueRange) -> Self {
        self.metrics.insert(name.into(), range);
        self
    }

    /// Builder: set the fallback range.
    pub fn with_default_range(mut self, range: ValueRange) -> Self {
        self.default_range = Some(range);
        self
    }

    /// The range that applies to `metric`, if any.
    pub fn range_for(&self, metric: &str) -> Option<&ValueRange> {
        self.metrics.get(metric).or(self.default_range.as_ref())
    }

    /// Reject ranges that are inverted or carry a NaN/infinite bound.
    ///
    /// The fallback range is labelled `default`.
    pub fn check(&self) -> Result<(), SchemaError> {
        if let Some(range) = &self.default_range {
            range.check("default")?;
        }
        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            self.metrics[name].check(name)?;
        }
        Ok(())
    }
}

/// Outcome of validating a batch: every input row lands in exactly one list.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub valid: Vec<Record>,
    pub rejected: Vec<Rejection>,
}

impl Validation {
    /// Number of rejections per reason code.
    pub fn reject_counts(&self) -> HashMap<RejectReason, usize> {
        let mut counts = HashMap::new();
        for rejection in &self.rejected {
            *counts.entry(rejection.reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Validate a batch of raw rows against a schema.
pub fn validate(rows: &[RawRow], schema: &Schema) -> Validation {
    let mut validation = Validation::default();

    for (index, row) in rows.iter().enumerate() {
        match validate_row(row, schema) {
            Ok(record) => validation.valid.push(record),
            Err((reason, detail)) => {
                debug!("Row {} rejected ({}): {}", index, reason, detail);
                validation.rejected.push(Rejection {
                    index,
                    reason,
                    detail,
                    row: row.clone(),
                });
            }
        }
    }

    validation
}

type RowError = (RejectReason, String);

/// Validate a single row.
fn validate_row(row: &RawRow, schema: &Schema) -> Result<Record, RowError> {
    // Missing fields are reported before any type check.
    if let Some(field) = Field::ALL
        .iter()
        .find(|f| matches!(row.get(f.name()), None | Some(Value::Null)))
    {
        return Err((
            RejectReason::MissingField,
            format!("field '{}' is missing", field),
        ));
    }

    let subject_id = text_field(row, Field::SubjectId)?;
    let timestamp = date_field(row)?;
    let category = text_field(row, Field::Category)?;
    let metric_name = text_field(row, Field::MetricName)?;
    let value = number_field(row)?;

    if !value.is_finite() {
        return Err((
            RejectReason::OutOfRange,
            format!("value {} is not finite", value),
        ));
    }

    if let Some(range) = schema.range_for(&metric_name) {
        if !range.contains(value) {
            return Err((
                RejectReason::OutOfRange,
                format!(
                    "value {} outside [{}, {}] for metric '{}'",
                    value,
                    bound_label(range.min),
                    bound_label(range.max),
                    metric_name
                ),
            ));
        }
    }

    Ok(Record {
        subject_id,
        timestamp,
        category,
        metric_name,
        value,
    })
}

fn text_field(row: &RawRow, field: Field) -> Result<String, RowError> {
    match row.get(field.name()) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(mismatch(field, "string", other)),
    }
}

fn number_field(row: &RawRow) -> Result<f64, RowError> {
    match row.get(Field::Value.name()) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| mismatch(Field::Value, "number", row.get(Field::Value.name()))),
        other => Err(mismatch(Field::Value, "number", other)),
    }
}

fn date_field(row: &RawRow) -> Result<NaiveDate, RowError> {
    match row.get(Field::Timestamp.name()) {
        Some(Value::String(s)) => parse_date(s).ok_or_else(|| {
            (
                RejectReason::TypeMismatch,
                format!("field 'timestamp' is not a date: '{}'", s),
            )
        }),
        other => Err(mismatch(Field::Timestamp, "date string", other)),
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 date-time, keeping the date part.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn mismatch(field: Field, expected: &str, actual: Option<&Value>) -> RowError {
    (
        RejectReason::TypeMismatch,
        format!(
            "field '{}' expected {}, got {}",
            field,
            expected,
            json_type_name(actual)
        ),
    )
}

fn json_type_name(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn bound_label(bound: Option<f64>) -> String {
    bound.map_or_else(|| "..".to_string(), |b| b.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    fn score_schema() -> Schema {
        Schema::default().with_metric("score", ValueRange::new(0.0, 100.0))
    }

    fn good_row() -> RawRow {
        row(json!({
            "subject_id": "A",
            "timestamp": "2024-03-01",
            "category": "Engineering",
            "metric_name": "score",
            "value": 80
        }))
    }

    #[test]
    fn test_schema_check_accepts_open_and_ordered_ranges() {
        let schema = Schema::default()
            .with_default_range(ValueRange { min: Some(0.0), max: None })
            .with_metric("engagement", ValueRange::new(0.0, 100.0))
            .with_metric("flat", ValueRange::new(5.0, 5.0));
        assert_eq!(schema.check(), Ok(()));
    }

    #[test]
    fn test_schema_check_rejects_inverted_range() {
        let schema = Schema::default().with_metric("engagement", ValueRange::new(100.0, 0.0));
        assert_eq!(
            schema.check(),
            Err(SchemaError::InvertedRange("engagement".to_string()))
        );
    }

    #[test]
    fn test_schema_check_rejects_nan_bound() {
        let schema = Schema::default().with_default_range(ValueRange {
            min: None,
            max: Some(f64::NAN),
        });
        assert_eq!(
            schema.check(),
            Err(SchemaError::NonFiniteBound("default".to_string()))
        );
    }

    #[test]
    fn test_valid_row_accepted() {
        let result = validate(&[good_row()], &score_schema());
        assert_eq!(result.valid.len(), 1);
        assert!(result.rejected.is_empty());
        assert_eq!(result.valid[0].value, 80.0);
        assert_eq!(
            result.valid[0].timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
    }

    #[test]
    fn test_missing_field_rejected() {
        let mut r = good_row();
        r.remove("category");
        let result = validate(&[r], &score_schema());
        assert_eq!(result.rejected[0].reason, RejectReason::MissingField);
        assert!(result.rejected[0].detail.contains("category"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut r = good_row();
        r.insert("value".to_string(), Value::Null);
        let result = validate(&[r], &score_schema());
        assert_eq!(result.rejected[0].reason, RejectReason::MissingField);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut r = good_row();
        r.insert("value".to_string(), json!("eighty"));
        let result = validate(&[r], &score_schema());
        assert_eq!(result.rejected[0].reason, RejectReason::TypeMismatch);

        let mut r = good_row();
        r.insert("timestamp".to_string(), json!("yesterday"));
        let result = validate(&[r], &score_schema());
        assert_eq!(result.rejected[0].reason, RejectReason::TypeMismatch);
    }

    #[test]
    fn test_out_of_range_not_clamped() {
        let mut r = good_row();
        r.insert("value".to_string(), json!(101));
        let result = validate(&[r], &score_schema());
        assert!(result.valid.is_empty());
        assert_eq!(result.rejected[0].reason, RejectReason::OutOfRange);
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let mut low = good_row();
        low.insert("value".to_string(), json!(0));
        let mut high = good_row();
        high.insert("value".to_string(), json!(100));
        let result = validate(&[low, high], &score_schema());
        assert_eq!(result.valid.len(), 2);
    }

    #[test]
    fn test_default_range_applies_to_unlisted_metrics() {
        let schema = score_schema().with_default_range(ValueRange::new(0.0, 10.0));
        let mut r = good_row();
        r.insert("metric_name".to_string(), json!("nps"));
        r.insert("value".to_string(), json!(11));
        let result = validate(&[r], &schema);
        assert_eq!(result.rejected[0].reason, RejectReason::OutOfRange);
    }

    #[test]
    fn test_rfc3339_timestamp_keeps_date() {
        assert_eq!(
            parse_date("2024-03-01T23:15:00+00:00"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }

    #[test]
    fn test_partition_is_exhaustive_and_ordered() {
        let mut bad = good_row();
        bad.remove("subject_id");
        let rows = vec![good_row(), bad, good_row()];
        let result = validate(&rows, &score_schema());
        assert_eq!(result.valid.len() + result.rejected.len(), rows.len());
        assert_eq!(result.rejected[0].index, 1);
        assert_eq!(result.reject_counts().get(&RejectReason::MissingField), Some(&1));
    }
}
