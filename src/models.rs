//! Data models for the KPI engine.
//!
//! This module contains the core data structures shared by the validator,
//! the filter engine and the aggregator: records, fields, rejections and
//! KPI results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw input row as handed over by a loader.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// A field of a [`Record`] that filters and group keys may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SubjectId,
    Timestamp,
    Category,
    MetricName,
    Value,
}

impl Field {
    /// All fields, in schema order.
    pub const ALL: [Field; 5] = [
        Field::SubjectId,
        Field::Timestamp,
        Field::Category,
        Field::MetricName,
        Field::Value,
    ];

    /// The column name of this field.
    pub fn name(&self) -> &'static str {
        match self {
            Field::SubjectId => "subject_id",
            Field::Timestamp => "timestamp",
            Field::Category => "category",
            Field::MetricName => "metric_name",
            Field::Value => "value",
        }
    }

    /// Resolve a column name, returning `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One validated leadership observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Person or team being measured.
    pub subject_id: String,
    /// Day of the observation.
    pub timestamp: NaiveDate,
    /// Grouping category, e.g. a department.
    pub category: String,
    /// Name of the measured metric.
    pub metric_name: String,
    /// Measured value; finite and within the metric's range.
    pub value: f64,
}

impl Record {
    /// Returns the text value of a text field, `None` for other fields.
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::SubjectId => Some(&self.subject_id),
            Field::Category => Some(&self.category),
            Field::MetricName => Some(&self.metric_name),
            Field::Timestamp | Field::Value => None,
        }
    }
}

/// Reason code attached to a rejected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingField,
    TypeMismatch,
    OutOfRange,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingField => write!(f, "missing_field"),
            RejectReason::TypeMismatch => write!(f, "type_mismatch"),
            RejectReason::OutOfRange => write!(f, "out_of_range"),
        }
    }
}

/// A row that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position of the row in the input.
    pub index: usize,
    pub reason: RejectReason,
    /// Human-readable explanation.
    pub detail: String,
    /// The offending row, untouched.
    pub row: RawRow,
}

/// Value of a KPI for one group.
///
/// `Undefined` means there was not enough data; it serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KpiValue {
    Defined(f64),
    Undefined,
}

impl KpiValue {
    /// Wrap a computed number; non-finite results become `Undefined`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            KpiValue::Defined(value)
        } else {
            KpiValue::Undefined
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KpiValue::Defined(v) => Some(*v),
            KpiValue::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, KpiValue::Undefined)
    }
}

impl fmt::Display for KpiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KpiValue::Defined(v) => write!(f, "{:.2}", v),
            KpiValue::Undefined => write!(f, "undefined"),
        }
    }
}

/// Computed value of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupValue {
    /// Group key, or `all` for ungrouped KPIs.
    pub group: String,
    pub value: KpiValue,
    /// Number of records that contributed to the value.
    pub count: usize,
}

/// Result of one KPI request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiOutcome {
    /// Display label of the KPI.
    pub label: String,
    pub groups: Vec<GroupValue>,
}

impl KpiOutcome {
    /// Look up a group by key.
    pub fn group(&self, key: &str) -> Option<&GroupValue> {
        self.groups.iter().find(|g| g.group == key)
    }
}

/// Results for a batch of KPI requests, in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    pub kpis: Vec<KpiOutcome>,
}

impl KpiResult {
    /// Look up a KPI by label.
    pub fn get(&self, label: &str) -> Option<&KpiOutcome> {
        self.kpis.iter().find(|k| k.label == label)
    }
}
