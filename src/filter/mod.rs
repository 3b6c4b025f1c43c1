//! Declarative record filtering.
//!
//! A [`FilterSpec`] is compiled from [`FilterClause`]s once per request.
//! Compilation checks field names and operand types, so a malformed filter
//! fails before any record is looked at. Clauses combine with AND; the
//! values of a set-membership clause combine with OR.

use crate::models::{Field, Record};
use crate::schema::parse_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building a filter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Unknown filter field: '{0}'")]
    UnknownField(String),

    #[error("Operator '{op}' is not supported on field '{field}'")]
    UnsupportedOperator { field: String, op: &'static str },

    #[error("Invalid operand for field '{field}': expected {expected}, got {got}")]
    OperandType {
        field: String,
        expected: &'static str,
        got: String,
    },

    #[error("Range on field '{0}' has its lower bound above its upper bound")]
    InvertedRange(String),

    #[error("Set filter on field '{0}' has no values")]
    EmptySet(String),

    #[error("Range on field '{0}' has neither a lower nor an upper bound")]
    UnboundedRange(String),
}

/// A literal used in a filter clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Text(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{}", n),
            Operand::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Text(s.to_string())
    }
}

impl From<f64> for Operand {
    fn from(n: f64) -> Self {
        Operand::Number(n)
    }
}

/// Predicate of a filter clause, as written by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Inclusive range; a missing bound is open.
    Range {
        #[serde(default)]
        min: Option<Operand>,
        #[serde(default)]
        max: Option<Operand>,
    },
    /// Equality with a single value.
    Eq { value: Operand },
    /// Membership in a set of values.
    In { values: Vec<Operand> },
}

impl Predicate {
    fn op_name(&self) -> &'static str {
        match self {
            Predicate::Range { .. } => "range",
            Predicate::Eq { .. } => "eq",
            Predicate::In { .. } => "in",
        }
    }
}

/// A predicate bound to a field name.
///
/// Deserialization rejects unknown keys and keys that do not belong to the
/// clause's operator, e.g. `values` on an `eq` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClauseRepr")]
pub struct FilterClause {
    pub field: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

/// Wire form of a [`FilterClause`]; `flatten` cannot deny unknown keys.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClauseRepr {
    field: String,
    op: String,
    #[serde(default)]
    min: Option<Operand>,
    #[serde(default)]
    max: Option<Operand>,
    #[serde(default)]
    value: Option<Operand>,
    #[serde(default)]
    values: Option<Vec<Operand>>,
}

impl TryFrom<ClauseRepr> for FilterClause {
    type Error = String;

    fn try_from(repr: ClauseRepr) -> Result<Self, Self::Error> {
        let stray = |keys: &[(&str, bool)]| match keys.iter().find(|(_, set)| *set) {
            Some((key, _)) => Err(format!(
                "key '{}' is not allowed on a '{}' filter for field '{}'",
                key, repr.op, repr.field
            )),
            None => Ok(()),
        };
        let missing = |key: &str| {
            format!(
                "'{}' filter for field '{}' needs '{}'",
                repr.op, repr.field, key
            )
        };

        let predicate = match repr.op.as_str() {
            "range" => {
                stray(&[("value", repr.value.is_some()), ("values", repr.values.is_some())])?;
                Predicate::Range {
                    min: repr.min.clone(),
                    max: repr.max.clone(),
                }
            }
            "eq" => {
                stray(&[
                    ("min", repr.min.is_some()),
                    ("max", repr.max.is_some()),
                    ("values", repr.values.is_some()),
                ])?;
                Predicate::Eq {
                    value: repr.value.clone().ok_or_else(|| missing("value"))?,
                }
            }
            "in" => {
                stray(&[
                    ("min", repr.min.is_some()),
                    ("max", repr.max.is_some()),
                    ("value", repr.value.is_some()),
                ])?;
                Predicate::In {
                    values: repr.values.clone().ok_or_else(|| missing("values"))?,
                }
            }
            other => {
                return Err(format!(
                    "unknown filter operator '{}', expected range, eq or in",
                    other
                ))
            }
        };

        Ok(FilterClause {
            field: repr.field,
            predicate,
        })
    }
}

impl FilterClause {
    pub fn range(field: &str, min: Option<Operand>, max: Option<Operand>) -> Self {
        Self {
            field: field.to_string(),
            predicate: Predicate::Range { min, max },
        }
    }

    pub fn eq(field: &str, value: impl Into<Operand>) -> Self {
        Self {
            field: field.to_string(),
            predicate: Predicate::Eq {
                value: value.into(),
            },
        }
    }

    pub fn one_of<V: Into<Operand>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            field: field.to_string(),
            predicate: Predicate::In {
                values: values.into_iter().map(Into::into).collect(),
            },
        }
    }
}

/// A clause checked against the field's type.
#[derive(Debug, Clone, PartialEq)]
enum Compiled {
    TextSet(Field, Vec<String>),
    DateRange(Option<NaiveDate>, Option<NaiveDate>),
    DateSet(Vec<NaiveDate>),
    NumberRange(Option<f64>, Option<f64>),
    NumberSet(Vec<f64>),
}

impl Compiled {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Compiled::TextSet(field, allowed) => record
                .text(*field)
                .map_or(false, |v| allowed.iter().any(|a| a == v)),
            Compiled::DateRange(min, max) => {
                min.map_or(true, |m| record.timestamp >= m)
                    && max.map_or(true, |m| record.timestamp <= m)
            }
            Compiled::DateSet(dates) => dates.contains(&record.timestamp),
            Compiled::NumberRange(min, max) => {
                min.map_or(true, |m| record.value >= m) && max.map_or(true, |m| record.value <= m)
            }
            Compiled::NumberSet(values) => values.iter().any(|v| *v == record.value),
        }
    }
}

/// A validated set of filter predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    clauses: Vec<Compiled>,
}

impl FilterSpec {
    /// Compile clauses into a filter, rejecting unknown fields and
    /// ill-typed operands.
    pub fn new(clauses: &[FilterClause]) -> Result<Self, FilterError> {
        let clauses = clauses
            .iter()
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    /// The filter that keeps every record.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether a record satisfies every clause.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }
}

/// Keep the records matching `spec`, in their original order.
pub fn apply(records: &[Record], spec: &FilterSpec) -> Vec<Record> {
    if spec.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|r| spec.matches(r))
        .cloned()
        .collect()
}

fn compile(clause: &FilterClause) -> Result<Compiled, FilterError> {
    let field =
        Field::from_name(&clause.field).ok_or_else(|| FilterError::UnknownField(clause.field.clone()))?;

    match field {
        Field::SubjectId | Field::Category | Field::MetricName => compile_text(field, clause),
        Field::Timestamp => compile_date(field, clause),
        Field::Value => compile_number(field, clause),
    }
}

fn compile_text(field: Field, clause: &FilterClause) -> Result<Compiled, FilterError> {
    let values = match &clause.predicate {
        Predicate::Eq { value } => vec![value],
        Predicate::In { values } => non_empty(field, values)?.iter().collect(),
        Predicate::Range { .. } => {
            return Err(FilterError::UnsupportedOperator {
                field: field.to_string(),
                op: clause.predicate.op_name(),
            })
        }
    };

    let texts = values
        .into_iter()
        .map(|v| match v {
            Operand::Text(s) => Ok(s.clone()),
            other => Err(operand_error(field, "string", other)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Compiled::TextSet(field, texts))
}

fn compile_date(field: Field, clause: &FilterClause) -> Result<Compiled, FilterError> {
    let date = |op: &Operand| match op {
        Operand::Text(s) => parse_date(s).ok_or_else(|| operand_error(field, "date", op)),
        other => Err(operand_error(field, "date", other)),
    };

    match &clause.predicate {
        Predicate::Range { min, max } => {
            let min = min.as_ref().map(date).transpose()?;
            let max = max.as_ref().map(date).transpose()?;
            match (min, max) {
                (None, None) => return Err(FilterError::UnboundedRange(field.to_string())),
                (Some(lo), Some(hi)) if lo > hi => {
                    return Err(FilterError::InvertedRange(field.to_string()))
                }
                _ => {}
            }
            Ok(Compiled::DateRange(min, max))
        }
        Predicate::Eq { value } => Ok(Compiled::DateSet(vec![date(value)?])),
        Predicate::In { values } => Ok(Compiled::DateSet(
            non_empty(field, values)?
                .iter()
                .map(date)
                .collect::<Result<Vec<_>, _>>()?,
        )),
    }
}

fn compile_number(field: Field, clause: &FilterClause) -> Result<Compiled, FilterError> {
    let number = |op: &Operand| match op {
        Operand::Number(n) if n.is_finite() => Ok(*n),
        other => Err(operand_error(field, "finite number", other)),
    };

    match &clause.predicate {
        Predicate::Range { min, max } => {
            let min = min.as_ref().map(number).transpose()?;
            let max = max.as_ref().map(number).transpose()?;
            match (min, max) {
                (None, None) => return Err(FilterError::UnboundedRange(field.to_string())),
                (Some(lo), Some(hi)) if lo > hi => {
                    return Err(FilterError::InvertedRange(field.to_string()))
                }
                _ => {}
            }
            Ok(Compiled::NumberRange(min, max))
        }
        Predicate::Eq { value } => Ok(Compiled::NumberSet(vec![number(value)?])),
        Predicate::In { values } => Ok(Compiled::NumberSet(
            non_empty(field, values)?
                .iter()
                .map(number)
                .collect::<Result<Vec<_>, _>>()?,
        )),
    }
}

fn non_empty(field: Field, values: &[Operand]) -> Result<&[Operand], FilterError> {
    if values.is_empty() {
        Err(FilterError::EmptySet(field.to_string()))
    } else {
        Ok(values)
    }
}

fn operand_error(field: Field, expected: &'static str, got: &Operand) -> FilterError {
    FilterError::OperandType {
        field: field.to_string(),
        expected,
        got: got.to_string(),
    }
}
