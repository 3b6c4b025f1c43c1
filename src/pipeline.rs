//! End-to-end request handling: validate, filter, aggregate.

use crate::analysis::{self, DailyPoint, DailySeriesRequest, DatasetSummary, KpiRequest, RequestError};
use crate::filter::{self, FilterClause, FilterError, FilterSpec};
use crate::models::{KpiResult, RawRow, Rejection};
use crate::schema::{self, Schema, SchemaError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Request-level failures. Per-row problems are never reported here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("Invalid KPI request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),
}

/// Filters and KPIs to evaluate in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    #[serde(default)]
    pub kpis: Vec<KpiRequest>,
    /// Per-day trend of the filtered records; omitted when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<DailySeriesRequest>,
}

/// Everything handed back to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub result: KpiResult,
    pub rejected: Vec<Rejection>,
    /// Summary of the records that passed the filter.
    pub summary: DatasetSummary,
    /// Number of valid records before filtering.
    pub valid_records: usize,
    /// Daily trend, empty unless the query asked for one.
    #[serde(default)]
    pub daily: Vec<DailyPoint>,
}

/// Run a query against raw rows.
///
/// The schema, the filter and the KPI requests are checked before any row is
/// validated.
pub fn run(rows: &[RawRow], query: &Query, schema: &Schema) -> Result<Response, PipelineError> {
    schema.check()?;
    let spec = FilterSpec::new(&query.filters)?;
    for request in &query.kpis {
        request.check()?;
    }

    let validation = schema::validate(rows, schema);
    info!(
        "Validated {} rows: {} accepted, {} rejected",
        rows.len(),
        validation.valid.len(),
        validation.rejected.len()
    );

    let filtered = filter::apply(&validation.valid, &spec);
    debug!(
        "Filter with {} clauses kept {} of {} records",
        spec.len(),
        filtered.len(),
        validation.valid.len()
    );

    let result = analysis::compute(&filtered, &query.kpis)?;
    let summary = analysis::summarize(&filtered);
    let daily = match &query.daily {
        Some(request) => {
            analysis::daily_series(&filtered, request.group_by, request.metric.as_deref())
        }
        None => Vec::new(),
    };

    Ok(Response {
        result,
        rejected: validation.rejected,
        summary,
        valid_records: validation.valid.len(),
        daily,
    })
}
