//! LeadLens - leadership KPI engine
//!
//! Validates raw tabular rows, narrows them with declarative filters and
//! computes KPIs (mean, sum, count, min, max, percent change over period)
//! grouped by subject, category or metric. Rendering is left to callers;
//! the [`report`] module offers Markdown and JSON output for batch use.
//!
//! ```no_run
//! use leadlens::analysis::{Aggregation, GroupKey, KpiRequest};
//! use leadlens::pipeline::{run, Query};
//! use leadlens::schema::Schema;
//!
//! # fn rows() -> Vec<leadlens::models::RawRow> { Vec::new() }
//! let query = Query {
//!     kpis: vec![KpiRequest::new(Aggregation::Mean).grouped_by(GroupKey::Category)],
//!     ..Query::default()
//! };
//! let response = run(&rows(), &query, &Schema::default()).unwrap();
//! println!("{} rows rejected", response.rejected.len());
//! ```

pub mod analysis;
pub mod filter;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod schema;
