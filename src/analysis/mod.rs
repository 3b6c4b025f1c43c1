//! Analysis modules.
//!
//! KPI aggregation lives in [`aggregator`]; whole-dataset statistics in
//! [`summary`].

pub mod aggregator;
pub mod summary;

pub use aggregator::*;
pub use summary::*;
