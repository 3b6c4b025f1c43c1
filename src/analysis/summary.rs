//! Dataset-level statistics.

use super::aggregator::{group_records, GroupKey};
use crate::models::{KpiValue, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Share of records belonging to one category or metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub name: String,
    pub count: usize,
    pub mean: KpiValue,
}

/// Overview of a record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub total_records: usize,
    pub distinct_subjects: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Records per category, first-seen order.
    pub by_category: Vec<Breakdown>,
    /// Records per metric, first-seen order.
    pub by_metric: Vec<Breakdown>,
}

/// Summarize a record set.
pub fn summarize(records: &[Record]) -> DatasetSummary {
    let breakdown = |key: GroupKey| {
        group_records(records, Some(key))
            .into_iter()
            .map(|(name, members)| Breakdown {
                count: members.len(),
                mean: KpiValue::from_f64(
                    members.iter().map(|r| r.value).sum::<f64>() / members.len() as f64,
                ),
                name,
            })
            .collect::<Vec<_>>()
    };

    DatasetSummary {
        total_records: records.len(),
        distinct_subjects: records
            .iter()
            .map(|r| r.subject_id.as_str())
            .collect::<HashSet<_>>()
            .len(),
        first_date: records.iter().map(|r| r.timestamp).min(),
        last_date: records.iter().map(|r| r.timestamp).max(),
        by_category: breakdown(GroupKey::Category),
        by_metric: breakdown(GroupKey::MetricName),
    }
}
