//! KPI aggregation over validated records.
//!
//! Each [`KpiRequest`] selects an aggregation, an optional group key and an
//! optional metric. Groups are reported in first-seen order unless a ranking
//! is requested. A KPI computed from zero records is reported as undefined.

use crate::models::{Field, GroupValue, KpiOutcome, KpiResult, KpiValue, Record};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Group key used when a KPI is not grouped.
pub const ALL_GROUP: &str = "all";

/// Errors raised for malformed KPI requests.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("KPI '{0}' needs 'windows' for percent_change_over_period")]
    MissingWindows(String),

    #[error("KPI '{0}' sets 'windows' but only percent_change_over_period uses them")]
    UnexpectedWindows(String),

    #[error("KPI '{0}' has a window whose start is after its end")]
    InvertedWindow(String),

    #[error("KPI '{0}' has overlapping time windows")]
    OverlappingWindows(String),

    #[error("KPI '{0}' asks for the top 0 groups")]
    ZeroTop(String),
}

/// Aggregation function of a KPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    Sum,
    Count,
    Min,
    Max,
    PercentChangeOverPeriod,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Mean => write!(f, "mean"),
            Aggregation::Sum => write!(f, "sum"),
            Aggregation::Count => write!(f, "count"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Max => write!(f, "max"),
            Aggregation::PercentChangeOverPeriod => write!(f, "percent_change_over_period"),
        }
    }
}

/// Field a KPI may be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    SubjectId,
    Category,
    MetricName,
}

impl GroupKey {
    pub fn field(&self) -> Field {
        match self {
            GroupKey::SubjectId => Field::SubjectId,
            GroupKey::Category => Field::Category,
            GroupKey::MetricName => Field::MetricName,
        }
    }

    fn key_of<'a>(&self, record: &'a Record) -> &'a str {
        match self {
            GroupKey::SubjectId => &record.subject_id,
            GroupKey::Category => &record.category,
            GroupKey::MetricName => &record.metric_name,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field())
    }
}

/// Inclusive calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// The two periods compared by `percent_change_over_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodWindows {
    pub before: DateWindow,
    pub after: DateWindow,
}

/// Ordering applied to a KPI's groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankOrder {
    Desc,
    Asc,
}

/// A single KPI to compute.
///
/// Unknown keys are rejected so a misspelled option never silently
/// changes the meaning of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KpiRequest {
    /// Display label; derived from the other fields when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub aggregation: Aggregation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupKey>,

    /// Restrict the KPI to records of this metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<PeriodWindows>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<RankOrder>,

    /// Keep only the first N groups (after ranking).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
}

impl KpiRequest {
    /// Create an ungrouped request over all metrics.
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            label: None,
            aggregation,
            group_by: None,
            metric: None,
            windows: None,
            rank: None,
            top: None,
        }
    }

    pub fn grouped_by(mut self, key: GroupKey) -> Self {
        self.group_by = Some(key);
        self
    }

    pub fn for_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = Some(metric.into());
        self
    }

    pub fn with_windows(mut self, before: DateWindow, after: DateWindow) -> Self {
        self.windows = Some(PeriodWindows { before, after });
        self
    }

    pub fn ranked(mut self, order: RankOrder, top: Option<usize>) -> Self {
        self.rank = Some(order);
        self.top = top;
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The label reported for this KPI.
    pub fn display_label(&self) -> String {
        if let Some(ref label) = self.label {
            return label.clone();
        }

        let mut label = self.aggregation.to_string();
        if let Some(ref metric) = self.metric {
            label.push_str(&format!(" of {}", metric));
        }
        if let Some(key) = self.group_by {
            label.push_str(&format!(" by {}", key));
        }
        label
    }

    /// Check the request for configuration errors.
    pub fn check(&self) -> Result<(), RequestError> {
        let label = || self.display_label();

        match (self.aggregation, self.windows) {
            (Aggregation::PercentChangeOverPeriod, None) => {
                return Err(RequestError::MissingWindows(label()))
            }
            (Aggregation::PercentChangeOverPeriod, Some(w)) => {
                if w.before.start > w.before.end || w.after.start > w.after.end {
                    return Err(RequestError::InvertedWindow(label()));
                }
                if w.before.overlaps(&w.after) {
                    return Err(RequestError::OverlappingWindows(label()));
                }
            }
            (_, Some(_)) => return Err(RequestError::UnexpectedWindows(label())),
            (_, None) => {}
        }

        if self.top == Some(0) {
            return Err(RequestError::ZeroTop(label()));
        }

        Ok(())
    }
}

/// Compute a batch of KPIs over the same records.
///
/// Every request is checked before any computation starts.
pub fn compute(records: &[Record], requests: &[KpiRequest]) -> Result<KpiResult, RequestError> {
    for request in requests {
        request.check()?;
    }

    let kpis = requests
        .iter()
        .map(|request| compute_one(records, request))
        .collect();

    Ok(KpiResult { kpis })
}

fn compute_one(records: &[Record], request: &KpiRequest) -> KpiOutcome {
    let label = request.display_label();

    let selected: Vec<&Record> = records
        .iter()
        .filter(|r| request.metric.as_deref().map_or(true, |m| r.metric_name == m))
        .filter(|r| {
            request.windows.map_or(true, |w| {
                w.before.contains(r.timestamp) || w.after.contains(r.timestamp)
            })
        })
        .collect();

    if selected.is_empty() {
        debug!("KPI '{}' has no contributing records", label);
        return KpiOutcome {
            label,
            groups: vec![GroupValue {
                group: ALL_GROUP.to_string(),
                value: KpiValue::Undefined,
                count: 0,
            }],
        };
    }

    let mut groups: Vec<GroupValue> = group_records(selected, request.group_by)
        .into_iter()
        .map(|(group, members)| GroupValue {
            value: aggregate(&members, request),
            count: members.len(),
            group,
        })
        .collect();

    if let Some(order) = request.rank {
        rank_groups(&mut groups, order);
    }
    if let Some(top) = request.top {
        groups.truncate(top);
    }

    debug!("KPI '{}' computed over {} groups", label, groups.len());
    KpiOutcome { label, groups }
}

/// Split records by group key, keeping first-seen group order.
pub(crate) fn group_records<'a, I>(records: I, key: Option<GroupKey>) -> Vec<(String, Vec<&'a Record>)>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&'a Record>)> = Vec::new();

    for record in records {
        let name = key.map_or(ALL_GROUP, |k| k.key_of(record));
        let slot = *index.entry(name).or_insert_with(|| {
            groups.push((name.to_string(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(record);
    }

    groups
}

fn aggregate(members: &[&Record], request: &KpiRequest) -> KpiValue {
    let values = || members.iter().map(|r| r.value);

    match request.aggregation {
        Aggregation::Count => KpiValue::Defined(members.len() as f64),
        Aggregation::Sum => KpiValue::from_f64(values().sum()),
        Aggregation::Mean => mean(values()),
        Aggregation::Min => values().reduce(f64::min).map_or(KpiValue::Undefined, KpiValue::from_f64),
        Aggregation::Max => values().reduce(f64::max).map_or(KpiValue::Undefined, KpiValue::from_f64),
        Aggregation::PercentChangeOverPeriod => match request.windows {
            Some(windows) => percent_change(members, &windows),
            None => KpiValue::Undefined,
        },
    }
}

fn mean(values: impl Iterator<Item = f64>) -> KpiValue {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        KpiValue::Undefined
    } else {
        KpiValue::from_f64(sum / n as f64)
    }
}

/// Relative change of the mean value between two windows, in percent.
fn percent_change(members: &[&Record], windows: &PeriodWindows) -> KpiValue {
    let window_mean = |window: &DateWindow| {
        mean(
            members
                .iter()
                .filter(|r| window.contains(r.timestamp))
                .map(|r| r.value),
        )
    };

    match (window_mean(&windows.before), window_mean(&windows.after)) {
        (KpiValue::Defined(before), KpiValue::Defined(after)) if before != 0.0 => {
            KpiValue::from_f64((after - before) / before.abs() * 100.0)
        }
        _ => KpiValue::Undefined,
    }
}

/// Sort groups by value; undefined values go last and ties keep their order.
fn rank_groups(groups: &mut [GroupValue], order: RankOrder) {
    groups.sort_by(|a, b| match (a.value.as_f64(), b.value.as_f64()) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
            match order {
                RankOrder::Asc => ord,
                RankOrder::Desc => ord.reverse(),
            }
        }
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// One day of a daily series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub group: String,
    pub count: usize,
    pub mean: KpiValue,
}

/// Parameters of a daily series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DailySeriesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupKey>,

    /// Restrict the series to records of this metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

/// Bucket records per calendar day and group.
///
/// Points are ordered by day, then by first-seen group.
pub fn daily_series(
    records: &[Record],
    group_by: Option<GroupKey>,
    metric: Option<&str>,
) -> Vec<DailyPoint> {
    let selected = records
        .iter()
        .filter(|r| metric.map_or(true, |m| r.metric_name == m));

    let groups = group_records(selected, group_by);
    let mut buckets: BTreeMap<(NaiveDate, usize), (usize, f64)> = BTreeMap::new();

    for (slot, (_, members)) in groups.iter().enumerate() {
        for record in members {
            let bucket = buckets.entry((record.timestamp, slot)).or_insert((0, 0.0));
            bucket.0 += 1;
            bucket.1 += record.value;
        }
    }

    buckets
        .into_iter()
        .map(|((date, slot), (count, sum))| DailyPoint {
            date,
            group: groups[slot].0.clone(),
            count,
            mean: KpiValue::from_f64(sum / count as f64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn create_test_record(subject: &str, category: &str, when: NaiveDate, value: f64) -> Record {
        Record {
            subject_id: subject.to_string(),
            timestamp: when,
            category: category.to_string(),
            metric_name: "score".to_string(),
            value,
        }
    }

    fn q1_vs_q2() -> (DateWindow, DateWindow) {
        (
            DateWindow::new(date(1, 1), date(3, 31)),
            DateWindow::new(date(4, 1), date(6, 30)),
        )
    }

    #[test]
    fn test_mean_grouped_by_subject() {
        let records = vec![
            create_test_record("A", "Sales", date(1, 1), 80.0),
            create_test_record("A", "Sales", date(1, 2), 90.0),
        ];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::Mean).grouped_by(GroupKey::SubjectId)],
        )
        .unwrap();

        let kpi = &result.kpis[0];
        assert_eq!(kpi.label, "mean by subject_id");
        let a = kpi.group("A").unwrap();
        assert_eq!(a.value, KpiValue::Defined(85.0));
        assert_eq!(a.count, 2);
    }

    #[test]
    fn test_groups_keep_first_seen_order() {
        let records = vec![
            create_test_record("A", "Ops", date(1, 1), 1.0),
            create_test_record("B", "Sales", date(1, 1), 2.0),
            create_test_record("C", "Ops", date(1, 1), 3.0),
            create_test_record("D", "Engineering", date(1, 1), 4.0),
        ];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::Sum).grouped_by(GroupKey::Category)],
        )
        .unwrap();

        let names: Vec<_> = result.kpis[0].groups.iter().map(|g| g.group.as_str()).collect();
        assert_eq!(names, vec!["Ops", "Sales", "Engineering"]);
        assert_eq!(result.kpis[0].groups[0].value, KpiValue::Defined(4.0));
    }

    #[test]
    fn test_zero_records_is_undefined() {
        for aggregation in [
            Aggregation::Mean,
            Aggregation::Sum,
            Aggregation::Count,
            Aggregation::Min,
            Aggregation::Max,
        ] {
            let result = compute(&[], &[KpiRequest::new(aggregation)]).unwrap();
            let group = &result.kpis[0].groups[0];
            assert_eq!(group.group, ALL_GROUP);
            assert!(group.value.is_undefined());
            assert_eq!(group.count, 0);
        }
    }

    #[test]
    fn test_metric_restriction_to_nothing_is_undefined() {
        let records = vec![create_test_record("A", "Sales", date(1, 1), 50.0)];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::Count).for_metric("retention")],
        )
        .unwrap();
        assert!(result.kpis[0].groups[0].value.is_undefined());
    }

    #[test]
    fn test_count_min_max() {
        let records = vec![
            create_test_record("A", "Sales", date(1, 1), 50.0),
            create_test_record("B", "Sales", date(1, 1), 70.0),
            create_test_record("C", "Sales", date(1, 1), 60.0),
        ];
        let result = compute(
            &records,
            &[
                KpiRequest::new(Aggregation::Count),
                KpiRequest::new(Aggregation::Min),
                KpiRequest::new(Aggregation::Max),
            ],
        )
        .unwrap();
        assert_eq!(result.kpis[0].groups[0].value, KpiValue::Defined(3.0));
        assert_eq!(result.kpis[1].groups[0].value, KpiValue::Defined(50.0));
        assert_eq!(result.kpis[2].groups[0].value, KpiValue::Defined(70.0));
    }

    #[test]
    fn test_percent_change_over_period() {
        let (before, after) = q1_vs_q2();
        let records = vec![
            create_test_record("A", "Sales", date(2, 1), 50.0),
            create_test_record("A", "Sales", date(5, 1), 60.0),
            create_test_record("A", "Sales", date(5, 2), 80.0),
            create_test_record("A", "Sales", date(9, 1), 10.0),
        ];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::PercentChangeOverPeriod)
                .grouped_by(GroupKey::SubjectId)
                .with_windows(before, after)],
        )
        .unwrap();

        let a = result.kpis[0].group("A").unwrap();
        assert_eq!(a.value, KpiValue::Defined(40.0));
        assert_eq!(a.count, 3);
    }

    #[test]
    fn test_percent_change_with_empty_window_is_undefined() {
        let (before, after) = q1_vs_q2();
        let records: Vec<Record> = (1..=5)
            .map(|day| create_test_record("A", "Sales", date(5, day), 70.0))
            .collect();
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::PercentChangeOverPeriod).with_windows(before, after)],
        )
        .unwrap();

        let group = &result.kpis[0].groups[0];
        assert!(group.value.is_undefined());
        assert_eq!(group.count, 5);
    }

    #[test]
    fn test_percent_change_from_zero_is_undefined() {
        let (before, after) = q1_vs_q2();
        let records = vec![
            create_test_record("A", "Sales", date(2, 1), 0.0),
            create_test_record("A", "Sales", date(5, 1), 10.0),
        ];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::PercentChangeOverPeriod).with_windows(before, after)],
        )
        .unwrap();
        assert!(result.kpis[0].groups[0].value.is_undefined());
    }

    #[test]
    fn test_request_errors() {
        let (before, after) = q1_vs_q2();

        let missing = KpiRequest::new(Aggregation::PercentChangeOverPeriod);
        assert!(matches!(missing.check(), Err(RequestError::MissingWindows(_))));

        let overlapping = KpiRequest::new(Aggregation::PercentChangeOverPeriod)
            .with_windows(before, DateWindow::new(date(3, 31), date(4, 30)));
        assert!(matches!(
            overlapping.check(),
            Err(RequestError::OverlappingWindows(_))
        ));

        let inverted = KpiRequest::new(Aggregation::PercentChangeOverPeriod)
            .with_windows(DateWindow::new(date(3, 1), date(1, 1)), after);
        assert!(matches!(inverted.check(), Err(RequestError::InvertedWindow(_))));

        let stray = KpiRequest::new(Aggregation::Mean).with_windows(before, after);
        assert!(matches!(stray.check(), Err(RequestError::UnexpectedWindows(_))));

        let zero_top = KpiRequest::new(Aggregation::Mean).ranked(RankOrder::Desc, Some(0));
        assert!(matches!(zero_top.check(), Err(RequestError::ZeroTop(_))));
    }

    #[test]
    fn test_ranking_and_top() {
        let records = vec![
            create_test_record("A", "Sales", date(1, 1), 60.0),
            create_test_record("B", "Sales", date(1, 1), 90.0),
            create_test_record("C", "Sales", date(1, 1), 75.0),
            create_test_record("D", "Sales", date(1, 1), 90.0),
        ];
        let result = compute(
            &records,
            &[KpiRequest::new(Aggregation::Mean)
                .grouped_by(GroupKey::SubjectId)
                .ranked(RankOrder::Desc, Some(3))],
        )
        .unwrap();

        let names: Vec<_> = result.kpis[0].groups.iter().map(|g| g.group.as_str()).collect();
        assert_eq!(names, vec!["B", "D", "C"]);
    }

    #[test]
    fn test_ranking_puts_undefined_last() {
        let mut groups = vec![
            GroupValue {
                group: "x".to_string(),
                value: KpiValue::Undefined,
                count: 1,
            },
            GroupValue {
                group: "y".to_string(),
                value: KpiValue::Defined(1.0),
                count: 1,
            },
        ];
        rank_groups(&mut groups, RankOrder::Asc);
        assert_eq!(groups[0].group, "y");
    }

    #[test]
    fn test_daily_series() {
        let records = vec![
            create_test_record("A", "Sales", date(1, 2), 80.0),
            create_test_record("B", "Ops", date(1, 1), 40.0),
            create_test_record("C", "Sales", date(1, 1), 60.0),
            create_test_record("D", "Sales", date(1, 1), 70.0),
        ];
        let series = daily_series(&records, Some(GroupKey::Category), None);

        assert_eq!(series.len(), 3);
        assert_eq!(series[0].date, date(1, 1));
        assert_eq!(series[0].group, "Sales");
        assert_eq!(series[0].count, 2);
        assert_eq!(series[0].mean, KpiValue::Defined(65.0));
        assert_eq!(series[1].group, "Ops");
        assert_eq!(series[2].date, date(1, 2));
    }

    #[test]
    fn test_request_deserializes_from_json() {
        let request: KpiRequest = serde_json::from_str(
            r#"{
                "aggregation": "percent_change_over_period",
                "group_by": "category",
                "metric": "engagement",
                "windows": {
                    "before": {"start": "2024-01-01", "end": "2024-03-31"},
                    "after": {"start": "2024-04-01", "end": "2024-06-30"}
                }
            }"#,
        )
        .unwrap();
        assert!(request.check().is_ok());
        assert_eq!(
            request.display_label(),
            "percent_change_over_period of engagement by category"
        );
    }

    #[test]
    fn test_request_rejects_unknown_keys() {
        let err = serde_json::from_str::<KpiRequest>(
            r#"{"aggregation": "mean", "groupby": "category"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("groupby"));

        let err = serde_json::from_str::<KpiRequest>(
            r#"{
                "aggregation": "percent_change_over_period",
                "windows": {
                    "before": {"start": "2024-01-01", "end": "2024-03-31", "inclusive": false},
                    "after": {"start": "2024-04-01", "end": "2024-06-30"}
                }
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("inclusive"));

        assert!(serde_json::from_str::<PeriodWindows>(
            r#"{
                "before": {"start": "2024-01-01", "end": "2024-03-31"},
                "after": {"start": "2024-04-01", "end": "2024-06-30"},
                "during": {"start": "2024-02-01", "end": "2024-02-02"}
            }"#,
        )
        .is_err());
    }

    #[test]
    fn test_daily_series_request_rejects_unknown_keys() {
        let request: DailySeriesRequest =
            serde_json::from_str(r#"{"group_by": "subject_id", "metric": "engagement"}"#).unwrap();
        assert_eq!(request.group_by, Some(GroupKey::SubjectId));
        assert!(serde_json::from_str::<DailySeriesRequest>(r#"{"group": "subject_id"}"#).is_err());
    }
}
