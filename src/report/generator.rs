//! Markdown and JSON report generation.
//!
//! This module turns a pipeline [`Response`] into a Markdown document or a
//! JSON payload for downstream tools.

use crate::analysis::{DailyPoint, DatasetSummary};
use crate::models::{KpiOutcome, Rejection};
use crate::pipeline::Response;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata about a report run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Where the rows came from.
    pub input: String,
    /// Date and time the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Rows read by the loader.
    pub rows_loaded: usize,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// Rendering options.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Include the dataset summary section.
    pub include_summary: bool,
    /// Maximum rejected rows listed individually.
    pub max_rejections_listed: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_summary: true,
            max_rejections_listed: 20,
        }
    }
}

/// A complete report: metadata plus the pipeline response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    #[serde(flatten)]
    pub response: Response,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: &ReportOptions) -> String {
    let mut output = String::new();

    output.push_str("# LeadLens KPI Report\n\n");
    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_table_of_contents(report, options));

    if options.include_summary {
        output.push_str(&generate_summary_section(&report.response.summary));
    }

    output.push_str(&generate_kpi_section(&report.response.result.kpis));
    output.push_str(&generate_daily_section(&report.response.daily));
    output.push_str(&generate_rejections_section(
        &report.response.rejected,
        options.max_rejections_listed,
    ));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &Report) -> String {
    let metadata = &report.metadata;
    let response = &report.response;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Input:** `{}`\n", metadata.input));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Rows Loaded:** {}\n", metadata.rows_loaded));
    section.push_str(&format!("- **Valid Records:** {}\n", response.valid_records));
    if !response.rejected.is_empty() {
        section.push_str(&format!("- **Rejected Rows:** {}\n", response.rejected.len()));
    }
    section.push_str(&format!(
        "- **Records After Filters:** {}\n",
        response.summary.total_records
    ));
    section.push_str(&format!("- **Duration:** {:.2}s\n", metadata.duration_seconds));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report, options: &ReportOptions) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    if options.include_summary {
        toc.push_str("- [Dataset Summary](#dataset-summary)\n");
    }
    toc.push_str("- [KPIs](#kpis)\n");

    for kpi in &report.response.result.kpis {
        toc.push_str(&format!("  - [{}](#{})\n", kpi.label, anchor(&kpi.label)));
    }

    if !report.response.daily.is_empty() {
        toc.push_str("- [Daily Trend](#daily-trend)\n");
    }
    if !report.response.rejected.is_empty() {
        toc.push_str("- [Rejected Rows](#rejected-rows)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the dataset summary section.
fn generate_summary_section(summary: &DatasetSummary) -> String {
    let mut section = String::new();

    section.push_str("## Dataset Summary\n\n");
    section.push_str(&format!("- **Records:** {}\n", summary.total_records));
    section.push_str(&format!("- **Subjects:** {}\n", summary.distinct_subjects));
    if let (Some(first), Some(last)) = (summary.first_date, summary.last_date) {
        section.push_str(&format!("- **Date Range:** {} to {}\n", first, last));
    }
    section.push('\n');

    for (title, rows) in [
        ("By Category", &summary.by_category),
        ("By Metric", &summary.by_metric),
    ] {
        if rows.is_empty() {
            continue;
        }
        section.push_str(&format!("### {}\n\n", title));
        section.push_str("| Name | Records | Mean |\n");
        section.push_str("|:---|:---:|:---:|\n");
        for row in rows {
            section.push_str(&format!(
                "| {} | {} | {} |\n",
                cell(&row.name),
                row.count,
                row.mean
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the KPI tables.
fn generate_kpi_section(kpis: &[KpiOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## KPIs\n\n");

    if kpis.is_empty() {
        section.push_str("No KPIs were requested.\n\n");
        return section;
    }

    for kpi in kpis {
        section.push_str(&generate_kpi_block(kpi));
    }

    section
}

/// Generate a single KPI table.
fn generate_kpi_block(kpi: &KpiOutcome) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {} {{#{}}}\n\n", kpi.label, anchor(&kpi.label)));
    block.push_str("| Group | Value | Records |\n");
    block.push_str("|:---|:---:|:---:|\n");
    for group in &kpi.groups {
        block.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&group.group),
            group.value,
            group.count
        ));
    }
    block.push('\n');

    block
}

/// Generate the daily trend table.
fn generate_daily_section(points: &[DailyPoint]) -> String {
    if points.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Daily Trend\n\n");
    section.push_str("| Date | Group | Records | Mean |\n");
    section.push_str("|:---|:---|:---:|:---:|\n");
    for point in points {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            point.date,
            cell(&point.group),
            point.count,
            point.mean
        ));
    }
    section.push('\n');

    section
}

/// Generate the rejected rows section.
fn generate_rejections_section(rejected: &[Rejection], max_listed: usize) -> String {
    if rejected.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Rejected Rows\n\n");

    let mut by_reason: HashMap<String, usize> = HashMap::new();
    for rejection in rejected {
        *by_reason.entry(rejection.reason.to_string()).or_insert(0) += 1;
    }
    let mut reasons: Vec<_> = by_reason.into_iter().collect();
    reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    section.push_str("| Reason | Rows |\n");
    section.push_str("|:---|:---:|\n");
    for (reason, count) in &reasons {
        section.push_str(&format!("| `{}` | {} |\n", reason, count));
    }
    section.push('\n');

    if max_listed > 0 {
        section.push_str("| Row | Reason | Detail |\n");
        section.push_str("|:---:|:---|:---|\n");
        for rejection in rejected.iter().take(max_listed) {
            section.push_str(&format!(
                "| {} | `{}` | {} |\n",
                rejection.index,
                rejection.reason,
                cell(&rejection.detail)
            ));
        }
        if rejected.len() > max_listed {
            section.push_str(&format!(
                "\n*{} more rejected rows not shown.*\n",
                rejected.len() - max_listed
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by LeadLens*\n".to_string()
}

/// Escape text for a Markdown table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn anchor(label: &str) -> String {
    label.replace([' ', '/', '.'], "-").to_lowercase()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Breakdown;
    use crate::models::{GroupValue, KpiResult, KpiValue, RejectReason};
    use chrono::NaiveDate;

    fn create_test_report() -> Report {
        let metadata = ReportMetadata {
            input: "data/rows.json".to_string(),
            generated_at: Utc::now(),
            rows_loaded: 4,
            duration_seconds: 0.25,
        };

        let response = Response {
            result: KpiResult {
                kpis: vec![KpiOutcome {
                    label: "mean by subject_id".to_string(),
                    groups: vec![
                        GroupValue {
                            group: "A".to_string(),
                            value: KpiValue::Defined(85.0),
                            count: 2,
                        },
                        GroupValue {
                            group: "B".to_string(),
                            value: KpiValue::Undefined,
                            count: 0,
                        },
                    ],
                }],
            },
            rejected: vec![Rejection {
                index: 3,
                reason: RejectReason::OutOfRange,
                detail: "value 140 outside [0, 100] for metric 'score'".to_string(),
                row: Default::default(),
            }],
            summary: DatasetSummary {
                total_records: 2,
                distinct_subjects: 1,
                first_date: NaiveDate::from_ymd_opt(2024, 1, 2),
                last_date: NaiveDate::from_ymd_opt(2024, 1, 9),
                by_category: vec![Breakdown {
                    name: "Sales".to_string(),
                    count: 2,
                    mean: KpiValue::Defined(85.0),
                }],
                by_metric: vec![],
            },
            valid_records: 3,
            daily: vec![],
        };

        Report { metadata, response }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportOptions::default());

        assert!(markdown.contains("# LeadLens KPI Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Dataset Summary"));
        assert!(markdown.contains("| A | 85.00 | 2 |"));
        assert!(markdown.contains("| B | undefined | 0 |"));
        assert!(markdown.contains("## Rejected Rows"));
        assert!(markdown.contains("out_of_range"));
    }

    #[test]
    fn test_summary_section_can_be_skipped() {
        let report = create_test_report();
        let options = ReportOptions {
            include_summary: false,
            max_rejections_listed: 0,
        };
        let markdown = generate_markdown_report(&report, &options);

        assert!(!markdown.contains("## Dataset Summary"));
        assert!(!markdown.contains("| Row | Reason | Detail |"));
    }

    #[test]
    fn test_rejections_list_is_truncated() {
        let rejected: Vec<Rejection> = (0..5)
            .map(|index| Rejection {
                index,
                reason: RejectReason::MissingField,
                detail: "field 'value' is missing".to_string(),
                row: Default::default(),
            })
            .collect();

        let section = generate_rejections_section(&rejected, 2);
        assert!(section.contains("| `missing_field` | 5 |"));
        assert!(section.contains("3 more rejected rows not shown"));
    }

    #[test]
    fn test_pipe_in_group_name_is_escaped() {
        let mut report = create_test_report();
        report.response.result.kpis[0].groups[0].group = "ops|north".to_string();
        report.response.rejected[0].detail = "bad value 'a|b'\nfor row".to_string();
        let markdown = generate_markdown_report(&report, &ReportOptions::default());

        assert!(markdown.contains("| ops\\|north | 85.00 | 2 |"));
        assert!(markdown.contains("| 3 | `out_of_range` | bad value 'a\\|b' for row |"));
    }

    #[test]
    fn test_daily_trend_section() {
        let mut report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportOptions::default());
        assert!(!markdown.contains("## Daily Trend"));

        report.response.daily = vec![DailyPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            group: "A".to_string(),
            count: 1,
            mean: KpiValue::Defined(80.0),
        }];
        let markdown = generate_markdown_report(&report, &ReportOptions::default());

        assert!(markdown.contains("- [Daily Trend](#daily-trend)"));
        assert!(markdown.contains("## Daily Trend"));
        assert!(markdown.contains("| 2024-01-02 | A | 1 | 80.00 |"));
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"metadata\""));
        assert!(json.contains("\"kpis\""));
        assert!(json.contains("\"rejected\""));
        assert!(json.contains("null"));
    }
}
