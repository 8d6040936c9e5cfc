//! Tolerant parser for `area|trend|recommendation` model output.
//!
//! A malformed line never aborts the batch: missing fields become empty
//! strings. Only an output with no non-blank lines at all is a failure.

use crate::errors::AppError;
use crate::models::performance::{date_span, metric_names, metric_series};
use crate::models::{DateRange, Insight, PerformanceDataPoint, SupportingData};

/// The model does not return a calibrated probability.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// One record per non-blank line of `raw`.
pub fn parse_response(raw: &str) -> Vec<Insight> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

/// Parse and attach supporting data from `dataset`. Empty output is `AppError::Parse`.
pub fn parse_insights(raw: &str, dataset: &[PerformanceDataPoint]) -> Result<Vec<Insight>, AppError> {
    let mut insights = parse_response(raw);
    if insights.is_empty() {
        return Err(AppError::Parse);
    }
    for insight in &mut insights {
        insight.supporting_data = supporting_data_for(insight, dataset);
    }
    Ok(insights)
}

fn parse_line(line: &str) -> Insight {
    // The third field keeps any further delimiters.
    let mut fields = line.splitn(3, '|').map(str::trim);
    let area = strip_list_marker(fields.next().unwrap_or_default());
    let trend = fields.next().unwrap_or_default();
    let recommendation = fields.next().unwrap_or_default();

    Insight {
        area: area.to_string(),
        trend: trend.to_string(),
        recommendation: recommendation.to_string(),
        confidence: DEFAULT_CONFIDENCE,
        supporting_data: None,
    }
}

/// Drop `-`, `*`, `•` or `1.` / `1)` prefixes models like to add.
fn strip_list_marker(s: &str) -> &str {
    let s = s.trim_start();
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = s.strip_prefix(marker) {
            return rest.trim_start();
        }
    }
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim_start();
        }
    }
    s
}

/// Metrics the insight mentions by name, with the first one's series.
fn supporting_data_for(insight: &Insight, dataset: &[PerformanceDataPoint]) -> Option<SupportingData> {
    let (start, end) = date_span(dataset)?;
    let haystack = format!("{} {}", insight.area, insight.trend).to_lowercase();

    let referenced: Vec<String> = metric_names(dataset)
        .into_iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            haystack.contains(&lower) || haystack.contains(&lower.replace('_', " "))
        })
        .collect();

    let first = referenced.first()?;
    Some(SupportingData {
        trend_values: metric_series(dataset, first),
        metrics: referenced,
        date_range: DateRange {
            start: start.to_string(),
            end: end.to_string(),
        },
    })
}
