//! Deterministic insights computed locally when the model cannot answer.

use crate::models::performance::{date_span, metric_names, metric_series};
use crate::models::{DateRange, Insight, PerformanceDataPoint, SupportingData};

/// Template content is less specific than model output.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Always three well-formed insights, for any dataset including an empty one.
pub fn generate(dataset: &[PerformanceDataPoint]) -> Vec<Insight> {
    let metrics = metric_names(dataset);
    let sessions = dataset.len();

    let (range_label, date_range) = match date_span(dataset) {
        Some((start, end)) => (
            format!("from {} to {}", start, end),
            DateRange {
                start: start.to_string(),
                end: end.to_string(),
            },
        ),
        None => (
            "with no dated entries yet".to_string(),
            DateRange {
                start: "n/a".to_string(),
                end: "n/a".to_string(),
            },
        ),
    };

    let metric_list = if metrics.is_empty() {
        "no metrics".to_string()
    } else {
        metrics.join(", ")
    };

    let support = |names: Vec<String>| {
        let trend_values = names
            .first()
            .map(|m| metric_series(dataset, m))
            .unwrap_or_default();
        Some(SupportingData {
            metrics: names,
            date_range: date_range.clone(),
            trend_values,
        })
    };

    let recovery_metrics: Vec<String> = metrics
        .iter()
        .filter(|m| is_recovery_metric(m))
        .cloned()
        .collect();
    let recovery_focus = if recovery_metrics.is_empty() {
        "Sleep, soreness and readiness readings".to_string()
    } else {
        format!("Recovery readings ({})", recovery_metrics.join(", "))
    };

    vec![
        Insight {
            area: "Performance Overview".to_string(),
            trend: format!(
                "{} {} recorded {} covering {}.",
                sessions,
                if sessions == 1 { "session" } else { "sessions" },
                range_label,
                metric_list
            ),
            recommendation: "Keep logging sessions consistently so longer-term trends become visible."
                .to_string(),
            confidence: FALLBACK_CONFIDENCE,
            supporting_data: support(metrics.clone()),
        },
        Insight {
            area: "Recovery".to_string(),
            trend: format!(
                "{} are the clearest early signal of accumulated fatigue.",
                recovery_focus
            ),
            recommendation: "Schedule a lighter day after consecutive high-load sessions and review recovery notes weekly."
                .to_string(),
            confidence: FALLBACK_CONFIDENCE,
            supporting_data: support(recovery_metrics),
        },
        Insight {
            area: "Training Response".to_string(),
            trend: format!(
                "Compare how each metric moves {} to see which sessions drive improvement.",
                range_label
            ),
            recommendation: "Adjust one training variable at a time and track its effect over the following week."
                .to_string(),
            confidence: FALLBACK_CONFIDENCE,
            supporting_data: support(metrics),
        },
    ]
}

fn is_recovery_metric(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["sleep", "hrv", "recovery", "rest", "soreness", "fatigue", "readiness", "resting"]
        .iter()
        .any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn well_formed(insights: &[Insight]) -> bool {
        !insights.is_empty()
            && insights.iter().all(|i| {
                !i.area.is_empty()
                    && !i.trend.is_empty()
                    && !i.recommendation.is_empty()
                    && (0.0..=1.0).contains(&i.confidence)
            })
    }

    #[test]
    fn test_empty_dataset_still_produces_insights() {
        let insights = generate(&[]);
        assert_eq!(insights.len(), 3);
        assert!(well_formed(&insights));
        let support = insights[0].supporting_data.as_ref().unwrap();
        assert_eq!(support.date_range.start, "n/a");
        assert!(support.metrics.is_empty());
    }

    #[test]
    fn test_points_without_metrics() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let insights = generate(&[PerformanceDataPoint::new(date).with_notes("rest day")]);
        assert!(well_formed(&insights));
        assert!(insights[0].trend.contains("1 session"));
        assert!(insights[0].trend.contains("no metrics"));
    }

    #[test]
    fn test_grounded_in_dataset() {
        let d = |n| NaiveDate::from_ymd_opt(2024, 2, n).unwrap();
        let data = vec![
            PerformanceDataPoint::new(d(3))
                .with_metric("load", 300.0)
                .with_metric("hrv", 55.0),
            PerformanceDataPoint::new(d(1))
                .with_metric("load", 200.0)
                .with_metric("hrv", 60.0),
        ];
        let insights = generate(&data);
        assert!(well_formed(&insights));
        assert!(insights[0].trend.contains("2024-02-01 to 2024-02-03"));
        assert!(insights[0].trend.contains("hrv, load"));

        let recovery = insights[1].supporting_data.as_ref().unwrap();
        assert_eq!(recovery.metrics, vec!["hrv"]);
        assert_eq!(recovery.trend_values, vec![60.0, 55.0]);
    }

    #[test]
    fn test_deterministic() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let data = vec![PerformanceDataPoint::new(date).with_metric("x", f64::NAN)];
        assert_eq!(generate(&data).len(), generate(&data).len());
        let clean = vec![PerformanceDataPoint::new(date).with_metric("x", 1.0)];
        assert_eq!(generate(&clean), generate(&clean));
    }
}
