//! Performance time series as handed over by the data layer.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One day's aggregated readings for one subject.
///
/// Metrics live in a `BTreeMap` so every consumer (prompt, fingerprint,
/// fallback) sees them in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceDataPoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub notes: String,
}

impl PerformanceDataPoint {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            metrics: BTreeMap::new(),
            notes: String::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// The athlete or team an insight request is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub athlete_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl Subject {
    pub fn athlete(id: impl Into<String>) -> Self {
        Self {
            athlete_id: Some(id.into()),
            team_id: None,
        }
    }

    pub fn team(id: impl Into<String>) -> Self {
        Self {
            athlete_id: None,
            team_id: Some(id.into()),
        }
    }

    /// Canonical identifier. An athlete id wins over a team id.
    pub fn id(&self) -> String {
        match (&self.athlete_id, &self.team_id) {
            (Some(a), _) if !a.is_empty() => format!("athlete:{}", a),
            (_, Some(t)) if !t.is_empty() => format!("team:{}", t),
            _ => "anonymous".to_string(),
        }
    }
}

/// Earliest and latest date in the dataset, regardless of input order.
pub fn date_span(dataset: &[PerformanceDataPoint]) -> Option<(NaiveDate, NaiveDate)> {
    let first = dataset.iter().map(|p| p.date).min()?;
    let last = dataset.iter().map(|p| p.date).max()?;
    Some((first, last))
}

/// Distinct metric names across the dataset, sorted.
pub fn metric_names(dataset: &[PerformanceDataPoint]) -> Vec<String> {
    let mut names: Vec<String> = dataset
        .iter()
        .flat_map(|p| p.metrics.keys().cloned())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Date-ordered values of one metric; days without a reading are skipped.
pub fn metric_series(dataset: &[PerformanceDataPoint], metric: &str) -> Vec<f64> {
    let mut points: Vec<(NaiveDate, f64)> = dataset
        .iter()
        .filter_map(|p| p.metrics.get(metric).map(|v| (p.date, *v)))
        .collect();
    points.sort_by_key(|(date, _)| *date);
    points.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_subject_id_prefers_athlete() {
        let s = Subject {
            athlete_id: Some("a1".into()),
            team_id: Some("t1".into()),
        };
        assert_eq!(s.id(), "athlete:a1");
        assert_eq!(Subject::team("t1").id(), "team:t1");
        assert_eq!(Subject::default().id(), "anonymous");
    }

    #[test]
    fn test_date_span_ignores_input_order() {
        let data = vec![
            PerformanceDataPoint::new(day(5)),
            PerformanceDataPoint::new(day(2)),
            PerformanceDataPoint::new(day(9)),
        ];
        assert_eq!(date_span(&data), Some((day(2), day(9))));
        assert_eq!(date_span(&[]), None);
    }

    #[test]
    fn test_metric_series_sorted_by_date() {
        let data = vec![
            PerformanceDataPoint::new(day(3)).with_metric("load", 30.0),
            PerformanceDataPoint::new(day(1)).with_metric("load", 10.0),
            PerformanceDataPoint::new(day(2)).with_metric("sleep", 7.5),
        ];
        assert_eq!(metric_series(&data, "load"), vec![10.0, 30.0]);
        assert_eq!(metric_names(&data), vec!["load", "sleep"]);
    }

    #[test]
    fn test_data_point_wire_format() {
        let json = serde_json::json!({
            "date": "2024-03-01",
            "metrics": {"hrv": 61.0},
            "notes": "felt good"
        });
        let point: PerformanceDataPoint = serde_json::from_value(json).unwrap();
        assert_eq!(point.date, day(1));
        assert_eq!(point.metrics["hrv"], 61.0);

        let bare: PerformanceDataPoint =
            serde_json::from_value(serde_json::json!({"date": "2024-03-02"})).unwrap();
        assert!(bare.metrics.is_empty());
        assert!(bare.notes.is_empty());
    }
}
