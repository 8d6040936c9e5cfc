use serde::{Deserialize, Serialize};

/// A structured coaching observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub area: String,
    pub trend: String,
    pub recommendation: String,
    /// In `[0, 1]`. Model output carries a fixed value; it is not calibrated.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supporting_data: Option<SupportingData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportingData {
    pub metrics: Vec<String>,
    pub date_range: DateRange,
    pub trend_values: Vec<f64>,
}

/// Inclusive date labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Where the insights in a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    Cached,
    Generated,
    Fallback,
    RateLimited,
    /// A newer request for the same subject took over; callers discard this.
    Superseded,
}

impl InsightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightSource::Cached => "cached",
            InsightSource::Generated => "generated",
            InsightSource::Fallback => "fallback",
            InsightSource::RateLimited => "rate_limited",
            InsightSource::Superseded => "superseded",
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, InsightSource::Cached | InsightSource::Generated)
    }
}

/// Result of `generate_insights`. `insights` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightResponse {
    pub insights: Vec<Insight>,
    pub source: InsightSource,
    /// Advisory text for the caller, e.g. how long to wait before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl InsightResponse {
    pub fn new(insights: Vec<Insight>, source: InsightSource) -> Self {
        Self {
            insights,
            source,
            notice: None,
            retry_after_secs: None,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }
}
