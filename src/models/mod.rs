pub mod insight;
pub mod performance;

pub use insight::{DateRange, Insight, InsightResponse, InsightSource, SupportingData};
pub use performance::{PerformanceDataPoint, Subject};
