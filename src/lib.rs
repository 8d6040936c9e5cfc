//! Insight service: turns performance time series into coaching insights
//! through a rate-limited, cached language-model call with deterministic
//! fallback content.
//!
//! Library crate shared by the `insightd` binary and the integration tests.

use std::sync::Arc;

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod insights;
pub mod jobs;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod store;

/// Shared application state passed to handlers.
pub struct AppState {
    pub insights: insights::InsightService,
    pub datasets: Arc<dyn store::DatasetSource>,
    pub default_model: String,
}
