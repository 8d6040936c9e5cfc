//! Insight generation: prompt building, tolerant parsing, deterministic
//! fallback and the orchestrating service.

pub mod fallback;
pub mod parser;
pub mod prompt;
pub mod service;

pub use service::InsightService;
