//! Serializes a performance dataset into a chat prompt.

use std::fmt::Write;

use crate::llm::Prompt;
use crate::models::performance::date_span;
use crate::models::PerformanceDataPoint;

/// Number of insights requested from the model.
pub const INSIGHT_COUNT: usize = 3;

const SYSTEM_INSTRUCTION: &str = "You are a sports performance analyst working with a coaching staff. \
You receive daily performance readings (named numeric metrics plus free-text notes) for one athlete or team. \
Respond with exactly three insights, one per line, each formatted as: area|trend|recommendation. \
`area` is a short label, `trend` is one descriptive sentence grounded in the data, \
`recommendation` is one actionable sentence. \
Do not number the lines, do not add headings, and do not use the | character inside a field.";

/// Build the prompt for `dataset`. Same dataset, same text.
pub fn build_prompt(dataset: &[PerformanceDataPoint]) -> Prompt {
    Prompt {
        system: SYSTEM_INSTRUCTION.to_string(),
        user: build_user_prompt(dataset),
    }
}

fn build_user_prompt(dataset: &[PerformanceDataPoint]) -> String {
    let mut out = String::new();

    match date_span(dataset) {
        Some((start, end)) => {
            let _ = writeln!(
                out,
                "Performance data ({} entries, {} to {}):",
                dataset.len(),
                start,
                end
            );
        }
        None => out.push_str("Performance data (no entries):\n"),
    }

    for point in dataset {
        let _ = write!(out, "- {}:", point.date);
        if point.metrics.is_empty() {
            out.push_str(" no metrics");
        }
        for (i, (name, value)) in point.metrics.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            let _ = write!(out, "{}{}={}", sep, name, format_value(*value));
        }
        let notes = point.notes.trim();
        if !notes.is_empty() {
            // Keep one data point per line.
            let flat = notes.split_whitespace().collect::<Vec<_>>().join(" ");
            let _ = write!(out, " | notes: {}", flat);
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "\nAnalyze the trends above and provide exactly {} insights, one per line, \
         in the form area|trend|recommendation.",
        INSIGHT_COUNT
    );
    out
}

/// Integers without a trailing `.0`, other values with up to two decimals.
fn format_value(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else if v.is_finite() {
        let s = format!("{:.2}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[test]
    fn test_prompt_contains_data_and_format_request() {
        let data = vec![
            PerformanceDataPoint::new(day(1))
                .with_metric("sleep_hours", 7.5)
                .with_metric("load", 420.0)
                .with_notes("heavy legs\nafter intervals"),
            PerformanceDataPoint::new(day(2)),
        ];
        let prompt = build_prompt(&data);

        assert!(prompt.system.contains("area|trend|recommendation"));
        assert!(prompt.user.contains("2 entries, 2024-04-01 to 2024-04-02"));
        // BTreeMap order: load before sleep_hours.
        assert!(prompt
            .user
            .contains("- 2024-04-01: load=420, sleep_hours=7.5 | notes: heavy legs after intervals\n"));
        assert!(prompt.user.contains("- 2024-04-02: no metrics\n"));
        assert!(prompt.user.contains("exactly 3 insights"));
    }

    #[test]
    fn test_prompt_deterministic_regardless_of_insertion_order() {
        let a = vec![PerformanceDataPoint::new(day(1))
            .with_metric("b", 1.0)
            .with_metric("a", 2.0)];
        let b = vec![PerformanceDataPoint::new(day(1))
            .with_metric("a", 2.0)
            .with_metric("b", 1.0)];
        assert_eq!(build_prompt(&a), build_prompt(&b));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(3.0), "3");
        assert_eq!(format_value(3.256), "3.26");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(-2.0), "-2");
    }

    #[test]
    fn test_empty_dataset_prompt() {
        let prompt = build_prompt(&[]);
        assert!(prompt.user.starts_with("Performance data (no entries):"));
    }
}
