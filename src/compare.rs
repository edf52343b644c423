//! Speedup of a candidate against its baseline.
//!
//! Two flavours share one formula: a candidate against the latest history
//! result of its series, and a batch of sibling runs against one fixed
//! baseline. A positive speedup means the candidate is faster.

use crate::error::{Error, Result};
use crate::harness::HarnessRun;
use crate::history::HistoryStore;
use chrono::NaiveDate;
use serde::Serialize;

/// `round(((baseline - candidate) / baseline) * 100, 1)`.
///
/// Absent when no comparison is possible: a zero, negative or non-finite
/// baseline mean. Zero is a measured result and is returned as `Some(0.0)`.
pub fn speedup_percent(baseline_mean: f64, candidate_mean: f64) -> Option<f64> {
    if !baseline_mean.is_finite() || baseline_mean <= 0.0 || !candidate_mean.is_finite() {
        return None;
    }
    let percent = ((baseline_mean - candidate_mean) / baseline_mean) * 100.0;
    // Formatting rounds the exact binary value; scaling by 10 first can move
    // a value onto or off a tie.
    format!("{percent:.1}").parse().ok()
}

/// Render a speedup for terminal output: `+10.0%`, `-5.2%`, or `n/a`.
pub fn format_speedup(speedup: Option<f64>) -> String {
    match speedup {
        Some(value) if value > 0.0 => format!("+{value:.1}%"),
        Some(value) => format!("{value:.1}%"),
        None => "n/a".to_string(),
    }
}

/// A fresh measurement awaiting comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub commit: String,
    pub mean: f64,
    pub stddev: f64,
    pub series_key: String,
}

/// The history result a candidate was compared against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRef {
    pub date: NaiveDate,
    pub commit: String,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryComparison {
    pub commit: String,
    pub series_key: String,
    pub mean: f64,
    pub stddev: f64,
    /// `None` when the series has never run before.
    pub baseline: Option<BaselineRef>,
    pub mean_delta: Option<f64>,
    pub stddev_delta: Option<f64>,
    pub speedup_percent: Option<f64>,
}

impl HistoryComparison {
    pub const fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

/// Compare `candidate` with the most recent result of the same series.
pub fn compare_with_history(candidate: &Candidate, history: &HistoryStore) -> HistoryComparison {
    let Some(latest) = history.latest_for_series(&candidate.series_key) else {
        tracing::info!(series = candidate.series_key.as_str(), "No baseline for series");
        return HistoryComparison {
            commit: candidate.commit.clone(),
            series_key: candidate.series_key.clone(),
            mean: candidate.mean,
            stddev: candidate.stddev,
            baseline: None,
            mean_delta: None,
            stddev_delta: None,
            speedup_percent: None,
        };
    };

    let speedup = speedup_percent(latest.mean, candidate.mean);
    tracing::info!(
        series = candidate.series_key.as_str(),
        baseline_commit = latest.commit.as_str(),
        baseline_mean = latest.mean,
        mean = candidate.mean,
        speedup = %format_speedup(speedup),
        "Compared against history"
    );
    HistoryComparison {
        commit: candidate.commit.clone(),
        series_key: candidate.series_key.clone(),
        mean: candidate.mean,
        stddev: candidate.stddev,
        baseline: Some(BaselineRef {
            date: latest.date,
            commit: latest.commit.clone(),
            mean: latest.mean,
            stddev: latest.stddev,
        }),
        mean_delta: Some(candidate.mean - latest.mean),
        stddev_delta: Some(candidate.stddev - latest.stddev),
        speedup_percent: speedup,
    }
}

/// One already-measured sibling run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub name: String,
    pub mean: f64,
    pub stddev: Option<f64>,
}

impl From<&HarnessRun> for BatchEntry {
    fn from(run: &HarnessRun) -> Self {
        Self {
            name: run.command.clone(),
            mean: run.mean,
            stddev: run.stddev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub name: String,
    pub mean: f64,
    pub baseline_mean: f64,
    pub speedup_percent: Option<f64>,
    pub stddev: Option<f64>,
}

/// Batch result, serialized as `{"baseline": .., "comparisons": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchComparison {
    pub baseline: String,
    pub comparisons: Vec<Comparison>,
}

impl BatchComparison {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compare every entry against one baseline.
///
/// The baseline is `baseline` when given, otherwise the first entry. Entries
/// sharing the baseline's name are not compared with it.
pub fn compare_batch(entries: &[BatchEntry], baseline: Option<&str>) -> Result<BatchComparison> {
    let first = entries
        .first()
        .ok_or_else(|| Error::validation("No benchmark entries to compare"))?;
    let baseline_name = baseline.unwrap_or(&first.name);

    let baseline_entry = entries
        .iter()
        .find(|e| e.name == baseline_name)
        .ok_or_else(|| {
            let available: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            Error::validation(format!(
                "Baseline '{baseline_name}' not found. Available: {}",
                available.join(", ")
            ))
        })?;
    tracing::info!(baseline = baseline_name, mean = baseline_entry.mean, "Using baseline");

    let comparisons: Vec<Comparison> = entries
        .iter()
        .filter(|e| e.name != baseline_name)
        .map(|e| Comparison {
            name: e.name.clone(),
            mean: e.mean,
            baseline_mean: baseline_entry.mean,
            speedup_percent: speedup_percent(baseline_entry.mean, e.mean),
            stddev: e.stddev,
        })
        .collect();

    for c in &comparisons {
        tracing::info!(
            name = c.name.as_str(),
            mean = c.mean,
            speedup = %format_speedup(c.speedup_percent),
            "Compared"
        );
    }

    Ok(BatchComparison {
        baseline: baseline_name.to_string(),
        comparisons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::ConfigAttributes;
    use crate::harness::Measurement;
    use crate::history::HistoryResult;
    use crate::machine::MachineAttributes;
    use proptest::prelude::*;

    fn entry(name: &str, mean: f64) -> BatchEntry {
        BatchEntry {
            name: name.to_string(),
            mean,
            stddev: Some(1.0),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn faster_candidate_is_positive() {
        assert_eq!(speedup_percent(100.0, 90.0), Some(10.0));
        assert_eq!(speedup_percent(100.0, 110.0), Some(-10.0));
    }

    #[test]
    fn zero_baseline_is_absent() {
        assert_eq!(speedup_percent(0.0, 90.0), None);
        assert_eq!(speedup_percent(f64::NAN, 90.0), None);
    }

    #[test]
    fn equal_means_is_zero_not_absent() {
        assert_eq!(speedup_percent(50.0, 50.0), Some(0.0));
    }

    #[test]
    fn rounds_to_one_decimal() {
        assert_eq!(speedup_percent(3.0, 2.0), Some(33.3));
        // 27.450000000000003 is above the tie.
        assert_eq!(speedup_percent(100.0, 72.55), Some(27.5));
        // 25.95 is stored just below the tie.
        assert_eq!(speedup_percent(100.0, 74.05), Some(25.9));
    }

    #[test]
    fn format_speedup_signs() {
        assert_eq!(format_speedup(Some(10.0)), "+10.0%");
        assert_eq!(format_speedup(Some(-5.2)), "-5.2%");
        assert_eq!(format_speedup(Some(0.0)), "0.0%");
        assert_eq!(format_speedup(None), "n/a");
    }

    #[test]
    fn batch_defaults_to_first_entry() {
        let result = compare_batch(&[entry("base", 100.0), entry("head", 90.0)], None)
            .expect("compare");
        assert_eq!(result.baseline, "base");
        assert_eq!(result.comparisons.len(), 1);
        assert_eq!(result.comparisons[0].name, "head");
        assert_eq!(result.comparisons[0].speedup_percent, Some(10.0));
        assert!((result.comparisons[0].baseline_mean - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn batch_explicit_baseline() {
        let entries = [entry("a", 100.0), entry("b", 80.0), entry("c", 120.0)];
        let result = compare_batch(&entries, Some("b")).expect("compare");
        assert_eq!(result.baseline, "b");
        let names: Vec<_> = result.comparisons.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        assert_eq!(result.comparisons[0].speedup_percent, Some(-25.0));
    }

    #[test]
    fn batch_unknown_baseline_lists_available() {
        let err = compare_batch(&[entry("a", 1.0), entry("b", 2.0)], Some("z")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Available: a, b"));
    }

    #[test]
    fn batch_empty_is_error() {
        assert!(compare_batch(&[], None).is_err());
    }

    #[test]
    fn batch_json_shape() {
        let result = compare_batch(&[entry("base", 0.0), entry("head", 1.0)], None)
            .expect("compare");
        let value: serde_json::Value =
            serde_json::from_str(&result.to_json().expect("json")).expect("parse");
        assert_eq!(value["baseline"], "base");
        assert!(value["comparisons"][0]["speedup_percent"].is_null());
        assert_eq!(value["comparisons"][0]["stddev"], 1.0);
    }

    #[test]
    fn history_comparison_uses_latest_same_series() {
        let machine = MachineAttributes::default();
        let mut store = HistoryStore::new("unused.json");
        for (day, commit, mean) in [("2024-01-01", "aaa", 200.0), ("2024-01-02", "bbb", 100.0)] {
            store.append(HistoryResult::from_measurement(
                date(day),
                commit,
                Measurement {
                    mean,
                    stddev: 2.0,
                    runs: 1,
                },
                ConfigAttributes::legacy(450),
                machine.clone(),
            ));
        }
        let key = store.results()[0].series_key();
        let candidate = Candidate {
            commit: "ccc".to_string(),
            mean: 90.0,
            stddev: 3.0,
            series_key: key,
        };
        let comparison = compare_with_history(&candidate, &store);
        let baseline = comparison.baseline.as_ref().expect("baseline");
        assert_eq!(baseline.commit, "bbb");
        assert_eq!(comparison.speedup_percent, Some(10.0));
        assert_eq!(comparison.mean_delta, Some(-10.0));
        assert_eq!(comparison.stddev_delta, Some(1.0));
    }

    #[test]
    fn history_comparison_without_baseline() {
        let store = HistoryStore::new("unused.json");
        let candidate = Candidate {
            commit: "ccc".to_string(),
            mean: 90.0,
            stddev: 0.0,
            series_key: "nothing|0GB|unknown|unknown|db1|0-0".to_string(),
        };
        let comparison = compare_with_history(&candidate, &store);
        assert!(!comparison.has_baseline());
        assert_eq!(comparison.speedup_percent, None);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn slower_is_never_positive(base in 1.0f64..1.0e6, extra in 0.0f64..1.0e6) {
            let speedup = speedup_percent(base, base + extra).expect("positive baseline");
            prop_assert!(speedup <= 0.0);
        }
    }
}
