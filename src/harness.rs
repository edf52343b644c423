//! Benchmark harness output (`results.json`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One command's timing summary as written by the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessRun {
    #[serde(default = "unknown_command")]
    pub command: String,
    #[serde(default)]
    pub mean: f64,
    /// Absent or null when the harness ran a single iteration.
    #[serde(default)]
    pub stddev: Option<f64>,
    #[serde(default)]
    pub user: f64,
    #[serde(default)]
    pub system: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default)]
    pub times: Vec<f64>,
}

fn unknown_command() -> String {
    "unknown".to_string()
}

/// Summary statistics of a single captured measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub mean: f64,
    pub stddev: f64,
    pub runs: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessReport {
    #[serde(default)]
    pub results: Vec<HarnessRun>,
}

impl HarnessReport {
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::measurement(format!(
                "Results file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content).map_err(|err| {
            Error::measurement(format!("Failed to parse {}: {err}", path.display()))
        })
    }

    /// Measurement from the first result. Nightly captures run one command.
    pub fn first_measurement(&self) -> Result<Measurement> {
        let run = self
            .results
            .first()
            .ok_or_else(|| Error::measurement("No results found in harness output"))?;
        Ok(run.measurement())
    }
}

impl HarnessRun {
    pub fn measurement(&self) -> Measurement {
        Measurement {
            mean: self.mean,
            stddev: self.stddev.unwrap_or(0.0),
            runs: u32::try_from(self.times.len()).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HYPERFINE: &str = r#"{
        "results": [
            {
                "command": "base (abc123)",
                "mean": 1800.5,
                "stddev": 12.25,
                "median": 1801.0,
                "user": 3000.0,
                "system": 200.0,
                "min": 1788.0,
                "max": 1813.0,
                "times": [1788.0, 1813.0, 1800.5]
            },
            {"command": "head (def456)", "mean": 1700.0, "stddev": null, "times": [1700.0]}
        ]
    }"#;

    #[test]
    fn first_result_becomes_measurement() {
        let report = HarnessReport::from_json_str(HYPERFINE).expect("parse");
        let m = report.first_measurement().expect("measurement");
        assert!((m.mean - 1800.5).abs() < f64::EPSILON);
        assert!((m.stddev - 12.25).abs() < f64::EPSILON);
        assert_eq!(m.runs, 3);
    }

    #[test]
    fn null_stddev_reads_as_zero() {
        let report = HarnessReport::from_json_str(HYPERFINE).expect("parse");
        let m = report.results[1].measurement();
        assert_eq!(m.stddev, 0.0);
        assert_eq!(m.runs, 1);
    }

    #[test]
    fn empty_results_is_measurement_error() {
        let report = HarnessReport::from_json_str(r#"{"results": []}"#).expect("parse");
        assert!(matches!(
            report.first_measurement(),
            Err(Error::Measurement(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HarnessReport::load(Path::new("/nonexistent/results.json")).unwrap_err();
        assert!(err.to_string().contains("Results file not found"));
    }
}
