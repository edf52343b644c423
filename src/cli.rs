//! CLI argument parsing using Clap.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// benchcoin - benchmark matrix, history and comparison tooling
#[derive(Parser, Debug)]
#[command(name = "benchcoin")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  benchcoin matrix bench/configs/pr.toml
  benchcoin nightly append results.json --commit abc123 --dbcache 450
  benchcoin nightly latest --dbcache 450
  benchcoin compare base/results.json head/results.json --baseline base
")]
pub struct Cli {
    /// History document (overrides BENCH_HISTORY_FILE and bench.toml)
    #[arg(long, global = true)]
    pub history: Option<PathBuf>,

    /// Settings file [default: ./bench.toml]
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Settings profile (quick, full, ci)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the expanded matrix of a benchmark config
    Matrix {
        /// Benchmark config TOML
        config: PathBuf,
        /// Print only the entry with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Validate a benchmark config and report every problem
    Validate {
        /// Benchmark config TOML
        config: PathBuf,
    },

    /// Detect machine attributes and print them as JSON
    Machine,

    /// Print the resolved tool settings
    Settings,

    /// Nightly history operations
    #[command(subcommand)]
    Nightly(NightlyCommand),

    /// Compare sibling runs against one baseline
    Compare {
        /// Harness results files
        #[arg(required = true)]
        results: Vec<PathBuf>,
        /// Baseline entry name [default: first entry]
        #[arg(long)]
        baseline: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum NightlyCommand {
    /// Append a measurement to the history
    Append(RecordArgs),

    /// Print the latest result of a series
    Latest {
        /// Series key
        #[arg(long, conflicts_with = "dbcache", required_unless_present = "dbcache")]
        series: Option<String>,
        /// Cache size (legacy lookup)
        #[arg(long)]
        dbcache: Option<u64>,
    },

    /// Write the chart projection of the history
    ChartData {
        /// Output file [default: stdout]
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List distinct series
    Series,

    /// Compare a measurement with the latest result of its series
    Check(RecordArgs),
}

/// A measurement and the metadata that identifies its series.
#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// Harness results file
    pub results: PathBuf,

    /// Revision that was measured
    #[arg(long)]
    pub commit: String,

    /// Cache size [default: settings dbcache]
    #[arg(long)]
    pub dbcache: Option<u64>,

    /// Logical date, YYYY-MM-DD [default: today]
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Date the measurement actually ran, YYYY-MM-DD
    #[arg(long)]
    pub run_date: Option<NaiveDate>,

    /// Benchmark config TOML the run used
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Matrix entry of --config that was run
    #[arg(long, requires = "config")]
    pub matrix_entry: Option<String>,

    /// Instrumentation mode [default: from the matrix entry, else uninstrumented]
    #[arg(long)]
    pub instrumentation: Option<String>,

    /// Pre-captured machine attributes JSON [default: detect]
    #[arg(long)]
    pub machine_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_nightly_append() {
        let cli = Cli::parse_from([
            "benchcoin",
            "--history",
            "/tmp/history.json",
            "nightly",
            "append",
            "results.json",
            "--commit",
            "abc123",
            "--dbcache",
            "32000",
            "--date",
            "2024-03-01",
            "--config",
            "pr.toml",
            "--matrix-entry",
            "450-false",
        ]);

        assert_eq!(cli.history, Some(PathBuf::from("/tmp/history.json")));
        let Commands::Nightly(NightlyCommand::Append(args)) = cli.command else {
            panic!("expected nightly append");
        };
        assert_eq!(args.commit, "abc123");
        assert_eq!(args.dbcache, Some(32_000));
        assert_eq!(args.date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(args.matrix_entry.as_deref(), Some("450-false"));
        assert!(args.instrumentation.is_none());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["benchcoin", "nightly", "series", "--verbose", "--profile", "quick"]);
        assert!(cli.verbose);
        assert_eq!(cli.profile.as_deref(), Some("quick"));
    }

    #[test]
    fn latest_requires_a_selector() {
        assert!(Cli::try_parse_from(["benchcoin", "nightly", "latest"]).is_err());
        assert!(
            Cli::try_parse_from([
                "benchcoin", "nightly", "latest", "--series", "k", "--dbcache", "450"
            ])
            .is_err()
        );
    }

    #[test]
    fn matrix_entry_requires_config() {
        assert!(
            Cli::try_parse_from([
                "benchcoin",
                "nightly",
                "check",
                "results.json",
                "--commit",
                "abc",
                "--matrix-entry",
                "default",
            ])
            .is_err()
        );
    }

    #[test]
    fn compare_collects_files() {
        let cli = Cli::parse_from(["benchcoin", "compare", "a.json", "b.json", "--json"]);
        let Commands::Compare {
            results,
            baseline,
            json,
        } = cli.command
        else {
            panic!("expected compare");
        };
        assert_eq!(results.len(), 2);
        assert!(baseline.is_none());
        assert!(json);
    }

    #[test]
    fn bad_date_is_rejected() {
        assert!(
            Cli::try_parse_from([
                "benchcoin",
                "nightly",
                "append",
                "r.json",
                "--commit",
                "c",
                "--date",
                "yesterday",
            ])
            .is_err()
        );
    }
}
