//! benchcoin - benchmark matrix, history and comparison tooling

#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use benchcoin::attributes::ConfigAttributes;
use benchcoin::benchmark_config::BenchmarkConfig;
use benchcoin::cli::{self, Commands, NightlyCommand, RecordArgs};
use benchcoin::compare::{self, BatchEntry, Candidate};
use benchcoin::config::{Settings, SettingsLayer};
use benchcoin::harness::HarnessReport;
use benchcoin::history::{AppendOutcome, HistoryResult, HistoryStore, SeriesSelector};
use benchcoin::machine::MachineAttributes;
use benchcoin::matrix::{MatrixEntry, MatrixValue};
use benchcoin::series::color_for_index;
use chrono::{Local, NaiveDate};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli::Cli {
        history,
        settings,
        profile,
        verbose,
        command,
    } = cli::Cli::parse();
    init_tracing(verbose);

    // Settings are resolved only by the commands that read them, so a bad
    // `bench.toml` or `BENCH_*` value leaves matrix, validate and compare usable.
    let load_settings = || {
        let overrides = SettingsLayer {
            history_file: history.clone(),
            ..SettingsLayer::default()
        };
        Settings::load_validated(settings.as_deref(), profile.as_deref(), overrides)
    };

    match command {
        Commands::Matrix { config, name } => handle_matrix(&config, name.as_deref()),
        Commands::Validate { config } => handle_validate(&config),
        Commands::Machine => print_json(&MachineAttributes::detect()),
        Commands::Settings => print_json(&load_settings()?),
        Commands::Nightly(command) => handle_nightly(command, &load_settings()?),
        Commands::Compare {
            results,
            baseline,
            json,
        } => handle_compare(&results, baseline.as_deref(), json),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_matrix(path: &Path, name: Option<&str>) -> Result<()> {
    let config = BenchmarkConfig::load_validated(path)?;
    match name {
        Some(name) => {
            let entry = config
                .matrix_entry(name)
                .with_context(|| matrix_entry_not_found(name, &config))?;
            print_json(&entry)
        }
        None => print_json(&config.expand_matrix()),
    }
}

fn matrix_entry_not_found(name: &str, config: &BenchmarkConfig) -> String {
    format!(
        "Matrix entry '{name}' not found. Available: {}",
        config.matrix_names().join(", ")
    )
}

fn handle_validate(path: &Path) -> Result<()> {
    let config = BenchmarkConfig::load(path)?;
    let errors = config.validate();
    if errors.is_empty() {
        println!("{}: ok ({} matrix entries)", path.display(), config.matrix.cardinality());
        return Ok(());
    }
    for error in &errors {
        println!("{error}");
    }
    bail!("{} has {} configuration error(s)", path.display(), errors.len())
}

fn handle_nightly(command: NightlyCommand, settings: &Settings) -> Result<()> {
    let history_path = settings.history_path();
    match command {
        NightlyCommand::Append(args) => {
            let result = build_record(&args, settings)?;
            let mut store = HistoryStore::open_locked(history_path, settings.lock_timeout())?;
            let outcome = store.append(result);
            store.save()?;
            let verb = match outcome {
                AppendOutcome::Inserted => "Appended",
                AppendOutcome::Replaced => "Replaced",
            };
            println!("{verb} result in {} ({} total)", history_path.display(), store.len());
            Ok(())
        }
        NightlyCommand::Latest { series, dbcache } => {
            let selector = match (series, dbcache) {
                (Some(key), _) => SeriesSelector::Key(key),
                (None, Some(dbcache)) => SeriesSelector::CacheSize(dbcache),
                (None, None) => bail!("either --series or --dbcache is required"),
            };
            let store = HistoryStore::load(history_path)?;
            match store.latest(&selector) {
                Some(result) => print_json(result),
                None => {
                    println!("no result");
                    Ok(())
                }
            }
        }
        NightlyCommand::ChartData { output } => {
            let store = HistoryStore::load(history_path)?;
            let mut contents = serde_json::to_string_pretty(&store.chart_data())?;
            contents.push('\n');
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, contents)
                        .with_context(|| format!("writing {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Wrote chart data");
                }
                None => print!("{contents}"),
            }
            Ok(())
        }
        NightlyCommand::Series => {
            let store = HistoryStore::load(history_path)?;
            for summary in store.series_summaries() {
                println!(
                    "{} {:>4}  {}  {}",
                    color_for_index(summary.color_index),
                    summary.count,
                    summary.latest_date,
                    summary.label
                );
                println!("    {}", summary.key);
            }
            Ok(())
        }
        NightlyCommand::Check(args) => {
            let result = build_record(&args, settings)?;
            let store = HistoryStore::load(history_path)?;
            let candidate = Candidate {
                commit: result.commit.clone(),
                mean: result.mean,
                stddev: result.stddev,
                series_key: result.series_key(),
            };
            let comparison = compare::compare_with_history(&candidate, &store);
            match &comparison.baseline {
                Some(baseline) => {
                    println!(
                        "Baseline  {} ({}): {:.3}s ± {:.3}",
                        baseline.commit, baseline.date, baseline.mean, baseline.stddev
                    );
                    println!(
                        "Candidate {}: {:.3}s ± {:.3} ({})",
                        comparison.commit,
                        comparison.mean,
                        comparison.stddev,
                        compare::format_speedup(comparison.speedup_percent)
                    );
                }
                None => println!("No baseline for series {}", comparison.series_key),
            }
            Ok(())
        }
    }
}

/// Turn harness output plus metadata flags into a history result.
fn build_record(args: &RecordArgs, settings: &Settings) -> Result<HistoryResult> {
    let measurement = HarnessReport::load(&args.results)?.first_measurement()?;
    let config = record_config(args, settings)?;
    let machine = match &args.machine_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading machine file {}", path.display()))?;
            let machine: MachineAttributes = serde_json::from_str(&content)
                .with_context(|| format!("parsing machine file {}", path.display()))?;
            tracing::info!(path = %path.display(), "Using pre-captured machine attributes");
            machine
        }
        None => MachineAttributes::detect(),
    };

    let date = args.date.unwrap_or_else(today);
    let mut result =
        HistoryResult::from_measurement(date, args.commit.clone(), measurement, config, machine);
    if let Some(run_date) = args.run_date {
        result = result.with_run_date(run_date);
    }
    Ok(result)
}

fn record_config(args: &RecordArgs, settings: &Settings) -> Result<ConfigAttributes> {
    let mut config = match &args.config {
        Some(path) => {
            let benchmark = BenchmarkConfig::load_validated(path)?;
            let entry = match &args.matrix_entry {
                Some(name) => benchmark
                    .matrix_entry(name)
                    .with_context(|| matrix_entry_not_found(name, &benchmark))?,
                None => entry_for_cache(&benchmark, args.dbcache),
            };
            benchmark.to_config_attributes(&entry)
        }
        None => {
            let dbcache = args
                .dbcache
                .or_else(|| settings.default_dbcache())
                .context("no dbcache given and settings have none")?;
            settings.config_attributes(dbcache)
        }
    };
    if let Some(dbcache) = args.dbcache {
        config = config.with_cache_size(dbcache);
    }
    if let Some(mode) = &args.instrumentation {
        config = config.with_instrumentation(mode.clone());
    }
    Ok(config)
}

/// The first matrix entry that runs with `dbcache`, else the first entry.
fn entry_for_cache(config: &BenchmarkConfig, dbcache: Option<u64>) -> MatrixEntry {
    let entries = config.expand_matrix();
    let matching = dbcache.and_then(|dbcache| {
        entries
            .iter()
            .find(|e| e.get("dbcache").and_then(MatrixValue::as_u64) == Some(dbcache))
    });
    matching
        .or_else(|| entries.first())
        .cloned()
        .unwrap_or_else(MatrixEntry::default_entry)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn handle_compare(paths: &[PathBuf], baseline: Option<&str>, json: bool) -> Result<()> {
    let mut entries: Vec<BatchEntry> = Vec::new();
    for path in paths {
        let report = HarnessReport::load(path)?;
        tracing::info!(path = %path.display(), count = report.results.len(), "Loaded results");
        entries.extend(report.results.iter().map(BatchEntry::from));
    }

    let result = compare::compare_batch(&entries, baseline)?;
    if json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    let baseline_mean = entries
        .iter()
        .find(|e| e.name == result.baseline)
        .map_or(0.0, |e| e.mean);
    println!("Baseline  {}: {:.3}s", result.baseline, baseline_mean);
    for c in &result.comparisons {
        println!(
            "{}: {:.3}s ({})",
            c.name,
            c.mean,
            compare::format_speedup(c.speedup_percent)
        );
    }
    Ok(())
}
