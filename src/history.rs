//! Append-only nightly history persisted as a single JSON document.
//!
//! The store owns `history.json` exclusively. Results are kept sorted by
//! `(date, dbcache)` ascending and at most one result exists per
//! `(date, commit, dbcache)`; appending a duplicate replaces the old result.

use crate::attributes::ConfigAttributes;
use crate::error::{Error, Result};
use crate::harness::Measurement;
use crate::machine::MachineAttributes;
use crate::series::{SeriesIdentity, color_index};
use chrono::NaiveDate;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One persisted measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResult {
    /// Logical date: the date of the revision, not of the run.
    pub date: NaiveDate,
    pub commit: String,
    pub mean: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub stddev: f64,
    pub runs: u32,
    pub config: ConfigAttributes,
    #[serde(default)]
    pub machine: MachineAttributes,
    /// When the measurement actually ran. Audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<NaiveDate>,
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

impl HistoryResult {
    pub fn from_measurement(
        date: NaiveDate,
        commit: impl Into<String>,
        measurement: Measurement,
        config: ConfigAttributes,
        machine: MachineAttributes,
    ) -> Self {
        Self {
            date,
            commit: commit.into(),
            mean: measurement.mean,
            stddev: measurement.stddev,
            runs: measurement.runs,
            config,
            machine,
            run_date: None,
        }
    }

    #[must_use]
    pub const fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = Some(run_date);
        self
    }

    pub const fn dbcache(&self) -> u64 {
        self.config.cache_size()
    }

    pub fn series_key(&self) -> String {
        SeriesIdentity::standard().series_key(&self.config, &self.machine)
    }

    pub fn series_label(&self) -> String {
        SeriesIdentity::standard().series_label(&self.config, &self.machine)
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.date == other.date && self.commit == other.commit && self.dbcache() == other.dbcache()
    }

    fn short_commit(&self) -> &str {
        self.commit.get(..8).unwrap_or(&self.commit)
    }
}

/// Flat result shape written before config and machine were embedded.
#[derive(Debug, Deserialize)]
struct LegacyResult {
    date: NaiveDate,
    commit: String,
    mean: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    stddev: f64,
    runs: u32,
    #[serde(default)]
    dbcache: u64,
}

/// A result as found on disk, before upgrade to the current shape.
#[derive(Debug)]
enum StoredResult {
    Current(HistoryResult),
    Legacy(LegacyResult),
}

impl StoredResult {
    /// Results carrying a nested `config` object are current; anything else is
    /// read as the legacy flat shape.
    fn decode(value: Value) -> serde_json::Result<Self> {
        if value.get("config").is_some_and(Value::is_object) {
            serde_json::from_value(value).map(Self::Current)
        } else {
            serde_json::from_value(value).map(Self::Legacy)
        }
    }

    fn into_current(self) -> HistoryResult {
        match self {
            Self::Current(result) => result,
            Self::Legacy(legacy) => HistoryResult {
                date: legacy.date,
                commit: legacy.commit,
                mean: legacy.mean,
                stddev: legacy.stddev,
                runs: legacy.runs,
                config: ConfigAttributes::legacy(legacy.dbcache),
                machine: MachineAttributes::default(),
                run_date: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    results: &'a [HistoryResult],
}

/// What [`HistoryStore::append`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Replaced,
}

/// How a caller names the series it wants the latest result for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSelector {
    /// Full series key.
    Key(String),
    /// Cache size alone, for callers that predate series keys.
    CacheSize(u64),
}

impl SeriesSelector {
    /// Parse a legacy config name such as `"450"`.
    pub fn from_legacy_name(name: &str) -> Option<Self> {
        name.trim().parse().ok().map(Self::CacheSize)
    }

    fn matches(&self, result: &HistoryResult) -> bool {
        match self {
            Self::Key(key) => result.series_key() == *key,
            Self::CacheSize(dbcache) => result.dbcache() == *dbcache,
        }
    }
}

/// Read-only chart projection of one result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub commit: String,
    pub mean: f64,
    pub stddev: f64,
    pub series_key: String,
    pub series_label: String,
    pub color_index: usize,
    /// Cache size as a string, for chart consumers that group by it.
    pub config: String,
}

impl ChartPoint {
    pub fn color(&self) -> &'static str {
        crate::series::color_for_index(self.color_index)
    }
}

/// Per-series overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub key: String,
    pub label: String,
    pub color_index: usize,
    pub count: usize,
    pub latest_date: NaiveDate,
    pub latest_commit: String,
    pub latest_mean: f64,
}

/// Exclusive advisory lock on the history's sibling `.lock` file. Unlocks on drop.
#[derive(Debug)]
struct HistoryLock {
    file: File,
}

impl HistoryLock {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let start = Instant::now();
        loop {
            if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
                return Ok(Self { file });
            }
            if start.elapsed() >= timeout {
                return Err(Error::lock(format!(
                    "Timed out after {}ms waiting for history lock {}",
                    timeout.as_millis(),
                    path.display()
                )));
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn lock_path_for(history_path: &Path) -> PathBuf {
    let mut name = history_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    history_path.with_file_name(name)
}

/// The nightly history document.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    results: Vec<HistoryResult>,
    lock: Option<HistoryLock>,
}

impl HistoryStore {
    /// An empty store that will save to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            results: Vec::new(),
            lock: None,
        }
    }

    /// Load without locking. A missing file is an empty history; a malformed
    /// one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            tracing::info!(path = %path.display(), "No existing history");
            return Ok(Self::new(path));
        }

        let content = std::fs::read_to_string(&path)?;
        let results = parse_document(&content).map_err(|err| {
            Error::history(format!("Failed to parse history {}: {err}", path.display()))
        })?;
        tracing::info!(path = %path.display(), count = results.len(), "Loaded history");
        Ok(Self {
            path,
            results,
            lock: None,
        })
    }

    /// Take the writer lock, then load. The lock is held until the store drops,
    /// so load, mutate and save happen under one lock.
    pub fn open_locked(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let path = path.into();
        let lock = HistoryLock::acquire(&lock_path_for(&path), timeout)?;
        let mut store = Self::load(path)?;
        store.lock = Some(lock);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn results(&self) -> &[HistoryResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub const fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Insert a result, replacing any existing one with the same
    /// `(date, commit, dbcache)`, then restore sort order.
    pub fn append(&mut self, result: HistoryResult) -> AppendOutcome {
        let outcome = if let Some(pos) = self.results.iter().position(|r| r.same_slot(&result)) {
            tracing::warn!(
                date = %result.date,
                commit = result.short_commit(),
                dbcache = result.dbcache(),
                "Duplicate result, replacing"
            );
            self.results.remove(pos);
            AppendOutcome::Replaced
        } else {
            AppendOutcome::Inserted
        };

        tracing::info!(
            date = %result.date,
            commit = result.short_commit(),
            dbcache = result.dbcache(),
            mean_secs = result.mean,
            "Appended result"
        );
        self.results.push(result);
        // Vec::sort_by is stable: equal keys keep insertion order.
        self.results.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.dbcache().cmp(&b.dbcache()))
        });
        outcome
    }

    /// Write the whole document atomically (temp file in the same directory,
    /// then rename).
    pub fn save(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let contents = self.to_json()?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| {
            Error::history(format!(
                "Failed to persist history to {}: {}",
                self.path.display(),
                err.error
            ))
        })?;

        tracing::info!(path = %self.path.display(), count = self.results.len(), "Saved history");
        Ok(())
    }

    /// The persisted document text.
    pub fn to_json(&self) -> Result<String> {
        let mut contents = serde_json::to_string_pretty(&DocumentRef {
            results: &self.results,
        })?;
        contents.push('\n');
        Ok(contents)
    }

    /// Most recent result for the series. `None` is the normal answer for a
    /// series that has never run.
    pub fn latest(&self, selector: &SeriesSelector) -> Option<&HistoryResult> {
        self.results.iter().rev().find(|r| selector.matches(r))
    }

    pub fn latest_for_series(&self, key: &str) -> Option<&HistoryResult> {
        self.latest(&SeriesSelector::Key(key.to_string()))
    }

    pub fn latest_for_cache(&self, dbcache: u64) -> Option<&HistoryResult> {
        self.latest(&SeriesSelector::CacheSize(dbcache))
    }

    pub fn chart_data(&self) -> Vec<ChartPoint> {
        self.results
            .iter()
            .map(|r| {
                let key = r.series_key();
                ChartPoint {
                    date: r.date,
                    commit: r.commit.clone(),
                    mean: r.mean,
                    stddev: r.stddev,
                    color_index: color_index(&key),
                    series_label: r.series_label(),
                    series_key: key,
                    config: r.dbcache().to_string(),
                }
            })
            .collect()
    }

    /// One summary per distinct series key, ordered by label.
    pub fn series_summaries(&self) -> Vec<SeriesSummary> {
        let mut by_key: BTreeMap<String, SeriesSummary> = BTreeMap::new();
        for result in &self.results {
            let key = result.series_key();
            by_key
                .entry(key.clone())
                .and_modify(|summary| {
                    summary.count += 1;
                    summary.latest_date = result.date;
                    summary.latest_commit.clone_from(&result.commit);
                    summary.latest_mean = result.mean;
                })
                .or_insert_with(|| SeriesSummary {
                    color_index: color_index(&key),
                    label: result.series_label(),
                    key,
                    count: 1,
                    latest_date: result.date,
                    latest_commit: result.commit.clone(),
                    latest_mean: result.mean,
                });
        }
        let mut summaries: Vec<_> = by_key.into_values().collect();
        summaries.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.key.cmp(&b.key)));
        summaries
    }
}

fn parse_document(content: &str) -> serde_json::Result<Vec<HistoryResult>> {
    let raw: RawDocument = serde_json::from_str(content)?;
    raw.results
        .into_iter()
        .map(|value| StoredResult::decode(value).map(StoredResult::into_current))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::NodeArgs;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    fn machine() -> MachineAttributes {
        MachineAttributes {
            cpu_model: Some("AMD Ryzen 7 7700 8-Core Processor".into()),
            architecture: Some("x86_64".into()),
            cpu_cores: Some(16),
            total_ram_gb: Some(62.5),
            os_kernel: Some("6.6.52".into()),
            disk_type: Some("NVMe SSD".into()),
            ..MachineAttributes::default()
        }
    }

    fn config(dbcache: u64) -> ConfigAttributes {
        ConfigAttributes {
            start_height: Some(840_000),
            bitcoind: NodeArgs {
                dbcache,
                stopatheight: Some(855_000),
                ..NodeArgs::default()
            },
            ..ConfigAttributes::default()
        }
    }

    fn result(day: &str, commit: &str, dbcache: u64, mean: f64) -> HistoryResult {
        HistoryResult::from_measurement(
            date(day),
            commit,
            Measurement {
                mean,
                stddev: 1.0,
                runs: 3,
            },
            config(dbcache),
            machine(),
        )
    }

    #[test]
    fn duplicate_slot_replaces() {
        let mut store = HistoryStore::new("unused.json");
        assert_eq!(
            store.append(result("2025-01-01", "aaa", 450, 100.0)),
            AppendOutcome::Inserted
        );
        assert_eq!(
            store.append(result("2025-01-01", "aaa", 450, 90.0)),
            AppendOutcome::Replaced
        );
        assert_eq!(store.len(), 1);
        assert!((store.results()[0].mean - 90.0).abs() < f64::EPSILON);

        store.append(result("2025-01-01", "aaa", 32000, 50.0));
        store.append(result("2025-01-01", "bbb", 450, 80.0));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn latest_picks_greatest_date_regardless_of_append_order() {
        let mut store = HistoryStore::new("unused.json");
        store.append(result("2025-01-01", "c1", 450, 100.0));
        store.append(result("2025-01-03", "c3", 450, 98.0));
        store.append(result("2025-01-02", "c2", 450, 99.0));

        let key = store.results()[0].series_key();
        let latest = store.latest_for_series(&key).expect("latest");
        assert_eq!(latest.date, date("2025-01-03"));
        assert_eq!(latest.commit, "c3");
    }

    #[test]
    fn latest_by_cache_size_and_legacy_name() {
        let mut store = HistoryStore::new("unused.json");
        store.append(result("2025-01-01", "c1", 450, 100.0));
        store.append(result("2025-01-02", "c2", 32000, 40.0));

        let by_name = SeriesSelector::from_legacy_name("32000").expect("numeric name");
        assert_eq!(store.latest(&by_name).map(|r| r.commit.as_str()), Some("c2"));
        assert_eq!(store.latest_for_cache(450).map(|r| r.commit.as_str()), Some("c1"));
        assert!(store.latest_for_cache(1024).is_none());
        assert!(SeriesSelector::from_legacy_name("default").is_none());
        assert!(store.latest_for_series("no|such|series").is_none());
    }

    #[test]
    fn same_day_commits_keep_insertion_order() {
        let mut store = HistoryStore::new("unused.json");
        store.append(result("2025-01-01", "first", 450, 100.0));
        store.append(result("2025-01-01", "second", 450, 101.0));
        let commits: Vec<_> = store.results().iter().map(|r| r.commit.as_str()).collect();
        assert_eq!(commits, vec!["first", "second"]);
        assert_eq!(store.latest_for_cache(450).map(|r| r.commit.as_str()), Some("second"));
    }

    #[test]
    fn missing_file_is_empty_store() {
        let temp = TempDir::new().expect("tempdir");
        let store = HistoryStore::load(temp.path().join("history.json")).expect("load");
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_document_is_fatal() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("history.json");
        std::fs::write(&path, "{\"results\": [ {\"date\": ").expect("write");
        let err = HistoryStore::load(&path).unwrap_err();
        assert!(matches!(err, Error::History(_)), "got {err}");
    }

    #[test]
    fn legacy_results_are_upgraded() {
        let doc = json!({
            "results": [
                {"date": "2024-12-30", "commit": "abc", "mean": 1200, "stddev": null, "runs": 1, "dbcache": 450},
                {"date": "2024-12-31", "commit": "def", "mean": 900.5, "stddev": 3.0, "runs": 3, "config": "32000", "dbcache": 32000}
            ]
        });
        let results = parse_document(&doc.to_string()).expect("parse legacy");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].dbcache(), 450);
        assert_eq!(results[0].stddev, 0.0);
        assert!(results[0].machine.is_empty());
        assert_eq!(results[0].config.instrumentation(), "uninstrumented");
        assert_eq!(results[1].dbcache(), 32000);
    }

    #[test]
    fn save_then_load_is_a_fixed_point() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested").join("history.json");
        let doc = json!({
            "results": [
                {"date": "2024-12-30", "commit": "abc", "mean": 1200, "stddev": 2, "runs": 1, "dbcache": 450},
                {
                    "date": "2025-01-02", "commit": "def", "mean": 1100.25, "stddev": 4.5, "runs": 2,
                    "config": {"start_height": 840000, "bitcoind": {"dbcache": 450, "stopatheight": 855000, "chain": "main"}},
                    "machine": {"cpu_model": "Apple M2 Pro"},
                    "run_date": "2025-01-05"
                }
            ]
        });
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, doc.to_string()).expect("write");

        let first = HistoryStore::load(&path).expect("load");
        first.save().expect("save");
        let once = std::fs::read_to_string(&path).expect("read");

        HistoryStore::load(&path).expect("reload").save().expect("resave");
        let twice = std::fs::read_to_string(&path).expect("read");
        assert_eq!(once, twice);

        let reloaded = HistoryStore::load(&path).expect("load");
        assert_eq!(reloaded.results(), first.results());
        assert_eq!(reloaded.results()[1].run_date, Some(date("2025-01-05")));
    }

    #[test]
    fn chart_projection_carries_identity() {
        let mut store = HistoryStore::new("unused.json");
        store.append(result("2025-01-01", "c1", 450, 100.0));
        let points = store.chart_data();
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.series_key, "ryzen777008core|64GB|nvme|6.6|db450|840000-855000");
        assert_eq!(point.config, "450");
        assert!(point.color_index < crate::series::NUM_COLORS);
        assert!(point.color().starts_with('#'));

        let value = serde_json::to_value(point).expect("serialize");
        assert_eq!(value["date"], json!("2025-01-01"));
    }

    #[test]
    fn summaries_group_by_series() {
        let mut store = HistoryStore::new("unused.json");
        store.append(result("2025-01-01", "c1", 450, 100.0));
        store.append(result("2025-01-02", "c2", 450, 95.0));
        store.append(result("2025-01-02", "c2", 32000, 40.0));
        let summaries = store.series_summaries();
        assert_eq!(summaries.len(), 2);
        let small = summaries
            .iter()
            .find(|s| s.key.contains("|db450|"))
            .expect("db450 series");
        assert_eq!(small.count, 2);
        assert_eq!(small.latest_commit, "c2");
    }

    #[test]
    fn second_writer_times_out() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("history.json");
        let held = HistoryStore::open_locked(&path, Duration::from_millis(100)).expect("first lock");
        assert!(held.is_locked());

        let err = HistoryStore::open_locked(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, Error::Lock(_)), "got {err}");

        drop(held);
        HistoryStore::open_locked(&path, Duration::from_millis(100)).expect("lock after release");
    }

    #[test]
    fn lock_path_is_sibling() {
        assert_eq!(
            lock_path_for(Path::new("out/history.json")),
            PathBuf::from("out/history.json.lock")
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn appends_keep_sort_and_uniqueness(
            ops in proptest::collection::vec((0u32..20, 0usize..3, 0usize..3), 1..40)
        ) {
            let caches = [450u64, 4096, 32000];
            let commits = ["a", "b", "c"];
            let mut store = HistoryStore::new("unused.json");
            for (day, cache, commit) in ops {
                let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(u64::from(day));
                let before = store.len();
                let outcome = store.append(HistoryResult::from_measurement(
                    day,
                    commits[commit],
                    Measurement { mean: 1.0, stddev: 0.0, runs: 1 },
                    config(caches[cache]),
                    MachineAttributes::default(),
                ));
                match outcome {
                    AppendOutcome::Inserted => prop_assert_eq!(store.len(), before + 1),
                    AppendOutcome::Replaced => prop_assert_eq!(store.len(), before),
                }
            }
            let results = store.results();
            for pair in results.windows(2) {
                prop_assert!((pair[0].date, pair[0].dbcache()) <= (pair[1].date, pair[1].dbcache()));
            }
            for (i, a) in results.iter().enumerate() {
                for b in &results[i + 1..] {
                    prop_assert!(!a.same_slot(b));
                }
            }
        }
    }
}
