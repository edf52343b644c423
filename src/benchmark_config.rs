//! Portable benchmark configuration loaded from TOML.
//!
//! ```toml
//! [benchmark]
//! start_height = 840000
//! runs = 2
//!
//! [bitcoind]
//! stopatheight = 855000
//! chain = "main"
//! prune = 10000
//!
//! [bitcoind.matrix]
//! dbcache = [450, 32000]
//! instrumented = [false, true]
//!
//! [bitcoind.instrumented]
//! debug = ["coindb", "leveldb", "bench", "validation"]
//! ```

use crate::attributes::{ConfigAttributes, INSTRUMENTED, NodeArgs, UNINSTRUMENTED};
use crate::error::{Error, Result};
use crate::matrix::{Matrix, MatrixEntry, MatrixValue, format_float};
use serde::Deserialize;
use serde_json::Map;
use std::path::{Path, PathBuf};

/// Matrix parameter that toggles instrumentation rather than a node flag.
pub const INSTRUMENTED_PARAM: &str = "instrumented";
const CACHE_PARAM: &str = "dbcache";
const STOP_PARAM: &str = "stopatheight";

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BenchmarkSection {
    start_height: i64,
    runs: i64,
}

impl Default for BenchmarkSection {
    fn default() -> Self {
        Self {
            start_height: 0,
            runs: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstrumentedSection {
    #[serde(default)]
    debug: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeSection {
    #[serde(default)]
    matrix: Matrix,
    #[serde(default)]
    instrumented: InstrumentedSection,
    #[serde(flatten)]
    args: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
struct RawBenchmarkFile {
    #[serde(default)]
    benchmark: BenchmarkSection,
    #[serde(default)]
    bitcoind: NodeSection,
}

/// A shareable benchmark specification.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    pub start_height: i64,
    pub runs: i64,
    pub matrix: Matrix,
    /// Node flags in document order. Empty strings mean "not set".
    pub node_args: toml::Table,
    pub instrumented_debug: Vec<String>,
    pub source_file: Option<PathBuf>,
}

impl BenchmarkConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawBenchmarkFile = toml::from_str(content)?;
        Ok(Self {
            start_height: raw.benchmark.start_height,
            runs: raw.benchmark.runs,
            matrix: raw.bitcoind.matrix,
            node_args: raw.bitcoind.args,
            instrumented_debug: raw.bitcoind.instrumented.debug,
            source_file: None,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("Failed to read benchmark config {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|err| {
            Error::config(format!("Failed to parse benchmark config {}: {err}", path.display()))
        })?;
        config.source_file = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            start_height = config.start_height,
            runs = config.runs,
            "Loaded benchmark config"
        );
        if !config.matrix.is_empty() {
            let params: Vec<_> = config.matrix.params().iter().map(|p| p.name.as_str()).collect();
            tracing::info!(?params, "Matrix parameters");
        }
        Ok(config)
    }

    /// Load and fail with every validation message at once.
    pub fn load_validated(path: &Path) -> Result<Self> {
        let config = Self::load(path)?;
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(Error::invalid_config(path.display().to_string(), errors))
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.start_height < 0 {
            errors.push("start_height must be non-negative".to_string());
        }
        if self.runs < 1 {
            errors.push("runs must be positive".to_string());
        }
        errors.extend(self.matrix.validate());
        errors
    }

    pub fn expand_matrix(&self) -> Vec<MatrixEntry> {
        self.matrix.expand()
    }

    pub fn matrix_entry(&self, name: &str) -> Option<MatrixEntry> {
        self.matrix.entry(name)
    }

    pub fn matrix_names(&self) -> Vec<String> {
        self.matrix.names()
    }

    pub fn node_arg(&self, key: &str) -> Option<&toml::Value> {
        self.node_args.get(key)
    }

    /// Node command with `{datadir}` and one `{param}` placeholder per matrix
    /// parameter, followed by every set flag.
    pub fn command_template(&self) -> String {
        let mut parts = vec!["bitcoind".to_string(), "-datadir={datadir}".to_string()];
        for param in self.matrix.params() {
            if param.name != INSTRUMENTED_PARAM {
                parts.push(format!("-{0}={{{0}}}", param.name));
            }
        }
        parts.extend(
            self.node_args
                .iter()
                .filter_map(|(key, value)| format_node_arg(key, value)),
        );
        parts.join(" ")
    }

    /// The `config` object persisted with a result run under `entry`.
    pub fn to_config_attributes(&self, entry: &MatrixEntry) -> ConfigAttributes {
        let mut bitcoind = node_args_from_table(&self.node_args);
        for (name, value) in entry.values() {
            if name == INSTRUMENTED_PARAM {
                continue;
            }
            apply_node_value(&mut bitcoind, name, value.to_json());
        }

        let instrumented = entry
            .get(INSTRUMENTED_PARAM)
            .and_then(MatrixValue::as_bool)
            .unwrap_or(false);

        ConfigAttributes {
            start_height: u64::try_from(self.start_height).ok(),
            runs: u32::try_from(self.runs).ok(),
            command_template: Some(self.command_template()),
            bitcoind,
            matrix: (!self.matrix.is_empty()).then(|| self.matrix.clone()),
            instrumentation: Some(
                if instrumented { INSTRUMENTED } else { UNINSTRUMENTED }.to_string(),
            ),
            instrumented_debug: if instrumented {
                self.instrumented_debug.clone()
            } else {
                Vec::new()
            },
            extra: Map::new(),
        }
    }
}

fn is_unset(value: &toml::Value) -> bool {
    matches!(value, toml::Value::String(s) if s.is_empty())
}

fn format_node_arg(key: &str, value: &toml::Value) -> Option<String> {
    match value {
        _ if is_unset(value) => None,
        toml::Value::Boolean(flag) => Some(format!("-{key}={}", u8::from(*flag))),
        toml::Value::String(s) => Some(format!("-{key}={s}")),
        toml::Value::Integer(n) => Some(format!("-{key}={n}")),
        toml::Value::Float(x) => Some(format!("-{key}={}", format_float(*x))),
        other => Some(format!("-{key}={other}")),
    }
}

fn node_args_from_table(table: &toml::Table) -> NodeArgs {
    let mut args = NodeArgs::default();
    for (key, value) in table {
        if is_unset(value) {
            continue;
        }
        match serde_json::to_value(value) {
            Ok(json) => apply_node_value(&mut args, key, json),
            Err(err) => tracing::warn!(key = key.as_str(), error = %err, "Skipping node arg"),
        }
    }
    args
}

fn apply_node_value(args: &mut NodeArgs, key: &str, value: serde_json::Value) {
    match key {
        CACHE_PARAM => match json_as_u64(&value) {
            Some(dbcache) => args.dbcache = dbcache,
            None => tracing::warn!(value = %value, "Ignoring non-numeric dbcache"),
        },
        STOP_PARAM => match json_as_u64(&value) {
            Some(stop) => args.stopatheight = Some(stop),
            None => tracing::warn!(value = %value, "Ignoring non-numeric stopatheight"),
        },
        _ => {
            args.extra.insert(key.to_string(), value);
        }
    }
}

fn json_as_u64(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
