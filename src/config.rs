//! Tool settings loading and layering.
//!
//! Layers, lowest to highest priority: built-in defaults, `bench.toml`, the
//! selected profile, `BENCH_*` environment variables, CLI flags.

use crate::attributes::ConfigAttributes;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SETTINGS_FILE: &str = "bench.toml";
pub const DEFAULT_PROFILE: &str = "full";
pub const PROFILES: [&str; 3] = ["quick", "full", "ci"];
pub const CHAINS: [&str; 4] = ["main", "testnet", "signet", "regtest"];

const DEFAULT_CHAIN: &str = "main";
const DEFAULT_DBCACHE: i64 = 450;
const DEFAULT_STOP_HEIGHT: i64 = 855_000;
const DEFAULT_RUNS: i64 = 3;
const DEFAULT_OUTPUT_DIR: &str = "./bench-output";
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const HISTORY_FILE_NAME: &str = "history.json";
const CI_CONNECT_PEER: &str = "148.251.128.115:33333";

/// One settings layer. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsLayer {
    pub chain: Option<String>,
    pub dbcache: Option<i64>,
    pub stop_height: Option<i64>,
    pub runs: Option<i64>,
    pub connect: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub lock_timeout_ms: Option<u64>,
}

impl SettingsLayer {
    /// Merge two layers, with `other` taking precedence.
    pub fn merge(base: Self, other: Self) -> Self {
        Self {
            chain: other.chain.or(base.chain),
            dbcache: other.dbcache.or(base.dbcache),
            stop_height: other.stop_height.or(base.stop_height),
            runs: other.runs.or(base.runs),
            connect: other.connect.or(base.connect),
            output_dir: other.output_dir.or(base.output_dir),
            history_file: other.history_file.or(base.history_file),
            lock_timeout_ms: other.lock_timeout_ms.or(base.lock_timeout_ms),
        }
    }

    /// Overrides carried by a named profile. `None` for unknown names.
    pub fn profile(name: &str) -> Option<Self> {
        let (stop_height, runs) = match name {
            "quick" => (1_500, 1),
            "full" | "ci" => (DEFAULT_STOP_HEIGHT, DEFAULT_RUNS),
            _ => return None,
        };
        Some(Self {
            stop_height: Some(stop_height),
            runs: Some(runs),
            connect: (name == "ci").then(|| CI_CONNECT_PEER.to_string()),
            ..Self::default()
        })
    }

    /// Load a `bench.toml`. Its `[defaults]` and `[paths]` tables are
    /// flattened, `[paths]` winning. A missing or blank file is an empty layer.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let file: SettingsFile = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(Self::merge(file.defaults, file.paths))
    }

    /// Layer built from `BENCH_*` variables.
    pub fn from_env<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            chain: non_empty(get_env("BENCH_CHAIN")),
            dbcache: parse_env("BENCH_DBCACHE", &get_env),
            stop_height: parse_env("BENCH_STOP_HEIGHT", &get_env),
            runs: parse_env("BENCH_RUNS", &get_env),
            // An empty peer is meaningful: use the public network.
            connect: get_env("BENCH_CONNECT"),
            output_dir: non_empty(get_env("BENCH_OUTPUT_DIR")).map(PathBuf::from),
            history_file: non_empty(get_env("BENCH_HISTORY_FILE")).map(PathBuf::from),
            lock_timeout_ms: parse_env("BENCH_LOCK_TIMEOUT_MS", &get_env),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    defaults: SettingsLayer,
    paths: SettingsLayer,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_env<F, T>(var: &str, get_env: &F) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = non_empty(get_env(var))?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(var, value = raw.as_str(), error = %err, "Ignoring invalid environment value");
            None
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub profile: String,
    pub chain: String,
    pub dbcache: i64,
    pub stop_height: i64,
    pub runs: i64,
    /// Empty means the public P2P network.
    pub connect: String,
    pub output_dir: PathBuf,
    pub history_file: PathBuf,
    pub lock_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(DEFAULT_PROFILE, SettingsLayer::default())
    }
}

impl Settings {
    /// Load from `settings_path` (or `./bench.toml`), the process
    /// environment and `cli` overrides.
    pub fn load(
        settings_path: Option<&Path>,
        profile: Option<&str>,
        cli: SettingsLayer,
    ) -> Result<Self> {
        Self::load_with_env(settings_path, profile, cli, env_lookup)
    }

    pub fn load_with_env<F>(
        settings_path: Option<&Path>,
        profile: Option<&str>,
        cli: SettingsLayer,
        get_env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = settings_path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
        let profile = profile.unwrap_or(DEFAULT_PROFILE);

        let mut layer = SettingsLayer::load_from_path(path)?;
        if let Some(overrides) = SettingsLayer::profile(profile) {
            layer = SettingsLayer::merge(layer, overrides);
        }
        layer = SettingsLayer::merge(layer, SettingsLayer::from_env(get_env));
        layer = SettingsLayer::merge(layer, cli);

        let settings = Self::resolve(profile, layer);
        tracing::debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    /// Like [`Self::load`], failing with every validation problem at once.
    pub fn load_validated(
        settings_path: Option<&Path>,
        profile: Option<&str>,
        cli: SettingsLayer,
    ) -> Result<Self> {
        let settings = Self::load(settings_path, profile, cli)?;
        let errors = settings.validate();
        if errors.is_empty() {
            Ok(settings)
        } else {
            let path = settings_path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
            Err(Error::invalid_config(path.display().to_string(), errors))
        }
    }

    fn resolve(profile: &str, layer: SettingsLayer) -> Self {
        let output_dir = layer
            .output_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let history_file = layer
            .history_file
            .unwrap_or_else(|| output_dir.join(HISTORY_FILE_NAME));
        Self {
            profile: profile.to_string(),
            chain: layer.chain.unwrap_or_else(|| DEFAULT_CHAIN.to_string()),
            dbcache: layer.dbcache.unwrap_or(DEFAULT_DBCACHE),
            stop_height: layer.stop_height.unwrap_or(DEFAULT_STOP_HEIGHT),
            runs: layer.runs.unwrap_or(DEFAULT_RUNS),
            connect: layer.connect.unwrap_or_default(),
            output_dir,
            history_file,
            lock_timeout_ms: layer.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }

    /// Every problem with the resolved settings; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !PROFILES.contains(&self.profile.as_str()) {
            errors.push(format!(
                "unknown profile: {} (expected one of {})",
                self.profile,
                PROFILES.join(", ")
            ));
        }
        if self.stop_height < 1 {
            errors.push("stop_height must be positive".to_string());
        }
        if self.dbcache < 1 {
            errors.push("dbcache must be positive".to_string());
        }
        if self.runs < 1 {
            errors.push("runs must be positive".to_string());
        }
        if !CHAINS.contains(&self.chain.as_str()) {
            errors.push(format!("invalid chain: {}", self.chain));
        }
        errors
    }

    pub fn history_path(&self) -> &Path {
        &self.history_file
    }

    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// The default cache size as a node flag value.
    pub fn default_dbcache(&self) -> Option<u64> {
        u64::try_from(self.dbcache).ok().filter(|v| *v > 0)
    }

    /// The `config` object of a run recorded without a benchmark document.
    ///
    /// The node ran with these settings, so the stop height lands in the
    /// series key (`0-{stop_height}`) and the chain and peer are kept as
    /// passthrough flags. An empty `connect` is not recorded.
    pub fn config_attributes(&self, dbcache: u64) -> ConfigAttributes {
        let mut config = ConfigAttributes::legacy(dbcache);
        config.runs = u32::try_from(self.runs).ok().filter(|runs| *runs > 0);
        config.bitcoind.stopatheight = u64::try_from(self.stop_height).ok().filter(|h| *h > 0);
        config
            .bitcoind
            .extra
            .insert("chain".to_string(), Value::String(self.chain.clone()));
        if !self.connect.is_empty() {
            config
                .bitcoind
                .extra
                .insert("connect".to_string(), Value::String(self.connect.clone()));
        }
        config
    }
}
