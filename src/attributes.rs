//! Configuration attributes persisted with every measurement.

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Instrumentation mode recorded when none was given.
pub const UNINSTRUMENTED: &str = "uninstrumented";
pub const INSTRUMENTED: &str = "instrumented";

/// Node flags that affected a run. `dbcache` is the cache-size parameter that
/// participates in deduplication and sorting; `stopatheight` closes the
/// workload range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeArgs {
    #[serde(default)]
    pub dbcache: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopatheight: Option<u64>,
    /// Passthrough flags (chain, connect, prune, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The software-facing configuration of one measurement.
///
/// Serialized as the nested `config` object of a history result. Only the
/// fields the engine reads are typed; everything else round-trips through
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_template: Option<String>,
    #[serde(default)]
    pub bitcoind: NodeArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrumentation: Option<String>,
    /// Debug categories enabled in instrumented mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instrumented_debug: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConfigAttributes {
    /// Attributes for a result that only recorded its cache size.
    pub fn legacy(dbcache: u64) -> Self {
        Self {
            bitcoind: NodeArgs {
                dbcache,
                ..NodeArgs::default()
            },
            instrumentation: Some(UNINSTRUMENTED.to_string()),
            ..Self::default()
        }
    }

    pub const fn cache_size(&self) -> u64 {
        self.bitcoind.dbcache
    }

    #[must_use]
    pub const fn with_cache_size(mut self, dbcache: u64) -> Self {
        self.bitcoind.dbcache = dbcache;
        self
    }

    #[must_use]
    pub fn with_instrumentation(mut self, mode: impl Into<String>) -> Self {
        self.instrumentation = Some(mode.into());
        self
    }

    pub fn start_height(&self) -> u64 {
        self.start_height.unwrap_or(0)
    }

    pub fn stop_height(&self) -> u64 {
        self.bitcoind.stopatheight.unwrap_or(0)
    }

    pub fn instrumentation(&self) -> &str {
        self.instrumentation.as_deref().unwrap_or(UNINSTRUMENTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_config_roundtrips_unknown_fields() {
        let value = json!({
            "start_height": 840_000,
            "runs": 2,
            "bitcoind": {"dbcache": 450, "stopatheight": 855_000, "chain": "main", "prune": 10000},
            "instrumentation": "uninstrumented",
            "notes": {"operator": "nightly"}
        });
        let config: ConfigAttributes = serde_json::from_value(value.clone()).expect("parse");
        assert_eq!(config.cache_size(), 450);
        assert_eq!(config.start_height(), 840_000);
        assert_eq!(config.stop_height(), 855_000);
        assert_eq!(config.bitcoind.extra["chain"], json!("main"));
        assert_eq!(serde_json::to_value(&config).expect("serialize"), value);
    }

    #[test]
    fn missing_fields_default_to_zero_range() {
        let config: ConfigAttributes = serde_json::from_value(json!({})).expect("parse");
        assert_eq!(config.cache_size(), 0);
        assert_eq!(config.start_height(), 0);
        assert_eq!(config.stop_height(), 0);
        assert_eq!(config.instrumentation(), UNINSTRUMENTED);
    }

    #[test]
    fn legacy_sets_cache_and_mode() {
        let config = ConfigAttributes::legacy(32000);
        assert_eq!(config.cache_size(), 32000);
        assert_eq!(config.instrumentation.as_deref(), Some(UNINSTRUMENTED));
    }
}
