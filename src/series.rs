//! Series identity: which measurements are comparable, and how to show them.
//!
//! Hosts report free-form CPU, RAM, kernel and disk strings. There is no
//! canonical hardware id, so identity is inferred by normalizing those strings
//! through a [`NormalizationPolicy`]. Two measurements belong to the same series
//! iff their [`series_key`]s are byte-identical. Labels are cosmetic and must not
//! be compared.

use crate::attributes::ConfigAttributes;
use crate::machine::MachineAttributes;
use md5::{Digest, Md5};
use regex::Regex;
use std::sync::OnceLock;

/// Number of distinct chart colors.
pub const NUM_COLORS: usize = 10;

/// Colorblind-friendly palette indexed by [`color_index`].
pub const PALETTE: [&str; NUM_COLORS] = [
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A", "#19D3F3", "#FF6692", "#B6E880",
    "#FF97FF", "#FECB52",
];

/// Separator between series key segments.
pub const KEY_DELIMITER: char = '|';

const DEFAULT_CPU_BOILERPLATE: &[&str] = &["processor", "(r)", "(tm)", "amd", "intel"];
const DEFAULT_CPU_LABEL_PATTERNS: &[&str] = &[
    r"(?i)Ryzen \d+ \d+",
    r"(?i)EPYC \d+",
    r"(?i)M\d+ (?:Pro|Max|Ultra)?",
    r"(?i)i[3579]-\d+\w*",
    r"(?i)Xeon \w+-\d+",
];
const DEFAULT_CPU_LABEL_STOPWORDS: &[&str] = &["processor", "core", "amd", "intel", "apple"];

/// Matching vocabulary and bucket widths used to build series identity.
///
/// Extending the vocabulary (a new vendor token, a new disk class) is a change
/// to this table only.
#[derive(Debug, Clone)]
pub struct NormalizationPolicy {
    /// Tokens removed from the lower-cased CPU model before fingerprinting.
    pub cpu_boilerplate: Vec<String>,
    /// Maximum length of the CPU fingerprint, in characters.
    pub cpu_fingerprint_len: usize,
    /// RAM at or below this size is bucketed with `ram_small_step_gb`.
    pub ram_small_tier_max_gb: f64,
    pub ram_small_step_gb: f64,
    pub ram_large_step_gb: f64,
    /// Ordered `(substring, class)` pairs; first match wins.
    pub disk_classes: Vec<(String, String)>,
    /// Prefix length kept for disks that match no class.
    pub disk_fallback_len: usize,
    /// Prefix in front of the cache size inside the key.
    pub cache_tag: String,
    /// Patterns tried in order to extract a short CPU name for labels.
    pub cpu_label_patterns: Vec<Regex>,
    pub cpu_label_stopwords: Vec<String>,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            cpu_boilerplate: DEFAULT_CPU_BOILERPLATE.iter().map(ToString::to_string).collect(),
            cpu_fingerprint_len: 25,
            ram_small_tier_max_gb: 32.0,
            ram_small_step_gb: 8.0,
            ram_large_step_gb: 32.0,
            disk_classes: ["nvme", "ssd", "hdd"]
                .iter()
                .map(|c| ((*c).to_string(), (*c).to_string()))
                .collect(),
            disk_fallback_len: 10,
            cache_tag: "db".to_string(),
            cpu_label_patterns: compile_patterns(DEFAULT_CPU_LABEL_PATTERNS),
            cpu_label_stopwords: DEFAULT_CPU_LABEL_STOPWORDS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Machine attributes reduced to their grouping-relevant form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMachine {
    pub cpu: String,
    pub ram_gb: u64,
    pub disk: String,
    pub kernel: String,
}

/// Pure series-identity functions bound to one normalization policy.
#[derive(Debug, Clone, Default)]
pub struct SeriesIdentity {
    policy: NormalizationPolicy,
}

impl SeriesIdentity {
    pub const fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    /// Shared instance using the default policy.
    pub fn standard() -> &'static Self {
        static STANDARD: OnceLock<SeriesIdentity> = OnceLock::new();
        STANDARD.get_or_init(Self::default)
    }

    pub const fn policy(&self) -> &NormalizationPolicy {
        &self.policy
    }

    pub fn normalize_machine(&self, machine: &MachineAttributes) -> NormalizedMachine {
        NormalizedMachine {
            cpu: self.cpu_fingerprint(machine.cpu_model.as_deref().unwrap_or("unknown")),
            ram_gb: self.bucket_ram(machine.total_ram_gb.unwrap_or(0.0)),
            disk: self.disk_class(machine.disk_type.as_deref().unwrap_or("unknown")),
            kernel: kernel_major_minor(machine.os_kernel.as_deref().unwrap_or("unknown")),
        }
    }

    /// Short alphanumeric CPU fingerprint, e.g. `ryzen777008core`.
    pub fn cpu_fingerprint(&self, cpu_model: &str) -> String {
        let mut model = cpu_model.to_lowercase();
        for token in &self.policy.cpu_boilerplate {
            model = model.replace(token.as_str(), "");
        }
        model
            .split_whitespace()
            .collect::<String>()
            .replace('-', "")
            .chars()
            .take(self.policy.cpu_fingerprint_len)
            .collect()
    }

    /// Bucket reported RAM so small reporting differences land in one tier.
    ///
    /// Halfway values round to the even multiple.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bucket_ram(&self, ram_gb: f64) -> u64 {
        if !ram_gb.is_finite() || ram_gb <= 0.0 {
            return 0;
        }
        let step = if ram_gb <= self.policy.ram_small_tier_max_gb {
            self.policy.ram_small_step_gb
        } else {
            self.policy.ram_large_step_gb
        };
        ((ram_gb / step).round_ties_even() * step) as u64
    }

    pub fn disk_class(&self, disk_type: &str) -> String {
        let lower = disk_type.to_lowercase();
        self.policy
            .disk_classes
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map_or_else(
                || lower.chars().take(self.policy.disk_fallback_len).collect(),
                |(_, class)| class.clone(),
            )
    }

    /// Canonical grouping key:
    /// `{cpu}|{ram}GB|{disk}|{kernel}|db{dbcache}|{start}-{stop}`.
    pub fn series_key(&self, config: &ConfigAttributes, machine: &MachineAttributes) -> String {
        let normalized = self.normalize_machine(machine);
        let segments = [
            normalized.cpu,
            format!("{}GB", normalized.ram_gb),
            normalized.disk,
            normalized.kernel,
            format!("{}{}", self.policy.cache_tag, config.cache_size()),
            format!("{}-{}", config.start_height(), config.stop_height()),
        ];
        segments.join(&KEY_DELIMITER.to_string())
    }

    /// Legend text, e.g. `x86_64, Ryzen 7 7700, 62GB RAM, 840000-855000, dbcache 450`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn series_label(&self, config: &ConfigAttributes, machine: &MachineAttributes) -> String {
        let arch = machine.architecture.as_deref().unwrap_or("unknown");
        let cpu_short = self.cpu_short_name(machine.cpu_model.as_deref().unwrap_or("Unknown"));
        let ram = machine.total_ram_gb.unwrap_or(0.0);
        let ram_str = if ram == 0.0 {
            "?GB RAM".to_string()
        } else {
            format!("{}GB RAM", ram.trunc() as i64)
        };
        let (start, stop) = (config.start_height(), config.stop_height());
        let range = if start != 0 && stop != 0 {
            format!("{start}-{stop}")
        } else {
            "?-?".to_string()
        };
        format!(
            "{arch}, {cpu_short}, {ram_str}, {range}, dbcache {}",
            config.cache_size()
        )
    }

    /// Readable CPU name for labels, e.g. `Ryzen 7 7700` or `i7-12700K`.
    pub fn cpu_short_name(&self, cpu_model: &str) -> String {
        if let Some(found) = self
            .policy
            .cpu_label_patterns
            .iter()
            .find_map(|re| re.find(cpu_model))
        {
            return found.as_str().to_string();
        }

        let cleaned = cpu_model.replace("(R)", "").replace("(TM)", "");
        let meaningful: Vec<&str> = cleaned
            .split_whitespace()
            .filter(|word| {
                let lower = word.to_lowercase();
                !self.policy.cpu_label_stopwords.iter().any(|s| *s == lower)
            })
            .take(2)
            .collect();
        if meaningful.is_empty() {
            cpu_model.chars().take(20).collect()
        } else {
            meaningful.join(" ")
        }
    }
}

/// Reduce a kernel release to `major.minor`.
pub fn kernel_major_minor(kernel: &str) -> String {
    let mut parts = kernel.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => {
            let minor = minor.split('-').next().unwrap_or(minor);
            format!("{major}.{minor}")
        }
        _ => kernel.split('-').next().unwrap_or(kernel).to_string(),
    }
}

/// Deterministic palette slot for a series key.
///
/// The first four bytes of the key's MD5 digest, read little-endian, modulo
/// [`NUM_COLORS`]. Distinct series may share a color.
pub fn color_index(key: &str) -> usize {
    let digest = Md5::digest(key.as_bytes());
    let prefix = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix as usize % NUM_COLORS
}

pub fn color_for_index(index: usize) -> &'static str {
    PALETTE[index % NUM_COLORS]
}

pub fn series_key(config: &ConfigAttributes, machine: &MachineAttributes) -> String {
    SeriesIdentity::standard().series_key(config, machine)
}

pub fn series_label(config: &ConfigAttributes, machine: &MachineAttributes) -> String {
    SeriesIdentity::standard().series_label(config, machine)
}

pub fn normalize_machine(machine: &MachineAttributes) -> NormalizedMachine {
    SeriesIdentity::standard().normalize_machine(machine)
}
