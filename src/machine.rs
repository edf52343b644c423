//! Machine attributes captured alongside each measurement.
//!
//! Values are kept exactly as reported by the host. Normalization into a
//! comparable identity happens in [`crate::series`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Command;

const UNKNOWN: &str = "Unknown";

/// Raw, free-form facts about the host that produced a measurement.
///
/// Every field is optional on disk: results captured before machine detection
/// existed carry an empty object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ram_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    /// Fields written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MachineAttributes {
    /// Probe the current host.
    ///
    /// Each probe degrades to `Unknown` (or zero) when its command or file is
    /// unavailable, so detection never fails.
    pub fn detect() -> Self {
        let (cpu_model, architecture, cpu_cores) = parse_lscpu(&run_command("lscpu", &[]));
        let architecture = architecture
            .or_else(|| non_empty(run_command("uname", &["-m"])))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let os_kernel = non_empty(run_command("uname", &["-r"])).unwrap_or_else(|| UNKNOWN.into());
        let total_ram_gb = std::fs::read_to_string("/proc/meminfo")
            .map_err(|err| tracing::debug!(error = %err, "Failed to read /proc/meminfo"))
            .ok()
            .and_then(|content| parse_meminfo_gb(&content))
            .unwrap_or(0.0);
        let disk_type = classify_lsblk(&run_command("lsblk", &["-d", "-o", "NAME,ROTA,MODEL", "-n"]));

        let specs = Self {
            cpu_model: Some(cpu_model.unwrap_or_else(|| UNKNOWN.to_string())),
            architecture: Some(architecture),
            cpu_cores: Some(cpu_cores.unwrap_or(0)),
            total_ram_gb: Some(total_ram_gb),
            os_kernel: Some(os_kernel),
            disk_type: Some(disk_type.to_string()),
            extra: Map::new(),
        };

        tracing::info!(
            cpu = specs.cpu_model.as_deref().unwrap_or(UNKNOWN),
            arch = specs.architecture.as_deref().unwrap_or(UNKNOWN),
            cores = specs.cpu_cores.unwrap_or(0),
            ram_gb = total_ram_gb,
            disk = specs.disk_type.as_deref().unwrap_or(UNKNOWN),
            kernel = specs.os_kernel.as_deref().unwrap_or(UNKNOWN),
            "Detected machine"
        );
        specs
    }

    /// True when nothing at all is known about the host.
    pub fn is_empty(&self) -> bool {
        self.cpu_model.is_none()
            && self.architecture.is_none()
            && self.cpu_cores.is_none()
            && self.total_ram_gb.is_none()
            && self.os_kernel.is_none()
            && self.disk_type.is_none()
            && self.extra.is_empty()
    }

    /// Short machine id such as `amd64` or `arm64`.
    pub fn machine_id(&self) -> String {
        machine_id(self.architecture.as_deref().unwrap_or("unknown"))
    }
}

/// Map an architecture string to its short id.
pub fn machine_id(architecture: &str) -> String {
    let arch = architecture.to_ascii_lowercase();
    match arch.as_str() {
        "x86_64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" => "arm64".to_string(),
        _ => arch,
    }
}

fn run_command(program: &str, args: &[&str]) -> String {
    match Command::new(program).args(args).output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        Err(err) => {
            tracing::debug!(program, error = %err, "Machine probe failed");
            String::new()
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Extract model name, architecture and logical CPU count from `lscpu` output.
pub fn parse_lscpu(output: &str) -> (Option<String>, Option<String>, Option<u32>) {
    let mut cpu_model = None;
    let mut architecture = None;
    let mut cpu_cores = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Model name" => cpu_model = Some(value.to_string()),
            "Architecture" => architecture = Some(value.to_string()),
            "CPU(s)" => cpu_cores = value.parse().ok(),
            _ => {}
        }
    }

    (cpu_model, architecture, cpu_cores)
}

/// Total memory in GB (one decimal) from `/proc/meminfo`.
pub fn parse_meminfo_gb(content: &str) -> Option<f64> {
    let line = content.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    #[allow(clippy::cast_precision_loss)]
    let gb = kb as f64 / (1024.0 * 1024.0);
    Some((gb * 10.0).round() / 10.0)
}

/// Fastest disk class visible in `lsblk -d -o NAME,ROTA,MODEL -n` output.
pub fn classify_lsblk(output: &str) -> &'static str {
    let mut has_nvme = false;
    let mut has_ssd = false;
    let mut has_hdd = false;

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(rota)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(rota) = rota.parse::<u8>() else {
            continue;
        };
        if name.starts_with("nvme") {
            has_nvme = true;
        } else if rota == 0 {
            has_ssd = true;
        } else if rota == 1 {
            has_hdd = true;
        }
    }

    if has_nvme {
        "NVMe SSD"
    } else if has_ssd {
        "SATA SSD"
    } else if has_hdd {
        "HDD"
    } else {
        UNKNOWN
    }
}
