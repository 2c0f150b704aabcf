//! Per-device YAML snapshots for external consumers.
//!
//! Each device is written to `<data_dir>/<id>.yml` via a temporary
//! `<id>.yml.new` file and a rename, so readers never observe a partial
//! document. Snapshots of devices that are no longer present are removed.

use std::{
    collections::BTreeSet,
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;

use crate::device::{Device, DeviceId, DeviceMap};

/// Serialized form of a device, keyed the way existing dashboards read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub id: DeviceId,
    pub name: String,
    pub has_fan: bool,
    pub min_power_limit_f: f64,
    pub min_power_limit: String,
    pub max_power_limit_f: f64,
    pub max_power_limit: String,
    pub default_power_limit_f: Option<f64>,
    pub default_power_limit: Option<String>,
    pub gpu_t_i: u32,
    pub gpu_t: String,
    pub power_f: f64,
    pub power: String,
    pub limit_f: f64,
    pub limit: String,
    pub gpu_u_i: u32,
    pub gpu_u: String,
    pub mem_u_i: u32,
    pub mem_u: String,
    pub gpu_f: String,
    pub mem_f: String,
    pub fan: Option<u8>,
    pub ps: Option<String>,
}

fn watts(value: f64) -> String {
    format!("{} W", value.trunc() as i64)
}

impl From<&Device> for SnapshotRecord {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id,
            name: device.name.clone(),
            has_fan: device.has_fan,
            min_power_limit_f: device.min_power_limit,
            min_power_limit: watts(device.min_power_limit),
            max_power_limit_f: device.max_power_limit,
            max_power_limit: watts(device.max_power_limit),
            default_power_limit_f: device.default_power_limit,
            default_power_limit: device.default_power_limit.map(watts),
            gpu_t_i: device.temperature,
            gpu_t: format!("{} C", device.temperature),
            power_f: device.power_draw,
            power: format!("{:.2} W", device.power_draw),
            limit_f: device.power_limit,
            limit: watts(device.power_limit),
            gpu_u_i: device.utilization.gpu,
            gpu_u: format!("{} %", device.utilization.gpu),
            mem_u_i: device.utilization.memory,
            mem_u: format!("{} %", device.utilization.memory),
            gpu_f: format!("{} MHz", device.clocks.graphics_mhz),
            mem_f: format!("{} MHz", device.clocks.memory_mhz),
            fan: device.fan_speed,
            ps: device.performance_state.map(|n| format!("P{n}")),
        }
    }
}

/// Writes and prunes per-device snapshot files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: DeviceId) -> PathBuf {
        self.dir.join(format!("{id}.yml"))
    }

    /// Atomically replaces every device's snapshot and removes stale ones.
    pub fn write_all(&self, devices: &DeviceMap) -> Result<()> {
        for device in devices.values() {
            self.write(device)?;
        }
        self.prune(&devices.keys().copied().collect())
    }

    fn write(&self, device: &Device) -> Result<()> {
        let yaml = serde_yaml::to_string(&SnapshotRecord::from(device))
            .with_context(|| format!("Failed to serialize snapshot for device {}", device.id))?;

        let target = self.path_for(device.id);
        let tmp_path = target.with_extension("yml.new");
        fs::write(&tmp_path, yaml)
            .with_context(|| format!("Failed to write temporary snapshot to {}", tmp_path.display()))?;

        fs::rename(&tmp_path, &target)
            .with_context(|| format!("Failed to move snapshot to {}", target.display()))
    }

    fn prune(&self, keep: &BTreeSet<DeviceId>) -> Result<()> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<DeviceId>().ok())
            else {
                continue;
            };
            if !keep.contains(&id) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove stale snapshot {}: {e}", path.display());
                }
            }
        }
        Ok(())
    }
}
