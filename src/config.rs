//! Policy configuration for the gpu_thermald daemon.
//!
//! Handles loading, validation and hot-reloading of the YAML policy document
//! that drives the fan ramp and the power-limit throttle.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::device::DeviceId;

/// Keys that must be present in every policy document.
pub const REQUIRED_KEYS: [&str; 3] = [
    "target_temperature",
    "fan_speed_temperature_ratio",
    "xorg_display_no",
];

/// Thermal control policy.
///
/// # Example
///
/// ```yaml
/// target_temperature: 70
/// fan_speed_temperature_ratio: 4
/// xorg_display_no: 0
/// temperature_limit: 80
/// ignore_devices: [2]
/// automatically_reload_config_on_change: true
/// informative: false
/// debug: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Temperature (°C) at and above which fans run at 100%.
    pub target_temperature: f64,

    /// Fan percentage removed per degree below the target.
    pub fan_speed_temperature_ratio: f64,

    /// X display the fan tooling talks to.
    pub xorg_display_no: u32,

    /// Temperature (°C) at which power-limit throttling starts.
    #[serde(default)]
    pub temperature_limit: Option<f64>,

    /// Devices left entirely alone by the daemon.
    #[serde(default)]
    pub ignore_devices: Option<Vec<DeviceId>>,

    /// Poll the policy file each tick and reload it when it changes.
    #[serde(default, deserialize_with = "null_as_false")]
    pub automatically_reload_config_on_change: bool,

    /// Log every fan speed change.
    #[serde(default, deserialize_with = "null_as_false")]
    pub informative: bool,

    /// Verbose logging, including external tool output.
    #[serde(default, deserialize_with = "null_as_false")]
    pub debug: bool,
}

/// A present but empty switch (`informative:`) reads as off.
fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl Policy {
    /// Effective throttle threshold, falling back to the default when unset.
    pub fn temperature_limit(&self) -> f64 {
        self.temperature_limit
            .filter(|limit| *limit != 0.0)
            .unwrap_or_else(defaults::temperature_limit)
    }

    /// Set of device ids excluded from control.
    pub fn ignored(&self) -> HashSet<DeviceId> {
        self.ignore_devices
            .iter()
            .flatten()
            .copied()
            .collect()
    }

    /// Checks that numeric values are usable by the control engine.
    pub fn validate(&self) -> Result<()> {
        if !self.target_temperature.is_finite() {
            bail!("target_temperature must be a finite number");
        }
        if !self.fan_speed_temperature_ratio.is_finite() || self.fan_speed_temperature_ratio < 0.0
        {
            bail!("fan_speed_temperature_ratio must be a non-negative number");
        }
        if !self.temperature_limit().is_finite() {
            bail!("temperature_limit must be a finite number");
        }
        Ok(())
    }
}

mod defaults {
    /// Default throttle threshold in °C.
    pub fn temperature_limit() -> f64 {
        80.0
    }
}

/// File-system locations used by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Single-instance lock file.
    pub pid_file: PathBuf,
    /// Directory receiving per-device YAML snapshots.
    pub data_dir: PathBuf,
    /// Directory holding optional `<id>.powerlimit` override files.
    pub override_dir: PathBuf,
}

impl Default for RuntimePaths {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("/var/run/gpustatd/gpustatd.pid"),
            data_dir: PathBuf::from("/var/run/gpustatd"),
            override_dir: PathBuf::from("/var/run/minotaur"),
        }
    }
}

fn locate_config() -> PathBuf {
    env::var_os("GPU_THERMALD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/gpustatd.conf"))
}

/// Owns the policy document and its on-disk source.
///
/// Keeps both the typed [`Policy`] and the raw YAML tree so that arbitrary
/// keys can be looked up with dotted paths.
///
/// # Example
///
/// ```no_run
/// use gpu_thermald::config::ConfigManager;
///
/// # fn example() -> anyhow::Result<()> {
/// let mut config = ConfigManager::load(None)?;
/// let target = config.policy().target_temperature;
/// if config.reload_if_changed()? {
///     println!("target moved from {target} to {}", config.policy().target_temperature);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    policy: Policy,
    raw: Value,
    path: PathBuf,
    mtime: Option<SystemTime>,
}

impl ConfigManager {
    /// Wraps an in-memory policy. The path is only used by later reloads.
    pub fn new(policy: Policy, path: PathBuf) -> Self {
        let raw = serde_yaml::to_value(&policy).unwrap_or(Value::Null);
        Self {
            policy,
            raw,
            path,
            mtime: None,
        }
    }

    /// Loads the policy from `path`, `$GPU_THERMALD_CONFIG`, or `/etc/gpustatd.conf`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(locate_config);

        info!("Loading config from: {}", path.display());
        let mtime = modified(&path)?;
        let (policy, raw) = Self::load_from_path(&path)?;

        Ok(Self {
            policy,
            raw,
            path,
            mtime: Some(mtime),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the policy file, replacing the current policy only on success.
    pub fn reload(&mut self) -> Result<()> {
        info!("Reloading config from: {}", self.path.display());
        let mtime = modified(&self.path)?;
        let (policy, raw) = Self::load_from_path(&self.path)?;

        self.policy = policy;
        self.raw = raw;
        self.mtime = Some(mtime);
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Reloads when the file's modification time differs from the last load.
    ///
    /// Returns `Ok(true)` when a new policy is in effect. The new mtime is
    /// remembered even when parsing fails, so a broken file is reported once
    /// rather than on every call.
    pub fn reload_if_changed(&mut self) -> Result<bool> {
        let mtime = modified(&self.path)?;
        if self.mtime == Some(mtime) {
            return Ok(false);
        }

        info!("Config file change detected, reloading");
        self.mtime = Some(mtime);
        let (policy, raw) = Self::load_from_path(&self.path)?;
        self.policy = policy;
        self.raw = raw;
        Ok(true)
    }

    /// Looks up a value by dotted path, e.g. `"fans.min"`.
    ///
    /// A key containing dots that does not resolve segment by segment is also
    /// tried verbatim.
    pub fn get(&self, key: &str) -> Option<&Value> {
        lookup(&self.raw, key)
    }

    /// Top-level keys present in the document.
    pub fn keys(&self) -> Vec<String> {
        self.raw
            .as_mapping()
            .map(|map| {
                map.keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn load_from_path(path: &Path) -> Result<(Policy, Value)> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let raw: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        let Some(map) = raw.as_mapping() else {
            bail!("Config file {} is not a key/value document", path.display());
        };

        for required in REQUIRED_KEYS {
            if !map.contains_key(required) {
                bail!("required config key missing: {required}");
            }
        }

        let policy: Policy = serde_yaml::from_value(raw.clone())
            .with_context(|| format!("Invalid policy in: {}", path.display()))?;

        policy
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok((policy, raw))
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("{} does not exist", path.display()))
}

fn lookup<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some((segment, rest)) = key.split_once('.') {
        if let Some(child) = data.get(segment) {
            if let Some(found) = lookup(child, rest) {
                return Some(found);
            }
        }
    }
    data.get(key)
}
