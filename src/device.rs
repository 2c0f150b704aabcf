//! Device data model shared by the gateway, the control engine and the snapshot store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Driver-assigned device index.
pub type DeviceId = u32;

/// Every device known to the daemon, keyed and ordered by id.
pub type DeviceMap = BTreeMap<DeviceId, Device>;

/// One physical accelerator.
///
/// Static attributes (name, fan capability, power-limit constraints) are fixed
/// at discovery. The remaining fields are refreshed once per tick by the
/// [`DeviceGateway`](crate::gateway::DeviceGateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub has_fan: bool,

    /// Minimum supported power limit in watts.
    pub min_power_limit: f64,
    /// Maximum supported power limit in watts.
    pub max_power_limit: f64,
    /// Factory default power limit in watts, if the driver reports one.
    pub default_power_limit: Option<f64>,

    /// Current core temperature in °C.
    pub temperature: u32,
    /// Current power draw in watts.
    pub power_draw: f64,
    /// Currently enforced power limit in watts.
    pub power_limit: f64,

    /// Last observed fan speed percentage. `None` without a fan.
    pub fan_speed: Option<u8>,
    /// Whether fan control is in manual (daemon-owned) mode.
    pub fan_control_manual: bool,

    #[serde(default)]
    pub utilization: Utilization,
    #[serde(default)]
    pub clocks: Clocks,
    /// Performance state index (`P0` is the fastest). `None` when unknown.
    #[serde(default)]
    pub performance_state: Option<u32>,
}

/// Utilization percentages reported alongside the thermal telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utilization {
    pub gpu: u32,
    pub memory: u32,
}

/// Current clock frequencies in MHz.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clocks {
    pub graphics_mhz: u32,
    pub memory_mhz: u32,
}

impl Device {
    /// Creates a device with the given static attributes and zeroed telemetry.
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            has_fan: false,
            min_power_limit: 0.0,
            max_power_limit: 0.0,
            default_power_limit: None,
            temperature: 0,
            power_draw: 0.0,
            power_limit: 0.0,
            fan_speed: None,
            fan_control_manual: false,
            utilization: Utilization::default(),
            clocks: Clocks::default(),
            performance_state: None,
        }
    }
}

/// Shortens a marketing name the way operators are used to reading it,
/// e.g. `"GeForce GTX 1080 Ti"` becomes `"1080Ti"`.
pub fn short_name(name: &str) -> String {
    name.strip_prefix("GeForce GTX ")
        .unwrap_or(name)
        .replace(' ', "")
}
