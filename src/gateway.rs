//! Device gateway abstraction: telemetry acquisition and hardware commands.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::device::{DeviceId, DeviceMap};

/// Trait for hardware back-ends the control loop drives.
///
/// Implementations own the device table: [`discover`](Self::discover) fills
/// it once, [`refresh`](Self::refresh) updates the mutable attributes, and
/// successful fan commands update the observed fan speeds. Every command
/// returns `Ok(())` only when the hardware accepted it.
///
/// # Example
///
/// ```no_run
/// use std::collections::BTreeMap;
/// use gpu_thermald::device::{DeviceId, DeviceMap};
/// use gpu_thermald::gateway::DeviceGateway;
/// use anyhow::Result;
///
/// #[derive(Debug, Default)]
/// struct NullGateway(DeviceMap);
///
/// #[async_trait::async_trait]
/// impl DeviceGateway for NullGateway {
///     async fn discover(&mut self) -> Result<DeviceMap> { Ok(self.0.clone()) }
///     async fn refresh(&mut self, _include_fans: bool) -> Result<DeviceMap> { Ok(self.0.clone()) }
///     async fn set_fan_control_state(&mut self, _id: DeviceId, _manual: bool) -> Result<()> { Ok(()) }
///     async fn apply_fan_speed_changes(&mut self, _speeds: &BTreeMap<DeviceId, u8>) -> Result<()> { Ok(()) }
///     async fn set_all_fans(&mut self, _speed: u8) -> Result<()> { Ok(()) }
///     async fn set_power_limit(&mut self, _id: DeviceId, _watts: f64) -> Result<()> { Ok(()) }
///     async fn persist(&self, _devices: &DeviceMap) -> Result<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait DeviceGateway: Send + core::fmt::Debug {
    /// Enumerates devices and probes static capabilities.
    async fn discover(&mut self) -> Result<DeviceMap>;

    /// Re-reads telemetry. Fan speeds are only queried when `include_fans`.
    async fn refresh(&mut self, include_fans: bool) -> Result<DeviceMap>;

    /// Switches a device between driver-automatic and manual fan control.
    async fn set_fan_control_state(&mut self, id: DeviceId, manual: bool) -> Result<()>;

    /// Applies several fan speeds as one command.
    async fn apply_fan_speed_changes(&mut self, speeds: &BTreeMap<DeviceId, u8>) -> Result<()>;

    /// Sets every fan to the same speed.
    async fn set_all_fans(&mut self, speed: u8) -> Result<()>;

    /// Sets a device's enforced power limit in watts.
    async fn set_power_limit(&mut self, id: DeviceId, watts: f64) -> Result<()>;

    /// Writes a snapshot of `devices` for external readers.
    async fn persist(&self, devices: &DeviceMap) -> Result<()>;

    /// Points fan tooling at another X display.
    fn set_display(&mut self, _display_no: u32) {}
}
