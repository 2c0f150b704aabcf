//! In-memory gateway used by unit tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::{
    device::{Device, DeviceId, DeviceMap},
    gateway::DeviceGateway,
};

/// Hardware commands the fake accepted, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandLog {
    pub control_states: Vec<(DeviceId, bool)>,
    pub fan_batches: Vec<BTreeMap<DeviceId, u8>>,
    pub all_fans: Vec<u8>,
    pub power_limits: Vec<(DeviceId, f64)>,
    pub refreshes: Vec<bool>,
    pub persisted: usize,
}

impl CommandLog {
    /// No hardware command was issued. Reads do not count.
    pub fn is_empty(&self) -> bool {
        self.control_states.is_empty()
            && self.fan_batches.is_empty()
            && self.all_fans.is_empty()
            && self.power_limits.is_empty()
    }
}

#[derive(Debug, Default)]
struct Inner {
    devices: DeviceMap,
    log: CommandLog,
    display: Option<u32>,
    fail_discover: bool,
    fail_refresh: bool,
    fail_power: bool,
    fail_fans: bool,
}

/// Gateway backed by a device table in memory.
///
/// Clones share state, so a test can keep a handle after boxing one into
/// the coordinator.
#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Mutex<Inner>>,
}

impl FakeGateway {
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let gateway = Self::default();
        gateway.lock().devices = devices.into_iter().map(|d| (d.id, d)).collect();
        gateway
    }

    /// A 250W card with a 100W floor, optionally with a fan at `fan` percent.
    pub fn gpu(id: DeviceId, temperature: u32, fan: Option<u8>) -> Device {
        Device {
            has_fan: fan.is_some(),
            min_power_limit: 100.0,
            max_power_limit: 300.0,
            default_power_limit: Some(250.0),
            temperature,
            power_draw: 180.0,
            power_limit: 250.0,
            fan_speed: fan,
            ..Device::new(id, "GeForce GTX 1080 Ti")
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn set_temperature(&self, id: DeviceId, temperature: u32) {
        if let Some(device) = self.lock().devices.get_mut(&id) {
            device.temperature = temperature;
        }
    }

    pub fn fail_discover(&self, fail: bool) {
        self.lock().fail_discover = fail;
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.lock().fail_refresh = fail;
    }

    pub fn fail_power_limits(&self, fail: bool) {
        self.lock().fail_power = fail;
    }

    /// Makes both fan-control-state and fan-speed commands fail.
    pub fn fail_fan_commands(&self, fail: bool) {
        self.lock().fail_fans = fail;
    }

    pub fn log(&self) -> CommandLog {
        self.lock().log.clone()
    }

    pub fn display(&self) -> Option<u32> {
        self.lock().display
    }
}

#[async_trait]
impl DeviceGateway for FakeGateway {
    async fn discover(&mut self) -> Result<DeviceMap> {
        let inner = self.lock();
        if inner.fail_discover {
            bail!("no devices found");
        }
        Ok(inner.devices.clone())
    }

    async fn refresh(&mut self, include_fans: bool) -> Result<DeviceMap> {
        let mut inner = self.lock();
        if inner.fail_refresh {
            bail!("telemetry unavailable");
        }
        inner.log.refreshes.push(include_fans);
        Ok(inner.devices.clone())
    }

    async fn set_fan_control_state(&mut self, id: DeviceId, manual: bool) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_fans {
            bail!("fan control state rejected");
        }
        inner.log.control_states.push((id, manual));
        if let Some(device) = inner.devices.get_mut(&id) {
            device.fan_control_manual = manual;
        }
        Ok(())
    }

    async fn apply_fan_speed_changes(&mut self, speeds: &BTreeMap<DeviceId, u8>) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_fans {
            bail!("fan speed rejected");
        }
        inner.log.fan_batches.push(speeds.clone());
        for (id, speed) in speeds {
            if let Some(device) = inner.devices.get_mut(id) {
                device.fan_speed = Some(*speed);
            }
        }
        Ok(())
    }

    async fn set_all_fans(&mut self, speed: u8) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_fans {
            bail!("fan speed rejected");
        }
        inner.log.all_fans.push(speed);
        for device in inner.devices.values_mut().filter(|d| d.has_fan) {
            device.fan_speed = Some(speed);
        }
        Ok(())
    }

    async fn set_power_limit(&mut self, id: DeviceId, watts: f64) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_power {
            bail!("power limit rejected");
        }
        inner.log.power_limits.push((id, watts));
        if let Some(device) = inner.devices.get_mut(&id) {
            device.power_limit = watts;
        }
        Ok(())
    }

    async fn persist(&self, _devices: &DeviceMap) -> Result<()> {
        self.lock().log.persisted += 1;
        Ok(())
    }

    fn set_display(&mut self, display_no: u32) {
        self.lock().display = Some(display_no);
    }
}
