//! NVIDIA back end: NVML for telemetry, `nvidia-settings` for fans and
//! `nvidia-smi` for power limits.

pub mod protocol;
pub mod telemetry;
pub mod tool_io;
pub mod tools;

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::{info, warn};

use crate::{
    device::{DeviceId, DeviceMap},
    gateway::DeviceGateway,
    snapshot::SnapshotStore,
};

use self::{telemetry::TelemetrySource, tools::NvidiaTools};

#[derive(Debug)]
pub struct NvidiaGateway {
    telemetry: Box<dyn TelemetrySource>,
    tools: NvidiaTools,
    snapshots: SnapshotStore,
    devices: DeviceMap,
}

impl NvidiaGateway {
    pub fn new(
        telemetry: Box<dyn TelemetrySource>,
        tools: NvidiaTools,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            telemetry,
            tools,
            snapshots,
            devices: DeviceMap::new(),
        }
    }

    fn fan_ids(&self) -> Vec<DeviceId> {
        self.devices
            .values()
            .filter(|d| d.has_fan)
            .map(|d| d.id)
            .collect()
    }

    async fn persist_current(&self) {
        if let Err(e) = self.persist(&self.devices).await {
            warn!("{e:#}");
        }
    }
}

#[async_trait]
impl DeviceGateway for NvidiaGateway {
    async fn discover(&mut self) -> Result<DeviceMap> {
        let mut devices = self.telemetry.enumerate()?;
        if devices.is_empty() {
            bail!("No NVIDIA devices found");
        }

        let owners = self.tools.query_fan_owners().await?;
        for device in devices.values_mut() {
            device.has_fan = owners.contains(&device.id);
            info!(
                "Found device {}: {} (fan: {}, power limit {}-{}W)",
                device.id,
                device.name,
                device.has_fan,
                device.min_power_limit as i64,
                device.max_power_limit as i64
            );
        }

        self.devices = devices;
        Ok(self.devices.clone())
    }

    async fn refresh(&mut self, include_fans: bool) -> Result<DeviceMap> {
        let mut sampled = 0;
        for device in self.devices.values_mut() {
            match self.telemetry.sample(device) {
                Ok(()) => sampled += 1,
                Err(e) => warn!("device {}: keeping last reading: {e:#}", device.id),
            }
        }
        if sampled == 0 && !self.devices.is_empty() {
            bail!("Failed to read telemetry of any device");
        }

        if include_fans {
            let fans = self.fan_ids();
            let speeds = self.tools.query_fan_speeds(&fans).await?;
            for id in fans {
                if let Some(device) = self.devices.get_mut(&id) {
                    device.fan_speed = speeds.get(&id).copied();
                }
            }
        }

        self.persist_current().await;
        Ok(self.devices.clone())
    }

    async fn set_fan_control_state(&mut self, id: DeviceId, manual: bool) -> Result<()> {
        self.tools.set_fan_control_state(id, manual).await?;
        if let Some(device) = self.devices.get_mut(&id) {
            device.fan_control_manual = manual;
        }
        Ok(())
    }

    async fn apply_fan_speed_changes(&mut self, speeds: &BTreeMap<DeviceId, u8>) -> Result<()> {
        self.tools.set_fan_speeds(speeds).await?;
        for (id, speed) in speeds {
            if let Some(device) = self.devices.get_mut(id) {
                device.fan_speed = Some(*speed);
            }
        }
        self.persist_current().await;
        Ok(())
    }

    async fn set_all_fans(&mut self, speed: u8) -> Result<()> {
        let speeds = self.fan_ids().into_iter().map(|id| (id, speed)).collect();
        self.apply_fan_speed_changes(&speeds).await
    }

    async fn set_power_limit(&mut self, id: DeviceId, watts: f64) -> Result<()> {
        self.tools.set_power_limit(id, watts).await?;
        if let Some(device) = self.devices.get_mut(&id) {
            device.power_limit = watts.trunc();
        }
        Ok(())
    }

    async fn persist(&self, devices: &DeviceMap) -> Result<()> {
        self.snapshots.write_all(devices)
    }

    fn set_display(&mut self, display_no: u32) {
        self.tools.set_display(display_no);
    }
}
