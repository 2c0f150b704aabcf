use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::traits::AsyncProvider;
use crate::{
    config::{Policy, RuntimePaths},
    drivers::nvidia::{
        NvidiaGateway, telemetry::NvmlTelemetry, tool_io::SystemRunner, tools::NvidiaTools,
    },
    gateway::DeviceGateway,
    snapshot::SnapshotStore,
};

/// Provider for the coordinator's device gateway.
pub type GatewayProvider = Box<dyn AsyncProvider<Box<dyn DeviceGateway>>>;

/// Builds the NVIDIA gateway: initializes NVML and prepares the snapshot directory.
#[derive(Debug, Clone)]
pub struct NvidiaGatewayProvider {
    data_dir: PathBuf,
    display: u32,
    debug: bool,
}

impl NvidiaGatewayProvider {
    pub fn new(policy: &Policy, paths: &RuntimePaths) -> Self {
        Self {
            data_dir: paths.data_dir.clone(),
            display: policy.xorg_display_no,
            debug: policy.debug,
        }
    }
}

#[async_trait]
impl AsyncProvider<Box<dyn DeviceGateway>> for NvidiaGatewayProvider {
    async fn provide(&self) -> Result<Box<dyn DeviceGateway>> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("unable to create {}", self.data_dir.display()))?;

        let telemetry = NvmlTelemetry::init()?;
        let tools = NvidiaTools::new(Box::new(SystemRunner), self.display, self.debug);

        Ok(Box::new(NvidiaGateway::new(
            Box::new(telemetry),
            tools,
            SnapshotStore::new(&self.data_dir),
        )))
    }
}
