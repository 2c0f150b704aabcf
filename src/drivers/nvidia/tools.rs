use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use log::debug;

use crate::device::DeviceId;

use super::{
    protocol::{Command, parse_fan_owners, parse_fan_speeds},
    tool_io::{ToolOutput, ToolRunner},
};

/// Issues [`Command`]s through a [`ToolRunner`].
#[derive(Debug)]
pub struct NvidiaTools {
    runner: Box<dyn ToolRunner>,
    display: u32,
    debug: bool,
}

impl NvidiaTools {
    pub fn new(runner: Box<dyn ToolRunner>, display: u32, debug: bool) -> Self {
        Self {
            runner,
            display,
            debug,
        }
    }

    pub fn set_display(&mut self, display: u32) {
        self.display = display;
    }

    async fn execute(&self, command: &Command) -> Result<ToolOutput> {
        let args = command.to_args();
        let envs = if command.needs_display() {
            vec![("DISPLAY".to_string(), format!(":{}", self.display))]
        } else {
            Vec::new()
        };
        let capture = self.debug || command.reads_output();

        let output = self
            .runner
            .run(command.program(), &args, &envs, capture)
            .await?;

        if self.debug {
            debug!(
                "{} {}: {}{}",
                command.program(),
                args.join(" "),
                output.stdout.trim_end(),
                output.stderr.trim_end()
            );
        }
        Ok(output)
    }

    async fn apply(&self, command: &Command) -> Result<()> {
        let output = self.execute(command).await?;
        if !output.success {
            bail!(
                "{} {} reported failure",
                command.program(),
                command.to_args().join(" ")
            );
        }
        Ok(())
    }

    /// GPUs with a fan. A non-zero exit still yields whatever was printed.
    pub async fn query_fan_owners(&self) -> Result<BTreeSet<DeviceId>> {
        let output = self
            .execute(&Command::QueryFans)
            .await
            .context("Failed to query fans")?;
        Ok(parse_fan_owners(&output.stdout))
    }

    pub async fn query_fan_speeds(&self, fans: &[DeviceId]) -> Result<BTreeMap<DeviceId, u8>> {
        if fans.is_empty() {
            return Ok(BTreeMap::new());
        }
        let output = self
            .execute(&Command::QueryFanSpeeds {
                fans: fans.to_vec(),
            })
            .await
            .context("Failed to query fan speeds")?;
        Ok(parse_fan_speeds(&output.stdout, fans))
    }

    pub async fn set_fan_control_state(&self, gpu: DeviceId, manual: bool) -> Result<()> {
        self.apply(&Command::SetFanControlState { gpu, manual }).await
    }

    pub async fn set_fan_speeds(&self, speeds: &BTreeMap<DeviceId, u8>) -> Result<()> {
        if speeds.is_empty() {
            return Ok(());
        }
        self.apply(&Command::SetFanSpeeds {
            speeds: speeds.clone(),
        })
        .await
    }

    pub async fn set_power_limit(&self, gpu: DeviceId, watts: f64) -> Result<()> {
        self.apply(&Command::SetPowerLimit { gpu, watts }).await
    }
}
